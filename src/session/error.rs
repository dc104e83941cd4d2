use crate::audio::{AudioConversionError, AudioError, DecodeError};
use crate::playback::PlaybackError;
use crate::services::ServiceError;

const EMPTY_TEXT_MESSAGE: &str = "Please enter a story to read.";
const PROHIBITED_MESSAGE: &str = "The story could not be processed due to the content policy. \
     Please revise the text or use our suggestion.";
const REWRITE_FAILED_MESSAGE: &str =
    "The story was blocked and we failed to generate a suggestion. Please revise it manually.";
const GENERATION_FAILED_MESSAGE: &str = "Failed to generate audio. The story might be too \
     complex or too long. Please try a shorter story or try again later.";
const PLAYBACK_FAILED_MESSAGE: &str = "Audio playback failed. Please try again.";
const EXPORT_FAILED_MESSAGE: &str = "Could not save the audio file.";

/// Everything that can go wrong in a reader session.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ReaderError {
    #[error("Story text is empty")]
    InputValidation,
    #[error("Generation rejected by content policy: {reason}")]
    ProhibitedContent { reason: String },
    #[error("Rewrite failed: {0}")]
    RewriteFailure(String),
    #[error("Generation failed: {0}")]
    GenerationFailure(String),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    AudioConversion(#[from] AudioConversionError),
    /// Never surfaced; the fallback title is used instead.
    #[error("Title generation failed: {0}")]
    TitleGeneration(String),
    #[error(transparent)]
    Playback(#[from] PlaybackError),
    #[error("No audio to export")]
    NoAudio,
    #[error("Failed to export audio: {0}")]
    Export(String),
}

impl ReaderError {
    /// Map a generation-call failure into the session taxonomy.
    pub fn from_generation(err: ServiceError) -> Self {
        match err {
            ServiceError::ProhibitedContent { reason } => Self::ProhibitedContent { reason },
            other => Self::GenerationFailure(other.to_string()),
        }
    }

    /// The single message shown to the user for this category.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::InputValidation => EMPTY_TEXT_MESSAGE,
            Self::ProhibitedContent { .. } => PROHIBITED_MESSAGE,
            Self::RewriteFailure(_) => REWRITE_FAILED_MESSAGE,
            Self::GenerationFailure(_)
            | Self::Decode(_)
            | Self::AudioConversion(_)
            | Self::TitleGeneration(_) => GENERATION_FAILED_MESSAGE,
            Self::Playback(_) => PLAYBACK_FAILED_MESSAGE,
            Self::NoAudio | Self::Export(_) => EXPORT_FAILED_MESSAGE,
        }
    }

    /// Whether this failure starts the automatic rewrite suggestion.
    pub fn triggers_rewrite(&self) -> bool {
        matches!(self, Self::ProhibitedContent { .. })
    }
}

impl From<AudioError> for ReaderError {
    fn from(err: AudioError) -> Self {
        Self::Playback(PlaybackError::Audio(err))
    }
}

#[cfg(test)]
mod tests {
    use super::ReaderError;
    use crate::audio::AudioConversionError;
    use crate::services::ServiceError;

    #[test]
    fn prohibited_content_keeps_its_reason() {
        let err = ReaderError::from_generation(ServiceError::ProhibitedContent {
            reason: "HARM".to_string(),
        });
        assert_eq!(
            err,
            ReaderError::ProhibitedContent {
                reason: "HARM".to_string()
            }
        );
        assert!(err.triggers_rewrite());
    }

    #[test]
    fn other_service_errors_are_generic_failures() {
        let err = ReaderError::from_generation(ServiceError::MissingAudio);
        assert!(matches!(err, ReaderError::GenerationFailure(_)));
        assert!(!err.triggers_rewrite());
    }

    #[test]
    fn malformed_payloads_share_the_generation_message() {
        let generic = ReaderError::GenerationFailure("timeout".to_string());
        let conversion = ReaderError::AudioConversion(AudioConversionError::Empty);
        assert_eq!(generic.user_message(), conversion.user_message());
    }
}
