//! Hosted model collaborators.
//!
//! The session talks to three remote capabilities through these traits:
//! speech generation, policy-safe rewriting, and filename generation. The
//! `gemini` feature provides a blocking HTTP implementation of all three.

#[cfg(feature = "gemini")]
pub mod gemini;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("Prohibited content: {reason}")]
    ProhibitedContent { reason: String },
    #[error("Rewrite blocked: {reason}")]
    RewriteBlocked { reason: String },
    #[error("No audio data received from API")]
    MissingAudio,
    #[error("No text received from API")]
    MissingText,
    #[error("Request failed: {0}")]
    Request(String),
    #[error("Unexpected response: {0}")]
    Response(String),
}

/// Text-to-speech generation.
pub trait SpeechService {
    /// Generate speech for `text`, returning base64-encoded 16-bit PCM
    /// (24 kHz mono).
    fn generate_speech(
        &self,
        text: &str,
        temperature: f32,
        voice: &str,
    ) -> Result<String, ServiceError>;
}

/// Rewrites text that was rejected by the content policy.
pub trait RewriteService {
    /// Return a revised version with profanity partially masked and
    /// policy-risk themes removed.
    fn rewrite(&self, text: &str) -> Result<String, ServiceError>;
}

/// Summarizes text into a short filename stem.
pub trait TitleService {
    /// A short hyphenated lowercase stem, without extension.
    fn generate_title(&self, text: &str) -> Result<String, ServiceError>;
}
