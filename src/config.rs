//! Session settings.
//!
//! Settings can be built in code with [`SettingsBuilder`] or loaded from a
//! JSON file. Missing fields take their defaults:
//!
//! ```json
//! {
//!   "voice": "Kore",
//!   "temperature": 0.7,
//!   "playback_rate": 1.25
//! }
//! ```

use std::path::Path;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::playback::{clamp_detune, clamp_rate};
use crate::text::DEFAULT_TITLE;

pub const MIN_TEMPERATURE: f32 = 0.0;
pub const MAX_TEMPERATURE: f32 = 2.0;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid settings file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("No voices configured")]
    NoVoices,
    #[error("Default voice '{0}' is not one of the configured voices")]
    UnknownVoice(String),
}

/// A prebuilt voice and the phrase it greets with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceProfile {
    pub id: String,
    /// Canned phrase whose audio is cached per voice.
    pub default_phrase: String,
}

impl VoiceProfile {
    pub fn new(id: impl Into<String>, default_phrase: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            default_phrase: default_phrase.into(),
        }
    }

    fn greeting(id: &str) -> Self {
        Self::new(
            id,
            format!("Hi, I'm {id}. Paste a story and I'll read it aloud for you."),
        )
    }
}

/// Initial state and tunables of a reader session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[builder(default, setter(into))]
#[serde(default)]
pub struct Settings {
    /// Voice selected at startup.
    pub voice: String,
    /// Voices offered to the user, in display order.
    pub voices: Vec<VoiceProfile>,
    /// Generation temperature, 0.0–2.0.
    pub temperature: f32,
    /// Playback speed multiplier, 0.5–2.0.
    pub playback_rate: f32,
    /// Pitch shift in cents, -1200–1200.
    pub pitch_cents: f32,
    /// Filename stem used when no title has been generated.
    pub fallback_title: String,
    /// Generate every voice's default phrase at startup.
    pub preload_voices: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            voice: "Charon".to_string(),
            voices: ["Charon", "Kore", "Puck", "Fenrir", "Aoede", "Zephyr"]
                .into_iter()
                .map(VoiceProfile::greeting)
                .collect(),
            temperature: 0.3,
            playback_rate: 1.0,
            pitch_cents: 0.0,
            fallback_title: DEFAULT_TITLE.to_string(),
            preload_voices: true,
        }
    }
}

impl Settings {
    /// Load settings from a JSON file and validate them.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&content)?;
        log::info!("Loaded settings from {}", path.display());
        settings.validate()
    }

    /// Clamp numeric ranges and check the voice list.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        if self.voices.is_empty() {
            return Err(ConfigError::NoVoices);
        }
        if self.voice_profile(&self.voice).is_none() {
            return Err(ConfigError::UnknownVoice(self.voice));
        }
        self.temperature = clamp_temperature(self.temperature);
        self.playback_rate = clamp_rate(self.playback_rate);
        self.pitch_cents = clamp_detune(self.pitch_cents);
        if self.fallback_title.trim().is_empty() {
            self.fallback_title = DEFAULT_TITLE.to_string();
        }
        Ok(self)
    }

    pub fn voice_profile(&self, id: &str) -> Option<&VoiceProfile> {
        self.voices.iter().find(|v| v.id == id)
    }

    /// The canned phrase of `voice`, if the voice is known.
    pub fn default_phrase(&self, voice: &str) -> Option<&str> {
        self.voice_profile(voice).map(|v| v.default_phrase.as_str())
    }
}

pub fn clamp_temperature(temperature: f32) -> f32 {
    if temperature.is_nan() {
        return Settings::default().temperature;
    }
    temperature.clamp(MIN_TEMPERATURE, MAX_TEMPERATURE)
}
