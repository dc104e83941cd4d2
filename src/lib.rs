//! # story-reader
//!
//! A Rust library for reading generated speech aloud: it turns the base64
//! PCM payload returned by a hosted text-to-speech model into a seekable,
//! re-pitchable playback session with accurate progress tracking.
//!
//! ## Features
//!
//! - **Decoding**: base64 payload to raw 16-bit PCM to a normalized float buffer
//! - **Playback**: one live source at a time, with speed and pitch applied live
//! - **Progress**: a cooperative per-frame tracker driven by the audio clock
//! - **Session**: cache of default voice phrases, stale-result guards, WAV export
//!
//! Enable backends via Cargo features:
//! - `gemini` - blocking HTTP client for the hosted speech/rewrite/title models
//! - `cpal` - speaker output through the default audio device
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! story-reader = { version = "2026.2", features = ["gemini", "cpal"] }
//! ```
//!
//! ```ignore
//! use story_reader::audio::device::DeviceContext;
//! use story_reader::services::gemini::GeminiClient;
//! use story_reader::session::ReaderSession;
//! use story_reader::config::Settings;
//!
//! let client = GeminiClient::from_env()?;
//! let mut session = ReaderSession::new(Settings::default(), DeviceContext::open);
//! session.set_text("AITA for reading my sister's diary out loud?");
//! session.handle_play(&client)?;
//! loop {
//!     let frame = session.tick();
//!     if !frame.playing { break; }
//!     std::thread::sleep(std::time::Duration::from_millis(16));
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod audio;
pub mod config;
pub mod playback;
pub mod services;
pub mod session;
pub mod text;

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

/// Sample rate of the audio returned by the speech model.
pub const SAMPLE_RATE: u32 = 24000;

/// Channel count of the audio returned by the speech model.
pub const CHANNELS: u16 = 1;

/// Bit depth of the raw PCM payload.
pub const BITS_PER_SAMPLE: u16 = 16;

/// Raw audio produced by one successful generation.
///
/// Holds 16-bit signed little-endian PCM bytes. The bytes are shared, so
/// cloning a payload (for example into the voice cache) is cheap.
#[derive(Debug, Clone, PartialEq)]
pub struct RawAudio {
    /// Little-endian i16 PCM bytes
    pub data: Arc<[u8]>,
    /// Sample rate of the audio (24000 for the hosted model)
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
}

impl RawAudio {
    /// Wrap PCM bytes in the model's native format (24 kHz mono).
    pub fn new(data: Vec<u8>) -> Self {
        Self::with_format(data, SAMPLE_RATE, CHANNELS)
    }

    pub fn with_format(data: Vec<u8>, sample_rate: u32, channels: u16) -> Self {
        Self {
            data: data.into(),
            sample_rate,
            channels,
        }
    }

    /// Number of whole 16-bit samples, across all channels.
    pub fn sample_count(&self) -> usize {
        self.data.len() / 2
    }

    /// Duration of the audio in seconds.
    pub fn duration_secs(&self) -> f64 {
        let frames = self.sample_count() / self.channels.max(1) as usize;
        frames as f64 / self.sample_rate as f64
    }

    /// Iterate the payload as i16 samples. A trailing odd byte is ignored.
    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.data
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
    }

    /// Encode the audio as an uncompressed 16-bit PCM WAV file in memory.
    pub fn to_wav_bytes(&self) -> Result<Vec<u8>, hound::Error> {
        let mut cursor = Cursor::new(Vec::with_capacity(44 + self.data.len()));
        {
            let mut writer = hound::WavWriter::new(&mut cursor, self.wav_spec())?;
            for sample in self.samples() {
                writer.write_sample(sample)?;
            }
            writer.finalize()?;
        }
        Ok(cursor.into_inner())
    }

    /// Write the audio to a 16-bit PCM WAV file.
    pub fn write_wav(&self, path: &Path) -> Result<(), hound::Error> {
        let mut writer = hound::WavWriter::create(path, self.wav_spec())?;
        for sample in self.samples() {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        Ok(())
    }

    fn wav_spec(&self) -> hound::WavSpec {
        hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: BITS_PER_SAMPLE,
            sample_format: hound::SampleFormat::Int,
        }
    }
}
