use super::context::{AudioContext, AudioError};

/// Normalization divisor for signed 16-bit PCM.
const I16_SCALE: f32 = 32768.0;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum AudioConversionError {
    #[error("Audio payload is empty")]
    Empty,
    #[error("Invalid audio format: {0}")]
    Format(String),
    #[error("Failed to allocate playback buffer: {0}")]
    Allocation(#[from] AudioError),
}

/// Planar floating-point audio, one `Vec<f32>` per channel.
///
/// Immutable once built. Playback shares it behind an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    channels: Vec<Vec<f32>>,
    frames: usize,
    sample_rate: u32,
}

impl AudioBuffer {
    /// A zeroed buffer. Contexts call this from `create_buffer`.
    pub fn silent(channels: u16, frames: usize, sample_rate: u32) -> Self {
        Self {
            channels: (0..channels).map(|_| vec![0.0; frames]).collect(),
            frames,
            sample_rate,
        }
    }

    pub fn number_of_channels(&self) -> u16 {
        self.channels.len() as u16
    }

    /// Frames per channel.
    pub fn len(&self) -> usize {
        self.frames
    }

    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames as f64 / self.sample_rate as f64
    }

    pub fn channel_data(&self, channel: usize) -> Option<&[f32]> {
        self.channels.get(channel).map(Vec::as_slice)
    }

    fn channel_data_mut(&mut self, channel: usize) -> Option<&mut [f32]> {
        self.channels.get_mut(channel).map(Vec::as_mut_slice)
    }
}

/// Convert little-endian i16 PCM into a playable float buffer.
///
/// Interleaved input is split into planar channels. Each sample becomes
/// `value / 32768`, so `i16::MIN` maps to exactly `-1.0` and `i16::MAX` to
/// just under `1.0`. A trailing odd byte is ignored.
pub fn pcm16_to_buffer<C: AudioContext + ?Sized>(
    context: &mut C,
    data: &[u8],
    sample_rate: u32,
    channels: u16,
) -> Result<AudioBuffer, AudioConversionError> {
    if data.is_empty() {
        return Err(AudioConversionError::Empty);
    }
    if channels == 0 || sample_rate == 0 {
        return Err(AudioConversionError::Format(format!(
            "{channels} channels at {sample_rate} Hz"
        )));
    }

    let sample_count = data.len() / 2;
    let frames = sample_count / channels as usize;
    let mut buffer = context.create_buffer(channels, frames, sample_rate)?;
    if buffer.len() != frames || buffer.number_of_channels() != channels {
        return Err(AudioConversionError::Format(format!(
            "context allocated {} frames x {} channels, expected {frames} x {channels}",
            buffer.len(),
            buffer.number_of_channels()
        )));
    }

    for channel in 0..channels as usize {
        let Some(out) = buffer.channel_data_mut(channel) else {
            return Err(AudioConversionError::Format(format!(
                "context returned a buffer without channel {channel}"
            )));
        };
        for (frame, sample) in out.iter_mut().enumerate() {
            let offset = (frame * channels as usize + channel) * 2;
            let value = i16::from_le_bytes([data[offset], data[offset + 1]]);
            *sample = value as f32 / I16_SCALE;
        }
    }

    Ok(buffer)
}
