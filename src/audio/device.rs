//! Speaker output through the default cpal device.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::buffer::AudioBuffer;
use super::context::{effective_rate, AudioContext, AudioError, ContextState, NodeId};

struct Voice {
    buffer: Arc<AudioBuffer>,
    rate: f32,
    detune: f32,
    /// Fractional frame index into the buffer
    playhead: f64,
    started: bool,
    finished: bool,
    ended_tag: Option<u64>,
}

impl Voice {
    fn is_sounding(&self) -> bool {
        self.started && !self.finished
    }

    /// Next output sample, linearly interpolated and downmixed to mono.
    fn next_sample(&mut self, out_rate: f64) -> f32 {
        let index = self.playhead as usize;
        if index >= self.buffer.len() {
            self.finished = true;
            return 0.0;
        }
        let frac = (self.playhead - index as f64) as f32;
        let channels = self.buffer.number_of_channels().max(1) as usize;

        let mut sum = 0.0;
        for channel in 0..channels {
            if let Some(data) = self.buffer.channel_data(channel) {
                let a = data[index];
                let b = data.get(index + 1).copied().unwrap_or(a);
                sum += a + (b - a) * frac;
            }
        }

        let step = self.buffer.sample_rate() as f64 / out_rate;
        self.playhead += step * effective_rate(self.rate, self.detune);
        sum / channels as f32
    }
}

/// State shared between the context and the output callback.
#[derive(Default)]
struct Mixer {
    voices: BTreeMap<NodeId, Voice>,
    ended: Vec<u64>,
    frames_rendered: u64,
    running: bool,
}

impl Mixer {
    fn render(&mut self, data: &mut [f32], channels: usize, out_rate: f64) {
        if !self.running || channels == 0 {
            data.fill(0.0);
            return;
        }

        for frame in data.chunks_mut(channels) {
            let mut mix = 0.0f32;
            for voice in self.voices.values_mut().filter(|v| v.is_sounding()) {
                mix += voice.next_sample(out_rate);
            }
            frame.fill(mix.clamp(-1.0, 1.0));
        }
        self.frames_rendered += (data.len() / channels) as u64;

        for voice in self.voices.values_mut() {
            if voice.finished {
                if let Some(tag) = voice.ended_tag.take() {
                    self.ended.push(tag);
                }
            }
        }
    }

    fn finish(&mut self, node: NodeId) {
        if let Some(voice) = self.voices.get_mut(&node) {
            voice.finished = true;
            if let Some(tag) = voice.ended_tag.take() {
                self.ended.push(tag);
            }
        }
    }

    fn voice_mut(&mut self, node: NodeId) -> Result<&mut Voice, AudioError> {
        self.voices
            .get_mut(&node)
            .ok_or(AudioError::UnknownNode(node))
    }
}

/// Audio context bound to the system's default output device.
///
/// One output stream is opened up front and kept for the lifetime of the
/// context; sources are mixed into it. The clock counts rendered frames, so
/// it stands still while the context is suspended.
pub struct DeviceContext {
    mixer: Arc<Mutex<Mixer>>,
    stream: cpal::Stream,
    sample_rate: u32,
    channels: u16,
    state: ContextState,
    next_id: u64,
}

impl DeviceContext {
    /// Open the default output device. The context starts suspended.
    pub fn open() -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(AudioError::NoDevice)?;
        let supported = device
            .default_output_config()
            .map_err(|e| AudioError::Backend(format!("Failed to get output config: {e}")))?;

        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        let config: cpal::StreamConfig = supported.into();

        let mixer = Arc::new(Mutex::new(Mixer::default()));
        let render_mixer = Arc::clone(&mixer);
        let out_channels = channels as usize;
        let out_rate = sample_rate as f64;

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| match render_mixer.lock() {
                    Ok(mut mixer) => mixer.render(data, out_channels, out_rate),
                    Err(_) => data.fill(0.0),
                },
                |err| log::error!("Audio output error: {err}"),
                None,
            )
            .map_err(|e| AudioError::Backend(format!("Failed to build output stream: {e}")))?;

        log::info!("Opened output device: {sample_rate} Hz, {channels} channels");
        Ok(Self {
            mixer,
            stream,
            sample_rate,
            channels,
            state: ContextState::Suspended,
            next_id: 0,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Pause output and the clock.
    pub fn suspend(&mut self) -> Result<(), AudioError> {
        if self.state != ContextState::Running {
            return Ok(());
        }
        self.stream
            .pause()
            .map_err(|e| AudioError::Backend(e.to_string()))?;
        self.mixer().running = false;
        self.state = ContextState::Suspended;
        Ok(())
    }

    /// Stop output for good and drop every source.
    pub fn close(&mut self) {
        if let Err(e) = self.stream.pause() {
            log::warn!("Failed to pause output stream: {e}");
        }
        let mut mixer = self.mixer();
        mixer.running = false;
        mixer.voices.clear();
        drop(mixer);
        self.state = ContextState::Closed;
    }

    fn mixer(&self) -> MutexGuard<'_, Mixer> {
        self.mixer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AudioContext for DeviceContext {
    fn state(&self) -> ContextState {
        self.state
    }

    fn resume(&mut self) -> Result<(), AudioError> {
        match self.state {
            ContextState::Closed => Err(AudioError::Closed),
            ContextState::Running => Ok(()),
            ContextState::Suspended => {
                self.stream
                    .play()
                    .map_err(|e| AudioError::Backend(format!("Failed to start output: {e}")))?;
                self.mixer().running = true;
                self.state = ContextState::Running;
                Ok(())
            }
        }
    }

    fn current_time(&self) -> f64 {
        self.mixer().frames_rendered as f64 / self.sample_rate as f64
    }

    fn create_buffer(
        &mut self,
        channels: u16,
        frames: usize,
        sample_rate: u32,
    ) -> Result<AudioBuffer, AudioError> {
        if self.state == ContextState::Closed {
            return Err(AudioError::Closed);
        }
        if channels == 0 || frames == 0 {
            return Err(AudioError::Allocation { frames, channels });
        }
        Ok(AudioBuffer::silent(channels, frames, sample_rate))
    }

    fn create_source(&mut self, buffer: Arc<AudioBuffer>) -> Result<NodeId, AudioError> {
        if self.state == ContextState::Closed {
            return Err(AudioError::Closed);
        }
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.mixer().voices.insert(
            id,
            Voice {
                buffer,
                rate: 1.0,
                detune: 0.0,
                playhead: 0.0,
                started: false,
                finished: false,
                ended_tag: None,
            },
        );
        Ok(id)
    }

    fn set_playback_rate(&mut self, node: NodeId, rate: f32) -> Result<(), AudioError> {
        self.mixer().voice_mut(node)?.rate = rate;
        Ok(())
    }

    fn set_detune(&mut self, node: NodeId, cents: f32) -> Result<(), AudioError> {
        self.mixer().voice_mut(node)?.detune = cents;
        Ok(())
    }

    fn set_ended_tag(&mut self, node: NodeId, tag: Option<u64>) -> Result<(), AudioError> {
        self.mixer().voice_mut(node)?.ended_tag = tag;
        Ok(())
    }

    fn start_source(&mut self, node: NodeId, offset: f64) -> Result<(), AudioError> {
        let mut mixer = self.mixer();
        let voice = mixer.voice_mut(node)?;
        if voice.started {
            return Err(AudioError::Backend(format!("source {node} already started")));
        }
        let frames = voice.buffer.len() as f64;
        voice.started = true;
        voice.playhead = (offset.max(0.0) * voice.buffer.sample_rate() as f64).min(frames);
        if voice.playhead >= frames {
            mixer.finish(node);
        }
        Ok(())
    }

    fn stop_source(&mut self, node: NodeId) -> Result<(), AudioError> {
        let mut mixer = self.mixer();
        if !mixer.voice_mut(node)?.started {
            return Err(AudioError::Backend(format!("source {node} was never started")));
        }
        mixer.finish(node);
        Ok(())
    }

    fn disconnect(&mut self, node: NodeId) {
        self.mixer().voices.remove(&node);
    }

    fn take_ended(&mut self) -> Vec<u64> {
        std::mem::take(&mut self.mixer().ended)
    }
}
