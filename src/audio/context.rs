use std::fmt;
use std::sync::Arc;

use super::buffer::AudioBuffer;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum AudioError {
    #[error("No audio output device available")]
    NoDevice,
    #[error("Audio backend error: {0}")]
    Backend(String),
    #[error("Unknown source node {0}")]
    UnknownNode(NodeId),
    #[error("Cannot allocate a buffer of {frames} frames x {channels} channels")]
    Allocation { frames: usize, channels: u16 },
    #[error("Audio context is closed")]
    Closed,
}

/// Power state of an audio context.
///
/// Contexts start `Suspended` and must be resumed from a user gesture
/// before sources produce sound or the clock advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Suspended,
    Running,
    Closed,
}

/// Handle to a one-shot buffer source owned by a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The audio output graph.
///
/// Sources are one-shot: created bound to a buffer, started once at an
/// offset, then stopped and disconnected. A source's effective speed is
/// `rate * 2^(detune / 1200)`.
///
/// Completion is reported as an event rather than a callback. A source
/// carries an optional ended tag; when it finishes playing (or is stopped)
/// while a tag is attached, the tag is queued and later returned by
/// [`AudioContext::take_ended`]. Clearing the tag before stopping keeps a
/// manual stop from looking like a natural end.
pub trait AudioContext {
    fn state(&self) -> ContextState;

    /// Bring a suspended context to `Running`.
    fn resume(&mut self) -> Result<(), AudioError>;

    /// Audio clock in seconds. Only advances while `Running`.
    fn current_time(&self) -> f64;

    /// Allocate a zeroed planar buffer.
    fn create_buffer(
        &mut self,
        channels: u16,
        frames: usize,
        sample_rate: u32,
    ) -> Result<AudioBuffer, AudioError>;

    fn create_source(&mut self, buffer: Arc<AudioBuffer>) -> Result<NodeId, AudioError>;

    fn set_playback_rate(&mut self, node: NodeId, rate: f32) -> Result<(), AudioError>;

    /// Pitch shift in cents.
    fn set_detune(&mut self, node: NodeId, cents: f32) -> Result<(), AudioError>;

    fn set_ended_tag(&mut self, node: NodeId, tag: Option<u64>) -> Result<(), AudioError>;

    /// Begin producing sound `offset` seconds into the buffer.
    fn start_source(&mut self, node: NodeId, offset: f64) -> Result<(), AudioError>;

    fn stop_source(&mut self, node: NodeId) -> Result<(), AudioError>;

    /// Detach the source from the output and release it.
    fn disconnect(&mut self, node: NodeId);

    /// Drain the tags of sources that ended since the last call.
    fn take_ended(&mut self) -> Vec<u64>;
}

/// Effective playback speed of a source, as the audio clock consumes it.
pub fn effective_rate(rate: f32, detune_cents: f32) -> f64 {
    rate as f64 * 2f64.powf(detune_cents as f64 / 1200.0)
}

type ContextFactory<C> = Box<dyn FnMut() -> Result<C, AudioError>>;

/// Lazily created, process-wide audio context.
///
/// The context is built on first use and reused afterwards. Callers borrow
/// it and pass it by reference into the playback controller.
pub struct SharedContext<C> {
    context: Option<C>,
    factory: ContextFactory<C>,
}

impl<C: AudioContext> SharedContext<C> {
    pub fn new<F>(factory: F) -> Self
    where
        F: FnMut() -> Result<C, AudioError> + 'static,
    {
        Self {
            context: None,
            factory: Box::new(factory),
        }
    }

    /// Wrap an already created context.
    pub fn with_context(context: C) -> Self {
        Self {
            context: Some(context),
            factory: Box::new(|| Err(AudioError::Closed)),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.context.is_some()
    }

    /// The context, if it has been created.
    pub fn get_mut(&mut self) -> Option<&mut C> {
        self.context.as_mut()
    }

    pub fn get(&self) -> Option<&C> {
        self.context.as_ref()
    }

    /// Create the context on first call, then return the same one.
    pub fn get_or_init(&mut self) -> Result<&mut C, AudioError> {
        if self.context.is_none() {
            let context = (self.factory)()?;
            log::info!("Created audio context ({:?})", context.state());
            self.context = Some(context);
        }
        self.context.as_mut().ok_or(AudioError::Closed)
    }

    /// Create the context if needed and resume it from a suspended state.
    pub fn ensure_running(&mut self) -> Result<&mut C, AudioError> {
        let context = self.get_or_init()?;
        match context.state() {
            ContextState::Running => {}
            ContextState::Suspended => {
                log::debug!("Resuming suspended audio context");
                context.resume()?;
            }
            ContextState::Closed => return Err(AudioError::Closed),
        }
        Ok(context)
    }
}
