use std::sync::Arc;

use crate::audio::context::effective_rate;
use crate::audio::{AudioBuffer, AudioContext, AudioError, NodeId};

use super::tracker::{Progress, ProgressTracker, SessionClock};

/// Slowest and fastest supported playback speed.
pub const MIN_RATE: f32 = 0.5;
pub const MAX_RATE: f32 = 2.0;

/// Pitch range in cents (one octave either way).
pub const MIN_DETUNE: f32 = -1200.0;
pub const MAX_DETUNE: f32 = 1200.0;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PlaybackError {
    #[error("No audio loaded. Generate speech before playing.")]
    NoBuffer,
    #[error(transparent)]
    Audio(#[from] AudioError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Nothing has played since the buffer was loaded or cleared.
    Idle,
    Playing,
    /// Paused by the user or ended naturally; resumes from the stored offset.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlaybackEvent {
    Progress { position: f64 },
    /// The run reached the end of the buffer without being stopped.
    Ended { duration: f64 },
}

#[derive(Debug)]
struct ActiveRun {
    node: NodeId,
    epoch: u64,
    clock: SessionClock,
}

/// Owns the decoded buffer and the single live source playing it.
///
/// Each start creates a new run with a fresh epoch. The epoch is attached to
/// the source as its ended tag and to the progress tracker, and any ended
/// notification or tick carrying an older epoch is dropped. Starting a run
/// always tears the previous one down first, so at most one source exists.
#[derive(Debug)]
pub struct PlaybackController {
    buffer: Option<Arc<AudioBuffer>>,
    active: Option<ActiveRun>,
    tracker: ProgressTracker,
    rate: f32,
    detune: f32,
    offset: f64,
    position: f64,
    epoch: u64,
    state: PlaybackState,
}

impl Default for PlaybackController {
    fn default() -> Self {
        Self::new(1.0, 0.0)
    }
}

impl PlaybackController {
    /// An empty controller. `rate` and `detune` are clamped.
    pub fn new(rate: f32, detune: f32) -> Self {
        Self {
            buffer: None,
            active: None,
            tracker: ProgressTracker::new(),
            rate: clamp_rate(rate),
            detune: clamp_detune(detune),
            offset: 0.0,
            position: 0.0,
            epoch: 0,
            state: PlaybackState::Idle,
        }
    }

    /// Idle until the first run, then Playing or Stopped.
    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Whether a run is live.
    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    /// Whether a buffer is loaded, playing or not.
    pub fn has_buffer(&self) -> bool {
        self.buffer.is_some()
    }

    /// The loaded buffer, shared with the live source.
    pub fn buffer(&self) -> Option<&Arc<AudioBuffer>> {
        self.buffer.as_ref()
    }

    /// Zero until a buffer is loaded.
    pub fn duration(&self) -> f64 {
        self.buffer.as_ref().map_or(0.0, |b| b.duration_secs())
    }

    /// Last reported position, always within `[0, duration]`.
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Where the next `resume` starts.
    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Speed multiplier for the current and next runs.
    pub fn rate(&self) -> f32 {
        self.rate
    }

    /// Pitch shift in cents.
    pub fn detune(&self) -> f32 {
        self.detune
    }

    /// Epoch of the most recent run.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Source of the live run, if any.
    pub fn active_node(&self) -> Option<NodeId> {
        self.active.as_ref().map(|run| run.node)
    }

    /// Tracker of the live run.
    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    /// Position computed from the audio clock right now.
    pub fn current_position<C: AudioContext + ?Sized>(&self, ctx: &C) -> f64 {
        match &self.active {
            Some(run) => self.clamp_offset(run.clock.position_at(ctx.current_time())),
            None => self.position,
        }
    }

    /// Replace the buffer. Any live run is torn down and the offset resets.
    pub fn load<C: AudioContext + ?Sized>(&mut self, ctx: &mut C, buffer: AudioBuffer) {
        self.teardown(ctx);
        log::debug!(
            "Loaded {:.2}s buffer ({} frames)",
            buffer.duration_secs(),
            buffer.len()
        );
        self.buffer = Some(Arc::new(buffer));
        self.offset = 0.0;
        self.position = 0.0;
        self.state = PlaybackState::Idle;
    }

    /// Tear down any run and drop the buffer.
    pub fn clear<C: AudioContext + ?Sized>(&mut self, ctx: &mut C) {
        self.teardown(ctx);
        self.buffer = None;
        self.offset = 0.0;
        self.position = 0.0;
        self.state = PlaybackState::Idle;
    }

    /// Forget the buffer when no context was ever created to play it on.
    pub(crate) fn reset_detached(&mut self) {
        self.active = None;
        self.tracker.cancel();
        self.buffer = None;
        self.offset = 0.0;
        self.position = 0.0;
        self.state = PlaybackState::Idle;
    }

    /// Start a new run at `offset` seconds, clamped to `[0, duration]`.
    pub fn start<C: AudioContext + ?Sized>(
        &mut self,
        ctx: &mut C,
        offset: f64,
    ) -> Result<(), PlaybackError> {
        let buffer = self.buffer.clone().ok_or(PlaybackError::NoBuffer)?;

        // The previous source must be gone before the next one exists.
        if self.teardown(ctx) {
            self.state = PlaybackState::Stopped;
        }

        let offset = self.clamp_offset(offset);
        self.epoch += 1;
        let epoch = self.epoch;

        let node = ctx.create_source(buffer)?;
        if let Err(e) = self.launch(ctx, node, epoch, offset) {
            ctx.disconnect(node);
            self.state = PlaybackState::Stopped;
            return Err(e.into());
        }

        let rate = effective_rate(self.rate, self.detune);
        self.active = Some(ActiveRun {
            node,
            epoch,
            clock: SessionClock {
                anchor: ctx.current_time(),
                offset,
                rate,
            },
        });
        self.tracker.schedule(epoch);
        self.offset = offset;
        self.position = offset;
        self.state = PlaybackState::Playing;
        log::debug!("Run {epoch} started at {offset:.3}s on source {node}");
        Ok(())
    }

    fn launch<C: AudioContext + ?Sized>(
        &self,
        ctx: &mut C,
        node: NodeId,
        epoch: u64,
        offset: f64,
    ) -> Result<(), AudioError> {
        ctx.set_playback_rate(node, self.rate)?;
        ctx.set_detune(node, self.detune)?;
        ctx.set_ended_tag(node, Some(epoch))?;
        ctx.start_source(node, offset)
    }

    /// Continue from the stored offset. After a natural end this restarts
    /// from the beginning.
    pub fn resume<C: AudioContext + ?Sized>(&mut self, ctx: &mut C) -> Result<(), PlaybackError> {
        let duration = self.duration();
        let offset = if self.offset >= duration { 0.0 } else { self.offset };
        self.start(ctx, offset)
    }

    /// Halt the live run and keep its position as the resume offset.
    ///
    /// Does nothing when no run is live.
    pub fn stop<C: AudioContext + ?Sized>(&mut self, ctx: &mut C) -> f64 {
        if self.teardown(ctx) {
            self.state = PlaybackState::Stopped;
            log::debug!("Stopped at {:.3}s", self.position);
        }
        self.position
    }

    /// Move to `t`. A live run restarts there; otherwise only the resume
    /// offset and the reported position change.
    pub fn seek<C: AudioContext + ?Sized>(
        &mut self,
        ctx: &mut C,
        t: f64,
    ) -> Result<(), PlaybackError> {
        let t = self.clamp_offset(t);
        if self.active.is_some() {
            return self.start(ctx, t);
        }
        self.offset = t;
        self.position = t;
        Ok(())
    }

    pub fn set_rate<C: AudioContext + ?Sized>(
        &mut self,
        ctx: &mut C,
        rate: f32,
    ) -> Result<(), PlaybackError> {
        self.rate = clamp_rate(rate);
        self.retune(ctx, |ctx, node, c| ctx.set_playback_rate(node, c.rate))
    }

    pub fn set_detune<C: AudioContext + ?Sized>(
        &mut self,
        ctx: &mut C,
        cents: f32,
    ) -> Result<(), PlaybackError> {
        self.detune = clamp_detune(cents);
        self.retune(ctx, |ctx, node, c| ctx.set_detune(node, c.detune))
    }

    /// Store a rate for the next run without touching a context.
    pub(crate) fn store_rate(&mut self, rate: f32) {
        self.rate = clamp_rate(rate);
    }

    pub(crate) fn store_detune(&mut self, cents: f32) {
        self.detune = clamp_detune(cents);
    }

    fn retune<C, F>(&mut self, ctx: &mut C, apply: F) -> Result<(), PlaybackError>
    where
        C: AudioContext + ?Sized,
        F: FnOnce(&mut C, NodeId, &Self) -> Result<(), AudioError>,
    {
        let rate = effective_rate(self.rate, self.detune);
        let Some(node) = self.active_node() else {
            return Ok(());
        };
        apply(ctx, node, self)?;
        let now = ctx.current_time();
        if let Some(run) = self.active.as_mut() {
            run.clock.reanchor(now, rate);
        }
        Ok(())
    }

    /// One display-refresh step.
    ///
    /// Drains ended notifications from the context, then ticks the progress
    /// tracker for the live run.
    pub fn poll<C: AudioContext + ?Sized>(&mut self, ctx: &mut C) -> Vec<PlaybackEvent> {
        let mut events = Vec::new();

        for tag in ctx.take_ended() {
            let current = self.active.as_ref().is_some_and(|run| run.epoch == tag);
            if current {
                self.finish_naturally(ctx);
                events.push(PlaybackEvent::Ended {
                    duration: self.duration(),
                });
            } else {
                log::debug!("Ignoring ended notification from stale run {tag}");
            }
        }

        let duration = self.duration();
        if let Some(run) = &self.active {
            match self
                .tracker
                .tick(run.epoch, &run.clock, ctx.current_time(), duration)
            {
                Some(Progress::Position(position)) | Some(Progress::Finished(position)) => {
                    self.position = position;
                    events.push(PlaybackEvent::Progress { position });
                }
                None => {}
            }
        }

        events
    }

    fn finish_naturally<C: AudioContext + ?Sized>(&mut self, ctx: &mut C) {
        let Some(run) = self.active.take() else {
            return;
        };
        self.tracker.cancel();
        ctx.disconnect(run.node);
        let duration = self.duration();
        self.position = duration;
        self.offset = duration;
        self.state = PlaybackState::Stopped;
        log::info!("Run {} reached the end ({duration:.2}s)", run.epoch);
    }

    /// Detach, halt and release the live source and cancel its tracker.
    /// Returns whether a run was live.
    fn teardown<C: AudioContext + ?Sized>(&mut self, ctx: &mut C) -> bool {
        let Some(run) = self.active.take() else {
            return false;
        };
        self.tracker.cancel();

        let position = self.clamp_offset(run.clock.position_at(ctx.current_time()));

        if let Err(e) = ctx.set_ended_tag(run.node, None) {
            log::warn!("Failed to detach ended tag from source {}: {e}", run.node);
        }
        if let Err(e) = ctx.stop_source(run.node) {
            log::debug!("Stopping source {}: {e}", run.node);
        }
        ctx.disconnect(run.node);

        self.position = position;
        self.offset = position;
        true
    }

    fn clamp_offset(&self, t: f64) -> f64 {
        if t.is_nan() {
            return 0.0;
        }
        t.clamp(0.0, self.duration())
    }
}

pub fn clamp_rate(rate: f32) -> f32 {
    if rate.is_nan() {
        return 1.0;
    }
    rate.clamp(MIN_RATE, MAX_RATE)
}

pub fn clamp_detune(cents: f32) -> f32 {
    if cents.is_nan() {
        return 0.0;
    }
    cents.clamp(MIN_DETUNE, MAX_DETUNE)
}
