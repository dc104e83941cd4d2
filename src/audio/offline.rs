use std::collections::BTreeMap;
use std::sync::Arc;

use super::buffer::AudioBuffer;
use super::context::{effective_rate, AudioContext, AudioError, ContextState, NodeId};

/// A graph operation, recorded in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOp {
    Create(NodeId),
    Start(NodeId, f64),
    Stop(NodeId),
    Disconnect(NodeId),
    Ended(NodeId),
}

#[derive(Debug)]
struct Source {
    buffer: Arc<AudioBuffer>,
    rate: f32,
    detune: f32,
    /// Seconds into the buffer
    playhead: f64,
    started: bool,
    finished: bool,
    ended_tag: Option<u64>,
}

impl Source {
    fn is_sounding(&self) -> bool {
        self.started && !self.finished
    }
}

/// A silent audio context whose clock only moves when told to.
///
/// Every source operation is appended to an operation log, which makes the
/// ordering of teardown and creation observable. Sources advance by
/// `dt * rate * 2^(detune/1200)` on each [`OfflineContext::advance`] and end
/// once they pass the end of their buffer.
#[derive(Debug)]
pub struct OfflineContext {
    state: ContextState,
    time: f64,
    next_id: u64,
    sources: BTreeMap<NodeId, Source>,
    ended: Vec<u64>,
    ops: Vec<NodeOp>,
    max_buffer_frames: Option<usize>,
}

impl Default for OfflineContext {
    fn default() -> Self {
        Self::new()
    }
}

impl OfflineContext {
    /// A suspended context at time zero.
    pub fn new() -> Self {
        Self {
            state: ContextState::Suspended,
            time: 0.0,
            next_id: 1,
            sources: BTreeMap::new(),
            ended: Vec::new(),
            ops: Vec::new(),
            max_buffer_frames: None,
        }
    }

    /// A context that is already running.
    pub fn running() -> Self {
        Self {
            state: ContextState::Running,
            ..Self::new()
        }
    }

    /// Refuse buffer allocations longer than `frames`.
    pub fn with_max_buffer_frames(mut self, frames: usize) -> Self {
        self.max_buffer_frames = Some(frames);
        self
    }

    pub fn suspend(&mut self) {
        if self.state == ContextState::Running {
            self.state = ContextState::Suspended;
        }
    }

    pub fn close(&mut self) {
        self.state = ContextState::Closed;
        self.sources.clear();
    }

    /// Move the audio clock forward. Does nothing unless running.
    pub fn advance(&mut self, secs: f64) {
        if self.state != ContextState::Running || secs <= 0.0 {
            return;
        }
        self.time += secs;

        let mut finished = Vec::new();
        for (&id, source) in self.sources.iter_mut() {
            if !source.is_sounding() {
                continue;
            }
            source.playhead += secs * effective_rate(source.rate, source.detune);
            if source.playhead >= source.buffer.duration_secs() {
                finished.push(id);
            }
        }
        for id in finished {
            self.finish(id);
        }
    }

    /// Sources that are started and not yet finished or stopped.
    pub fn active_sources(&self) -> usize {
        self.sources.values().filter(|s| s.is_sounding()).count()
    }

    /// Sources still allocated (not yet disconnected).
    pub fn allocated_sources(&self) -> usize {
        self.sources.len()
    }

    pub fn ops(&self) -> &[NodeOp] {
        &self.ops
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    pub fn playback_rate(&self, node: NodeId) -> Option<f32> {
        self.sources.get(&node).map(|s| s.rate)
    }

    pub fn detune(&self, node: NodeId) -> Option<f32> {
        self.sources.get(&node).map(|s| s.detune)
    }

    /// Playhead of a source in buffer seconds.
    pub fn playhead(&self, node: NodeId) -> Option<f64> {
        self.sources.get(&node).map(|s| s.playhead)
    }

    fn source_mut(&mut self, node: NodeId) -> Result<&mut Source, AudioError> {
        self.sources
            .get_mut(&node)
            .ok_or(AudioError::UnknownNode(node))
    }

    fn finish(&mut self, node: NodeId) {
        let Some(source) = self.sources.get_mut(&node) else {
            return;
        };
        if source.finished {
            return;
        }
        source.finished = true;
        source.playhead = source.playhead.min(source.buffer.duration_secs());
        self.ops.push(NodeOp::Ended(node));
        if let Some(tag) = source.ended_tag {
            self.ended.push(tag);
        }
    }
}

impl AudioContext for OfflineContext {
    fn state(&self) -> ContextState {
        self.state
    }

    fn resume(&mut self) -> Result<(), AudioError> {
        match self.state {
            ContextState::Closed => Err(AudioError::Closed),
            _ => {
                self.state = ContextState::Running;
                Ok(())
            }
        }
    }

    fn current_time(&self) -> f64 {
        self.time
    }

    fn create_buffer(
        &mut self,
        channels: u16,
        frames: usize,
        sample_rate: u32,
    ) -> Result<AudioBuffer, AudioError> {
        let too_long = self.max_buffer_frames.is_some_and(|max| frames > max);
        if channels == 0 || frames == 0 || too_long {
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
        self.sources.insert(
            id,
            Source {
                buffer,
                rate: 1.0,
                detune: 0.0,
                playhead: 0.0,
                started: false,
                finished: false,
                ended_tag: None,
            },
        );
        self.ops.push(NodeOp::Create(id));
        Ok(id)
    }

    fn set_playback_rate(&mut self, node: NodeId, rate: f32) -> Result<(), AudioError> {
        self.source_mut(node)?.rate = rate;
        Ok(())
    }

    fn set_detune(&mut self, node: NodeId, cents: f32) -> Result<(), AudioError> {
        self.source_mut(node)?.detune = cents;
        Ok(())
    }

    fn set_ended_tag(&mut self, node: NodeId, tag: Option<u64>) -> Result<(), AudioError> {
        self.source_mut(node)?.ended_tag = tag;
        Ok(())
    }

    fn start_source(&mut self, node: NodeId, offset: f64) -> Result<(), AudioError> {
        let source = self.source_mut(node)?;
        if source.started {
            return Err(AudioError::Backend(format!("source {node} already started")));
        }
        let duration = source.buffer.duration_secs();
        source.started = true;
        source.playhead = offset.clamp(0.0, duration);
        let at_end = source.playhead >= duration;
        self.ops.push(NodeOp::Start(node, offset));
        if at_end {
            self.finish(node);
        }
        Ok(())
    }

    fn stop_source(&mut self, node: NodeId) -> Result<(), AudioError> {
        let started = self.source_mut(node)?.started;
        if !started {
            return Err(AudioError::Backend(format!("source {node} was never started")));
        }
        self.ops.push(NodeOp::Stop(node));
        // Stopping fires the ended notification like a natural end does.
        self.finish(node);
        Ok(())
    }

    fn disconnect(&mut self, node: NodeId) {
        if self.sources.remove(&node).is_some() {
            self.ops.push(NodeOp::Disconnect(node));
        }
    }

    fn take_ended(&mut self) -> Vec<u64> {
        std::mem::take(&mut self.ended)
    }
}
