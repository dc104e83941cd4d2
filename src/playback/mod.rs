//! Playback of a decoded buffer: the controller state machine and the
//! per-frame progress tracker it drives.

pub mod controller;
pub mod tracker;

pub use controller::{
    clamp_detune, clamp_rate, PlaybackController, PlaybackError, PlaybackEvent, PlaybackState,
    MAX_DETUNE, MAX_RATE, MIN_DETUNE, MIN_RATE,
};
pub use tracker::{Progress, ProgressTracker, SessionClock};
