//! Audio decoding and the output context.
//!
//! The payload returned by the speech model travels through this module in
//! two steps:
//!
//! ```text
//! base64 text ──decode──▶ raw i16 LE bytes ──pcm16_to_buffer──▶ AudioBuffer (f32)
//! ```
//!
//! The resulting [`AudioBuffer`] is handed to the playback controller, which
//! plays it through an [`AudioContext`]. Two contexts ship with the crate:
//!
//! - [`offline::OfflineContext`] - no sound, clock advanced by hand. Used for
//!   headless rendering and throughout the tests.
//! - `device::DeviceContext` - the default speaker via cpal (feature `cpal`).

pub mod buffer;
pub mod context;
pub mod decode;
#[cfg(feature = "cpal")]
pub mod device;
pub mod offline;

pub use buffer::{pcm16_to_buffer, AudioBuffer, AudioConversionError};
pub use context::{AudioContext, AudioError, ContextState, NodeId, SharedContext};
pub use decode::{decode_base64, DecodeError};
