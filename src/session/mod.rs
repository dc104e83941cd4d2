//! The read-aloud session: input, generation bookkeeping, playback and
//! export behind one state object.

pub mod cache;
pub mod error;
pub mod reader;

pub use cache::VoiceCache;
pub use error::ReaderError;
pub use reader::{
    GenerationTicket, PlayStep, PlaybackFrame, ReaderSession, RewriteTicket, TitleTicket,
};
