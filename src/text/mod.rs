//! Text transforms applied around generation.

pub mod acronyms;
pub mod title;

pub use acronyms::expand_acronyms;
pub use title::{sanitize_title, DEFAULT_TITLE};
