//! Transcript parsing and message attribution.

mod attributor;
mod parser;

pub use attributor::{
    Attributor, ExtractionResult, Message, Sender, DEDUP_THRESHOLD, DEDUP_WINDOW,
};
pub use parser::{parse_transcript, AvatarSide, Bubble};
