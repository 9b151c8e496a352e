//! Conversation history persistence and the read-only forever memory.

mod memory;
mod store;

pub use memory::ForeverMemory;
pub use store::{HistoryError, HistoryStore, RecordKind, SessionRecord, MAX_HISTORY_LENGTH};
