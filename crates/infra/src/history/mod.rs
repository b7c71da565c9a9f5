//! Append-only history journal for bill actors.
//!
//! Each bill has one stream. Entries produced while the actor processes one
//! step (initialization or one command) are appended as a single batch, so a
//! reconstruction never sees a half-applied command.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryHistoryStore;
pub use r#trait::{HistoryEntry, HistoryError, HistoryStore, StoredEntry};
