//! Persistence contracts.
//!
//! The relational store with its vector extension is an external
//! collaborator; this crate defines the async traits the engine programs
//! against and ships an in-memory implementation used by the binary's default
//! wiring and by tests.

mod memory;
mod sync;
mod traits;

pub use memory::MemoryStore;
pub use sync::{canonical_json, definitions_digest, sync_definitions, SyncOutcome};
pub use traits::*;
