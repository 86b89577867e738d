//! Durable leveling state.
//!
//! The counters record is tiny and written after every mutation, so a plain
//! JSON file replaced atomically is all the storage this needs.

pub mod counters;
pub mod lockfile;
pub mod store;

pub use counters::{Clock, FixedClock, PersistedCounters, SystemClock};
pub use lockfile::ProcessLock;
pub use store::{load_or_init, CounterStore, InMemoryStore, JsonFileStore, StorageError};
