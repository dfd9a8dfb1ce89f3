//! Persistence for gitdojo sessions.
//!
//! Snapshots are keyed by `(learner_id, practice_id)` and stamped with the
//! practice version they were recorded against. A snapshot written for an
//! older version is never silently reused: loading it reports
//! [`LoadOutcome::ResetRequired`] until the caller resets the key.

pub mod config;
pub mod fs;
pub mod lock;
pub mod memory_store;
pub mod paths;
pub mod snapshot;
pub mod sqlite_store;

pub use config::DojoConfig;
pub use fs::{lock_file, write_atomic, LockGuard};
pub use lock::WorkspaceLock;
pub use memory_store::MemorySnapshotStore;
pub use paths::DojoPaths;
pub use snapshot::{LoadOutcome, SessionKey, Snapshot, SnapshotStore, StoreError};
pub use sqlite_store::SqliteSnapshotStore;
