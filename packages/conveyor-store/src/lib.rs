//! conveyor-store — durable state for the pipeline scheduling core
//!
//! ## Core Principles
//!
//! 1. **Single shared resource**: the state store is the only shared mutable
//!    resource in the scheduler; everything else is per-run state.
//! 2. **Whole-record replace**: every write replaces a record atomically
//!    (write-temp-then-rename in the filesystem adapter); readers never see a
//!    half-written record.
//! 3. **Readable by strangers**: records are plain JSON, loadable by a
//!    different process instance than the one that wrote them.
//! 4. **Corrupted ≠ missing**: an unreadable record is a distinct error kind
//!    from a record that never existed.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use conveyor_store::{FsStateStore, StateStore, StateStoreExt};
//!
//! let store = FsStateStore::new(".conveyor/state");
//! store.put_record("sessions", "pipeline-42", &session).await?;
//! let session: SessionRecord = store.get_record("sessions", "pipeline-42").await?;
//! ```

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use domain::{StateStore, StateStoreExt};
pub use error::{ErrorKind, Result, StorageError};
pub use infrastructure::{FsStateStore, MemoryStateStore};
