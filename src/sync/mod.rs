//! Deferred replay of writes the remote rejected.

mod queue;

pub use queue::{DrainReport, QueueItem, SyncQueue, QUEUE_STORAGE_KEY};
