//! Archival worker.
//!
//! - [`ArchiveWorker`] - processes one claimed job end to end
//! - [`ArchiveScheduler`] - polling loop with start/shutdown lifecycle

mod archive_worker;
mod scheduler;

pub use archive_worker::ArchiveWorker;
pub use scheduler::ArchiveScheduler;
