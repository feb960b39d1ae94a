//! Kernel module - worker infrastructure and dependencies.

pub mod archive_store;
pub mod errors;
pub mod firecrawl_client;
pub mod object_store;
pub mod test_dependencies;
pub mod traits;
pub mod worker;

pub use archive_store::PostgresArchiveStore;
pub use errors::{RenderError, StorageError, TransitionError};
pub use firecrawl_client::FirecrawlClient;
pub use object_store::S3ObjectStore;
pub use test_dependencies::{MemoryArchiveStore, MemoryObjectStore, MockPageRenderer};
pub use traits::*;
pub use worker::{ArchiveScheduler, ArchiveWorker};
