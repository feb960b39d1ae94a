//! Typed ID definitions for the archive entities.

pub use super::id::Id;

/// Marker type for Website records (one per normalized domain).
pub struct Website;

/// Marker type for ArchiveJob records (one per archive request).
pub struct ArchiveJob;

/// Marker type for Snapshot records (one per rendering attempt).
pub struct Snapshot;

pub type WebsiteId = Id<Website>;

pub type ArchiveJobId = Id<ArchiveJob>;

pub type SnapshotId = Id<Snapshot>;
