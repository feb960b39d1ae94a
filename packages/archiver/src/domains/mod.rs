pub mod jobs;
pub mod snapshots;
pub mod website;
