pub mod archive_job;

pub use archive_job::*;
