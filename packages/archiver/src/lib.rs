// Web Page Archiver - Worker Core
//
// This crate captures replayable snapshots of web pages: it claims archive jobs
// from Postgres, renders pages through Firecrawl, stores HTML and assets in an
// S3-compatible bucket, and records the outcome.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;

pub use config::*;
