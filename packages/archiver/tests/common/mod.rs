// Common test utilities
#![allow(dead_code)]

pub mod harness;
pub mod storage;

pub use harness::*;
pub use storage::*;
