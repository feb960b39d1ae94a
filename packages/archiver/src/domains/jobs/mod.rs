pub mod actions;
pub mod models;

pub use actions::submit_archive;
