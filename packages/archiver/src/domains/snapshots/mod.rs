pub mod assets;
pub mod models;

pub use assets::{AssetPipeline, AssetReport};
