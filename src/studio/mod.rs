pub mod credits;
pub mod dna;
pub mod enhance;
pub mod error;
pub mod pipeline;
pub mod references;
pub mod shots;
pub mod storyboard;
pub mod types;

#[cfg(test)]
pub mod testing;

pub use error::StudioError;
pub use types::{BatchSize, GeneratedImage, ImageStatus};
