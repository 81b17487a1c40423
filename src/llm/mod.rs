pub mod backend;
pub mod gemini;
pub mod media;

pub use backend::{GeminiImageConfig, GenerativeBackend, ImageRequest, TextRequest};
pub use gemini::GeminiBackend;
pub use media::InlineImage;
