#[derive(Debug, thiserror::Error)]
pub enum StudioError {
    #[error("Total limit of {max} reference images reached")]
    ReferenceLimit { max: usize },

    #[error("Reference index {index} is out of range for {category} references")]
    ReferenceIndex { category: &'static str, index: usize },

    #[error("Invalid batch size '{0}' (expected 3, 5, 8 or 10)")]
    InvalidBatchSize(String),

    #[error("Unsupported aspect ratio '{0}' (expected 1:1, 3:4, 4:3, 9:16 or 16:9)")]
    InvalidAspectRatio(String),

    #[error("Invalid image status '{0}' (expected draft, scheduled or posted)")]
    InvalidStatus(String),

    #[error("Character DNA needs at least one face reference")]
    NoFaceReferences,

    #[error("Gemini API key is not configured; set GEMINI_API_KEY to start production")]
    MissingApiKey,

    #[error("The free trial is limited to 1 use of 3 images; select batch size 3 or upgrade")]
    TrialBatchTooLarge,

    #[error("Not enough credits: {needed} needed, {available} available")]
    InsufficientCredits { needed: u32, available: u32 },

    #[error("Unknown credit pack {0} (expected 10, 25, 50 or 100)")]
    UnknownCreditPack(u32),

    #[error("Unknown subscription level '{0}' (expected none, basic or pro)")]
    InvalidSubscription(String),

    #[error("Image {0} is not in the gallery")]
    ImageNotFound(String),
}
