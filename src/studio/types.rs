use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::llm::media::{is_data_url, InlineImage};
use crate::studio::error::StudioError;

/// Total reference images accepted across face, style and scene.
pub const MAX_REFERENCE_IMAGES: usize = 15;

pub const ASPECT_RATIOS: [&str; 5] = ["1:1", "3:4", "4:3", "9:16", "16:9"];
pub const DEFAULT_ASPECT_RATIO: &str = "3:4";

pub fn validate_aspect_ratio(value: &str) -> Result<String, StudioError> {
    let trimmed = value.trim();
    if ASPECT_RATIOS.contains(&trimmed) {
        Ok(trimmed.to_string())
    } else {
        Err(StudioError::InvalidAspectRatio(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchSize {
    Three,
    Five,
    Eight,
    Ten,
}

impl BatchSize {
    pub fn count(self) -> usize {
        match self {
            BatchSize::Three => 3,
            BatchSize::Five => 5,
            BatchSize::Eight => 8,
            BatchSize::Ten => 10,
        }
    }
}

impl Default for BatchSize {
    fn default() -> Self {
        BatchSize::Three
    }
}

impl TryFrom<usize> for BatchSize {
    type Error = StudioError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        match value {
            3 => Ok(BatchSize::Three),
            5 => Ok(BatchSize::Five),
            8 => Ok(BatchSize::Eight),
            10 => Ok(BatchSize::Ten),
            other => Err(StudioError::InvalidBatchSize(other.to_string())),
        }
    }
}

impl FromStr for BatchSize {
    type Err = StudioError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value
            .trim()
            .parse::<usize>()
            .map_err(|_| StudioError::InvalidBatchSize(value.to_string()))
            .and_then(BatchSize::try_from)
    }
}

impl fmt::Display for BatchSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.count())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStatus {
    Draft,
    Scheduled,
    Posted,
}

impl ImageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageStatus::Draft => "draft",
            ImageStatus::Scheduled => "scheduled",
            ImageStatus::Posted => "posted",
        }
    }
}

impl FromStr for ImageStatus {
    type Err = StudioError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(ImageStatus::Draft),
            "scheduled" => Ok(ImageStatus::Scheduled),
            "posted" => Ok(ImageStatus::Posted),
            _ => Err(StudioError::InvalidStatus(value.to_string())),
        }
    }
}

impl fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    pub id: String,
    /// A `data:` URL for synthesized shots, a remote URL for placeholders.
    pub url: String,
    /// The scene the shot was generated from.
    pub prompt: String,
    pub created_at: DateTime<Utc>,
    pub is_branded: bool,
    pub status: ImageStatus,
    pub aspect_ratio: Option<String>,
    pub original_refs: Vec<InlineImage>,
    pub character_dna: Option<String>,
}

impl GeneratedImage {
    pub fn is_placeholder(&self) -> bool {
        !is_data_url(&self.url)
    }
}
