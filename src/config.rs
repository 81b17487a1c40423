use std::env;
use std::path::PathBuf;

use anyhow::Result;
use once_cell::sync::Lazy;
use tracing::warn;

pub const DEFAULT_TEXT_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-3-pro-image-preview";
pub const DEFAULT_PLACEHOLDER_BASE_URL: &str = "https://picsum.photos/seed";

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub database_url: String,
    pub gemini_api_key: String,
    pub gemini_text_model: String,
    pub gemini_image_model: String,
    pub gemini_image_size: String,
    pub gemini_safety_settings: String,
    pub gemini_request_timeout_secs: u64,
    pub initial_credits: u32,
    pub max_reference_dimension: u32,
    pub export_dir: PathBuf,
    pub placeholder_base_url: String,
}

pub static CONFIG: Lazy<Config> =
    Lazy::new(|| Config::load().expect("Failed to load configuration"));

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_u32(name: &str, default: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn normalize_gemini_safety_settings(value: String) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "permissive".to_string();
    }

    let lowered = trimmed.to_lowercase();
    match lowered.as_str() {
        "permissive" | "off" | "none" => "permissive".to_string(),
        "standard" => "standard".to_string(),
        _ => {
            warn!(
                "Unknown GEMINI_SAFETY_SETTINGS value '{}'; defaulting to permissive.",
                value
            );
            "permissive".to_string()
        }
    }
}

fn resolve_gemini_api_key() -> String {
    env::var("GEMINI_API_KEY")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .or_else(|| env::var("API_KEY").ok())
        .map(|value| value.trim().to_string())
        .unwrap_or_default()
}

impl Config {
    pub fn load() -> Result<Self> {
        Ok(Config {
            log_level: env_string("LOG_LEVEL", "info"),
            database_url: env_string("DATABASE_URL", "sqlite://shooter.db?mode=rwc"),
            gemini_api_key: resolve_gemini_api_key(),
            gemini_text_model: env_string("GEMINI_TEXT_MODEL", DEFAULT_TEXT_MODEL),
            gemini_image_model: env_string("GEMINI_IMAGE_MODEL", DEFAULT_IMAGE_MODEL),
            gemini_image_size: env_string("GEMINI_IMAGE_SIZE", "1K"),
            gemini_safety_settings: normalize_gemini_safety_settings(env_string(
                "GEMINI_SAFETY_SETTINGS",
                "permissive",
            )),
            gemini_request_timeout_secs: env_u64("GEMINI_REQUEST_TIMEOUT_SECS", 120),
            initial_credits: env_u32("SHOOTER_INITIAL_CREDITS", 0),
            max_reference_dimension: env_u32("SHOOTER_MAX_REFERENCE_DIMENSION", 1536).max(64),
            export_dir: PathBuf::from(env_string("SHOOTER_EXPORT_DIR", "exports")),
            placeholder_base_url: env_string(
                "SHOOTER_PLACEHOLDER_BASE_URL",
                DEFAULT_PLACEHOLDER_BASE_URL,
            )
            .trim_end_matches('/')
            .to_string(),
        })
    }

    pub fn api_key_set(&self) -> bool {
        !self.gemini_api_key.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safety_profile_falls_back_to_permissive() {
        assert_eq!(normalize_gemini_safety_settings("".to_string()), "permissive");
        assert_eq!(normalize_gemini_safety_settings("OFF".to_string()), "permissive");
        assert_eq!(normalize_gemini_safety_settings("Standard".to_string()), "standard");
        assert_eq!(normalize_gemini_safety_settings("strict".to_string()), "permissive");
    }
}
