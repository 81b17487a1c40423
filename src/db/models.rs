use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ImageRow {
    pub id: String,
    pub url: String,
    pub prompt: String,
    pub created_at: DateTime<Utc>,
    pub is_branded: bool,
    pub status: String,
    pub aspect_ratio: Option<String>,
    pub character_dna: Option<String>,
    pub sort_key: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct ImageRefRow {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct CreditRow {
    pub free_generations_remaining: i64,
    pub subscription_level: String,
    pub credits_remaining: i64,
}
