use std::collections::HashMap;

use anyhow::{anyhow, Result};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{info, warn};

use crate::db::models::{CreditRow, ImageRefRow, ImageRow};
use crate::llm::media::InlineImage;
use crate::studio::credits::{CreditState, SubscriptionLevel};
use crate::studio::{GeneratedImage, ImageStatus, StudioError};

const IMAGE_COLUMNS: &str =
    "id, url, prompt, created_at, is_branded, status, aspect_ratio, character_dna, sort_key";

/// Gallery and credit ledger storage.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn init(database_url: &str) -> Result<Self> {
        // every connection to `:memory:` is a separate database
        let in_memory = database_url.contains(":memory:");
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .idle_timeout(if in_memory { None } else { Some(std::time::Duration::from_secs(600)) })
            .max_lifetime(if in_memory { None } else { Some(std::time::Duration::from_secs(1800)) })
            .connect(database_url)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS images (\
                id TEXT PRIMARY KEY,\
                url TEXT NOT NULL,\
                prompt TEXT NOT NULL,\
                created_at TEXT NOT NULL,\
                is_branded INTEGER NOT NULL DEFAULT 0,\
                status TEXT NOT NULL DEFAULT 'draft',\
                aspect_ratio TEXT,\
                character_dna TEXT,\
                sort_key INTEGER NOT NULL\
            );",
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_images_sort_key ON images(sort_key);")
            .execute(&pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS image_refs (\
                image_id TEXT NOT NULL,\
                position INTEGER NOT NULL,\
                mime_type TEXT NOT NULL,\
                data TEXT NOT NULL,\
                PRIMARY KEY(image_id, position)\
            );",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS credit_state (\
                id INTEGER PRIMARY KEY CHECK (id = 1),\
                free_generations_remaining INTEGER NOT NULL,\
                subscription_level TEXT NOT NULL,\
                credits_remaining INTEGER NOT NULL,\
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP\
            );",
        )
        .execute(&pool)
        .await?;

        info!("Database tables created successfully");
        Ok(Database { pool })
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Inserts a batch ahead of everything already in the gallery, keeping
    /// the batch's own order.
    pub async fn prepend_batch(&self, images: &[GeneratedImage]) -> Result<()> {
        if images.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        let (current_max,): (i64,) = sqlx::query_as("SELECT COALESCE(MAX(sort_key), 0) FROM images")
            .fetch_one(&mut *tx)
            .await?;

        let count = images.len() as i64;
        for (index, image) in images.iter().enumerate() {
            let sort_key = current_max + count - index as i64;
            insert_image(&mut tx, image, sort_key).await?;
        }
        tx.commit().await?;

        info!("Stored {} image(s) in the gallery", images.len());
        Ok(())
    }

    /// Swaps `old_id` for `image` at the same gallery position.
    pub async fn replace_image(&self, old_id: &str, image: &GeneratedImage) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let existing: Option<(i64,)> = sqlx::query_as("SELECT sort_key FROM images WHERE id = ?")
            .bind(old_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some((sort_key,)) = existing else {
            return Err(StudioError::ImageNotFound(old_id.to_string()).into());
        };

        sqlx::query("DELETE FROM image_refs WHERE image_id = ?")
            .bind(old_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM images WHERE id = ?")
            .bind(old_id)
            .execute(&mut *tx)
            .await?;
        insert_image(&mut tx, image, sort_key).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Newest first. Reference images are not loaded.
    pub async fn list_images(&self, limit: i64) -> Result<Vec<GeneratedImage>> {
        let query = format!("SELECT {IMAGE_COLUMNS} FROM images ORDER BY sort_key DESC LIMIT ?");
        let rows = sqlx::query_as::<_, ImageRow>(&query)
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| image_from_row(row, Vec::new()))
            .collect()
    }

    pub async fn count_images(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM images")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn get_image(&self, id: &str) -> Result<Option<GeneratedImage>> {
        let query = format!("SELECT {IMAGE_COLUMNS} FROM images WHERE id = ?");
        let Some(row) = sqlx::query_as::<_, ImageRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let refs = sqlx::query_as::<_, ImageRefRow>(
            "SELECT mime_type, data FROM image_refs \
             WHERE image_id = ? ORDER BY position ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let refs = refs
            .into_iter()
            .map(|row| InlineImage {
                mime_type: row.mime_type,
                data: row.data,
            })
            .collect();
        image_from_row(row, refs).map(Some)
    }

    pub async fn set_status(&self, id: &str, status: ImageStatus) -> Result<()> {
        let result = sqlx::query("UPDATE images SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StudioError::ImageNotFound(id.to_string()).into());
        }
        Ok(())
    }

    pub async fn status_counts(&self) -> Result<HashMap<String, i64>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM images GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().collect())
    }

    /// Loads the ledger, creating it with `initial` on first use. The API key
    /// flag always comes from `initial`.
    pub async fn load_credits(&self, initial: &CreditState) -> Result<CreditState> {
        let row = sqlx::query_as::<_, CreditRow>(
            "SELECT free_generations_remaining, subscription_level, credits_remaining \
             FROM credit_state WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            self.save_credits(initial).await?;
            return Ok(initial.clone());
        };

        let subscription_level = row.subscription_level.parse().unwrap_or_else(|_| {
            warn!(
                "Unknown stored subscription level '{}'; treating as none",
                row.subscription_level
            );
            SubscriptionLevel::None
        });

        Ok(CreditState {
            free_generations_remaining: u32::try_from(row.free_generations_remaining).unwrap_or(0),
            subscription_level,
            credits_remaining: u32::try_from(row.credits_remaining).unwrap_or(0),
            api_key_set: initial.api_key_set,
        })
    }

    pub async fn save_credits(&self, state: &CreditState) -> Result<()> {
        sqlx::query(
            "INSERT INTO credit_state (id, free_generations_remaining, subscription_level, credits_remaining) \
             VALUES (1, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
             free_generations_remaining = excluded.free_generations_remaining, \
             subscription_level = excluded.subscription_level, \
             credits_remaining = excluded.credits_remaining, \
             updated_at = CURRENT_TIMESTAMP",
        )
        .bind(i64::from(state.free_generations_remaining))
        .bind(state.subscription_level.as_str())
        .bind(i64::from(state.credits_remaining))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

async fn insert_image(
    tx: &mut Transaction<'_, Sqlite>,
    image: &GeneratedImage,
    sort_key: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO images (id, url, prompt, created_at, is_branded, status, aspect_ratio, character_dna, sort_key) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&image.id)
    .bind(&image.url)
    .bind(&image.prompt)
    .bind(image.created_at)
    .bind(image.is_branded)
    .bind(image.status.as_str())
    .bind(&image.aspect_ratio)
    .bind(&image.character_dna)
    .bind(sort_key)
    .execute(&mut **tx)
    .await?;

    for (position, reference) in image.original_refs.iter().enumerate() {
        sqlx::query(
            "INSERT INTO image_refs (image_id, position, mime_type, data) VALUES (?, ?, ?, ?)",
        )
        .bind(&image.id)
        .bind(position as i64)
        .bind(&reference.mime_type)
        .bind(&reference.data)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

fn image_from_row(row: ImageRow, original_refs: Vec<InlineImage>) -> Result<GeneratedImage> {
    let status = row
        .status
        .parse::<ImageStatus>()
        .map_err(|err| anyhow!("Corrupt gallery row {}: {err}", row.id))?;
    Ok(GeneratedImage {
        id: row.id,
        url: row.url,
        prompt: row.prompt,
        created_at: row.created_at,
        is_branded: row.is_branded,
        status,
        aspect_ratio: row.aspect_ratio,
        original_refs,
        character_dna: row.character_dna,
    })
}
