use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::llm::{GeminiImageConfig, GenerativeBackend, ImageRequest, InlineImage};
use crate::studio::types::{GeneratedImage, ImageStatus};

/// Settings shared by every shot of a run.
#[derive(Debug, Clone)]
pub struct ShotSettings {
    pub image_size: String,
    pub placeholder_base_url: String,
}

/// One shot of a storyboard.
#[derive(Debug, Clone, Copy)]
pub struct ShotSpec<'a> {
    pub scene: &'a str,
    pub outfit: &'a str,
    pub character_dna: Option<&'a str>,
    pub references: &'a [InlineImage],
    pub aspect_ratio: &'a str,
    pub index: usize,
    pub total: usize,
}

pub fn new_image_id() -> String {
    Uuid::new_v4().simple().to_string()[..10].to_string()
}

pub fn placeholder_url(base_url: &str, seed: &str) -> String {
    format!("{}/{}/1080/1350", base_url.trim_end_matches('/'), seed)
}

pub fn compose_shot_prompt(spec: &ShotSpec<'_>) -> String {
    let identity = match spec.character_dna {
        Some(dna) if !dna.trim().is_empty() => format!(
            "{} (verify against the provided reference images)",
            dna.trim()
        ),
        _ => "Extract facial features from provided reference images.".to_string(),
    };

    format!(
        "AI INFLUENCER PRODUCTION - SHOT {shot} of {total}

STRICT VISUAL ANCHOR (MUST NOT CHANGE):
- CHARACTER CLOTHING & STYLE: {outfit}
- CHARACTER IDENTITY: {identity}

CURRENT ACTION: {scene}

PRODUCTION RULES:
1. CLOTHING CONSISTENCY: The character MUST wear the exact same colors and fabrics as defined in the anchor.
2. LIGHTING CONSISTENCY: Maintain the environment's current time-of-day lighting.
3. PHOTOGRAPHY: 8k resolution, cinematic fashion shoot, high-end professional look.",
        shot = spec.index + 1,
        total = spec.total,
        outfit = spec.outfit,
        scene = spec.scene,
    )
}

/// Synthesizes one shot. Any failure yields a placeholder image instead of
/// an error so the batch can continue.
pub async fn synthesize_shot<B: GenerativeBackend>(
    backend: &B,
    spec: ShotSpec<'_>,
    settings: &ShotSettings,
) -> GeneratedImage {
    let request = ImageRequest {
        prompt: compose_shot_prompt(&spec),
        references: spec.references.to_vec(),
        image_config: GeminiImageConfig {
            aspect_ratio: Some(spec.aspect_ratio.to_string()),
            image_size: Some(settings.image_size.clone()),
        },
    };

    let id = new_image_id();
    let url = match backend.generate_image(request).await {
        Ok(images) => match images.into_iter().next() {
            Some(image) => {
                info!("Shot {}/{} synthesized as {}", spec.index + 1, spec.total, id);
                image.to_data_url()
            }
            None => {
                warn!(
                    "Shot {}/{} returned no image; using placeholder",
                    spec.index + 1,
                    spec.total
                );
                placeholder_url(&settings.placeholder_base_url, &new_image_id())
            }
        },
        Err(err) => {
            warn!(
                "Shot {}/{} generation failed; using placeholder: {err:#}",
                spec.index + 1,
                spec.total
            );
            placeholder_url(&settings.placeholder_base_url, &new_image_id())
        }
    };

    GeneratedImage {
        id,
        url,
        prompt: spec.scene.to_string(),
        created_at: Utc::now(),
        is_branded: false,
        status: ImageStatus::Draft,
        aspect_ratio: Some(spec.aspect_ratio.to_string()),
        original_refs: spec.references.to_vec(),
        character_dna: spec.character_dna.map(|dna| dna.to_string()),
    }
}
