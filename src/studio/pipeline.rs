use tracing::info;

use crate::llm::{GenerativeBackend, InlineImage};
use crate::studio::shots::{synthesize_shot, ShotSettings, ShotSpec};
use crate::studio::storyboard::{plan_storyboard, Storyboard};
use crate::studio::types::{BatchSize, GeneratedImage, DEFAULT_ASPECT_RATIO};

/// Outfit anchor used when a single shot is redone outside its storyboard.
pub const REGENERATION_OUTFIT: &str = "CHARACTER OUTFIT PERSISTENCE";

#[derive(Debug, Clone)]
pub struct BatchRequest<'a> {
    pub theme: &'a str,
    pub references: &'a [InlineImage],
    pub batch_size: BatchSize,
    pub aspect_ratio: &'a str,
    pub character_dna: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct BatchResult {
    pub storyboard: Storyboard,
    pub images: Vec<GeneratedImage>,
}

impl BatchResult {
    pub fn placeholder_count(&self) -> usize {
        self.images.iter().filter(|image| image.is_placeholder()).count()
    }
}

/// Plans the storyboard, then synthesizes one shot per scene in order.
pub async fn generate_batch<B: GenerativeBackend>(
    backend: &B,
    request: BatchRequest<'_>,
    settings: &ShotSettings,
) -> BatchResult {
    info!(
        "Starting batch of {} ({} references, aspect {}, dna={})",
        request.batch_size,
        request.references.len(),
        request.aspect_ratio,
        request.character_dna.is_some()
    );

    let storyboard = plan_storyboard(
        backend,
        request.theme,
        request.batch_size,
        request.character_dna,
    )
    .await;

    // shots are numbered against the requested batch, not the plan length
    let total = request.batch_size.count();
    let mut images = Vec::with_capacity(storyboard.scenes.len());
    for (index, scene) in storyboard.scenes.iter().enumerate() {
        let spec = ShotSpec {
            scene,
            outfit: &storyboard.outfit,
            character_dna: request.character_dna,
            references: request.references,
            aspect_ratio: request.aspect_ratio,
            index,
            total,
        };
        images.push(synthesize_shot(backend, spec, settings).await);
    }

    let result = BatchResult { storyboard, images };
    info!(
        "Batch finished: {} images, {} placeholders",
        result.images.len(),
        result.placeholder_count()
    );
    result
}

/// Redoes one shot from its stored scene, references, aspect ratio and DNA.
pub async fn regenerate_shot<B: GenerativeBackend>(
    backend: &B,
    image: &GeneratedImage,
    settings: &ShotSettings,
) -> GeneratedImage {
    let aspect_ratio = image.aspect_ratio.as_deref().unwrap_or(DEFAULT_ASPECT_RATIO);
    let spec = ShotSpec {
        scene: &image.prompt,
        outfit: REGENERATION_OUTFIT,
        character_dna: image.character_dna.as_deref(),
        references: &image.original_refs,
        aspect_ratio,
        index: 0,
        total: 1,
    };
    let mut regenerated = synthesize_shot(backend, spec, settings).await;
    regenerated.original_refs = image.original_refs.clone();
    info!("Regenerated shot {} as {}", image.id, regenerated.id);
    regenerated
}
