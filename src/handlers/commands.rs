use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tracing::{info, warn};

use crate::llm::GenerativeBackend;
use crate::llm::media::{download_media, extension_for_mime, truncate_for_log, InlineImage};
use crate::state::AppState;
use crate::studio::credits::{CreditState, SubscriptionLevel, CREDIT_PACKS, FREE_LIMIT};
use crate::studio::dna::analyze_character_dna;
use crate::studio::enhance::enhance_prompt;
use crate::studio::pipeline::{generate_batch, regenerate_shot, BatchRequest};
use crate::studio::references::{load_reference_file, RefCategory, ReferenceCollector};
use crate::studio::types::validate_aspect_ratio;
use crate::studio::{BatchSize, GeneratedImage, ImageStatus, StudioError};

#[derive(Debug, Clone, PartialEq)]
pub struct GenerateArgs {
    pub theme: String,
    pub batch_size: BatchSize,
    pub aspect_ratio: String,
    pub references: Vec<(RefCategory, PathBuf)>,
    pub lock_identity: bool,
    /// A description from a previous `dna` run, used instead of analysis.
    pub character_dna: Option<String>,
    pub enhance: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CreditsAction {
    Show,
    TopUp(u32),
    Subscribe(SubscriptionLevel),
}

async fn collect_references<B: GenerativeBackend>(
    state: &AppState<B>,
    references: &[(RefCategory, PathBuf)],
) -> Result<ReferenceCollector> {
    let mut loaded = Vec::with_capacity(references.len());
    for (category, path) in references {
        loaded.push(load_reference_file(path, *category, state.max_reference_dimension).await?);
    }

    let mut collector = ReferenceCollector::new();
    let mut pending = loaded;
    loop {
        let rejected = collector.add_all(pending);
        let duplicates = collector.remove_duplicates()?;
        for reference in &duplicates {
            println!(
                "Skipped {} reference {}: same image already added",
                reference.category, reference.display_name
            );
        }
        // freed slots go to references that did not fit the first time
        if duplicates.is_empty() || rejected.is_empty() {
            for reference in &rejected {
                println!(
                    "Skipped {} reference {}: total limit reached",
                    reference.category, reference.display_name
                );
            }
            break;
        }
        pending = rejected;
    }
    if collector.total() > 0 {
        println!(
            "References: face={} style={} scene={}",
            collector.category(RefCategory::Face).len(),
            collector.category(RefCategory::Style).len(),
            collector.category(RefCategory::Scene).len()
        );
    }
    Ok(collector)
}

pub async fn generate_handler<B: GenerativeBackend>(
    state: &AppState<B>,
    args: GenerateArgs,
) -> Result<()> {
    let mut credits = state.load_credits().await?;
    credits.authorize_batch(args.batch_size)?;
    let aspect_ratio = validate_aspect_ratio(&args.aspect_ratio)?;

    let mut theme = args.theme.trim().to_string();
    if theme.is_empty() {
        return Err(anyhow!("A master theme is required (--theme)"));
    }

    let mut collector = collect_references(state, &args.references).await?;

    if args.enhance {
        match enhance_prompt(&state.backend, &theme).await {
            Ok(enhanced) => {
                println!("Enhanced theme:\n{enhanced}\n");
                theme = enhanced;
            }
            Err(err) => warn!("Prompt enhancement failed, keeping original theme: {err:#}"),
        }
    }

    if let Some(dna) = args.character_dna {
        let dna = dna.trim().to_string();
        if dna.is_empty() {
            return Err(anyhow!("--dna must not be empty"));
        }
        collector.lock_identity(dna);
    } else if args.lock_identity {
        let faces = collector.face_images();
        let dna = analyze_character_dna(&state.backend, &faces)
            .await
            .context("DNA analysis failed")?;
        println!("Identity locked:\n{dna}\n");
        collector.lock_identity(dna);
    }

    let references = collector.all_images();
    let result = generate_batch(
        &state.backend,
        BatchRequest {
            theme: &theme,
            references: &references,
            batch_size: args.batch_size,
            aspect_ratio: &aspect_ratio,
            character_dna: collector.character_dna(),
        },
        &state.shot_settings,
    )
    .await;

    state.db.prepend_batch(&result.images).await?;
    credits.charge_batch(result.images.len());
    state.db.save_credits(&credits).await?;

    println!("Outfit: {}", result.storyboard.outfit);
    for image in &result.images {
        println!("{}", format_image_line(image));
    }
    if result.placeholder_count() > 0 {
        println!(
            "{} shot(s) fell back to placeholders; use `regenerate --id <id>` to redo them.",
            result.placeholder_count()
        );
    }
    println!("{}", format_credits(&credits));
    Ok(())
}

pub async fn dna_handler<B: GenerativeBackend>(
    state: &AppState<B>,
    faces: &[PathBuf],
) -> Result<()> {
    let references: Vec<(RefCategory, PathBuf)> = faces
        .iter()
        .map(|path| (RefCategory::Face, path.clone()))
        .collect();
    let collector = collect_references(state, &references).await?;
    let dna = analyze_character_dna(&state.backend, &collector.face_images()).await?;
    println!("{dna}");
    Ok(())
}

pub async fn enhance_handler<B: GenerativeBackend>(
    state: &AppState<B>,
    prompt: &str,
) -> Result<()> {
    if prompt.trim().is_empty() {
        return Err(anyhow!("A prompt is required (--prompt)"));
    }
    let enhanced = enhance_prompt(&state.backend, prompt).await?;
    println!("{enhanced}");
    Ok(())
}

pub async fn regenerate_handler<B: GenerativeBackend>(state: &AppState<B>, id: &str) -> Result<()> {
    let mut credits = state.load_credits().await?;
    credits.authorize_regeneration()?;

    let original = state
        .db
        .get_image(id)
        .await?
        .ok_or_else(|| StudioError::ImageNotFound(id.to_string()))?;

    let regenerated = regenerate_shot(&state.backend, &original, &state.shot_settings).await;
    state.db.replace_image(&original.id, &regenerated).await?;
    credits.charge_regeneration();
    state.db.save_credits(&credits).await?;

    println!("Replaced {} with:", original.id);
    println!("{}", format_image_line(&regenerated));
    println!("{}", format_credits(&credits));
    Ok(())
}

pub async fn gallery_handler<B: GenerativeBackend>(state: &AppState<B>, limit: i64) -> Result<()> {
    let images = state.db.list_images(limit).await?;
    let total = state.db.count_images().await?;
    if images.is_empty() {
        println!("The gallery is empty.");
        return Ok(());
    }
    for image in &images {
        println!("{}", format_image_line(image));
    }
    let counts = state.db.status_counts().await?;
    println!(
        "Showing {} of {} (draft={}, scheduled={}, posted={})",
        images.len(),
        total,
        counts.get("draft").copied().unwrap_or(0),
        counts.get("scheduled").copied().unwrap_or(0),
        counts.get("posted").copied().unwrap_or(0)
    );
    Ok(())
}

pub async fn show_handler<B: GenerativeBackend>(state: &AppState<B>, id: &str) -> Result<()> {
    let image = state
        .db
        .get_image(id)
        .await?
        .ok_or_else(|| StudioError::ImageNotFound(id.to_string()))?;

    println!("id:           {}", image.id);
    println!("status:       {}", image.status);
    println!("created:      {}", image.created_at.to_rfc3339());
    println!(
        "aspect ratio: {}",
        image.aspect_ratio.as_deref().unwrap_or("unknown")
    );
    println!("branded:      {}", image.is_branded);
    println!("references:   {}", image.original_refs.len());
    if image.is_placeholder() {
        println!("url:          {} (placeholder)", image.url);
    } else {
        println!("url:          data URL ({} bytes)", image.url.len());
    }
    println!("scene:        {}", image.prompt);
    if let Some(dna) = &image.character_dna {
        println!("dna:          {}", dna);
    }
    Ok(())
}

pub async fn status_handler<B: GenerativeBackend>(
    state: &AppState<B>,
    id: &str,
    status: ImageStatus,
) -> Result<()> {
    state.db.set_status(id, status).await?;
    info!("Image {} marked {}", id, status);
    println!("{id} is now {status}");
    Ok(())
}

pub fn export_file_name(id: &str, mime_type: &str) -> String {
    format!("shooter-shot-{}.{}", id, extension_for_mime(mime_type))
}

pub async fn export_handler<B: GenerativeBackend>(
    state: &AppState<B>,
    id: &str,
    out_dir: &Path,
) -> Result<()> {
    let image = state
        .db
        .get_image(id)
        .await?
        .ok_or_else(|| StudioError::ImageNotFound(id.to_string()))?;

    let (bytes, mime_type) = if image.is_placeholder() {
        let bytes = download_media(&image.url)
            .await
            .ok_or_else(|| anyhow!("Failed to download placeholder image {}", image.url))?;
        let mime_type = crate::llm::media::detect_mime_type(&bytes)
            .unwrap_or_else(|| "image/jpeg".to_string());
        (bytes, mime_type)
    } else {
        let inline = InlineImage::from_data_url(&image.url);
        (inline.decode()?, inline.mime_type)
    };

    tokio::fs::create_dir_all(out_dir)
        .await
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;
    let path = out_dir.join(export_file_name(&image.id, &mime_type));
    tokio::fs::write(&path, &bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    info!("Exported {} ({} bytes) to {}", image.id, bytes.len(), path.display());
    println!("{}", path.display());
    Ok(())
}

pub async fn credits_handler<B: GenerativeBackend>(
    state: &AppState<B>,
    action: CreditsAction,
) -> Result<()> {
    let mut credits = state.load_credits().await?;
    match action {
        CreditsAction::Show => {}
        CreditsAction::TopUp(amount) => {
            let pack = credits.top_up(amount)?;
            state.db.save_credits(&credits).await?;
            println!(
                "Added {} ({} credits, ${:.2})",
                pack.label, pack.amount, pack.price
            );
        }
        CreditsAction::Subscribe(level) => {
            credits.subscribe(level);
            state.db.save_credits(&credits).await?;
            println!(
                "Subscription set to {} (${:.2}/month)",
                level,
                level.monthly_fee()
            );
        }
    }

    println!("{}", format_credits(&credits));
    if matches!(credits.subscription_level, SubscriptionLevel::None) && credits.credits_remaining == 0
    {
        let packs = CREDIT_PACKS
            .iter()
            .map(|pack| format!("{} ({})", pack.amount, pack.label))
            .collect::<Vec<_>>()
            .join(", ");
        println!("Credit packs: {packs}");
    }
    Ok(())
}

pub fn format_credits(credits: &CreditState) -> String {
    format!(
        "Credits: {} | free generations: {}/{} | plan: {} | api key: {}",
        credits.credits_remaining,
        credits.free_generations_remaining,
        FREE_LIMIT,
        credits.subscription_level,
        if credits.api_key_set { "set" } else { "missing" }
    )
}

pub fn format_image_line(image: &GeneratedImage) -> String {
    format!(
        "{:<10}  {:<9}  {:<4}  {}  {:<11}  {}",
        image.id,
        image.status.as_str(),
        image.aspect_ratio.as_deref().unwrap_or("-"),
        image.created_at.format("%Y-%m-%d %H:%M"),
        if image.is_placeholder() { "placeholder" } else { "generated" },
        truncate_for_log(&image.prompt.replace('\n', " "), 60)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::database::Database;
    use crate::studio::shots::ShotSettings;
    use crate::studio::testing::ScriptedBackend;
    use chrono::{TimeZone, Utc};

    const THREE_SCENES: &str =
        r#"{"outfit": "cream knit sweater", "scenes": ["pours coffee", "reads mail", "waves"]}"#;

    async fn scripted_state(
        backend: ScriptedBackend,
        initial: CreditState,
    ) -> AppState<ScriptedBackend> {
        AppState {
            db: Database::init("sqlite::memory:").await.unwrap(),
            backend,
            shot_settings: ShotSettings {
                image_size: "1K".to_string(),
                placeholder_base_url: "https://picsum.photos/seed".to_string(),
            },
            initial_credits: initial,
            max_reference_dimension: 256,
        }
    }

    fn generate_args(theme: &str) -> GenerateArgs {
        GenerateArgs {
            theme: theme.to_string(),
            batch_size: BatchSize::Three,
            aspect_ratio: "4:3".to_string(),
            references: Vec::new(),
            lock_identity: false,
            character_dna: None,
            enhance: false,
        }
    }

    fn stored_image(id: &str, url: &str) -> GeneratedImage {
        GeneratedImage {
            id: id.to_string(),
            url: url.to_string(),
            prompt: format!("scene for {id}"),
            created_at: Utc::now(),
            is_branded: false,
            status: ImageStatus::Draft,
            aspect_ratio: Some("9:16".to_string()),
            original_refs: vec![InlineImage {
                mime_type: "image/png".to_string(),
                data: "UkVG".to_string(),
            }],
            character_dna: Some("braided copper hair".to_string()),
        }
    }

    #[tokio::test]
    async fn generate_stores_batch_ahead_of_gallery_and_uses_trial() {
        let backend = ScriptedBackend::new()
            .text(THREE_SCENES)
            .image("QQ==")
            .image("Qg==")
            .image("Qw==");
        let state = scripted_state(backend, CreditState::new(0, true)).await;
        state
            .db
            .prepend_batch(&[stored_image("older", "data:image/png;base64,T0xE")])
            .await
            .unwrap();

        let mut args = generate_args("sunday brunch");
        args.character_dna = Some("  wide smile, dimples ".to_string());
        generate_handler(&state, args).await.unwrap();

        let images = state.db.list_images(10).await.unwrap();
        let prompts: Vec<&str> = images.iter().map(|i| i.prompt.as_str()).collect();
        assert_eq!(prompts, vec!["pours coffee", "reads mail", "waves", "scene for older"]);
        assert!(images[..3]
            .iter()
            .all(|i| i.character_dna.as_deref() == Some("wide smile, dimples")));

        let credits = state.load_credits().await.unwrap();
        assert_eq!(credits.free_generations_remaining, 0);
        assert_eq!(credits.credits_remaining, 0);

        // the supplied DNA skips analysis, so the only text call is the plan
        assert_eq!(state.backend.text_requests.lock().len(), 1);
        assert!(state
            .backend
            .image_prompts()
            .iter()
            .all(|p| p.contains("wide smile, dimples")));
    }

    #[tokio::test]
    async fn failed_store_charges_nothing() {
        let backend = ScriptedBackend::new()
            .text(THREE_SCENES)
            .image("QQ==")
            .image("Qg==")
            .image("Qw==");
        let state = scripted_state(backend, CreditState::new(0, true)).await;
        sqlx::query("DROP TABLE images")
            .execute(state.db.pool())
            .await
            .unwrap();

        assert!(generate_handler(&state, generate_args("gym day")).await.is_err());
        let credits = state.load_credits().await.unwrap();
        assert_eq!(credits.free_generations_remaining, FREE_LIMIT);
    }

    #[tokio::test]
    async fn failed_identity_lock_charges_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let face = dir.path().join("face.png");
        image::DynamicImage::ImageRgb8(image::RgbImage::new(6, 6))
            .save(&face)
            .unwrap();

        let backend = ScriptedBackend::new().text_error("quota exceeded");
        let state = scripted_state(backend, CreditState::new(0, true)).await;
        let mut args = generate_args("beach run");
        args.references = vec![(RefCategory::Face, face)];
        args.lock_identity = true;

        assert!(generate_handler(&state, args).await.is_err());
        assert_eq!(state.db.count_images().await.unwrap(), 0);
        assert!(state.backend.image_requests.lock().is_empty());
        let credits = state.load_credits().await.unwrap();
        assert_eq!(credits.free_generations_remaining, FREE_LIMIT);
    }

    #[tokio::test]
    async fn regenerate_replaces_in_place_and_charges_one_credit() {
        let backend = ScriptedBackend::new().image("TkVX");
        let state = scripted_state(backend, CreditState::new(5, true)).await;
        state
            .db
            .prepend_batch(&[
                stored_image("first", "https://picsum.photos/seed/a/1080/1350"),
                stored_image("second", "https://picsum.photos/seed/b/1080/1350"),
                stored_image("third", "https://picsum.photos/seed/c/1080/1350"),
            ])
            .await
            .unwrap();

        regenerate_handler(&state, "second").await.unwrap();

        let images = state.db.list_images(10).await.unwrap();
        assert_eq!(images.len(), 3);
        assert_eq!(images[0].id, "first");
        assert_eq!(images[2].id, "third");
        let replacement = &images[1];
        assert_ne!(replacement.id, "second");
        assert_eq!(replacement.url, "data:image/png;base64,TkVX");
        assert_eq!(replacement.prompt, "scene for second");
        assert!(state.db.get_image("second").await.unwrap().is_none());

        let stored = state.db.get_image(&replacement.id).await.unwrap().unwrap();
        assert_eq!(stored.original_refs.len(), 1);
        assert_eq!(stored.character_dna.as_deref(), Some("braided copper hair"));

        let credits = state.load_credits().await.unwrap();
        assert_eq!(credits.credits_remaining, 4);
    }

    #[tokio::test]
    async fn regenerate_unknown_image_charges_nothing() {
        let state = scripted_state(ScriptedBackend::new(), CreditState::new(2, true)).await;
        assert!(regenerate_handler(&state, "missing").await.is_err());
        assert_eq!(state.load_credits().await.unwrap().credits_remaining, 2);
    }

    #[tokio::test]
    async fn export_writes_decoded_bytes() {
        let state = scripted_state(ScriptedBackend::new(), CreditState::new(0, true)).await;
        state
            .db
            .prepend_batch(&[stored_image("exp1", "data:image/png;base64,QUJD")])
            .await
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("exports");
        export_handler(&state, "exp1", &out_dir).await.unwrap();

        let written = std::fs::read(out_dir.join("shooter-shot-exp1.png")).unwrap();
        assert_eq!(written, b"ABC");
    }

    #[test]
    fn export_names_follow_mime_type() {
        assert_eq!(export_file_name("ab12", "image/png"), "shooter-shot-ab12.png");
        assert_eq!(export_file_name("ab12", "image/jpeg"), "shooter-shot-ab12.jpg");
    }

    #[test]
    fn image_line_marks_placeholders() {
        let image = GeneratedImage {
            id: "abc123".to_string(),
            url: "https://picsum.photos/seed/1/1080/1350".to_string(),
            prompt: "walks\nthe dog".to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap(),
            is_branded: false,
            status: ImageStatus::Posted,
            aspect_ratio: Some("16:9".to_string()),
            original_refs: Vec::new(),
            character_dna: None,
        };
        let line = format_image_line(&image);
        assert!(line.starts_with("abc123"));
        assert!(line.contains("posted"));
        assert!(line.contains("2026-03-01 09:30"));
        assert!(line.contains("placeholder"));
        assert!(line.ends_with("walks the dog"));
    }

    #[test]
    fn credits_summary_reports_missing_key() {
        let summary = format_credits(&CreditState::new(4, false));
        assert_eq!(
            summary,
            "Credits: 4 | free generations: 3/3 | plan: none | api key: missing"
        );
    }
}
