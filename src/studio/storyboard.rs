use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::llm::{GenerativeBackend, TextRequest};
use crate::studio::types::BatchSize;

pub const FALLBACK_OUTFIT: &str = "Modern casual chic attire with consistent branding.";

static CODE_FENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*```[a-zA-Z]*\s*(?P<body>.*?)\s*```\s*$").expect("valid code fence regex")
});

/// One persistent outfit plus the chronological scene list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Storyboard {
    pub outfit: String,
    pub scenes: Vec<String>,
}

impl Storyboard {
    pub fn fallback(theme: &str, batch_size: BatchSize) -> Self {
        Storyboard {
            outfit: FALLBACK_OUTFIT.to_string(),
            scenes: (1..=batch_size.count())
                .map(|index| format!("Scene {index} of the sequence: {theme}"))
                .collect(),
        }
    }
}

fn storyboard_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "outfit": {
                "type": "STRING",
                "description": "Detailed description of the persistent outfit."
            },
            "scenes": {
                "type": "ARRAY",
                "items": { "type": "STRING" },
                "description": "The chronological sequence of scenes."
            }
        },
        "required": ["outfit", "scenes"]
    })
}

pub fn storyboard_prompt(theme: &str, batch_size: BatchSize, character_dna: Option<&str>) -> String {
    let count = batch_size.count();
    let identity = match character_dna {
        Some(dna) if !dna.trim().is_empty() => format!(
            "\n    LOCKED CHARACTER DNA (the subject of every scene):\n    {}\n",
            dna.trim()
        ),
        _ => String::new(),
    };

    format!(
        "You are a social media creative director for a top-tier AI Influencer agency.
    Master Theme: \"{theme}\"
    Action: Create a logical, high-engagement {count}-step chronological content sequence.
{identity}
    CRITICAL INSTRUCTIONS FOR PRODUCTION CONSISTENCY:
    1. Define a specific \"Base Outfit\" (clothing, accessories, hair style) that the character MUST wear in every single shot. Be specific about colors and materials.
    2. Maintain a consistent \"Time of Day\" or \"Lighting Palette\" that persists across all scenes to ensure the series looks like it was shot in one session.
    3. Ensure the character likeness and clothing NEVER change.

    Provide a JSON object with:
    - \"outfit\": A detailed description of the character's clothing and appearance.
    - \"scenes\": An array of {count} scene descriptions."
    )
}

fn strip_code_fence(text: &str) -> &str {
    match CODE_FENCE_RE.captures(text) {
        Some(captures) => captures.name("body").map(|m| m.as_str()).unwrap_or(text),
        None => text.trim(),
    }
}

/// Accepts any object whose `scenes` is an array; everything else yields
/// `None`. Non-string and blank scenes are dropped.
pub fn parse_storyboard(text: &str) -> Option<Storyboard> {
    let value: Value = serde_json::from_str(strip_code_fence(text)).ok()?;
    let scenes = value.get("scenes")?.as_array()?;
    let scenes = scenes
        .iter()
        .filter_map(|scene| scene.as_str())
        .map(|scene| scene.trim().to_string())
        .filter(|scene| !scene.is_empty())
        .collect::<Vec<_>>();
    let outfit = value
        .get("outfit")
        .and_then(|outfit| outfit.as_str())
        .map(|outfit| outfit.trim())
        .filter(|outfit| !outfit.is_empty())
        .unwrap_or(FALLBACK_OUTFIT)
        .to_string();

    Some(Storyboard { outfit, scenes })
}

/// Plans the batch. Never fails: an unusable plan or a failed call falls
/// back to numbered scenes around the theme.
pub async fn plan_storyboard<B: GenerativeBackend>(
    backend: &B,
    theme: &str,
    batch_size: BatchSize,
    character_dna: Option<&str>,
) -> Storyboard {
    let request = TextRequest::new(
        "plan_storyboard",
        storyboard_prompt(theme, batch_size, character_dna),
    )
    .with_response_schema(storyboard_schema());

    let text = match backend.generate_text(request).await {
        Ok(text) => text,
        Err(err) => {
            warn!("Storyboard planning failed, using fallback plan: {err:#}");
            return Storyboard::fallback(theme, batch_size);
        }
    };

    match parse_storyboard(&text) {
        Some(plan) if !plan.scenes.is_empty() => {
            if plan.scenes.len() != batch_size.count() {
                warn!(
                    "Storyboard returned {} scenes for a batch of {}",
                    plan.scenes.len(),
                    batch_size
                );
            }
            info!("Storyboard planned: {} scenes", plan.scenes.len());
            plan
        }
        _ => {
            warn!("Failed to parse storyboard plan, using fallback plan");
            Storyboard::fallback(theme, batch_size)
        }
    }
}
