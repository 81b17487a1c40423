use anyhow::Result;

use crate::llm::{GenerativeBackend, TextRequest};

fn enhance_prompt_text(vague_prompt: &str) -> String {
    format!(
        "You are a prompt engineer for high-end AI fashion photography.
Your task is to take the user's input and ENHANCE it with professional photography details,
texture descriptions, specific lighting setups, and environmental depth.

STRICT MANDATE:
1. PRESERVE the user's original scene, concept, and core action EXACTLY as described. Do not reinvent the scenario.
2. ADD detail regarding camera gear (e.g., 35mm prime lens), lighting (e.g., soft key light, blue tint shadows),
   textures (e.g., visible fabric weave), and atmosphere (e.g., slight haze).
3. DO NOT introduce new characters, objects, or locations the user did not specify.
4. Focus on making the prompt sound like a professional production script.

Original Input: \"{vague_prompt}\"

Return ONLY the enhanced production-ready text."
    )
}

/// Adds production detail to a theme. Blank model output keeps the input.
pub async fn enhance_prompt<B: GenerativeBackend>(backend: &B, vague_prompt: &str) -> Result<String> {
    let vague_prompt = vague_prompt.trim();
    if vague_prompt.is_empty() {
        return Ok(String::new());
    }

    let request = TextRequest::new("enhance_prompt", enhance_prompt_text(vague_prompt));
    let enhanced = backend.generate_text(request).await?;
    let enhanced = enhanced.trim();
    if enhanced.is_empty() {
        return Ok(vague_prompt.to_string());
    }
    Ok(enhanced.to_string())
}
