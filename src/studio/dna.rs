use anyhow::{anyhow, Result};
use tracing::info;

use crate::llm::{GenerativeBackend, InlineImage, TextRequest};
use crate::studio::error::StudioError;

const DNA_PROMPT: &str = "You are a casting director and character continuity supervisor for an AI influencer production.
Study the provided face reference images. They all show the SAME person.

Write a precise \"Character DNA\" profile that another image model can follow to reproduce this person exactly:
1. FACE: face shape, jawline, cheekbones, nose, lips, eyebrows, eye shape and eye color.
2. SKIN: tone, undertone, freckles, moles, scars or other distinguishing marks.
3. HAIR: color, length, texture, hairline and typical styling.
4. BODY: apparent build, height impression and posture.
5. SIGNATURE DETAILS: anything that makes this person instantly recognizable.

Describe only stable physical traits. Ignore clothing, background, lighting and expression.
Return ONLY the profile as plain text, no preamble.";

/// Extracts a free-text identity description from the face references.
pub async fn analyze_character_dna<B: GenerativeBackend>(
    backend: &B,
    face_refs: &[InlineImage],
) -> Result<String> {
    if face_refs.is_empty() {
        return Err(StudioError::NoFaceReferences.into());
    }

    let request = TextRequest::new("analyze_character_dna", DNA_PROMPT).with_images(face_refs.to_vec());
    let dna = backend.generate_text(request).await?;
    let dna = dna.trim();
    if dna.is_empty() {
        return Err(anyhow!("DNA analysis returned an empty description"));
    }

    info!(
        "Character DNA locked from {} face reference(s) ({} chars)",
        face_refs.len(),
        dna.chars().count()
    );
    Ok(dna.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::studio::testing::ScriptedBackend;

    fn face(data: &str) -> InlineImage {
        InlineImage {
            mime_type: "image/png".to_string(),
            data: data.to_string(),
        }
    }

    #[tokio::test]
    async fn sends_every_face_with_the_prompt() {
        let backend = ScriptedBackend::new().text("  oval face, hazel eyes\n");
        let dna = analyze_character_dna(&backend, &[face("a"), face("b")])
            .await
            .unwrap();
        assert_eq!(dna, "oval face, hazel eyes");

        let requests = backend.text_requests.lock();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].images.len(), 2);
        assert!(requests[0].prompt.contains("Character DNA"));
    }

    #[tokio::test]
    async fn requires_face_references() {
        let backend = ScriptedBackend::new();
        let err = analyze_character_dna(&backend, &[]).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StudioError>(),
            Some(StudioError::NoFaceReferences)
        ));
        assert!(backend.text_requests.lock().is_empty());
    }

    #[tokio::test]
    async fn blank_description_is_an_error() {
        let backend = ScriptedBackend::new().text("   ");
        assert!(analyze_character_dna(&backend, &[face("a")]).await.is_err());
    }
}
