use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use tracing::{debug, warn};

use crate::llm::media::{is_data_url, prepare_reference_image, InlineImage};
use crate::studio::error::StudioError;
use crate::studio::types::MAX_REFERENCE_IMAGES;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefCategory {
    Face,
    Style,
    Scene,
}

impl RefCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            RefCategory::Face => "face",
            RefCategory::Style => "style",
            RefCategory::Scene => "scene",
        }
    }
}

impl FromStr for RefCategory {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "face" => Ok(RefCategory::Face),
            "style" => Ok(RefCategory::Style),
            "scene" => Ok(RefCategory::Scene),
            other => Err(anyhow!("Unknown reference category '{other}'")),
        }
    }
}

impl fmt::Display for RefCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceImage {
    pub category: RefCategory,
    pub display_name: String,
    pub image: InlineImage,
}

/// Reference images grouped by category, plus the Character DNA derived
/// from the current face set.
#[derive(Debug, Default, Clone)]
pub struct ReferenceCollector {
    face: Vec<ReferenceImage>,
    style: Vec<ReferenceImage>,
    scene: Vec<ReferenceImage>,
    character_dna: Option<String>,
}

impl ReferenceCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self) -> usize {
        self.face.len() + self.style.len() + self.scene.len()
    }

    pub fn remaining_slots(&self) -> usize {
        MAX_REFERENCE_IMAGES.saturating_sub(self.total())
    }

    fn bucket_mut(&mut self, category: RefCategory) -> &mut Vec<ReferenceImage> {
        match category {
            RefCategory::Face => &mut self.face,
            RefCategory::Style => &mut self.style,
            RefCategory::Scene => &mut self.scene,
        }
    }

    pub fn category(&self, category: RefCategory) -> &[ReferenceImage] {
        match category {
            RefCategory::Face => &self.face,
            RefCategory::Style => &self.style,
            RefCategory::Scene => &self.scene,
        }
    }

    fn push(&mut self, reference: ReferenceImage) {
        let category = reference.category;
        self.bucket_mut(category).push(reference);
        if category == RefCategory::Face {
            self.character_dna = None;
        }
    }

    pub fn add(&mut self, reference: ReferenceImage) -> Result<(), StudioError> {
        if self.remaining_slots() == 0 {
            return Err(StudioError::ReferenceLimit {
                max: MAX_REFERENCE_IMAGES,
            });
        }
        self.push(reference);
        Ok(())
    }

    /// Adds as many references as there are free slots and returns the ones
    /// that did not fit.
    pub fn add_all(&mut self, references: Vec<ReferenceImage>) -> Vec<ReferenceImage> {
        let mut rejected = Vec::new();
        for reference in references {
            if self.remaining_slots() == 0 {
                rejected.push(reference);
            } else {
                self.push(reference);
            }
        }
        if !rejected.is_empty() {
            warn!(
                "Reference limit of {} reached; skipped {} image(s)",
                MAX_REFERENCE_IMAGES,
                rejected.len()
            );
        }
        rejected
    }

    pub fn remove(&mut self, category: RefCategory, index: usize) -> Result<ReferenceImage, StudioError> {
        let bucket = self.bucket_mut(category);
        if index >= bucket.len() {
            return Err(StudioError::ReferenceIndex {
                category: category.as_str(),
                index,
            });
        }
        let removed = bucket.remove(index);
        if category == RefCategory::Face {
            self.character_dna = None;
        }
        Ok(removed)
    }

    /// Drops repeated images within a category, keeping the first copy.
    pub fn remove_duplicates(&mut self) -> Result<Vec<ReferenceImage>, StudioError> {
        let mut removed = Vec::new();
        for category in [RefCategory::Face, RefCategory::Style, RefCategory::Scene] {
            let mut index = 1;
            while index < self.category(category).len() {
                let bucket = self.category(category);
                let repeated = bucket[..index]
                    .iter()
                    .any(|earlier| earlier.image == bucket[index].image);
                if repeated {
                    removed.push(self.remove(category, index)?);
                } else {
                    index += 1;
                }
            }
        }
        Ok(removed)
    }

    pub fn character_dna(&self) -> Option<&str> {
        self.character_dna.as_deref()
    }

    pub fn lock_identity(&mut self, dna: String) {
        self.character_dna = Some(dna);
    }

    pub fn face_images(&self) -> Vec<InlineImage> {
        self.face.iter().map(|reference| reference.image.clone()).collect()
    }

    /// Face, then style, then scene references.
    pub fn all_images(&self) -> Vec<InlineImage> {
        self.face
            .iter()
            .chain(self.style.iter())
            .chain(self.scene.iter())
            .map(|reference| reference.image.clone())
            .collect()
    }
}

/// Reads an image file, or a text file holding a `data:` URL, into a
/// reference ready for upload.
pub async fn load_reference_file(
    path: &Path,
    category: RefCategory,
    max_dimension: u32,
) -> Result<ReferenceImage> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read reference image {}", path.display()))?;
    let display_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| category.as_str().to_string());

    let text_prefix = String::from_utf8_lossy(&bytes[..bytes.len().min(64)]).to_string();
    let image = if is_data_url(&text_prefix) {
        let text = String::from_utf8(bytes)
            .with_context(|| format!("{} is not a valid data URL", path.display()))?;
        let inline = InlineImage::from_data_url(&text);
        let decoded = inline.decode()?;
        prepare_reference_image(&decoded, max_dimension)?
    } else {
        prepare_reference_image(&bytes, max_dimension)
            .with_context(|| format!("{} is not a usable reference image", path.display()))?
    };

    debug!(
        "Loaded {} reference {} ({} base64 bytes)",
        category,
        display_name,
        image.data.len()
    );
    Ok(ReferenceImage {
        category,
        display_name,
        image,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(category: RefCategory, name: &str) -> ReferenceImage {
        ReferenceImage {
            category,
            display_name: name.to_string(),
            image: InlineImage {
                mime_type: "image/png".to_string(),
                data: name.to_string(),
            },
        }
    }

    #[test]
    fn total_is_capped_across_categories() {
        let mut collector = ReferenceCollector::new();
        for index in 0..10 {
            collector.add(reference(RefCategory::Style, &format!("s{index}"))).unwrap();
        }
        let batch = (0..8)
            .map(|index| reference(RefCategory::Scene, &format!("c{index}")))
            .collect();
        let rejected = collector.add_all(batch);
        assert_eq!(collector.total(), MAX_REFERENCE_IMAGES);
        assert_eq!(rejected.len(), 3);
        assert_eq!(rejected[0].display_name, "c5");
        assert!(matches!(
            collector.add(reference(RefCategory::Face, "late")),
            Err(StudioError::ReferenceLimit { max: 15 })
        ));
    }

    #[test]
    fn face_changes_reset_character_dna() {
        let mut collector = ReferenceCollector::new();
        collector.add(reference(RefCategory::Face, "f0")).unwrap();
        collector.lock_identity("sharp jawline".to_string());

        collector.add(reference(RefCategory::Style, "s0")).unwrap();
        assert_eq!(collector.character_dna(), Some("sharp jawline"));

        collector.add(reference(RefCategory::Face, "f1")).unwrap();
        assert_eq!(collector.character_dna(), None);

        collector.lock_identity("green eyes".to_string());
        collector.remove(RefCategory::Face, 0).unwrap();
        assert_eq!(collector.character_dna(), None);
        assert_eq!(collector.category(RefCategory::Face)[0].display_name, "f1");
    }

    #[test]
    fn removing_out_of_range_index_fails() {
        let mut collector = ReferenceCollector::new();
        assert!(matches!(
            collector.remove(RefCategory::Scene, 0),
            Err(StudioError::ReferenceIndex { category: "scene", index: 0 })
        ));
    }

    #[test]
    fn all_images_are_ordered_face_style_scene() {
        let mut collector = ReferenceCollector::new();
        collector.add(reference(RefCategory::Scene, "scene")).unwrap();
        collector.add(reference(RefCategory::Style, "style")).unwrap();
        collector.add(reference(RefCategory::Face, "face")).unwrap();
        let order: Vec<String> = collector.all_images().into_iter().map(|i| i.data).collect();
        assert_eq!(order, vec!["face", "style", "scene"]);
        assert_eq!(collector.face_images().len(), 1);
    }

    #[test]
    fn duplicates_are_dropped_per_category() {
        let mut collector = ReferenceCollector::new();
        collector.add(reference(RefCategory::Face, "same")).unwrap();
        collector.add(reference(RefCategory::Face, "other")).unwrap();
        collector.add(reference(RefCategory::Face, "same")).unwrap();
        collector.add(reference(RefCategory::Style, "same")).unwrap();
        collector.add(reference(RefCategory::Style, "same")).unwrap();

        let removed = collector.remove_duplicates().unwrap();
        assert_eq!(removed.len(), 2);
        let faces: Vec<&str> = collector
            .category(RefCategory::Face)
            .iter()
            .map(|r| r.display_name.as_str())
            .collect();
        assert_eq!(faces, vec!["same", "other"]);
        assert_eq!(collector.category(RefCategory::Style).len(), 1);
        assert_eq!(collector.total(), 3);
    }

    #[tokio::test]
    async fn data_url_files_load_as_png() {
        use base64::{engine::general_purpose, Engine as _};
        use image::{DynamicImage, ImageFormat, RgbImage};
        use std::io::Cursor;

        let mut jpeg = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::new(12, 9))
            .write_to(&mut jpeg, ImageFormat::Jpeg)
            .unwrap();
        let data_url = format!(
            "data:image/jpeg;base64,{}\n",
            general_purpose::STANDARD.encode(jpeg.into_inner())
        );

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.txt");
        std::fs::write(&path, data_url).unwrap();

        let loaded = load_reference_file(&path, RefCategory::Face, 1536).await.unwrap();
        assert_eq!(loaded.category, RefCategory::Face);
        assert_eq!(loaded.display_name, "face.txt");
        assert_eq!(loaded.image.mime_type, "image/png");
        let decoded = image::load_from_memory(&loaded.image.decode().unwrap()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (12, 9));
    }

    #[tokio::test]
    async fn plain_text_files_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "just some notes").unwrap();
        assert!(load_reference_file(&path, RefCategory::Scene, 1536).await.is_err());
    }

    #[test]
    fn categories_parse_case_insensitively() {
        assert_eq!("Face".parse::<RefCategory>().unwrap(), RefCategory::Face);
        assert!("pose".parse::<RefCategory>().is_err());
    }
}
