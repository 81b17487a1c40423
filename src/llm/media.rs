use std::io::Cursor;
use std::time::Duration;

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose, Engine as _};
use image::imageops::FilterType;
use image::ImageFormat;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::StatusCode;
use tracing::{debug, error, warn};

use crate::utils::http::get_http_client;

static DATA_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^data:(?P<mime>[a-zA-Z]+/[a-zA-Z0-9.+-]+);base64,").expect("valid data url regex")
});

/// An image ready to be sent as an `inlineData` part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    /// Base64 payload without any `data:` prefix.
    pub data: String,
}

impl InlineImage {
    pub fn from_bytes(bytes: &[u8], mime_type: &str) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            data: general_purpose::STANDARD.encode(bytes),
        }
    }

    /// Accepts either a full data URL or a bare base64 payload. A bare payload
    /// is labelled `image/png`.
    pub fn from_data_url(value: &str) -> Self {
        let trimmed = value.trim();
        if let Some(captures) = DATA_URL_RE.captures(trimmed) {
            let prefix_len = captures.get(0).map(|m| m.end()).unwrap_or(0);
            return Self {
                mime_type: captures["mime"].to_ascii_lowercase(),
                data: trimmed[prefix_len..].to_string(),
            };
        }
        Self {
            mime_type: "image/png".to_string(),
            data: trimmed.to_string(),
        }
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    pub fn decode(&self) -> Result<Vec<u8>> {
        general_purpose::STANDARD
            .decode(self.data.as_bytes())
            .map_err(|err| anyhow!("Invalid base64 image payload: {err}"))
    }
}

pub fn is_data_url(value: &str) -> bool {
    DATA_URL_RE.is_match(value.trim())
}

pub fn detect_mime_type(data: &[u8]) -> Option<String> {
    if data.len() > 12 {
        let ftyp = &data[4..12];
        if ftyp.starts_with(b"ftyp") {
            let brand = &ftyp[4..8];
            if brand == b"heic" || brand == b"heif" || brand == b"hevc" {
                return Some("image/heic".to_string());
            }
        }
    }

    infer::get(data).map(|kind| kind.mime_type().to_string())
}

pub fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type.trim().to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/heic" | "image/heif" => "heic",
        _ => "png",
    }
}

/// Downscales oversized references and re-encodes them as PNG. Anything the
/// decoder cannot read is rejected.
pub fn prepare_reference_image(bytes: &[u8], max_dimension: u32) -> Result<InlineImage> {
    let mime_type = detect_mime_type(bytes)
        .ok_or_else(|| anyhow!("Unrecognized file type (expected an image)"))?;
    if !mime_type.starts_with("image/") {
        return Err(anyhow!("Unsupported reference type {mime_type} (expected an image)"));
    }

    let decoded = image::load_from_memory(bytes)
        .map_err(|err| anyhow!("Could not decode {mime_type} reference: {err}"))?;

    let longest_side = decoded.width().max(decoded.height());
    let decoded = if longest_side > max_dimension {
        debug!(
            "Downscaling reference from {}x{} to fit {}px",
            decoded.width(),
            decoded.height(),
            max_dimension
        );
        decoded.resize(max_dimension, max_dimension, FilterType::Lanczos3)
    } else {
        decoded
    };

    let mut encoded = Cursor::new(Vec::new());
    decoded
        .write_to(&mut encoded, ImageFormat::Png)
        .map_err(|err| anyhow!("Failed to encode reference as PNG: {err}"))?;
    Ok(InlineImage::from_bytes(&encoded.into_inner(), "image/png"))
}

const MEDIA_DOWNLOAD_MAX_ATTEMPTS: usize = 3;
const MEDIA_DOWNLOAD_BASE_DELAY_MS: u64 = 400;
const MEDIA_DOWNLOAD_ERROR_BODY_LIMIT: usize = 800;

pub fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

fn should_retry_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

fn should_retry_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

pub async fn download_media(url: &str) -> Option<Vec<u8>> {
    let client = get_http_client();
    for attempt in 0..MEDIA_DOWNLOAD_MAX_ATTEMPTS {
        let response = match client.get(url).send().await {
            Ok(resp) => resp,
            Err(err) => {
                warn!(
                    "Failed to fetch media {url}: {err} (timeout={}, connect={}, attempt={}/{})",
                    err.is_timeout(),
                    err.is_connect(),
                    attempt + 1,
                    MEDIA_DOWNLOAD_MAX_ATTEMPTS
                );
                if !should_retry_error(&err) || attempt + 1 == MEDIA_DOWNLOAD_MAX_ATTEMPTS {
                    return None;
                }
                let delay = Duration::from_millis(MEDIA_DOWNLOAD_BASE_DELAY_MS << attempt);
                tokio::time::sleep(delay).await;
                continue;
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(
                "Media download failed for {url} with status {}: {}",
                status,
                truncate_for_log(&body, MEDIA_DOWNLOAD_ERROR_BODY_LIMIT)
            );
            if !should_retry_status(status) || attempt + 1 == MEDIA_DOWNLOAD_MAX_ATTEMPTS {
                return None;
            }
            let delay = Duration::from_millis(MEDIA_DOWNLOAD_BASE_DELAY_MS << attempt);
            tokio::time::sleep(delay).await;
            continue;
        }

        return match response.bytes().await {
            Ok(bytes) => Some(bytes.to_vec()),
            Err(err) => {
                error!(
                    "Failed to read media bytes {url}: {err} (attempt={}/{})",
                    attempt + 1,
                    MEDIA_DOWNLOAD_MAX_ATTEMPTS
                );
                if attempt + 1 == MEDIA_DOWNLOAD_MAX_ATTEMPTS {
                    None
                } else {
                    let delay = Duration::from_millis(MEDIA_DOWNLOAD_BASE_DELAY_MS << attempt);
                    tokio::time::sleep(delay).await;
                    continue;
                }
            }
        };
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage, RgbaImage};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = DynamicImage::ImageRgb8(RgbImage::new(width, height));
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn data_url_prefix_is_split_from_payload() {
        let image = InlineImage::from_data_url("data:image/jpeg;base64,QUJD");
        assert_eq!(image.mime_type, "image/jpeg");
        assert_eq!(image.data, "QUJD");
        assert_eq!(image.to_data_url(), "data:image/jpeg;base64,QUJD");
        assert_eq!(image.decode().unwrap(), b"ABC");
    }

    #[test]
    fn bare_payload_is_labelled_png() {
        let image = InlineImage::from_data_url("QUJD");
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.data, "QUJD");
        assert!(!is_data_url("https://picsum.photos/seed/1/1080/1350"));
    }

    #[test]
    fn oversized_reference_is_downscaled_to_png() {
        let prepared = prepare_reference_image(&png_bytes(400, 200), 100).unwrap();
        assert_eq!(prepared.mime_type, "image/png");
        let decoded = image::load_from_memory(&prepared.decode().unwrap()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (100, 50));
    }

    #[test]
    fn small_reference_keeps_dimensions() {
        let prepared = prepare_reference_image(&png_bytes(32, 48), 100).unwrap();
        let decoded = image::load_from_memory(&prepared.decode().unwrap()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 48));
    }

    #[test]
    fn non_image_reference_is_rejected() {
        assert!(prepare_reference_image(b"%PDF-1.7 not an image at all", 100).is_err());
        assert!(prepare_reference_image(b"plain text", 100).is_err());
    }

    #[test]
    fn gif_reference_is_reencoded_as_png() {
        let mut gif = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(RgbaImage::new(8, 6))
            .write_to(&mut gif, ImageFormat::Gif)
            .unwrap();
        let gif = gif.into_inner();
        assert_eq!(detect_mime_type(&gif).as_deref(), Some("image/gif"));

        let prepared = prepare_reference_image(&gif, 1536).unwrap();
        assert_eq!(prepared.mime_type, "image/png");
        let decoded = image::load_from_memory(&prepared.decode().unwrap()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 6));
    }

    #[test]
    fn truncated_png_is_rejected() {
        let mut truncated = b"\x89PNG\r\n\x1a\n".to_vec();
        truncated.extend_from_slice(&[0u8; 16]);
        assert_eq!(detect_mime_type(&truncated).as_deref(), Some("image/png"));
        assert!(prepare_reference_image(&truncated, 1536).is_err());

        let mut cut = png_bytes(40, 40);
        cut.truncate(cut.len() / 2);
        assert!(prepare_reference_image(&cut, 1536).is_err());
    }

    #[test]
    fn extensions_follow_mime() {
        assert_eq!(extension_for_mime("image/jpeg"), "jpg");
        assert_eq!(extension_for_mime("IMAGE/WEBP"), "webp");
        assert_eq!(extension_for_mime("application/octet-stream"), "png");
    }
}
