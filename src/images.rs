//! Upload normalization: every accepted photo becomes a 1080x1920 JPEG.
//!
//! The source is scaled to cover the target canvas and center-cropped, so the
//! output is never letterboxed. Each call writes a new file; identical input
//! is not deduplicated.

use std::io::Cursor;
use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use tracing::{debug, info};

use crate::storage::{ImageStore, StorageError};

pub const TARGET_WIDTH: u32 = 1080;
pub const TARGET_HEIGHT: u32 = 1920;
pub const JPEG_QUALITY: u8 = 75;
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),
    #[error("jpeg encoding failed: {0}")]
    Encode(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Decode, cover-crop to the target size with Lanczos3, re-encode as JPEG.
/// Pure; no I/O.
pub fn normalize(raw: &[u8]) -> Result<Vec<u8>, ImageError> {
    match infer::get(raw) {
        Some(kind) if matches!(kind.matcher_type(), infer::MatcherType::Image) => {
            debug!(mime = kind.mime_type(), size = raw.len(), "decoding upload");
        }
        Some(kind) => return Err(ImageError::UnsupportedFormat(kind.mime_type().to_string())),
        None => return Err(ImageError::UnsupportedFormat("unknown".into())),
    }
    let source = image::load_from_memory(raw)
        .map_err(|e| ImageError::UnsupportedFormat(e.to_string()))?;
    let filled = source.resize_to_fill(TARGET_WIDTH, TARGET_HEIGHT, FilterType::Lanczos3);
    let rgb = filled.to_rgb8();

    let mut out = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
        .encode_image(&rgb)
        .map_err(|e| ImageError::Encode(e.to_string()))?;
    Ok(out.into_inner())
}

#[derive(Clone)]
pub struct ImagePipeline {
    store: Arc<dyn ImageStore>,
}

impl ImagePipeline {
    pub fn new(store: Arc<dyn ImageStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ImageStore> {
        &self.store
    }

    /// Normalizes `raw` off the async executor and persists the result,
    /// returning its relative storage path.
    pub async fn ingest(&self, raw: Vec<u8>) -> Result<String, ImageError> {
        let jpeg = tokio::task::spawn_blocking(move || normalize(&raw))
            .await
            .map_err(|e| ImageError::Encode(format!("resize task failed: {e}")))??;
        let path = self.store.save(&jpeg, "jpg").await?;
        info!(%path, size = jpeg.len(), "image ingested");
        Ok(path)
    }
}
