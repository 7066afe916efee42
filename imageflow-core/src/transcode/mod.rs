//! Format detection and variant encoding.
//!
//! The encoders are native libraries with real memory appetites, so every
//! encode is dispatched through the [`pool::WorkerPool`]; nothing else in
//! the crate may call them. Their shared thread pool is initialized once
//! at startup via [`init_encoder_runtime`].

pub mod pool;

use crate::error::{ImageFlowError, Result};
use crate::model::ImageFormat;
use image::GenericImageView;
use once_cell::sync::OnceCell;
use ravif::{Img, RGBA8};
use std::io::Cursor;
use tracing::{info, warn};

/// Encoded variant targets.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EncodeTarget {
    Webp,
    Avif,
}

impl EncodeTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncodeTarget::Webp => "webp",
            EncodeTarget::Avif => "avif",
        }
    }
}

/// Encoder configuration. Quality runs 1..=100; speed runs 0 (slowest,
/// best compression) ..= 8 (fastest).
#[derive(Clone, Copy, Debug)]
pub struct EncodeSettings {
    pub quality: u8,
    pub speed: u8,
}

static ENCODER_RUNTIME: OnceCell<usize> = OnceCell::new();

/// Cap the encoders' shared thread pool at `worker_threads`. Must run
/// before the first encode; subsequent calls are no-ops.
pub fn init_encoder_runtime(worker_threads: usize) {
    ENCODER_RUNTIME.get_or_init(|| {
        match rayon::ThreadPoolBuilder::new().num_threads(worker_threads).build_global() {
            Ok(()) => info!(worker_threads, "encoder thread pool initialized"),
            Err(e) => warn!(error = %e, "encoder thread pool was already initialized"),
        }
        worker_threads
    });
}

/// Detect an image format from magic bytes. `None` means the payload is
/// not a recognized image at all.
pub fn try_detect(bytes: &[u8]) -> Option<ImageFormat> {
    // `ftyp` brands cover both still AVIF and sequences.
    if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" && (&bytes[8..12] == b"avif" || &bytes[8..12] == b"avis") {
        return Some(ImageFormat::Avif);
    }
    match image::guess_format(bytes).ok()? {
        image::ImageFormat::Jpeg => Some(ImageFormat::Jpeg),
        image::ImageFormat::Png => Some(ImageFormat::Png),
        image::ImageFormat::Gif => Some(ImageFormat::Gif),
        image::ImageFormat::WebP => Some(ImageFormat::Webp),
        image::ImageFormat::Avif => Some(ImageFormat::Avif),
        _ => None,
    }
}

/// Detect with the upload pipeline's fallback: anything unrecognized is
/// treated as JPEG.
pub fn detect_format(bytes: &[u8]) -> ImageFormat {
    try_detect(bytes).unwrap_or(ImageFormat::Jpeg)
}

/// Decoded pixel dimensions, without a full decode where the codec allows.
pub fn decode_dimensions(bytes: &[u8]) -> Result<(u32, u32)> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ImageFlowError::InvalidInput(format!("unreadable image: {e}")))?
        .into_dimensions()
        .map_err(|e| ImageFlowError::InvalidInput(format!("failed to decode image: {e}")))
}

/// Stateless variant encoder.
#[derive(Clone, Copy, Debug)]
pub struct Transcoder {
    settings: EncodeSettings,
}

impl Transcoder {
    pub fn new(settings: EncodeSettings) -> Self {
        Self { settings }
    }

    /// Encode `bytes` into `target`. GIF sources pass through unchanged;
    /// the caller stores the original as the "variant".
    pub fn encode(&self, bytes: &[u8], target: EncodeTarget) -> Result<Vec<u8>> {
        if detect_format(bytes) == ImageFormat::Gif {
            return Ok(bytes.to_vec());
        }

        let img = image::load_from_memory(bytes).map_err(|e| ImageFlowError::TranscodeFailed {
            target: target.as_str(),
            message: format!("decode failed: {e}"),
        })?;

        match target {
            EncodeTarget::Webp => self.encode_webp(&img),
            EncodeTarget::Avif => self.encode_avif(&img),
        }
    }

    fn encode_webp(&self, img: &image::DynamicImage) -> Result<Vec<u8>> {
        let rgba = img.to_rgba8();
        let (width, height) = img.dimensions();
        let encoder = webp::Encoder::from_rgba(rgba.as_raw(), width, height);
        Ok(encoder.encode(self.settings.quality as f32).to_vec())
    }

    fn encode_avif(&self, img: &image::DynamicImage) -> Result<Vec<u8>> {
        let rgba = img.to_rgba8();
        let (width, height) = img.dimensions();
        let pixels: Vec<RGBA8> = rgba
            .as_raw()
            .chunks_exact(4)
            .map(|px| RGBA8::new(px[0], px[1], px[2], px[3]))
            .collect();

        // ravif's speed scale is 1 (slowest) ..= 10; ours is 0..=8.
        let speed = (self.settings.speed + 1).min(10);
        let encoded = ravif::Encoder::new()
            .with_quality(self.settings.quality as f32)
            .with_alpha_quality(self.settings.quality as f32)
            .with_speed(speed)
            .encode_rgba(Img::new(pixels.as_slice(), width as usize, height as usize))
            .map_err(|e| ImageFlowError::TranscodeFailed {
                target: "avif",
                message: e.to_string(),
            })?;
        Ok(encoded.avif_file)
    }
}
