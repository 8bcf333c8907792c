//! Detector engine seams.
//!
//! The heavy recognition machinery (deep feature models, OCR, the barcode
//! SDK) lives outside this process. Each is a trait here; the server wires
//! concrete engines at startup:
//!
//! - feature extraction has two built-in, fully in-process extractors
//!   (nothing external needed for the compare path)
//! - OCR and barcode decoding go to HTTP sidecars when an endpoint is
//!   configured, and otherwise report [`EngineError::Unavailable`] so the
//!   affected ROI fails on its own without touching the rest of the
//!   inspection
//!
//! Tests substitute fixed or counting fakes through the same traits.

use std::sync::Arc;
use std::time::Duration;

use image::RgbImage;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::state::ServerConfig;
use crate::vision;

pub const SIDECAR_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine unavailable: {0}")]
    Unavailable(String),
    #[error("engine failed: {0}")]
    Failed(String),
}

// ── Feature extraction ────────────────────────────────────────────────────────

/// Produces a fixed-dimension feature vector for cosine comparison.
pub trait FeatureExtractor: Send + Sync {
    fn name(&self) -> &str;
    fn extract(&self, img: &RgbImage) -> Result<Vec<f32>, EngineError>;
}

/// Opponent-color grid descriptor, the "opencv" method slot.
///
/// Pixels map to the opponent color space (O1 red-green, O2 yellow-blue,
/// O3 intensity); each of a 4x4 grid of cells contributes its three mean
/// opponent components, giving a 48-dimension vector that is illumination
/// tolerant the way the opponent-SIFT aggregate it replaces was.
pub struct OpponentColorFeatures;

const OPPONENT_GRID: u32 = 4;

impl FeatureExtractor for OpponentColorFeatures {
    fn name(&self) -> &str {
        "opencv"
    }

    fn extract(&self, img: &RgbImage) -> Result<Vec<f32>, EngineError> {
        let (w, h) = img.dimensions();
        if w == 0 || h == 0 {
            return Err(EngineError::Failed("empty image".into()));
        }
        let mut sums = vec![0f64; (OPPONENT_GRID * OPPONENT_GRID * 3) as usize];
        let mut counts = vec![0u64; (OPPONENT_GRID * OPPONENT_GRID) as usize];

        for (x, y, px) in img.enumerate_pixels() {
            let [r, g, b] = px.0.map(f64::from);
            let o1 = (r - g) / 2f64.sqrt();
            let o2 = (r + g - 2.0 * b) / 6f64.sqrt();
            let o3 = (r + g + b) / 3f64.sqrt();

            let cx = (x * OPPONENT_GRID / w).min(OPPONENT_GRID - 1);
            let cy = (y * OPPONENT_GRID / h).min(OPPONENT_GRID - 1);
            let cell = (cy * OPPONENT_GRID + cx) as usize;
            sums[cell * 3] += o1;
            sums[cell * 3 + 1] += o2;
            sums[cell * 3 + 2] += o3;
            counts[cell] += 1;
        }

        let mut features = Vec::with_capacity(sums.len());
        for (cell, count) in counts.iter().enumerate() {
            let n = (*count).max(1) as f64;
            for c in 0..3 {
                features.push((sums[cell * 3 + c] / n) as f32);
            }
        }
        Ok(features)
    }
}

/// Pooled grid embedding, the "mobilenet" method slot.
///
/// An 8x8 spatial pooling of per-cell luminance mean, contrast, and
/// chroma — a stand-in with the same shape contract (fixed-dimension
/// vector, cosine comparable) as the deep extractor that plugs in behind
/// this trait in production.
pub struct GridEmbedding;

const EMBED_GRID: u32 = 8;

impl FeatureExtractor for GridEmbedding {
    fn name(&self) -> &str {
        "mobilenet"
    }

    fn extract(&self, img: &RgbImage) -> Result<Vec<f32>, EngineError> {
        let (w, h) = img.dimensions();
        if w == 0 || h == 0 {
            return Err(EngineError::Failed("empty image".into()));
        }
        let cells = (EMBED_GRID * EMBED_GRID) as usize;
        let mut luma_sums = vec![0f64; cells];
        let mut luma_squares = vec![0f64; cells];
        let mut chroma_sums = vec![0f64; cells * 2];
        let mut counts = vec![0u64; cells];

        for (x, y, px) in img.enumerate_pixels() {
            let [r, g, b] = px.0.map(f64::from);
            let luma = 0.299 * r + 0.587 * g + 0.114 * b;
            let cx = (x * EMBED_GRID / w).min(EMBED_GRID - 1);
            let cy = (y * EMBED_GRID / h).min(EMBED_GRID - 1);
            let cell = (cy * EMBED_GRID + cx) as usize;
            luma_sums[cell] += luma;
            luma_squares[cell] += luma * luma;
            // Chroma keeps two same-brightness colors apart.
            chroma_sums[cell * 2] += r - g;
            chroma_sums[cell * 2 + 1] += b - luma;
            counts[cell] += 1;
        }

        let mut features = Vec::with_capacity(cells * 4);
        for cell in 0..cells {
            let n = counts[cell].max(1) as f64;
            let mean = luma_sums[cell] / n;
            let variance = (luma_squares[cell] / n - mean * mean).max(0.0);
            features.push(mean as f32);
            features.push(variance.sqrt() as f32);
            features.push((chroma_sums[cell * 2] / n) as f32);
            features.push((chroma_sums[cell * 2 + 1] / n) as f32);
        }
        Ok(features)
    }
}

// ── OCR ───────────────────────────────────────────────────────────────────────

pub trait OcrEngine: Send + Sync {
    /// Returns the detected text fragments, reading order.
    fn recognize(&self, img: &RgbImage) -> Result<Vec<String>, EngineError>;
}

/// OCR sidecar: POST the crop as JPEG, receive `{"texts": ["...", ...]}`.
pub struct HttpOcrEngine {
    client: reqwest::blocking::Client,
    url: String,
}

#[derive(Deserialize)]
struct OcrSidecarResponse {
    texts: Vec<String>,
}

impl HttpOcrEngine {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::blocking::Client::builder()
                .timeout(SIDECAR_TIMEOUT)
                .build()
                .unwrap_or_else(|e| {
                    warn!("sidecar client builder failed ({e}), using defaults");
                    reqwest::blocking::Client::new()
                }),
            url,
        }
    }
}

impl OcrEngine for HttpOcrEngine {
    fn recognize(&self, img: &RgbImage) -> Result<Vec<String>, EngineError> {
        let jpeg = vision::encode_jpeg(img, vision::JPEG_QUALITY)
            .map_err(|e| EngineError::Failed(format!("jpeg encode: {e}")))?;
        let response = self
            .client
            .post(&self.url)
            .header("content-type", "image/jpeg")
            .body(jpeg)
            .send()
            .map_err(|e| EngineError::Unavailable(format!("ocr sidecar: {e}")))?;
        if !response.status().is_success() {
            return Err(EngineError::Failed(format!(
                "ocr sidecar returned {}",
                response.status()
            )));
        }
        let parsed: OcrSidecarResponse = response
            .json()
            .map_err(|e| EngineError::Failed(format!("ocr sidecar payload: {e}")))?;
        Ok(parsed.texts)
    }
}

struct UnavailableOcr;

impl OcrEngine for UnavailableOcr {
    fn recognize(&self, _img: &RgbImage) -> Result<Vec<String>, EngineError> {
        Err(EngineError::Unavailable("no OCR engine configured".into()))
    }
}

// ── Barcode decoding ──────────────────────────────────────────────────────────

pub trait BarcodeDecoder: Send + Sync {
    /// Returns all decoded values found in the JPEG, possibly none.
    fn decode(&self, jpeg: &[u8]) -> Result<Vec<String>, EngineError>;
}

/// Barcode sidecar: POST the crop as JPEG, receive `{"barcodes": [...]}`.
pub struct HttpBarcodeDecoder {
    client: reqwest::blocking::Client,
    url: String,
}

#[derive(Deserialize)]
struct BarcodeSidecarResponse {
    barcodes: Vec<String>,
}

impl HttpBarcodeDecoder {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::blocking::Client::builder()
                .timeout(SIDECAR_TIMEOUT)
                .build()
                .unwrap_or_else(|e| {
                    warn!("sidecar client builder failed ({e}), using defaults");
                    reqwest::blocking::Client::new()
                }),
            url,
        }
    }
}

impl BarcodeDecoder for HttpBarcodeDecoder {
    fn decode(&self, jpeg: &[u8]) -> Result<Vec<String>, EngineError> {
        let response = self
            .client
            .post(&self.url)
            .header("content-type", "image/jpeg")
            .body(jpeg.to_vec())
            .send()
            .map_err(|e| EngineError::Unavailable(format!("barcode sidecar: {e}")))?;
        if !response.status().is_success() {
            return Err(EngineError::Failed(format!(
                "barcode sidecar returned {}",
                response.status()
            )));
        }
        let parsed: BarcodeSidecarResponse = response
            .json()
            .map_err(|e| EngineError::Failed(format!("barcode sidecar payload: {e}")))?;
        Ok(parsed.barcodes)
    }
}

struct UnavailableBarcode;

impl BarcodeDecoder for UnavailableBarcode {
    fn decode(&self, _jpeg: &[u8]) -> Result<Vec<String>, EngineError> {
        Err(EngineError::Unavailable("no barcode decoder configured".into()))
    }
}

// ── Engine registry ───────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Engines {
    extractors: Vec<Arc<dyn FeatureExtractor>>,
    pub ocr: Arc<dyn OcrEngine>,
    pub barcode: Arc<dyn BarcodeDecoder>,
}

impl Engines {
    pub fn from_config(config: &ServerConfig) -> Self {
        let ocr: Arc<dyn OcrEngine> = match &config.ocr_url {
            Some(url) => Arc::new(HttpOcrEngine::new(url.clone())),
            None => Arc::new(UnavailableOcr),
        };
        let barcode: Arc<dyn BarcodeDecoder> = match &config.barcode_url {
            Some(url) => Arc::new(HttpBarcodeDecoder::new(url.clone())),
            None => Arc::new(UnavailableBarcode),
        };
        Self {
            extractors: vec![Arc::new(OpponentColorFeatures), Arc::new(GridEmbedding)],
            ocr,
            barcode,
        }
    }

    /// Registry for tests and embedders.
    pub fn with_engines(
        extractors: Vec<Arc<dyn FeatureExtractor>>,
        ocr: Arc<dyn OcrEngine>,
        barcode: Arc<dyn BarcodeDecoder>,
    ) -> Self {
        Self { extractors, ocr, barcode }
    }

    /// Select the extractor for a ROI's `detection_method`. The method is a
    /// hint, not a contract: unknown names fall back to "opencv".
    pub fn extractor_for(&self, method: &str) -> Arc<dyn FeatureExtractor> {
        if let Some(found) = self.extractors.iter().find(|e| e.name() == method) {
            return found.clone();
        }
        if let Some(fallback) = self.extractors.iter().find(|e| e.name() == "opencv") {
            warn!("unknown detection method {method:?}, falling back to opencv");
            return fallback.clone();
        }
        self.extractors[0].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn opponent_features_identical_images_are_identical() {
        let img = RgbImage::from_fn(32, 32, |x, y| Rgb([(x * 7) as u8, (y * 5) as u8, 90]));
        let a = OpponentColorFeatures.extract(&img).unwrap();
        let b = OpponentColorFeatures.extract(&img).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 48);
        assert!((crate::vision::cosine_similarity(&a, &b) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn grid_embedding_separates_different_content() {
        let flat = RgbImage::from_pixel(32, 32, Rgb([40, 40, 40]));
        let pattern = RgbImage::from_fn(32, 32, |x, _| {
            if x % 2 == 0 { Rgb([255, 255, 255]) } else { Rgb([0, 0, 0]) }
        });
        let a = GridEmbedding.extract(&flat).unwrap();
        let b = GridEmbedding.extract(&pattern).unwrap();
        assert_eq!(a.len(), 256);
        assert!(crate::vision::cosine_similarity(&a, &b) < 0.999);
    }

    #[test]
    fn unknown_method_falls_back_to_opencv() {
        let config = ServerConfig {
            port: 0,
            config_root: "config".into(),
            shared_root: "/tmp".into(),
            link_url: None,
            link_enabled: false,
            ocr_url: None,
            barcode_url: None,
            max_workers: 1,
        };
        let engines = Engines::from_config(&config);
        assert_eq!(engines.extractor_for("something-new").name(), "opencv");
        assert_eq!(engines.extractor_for("mobilenet").name(), "mobilenet");
    }

    #[test]
    fn unconfigured_engines_report_unavailable() {
        let img = RgbImage::from_pixel(4, 4, Rgb([0, 0, 0]));
        assert!(matches!(
            UnavailableOcr.recognize(&img),
            Err(EngineError::Unavailable(_))
        ));
        assert!(matches!(
            UnavailableBarcode.decode(&[]),
            Err(EngineError::Unavailable(_))
        ));
    }
}
