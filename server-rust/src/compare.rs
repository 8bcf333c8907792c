//! Compare detector — golden-sample image similarity.
//!
//! The golden set is walked best-first: `best_golden.jpg` is the only file
//! checked on the fast path, and the first alternative that clears the
//! threshold is promoted into the best slot so the next inspection of this
//! ROI short-circuits again. Feature extraction is the expensive step;
//! the walk never extracts more vectors than it has to.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::RgbImage;
use tracing::{debug, warn};

use aoi_types::{Roi, RoiOutcome};

use crate::engines::FeatureExtractor;
use crate::golden::GoldenStore;
use crate::vision;

/// Similarities within this epsilon of the threshold count as matches;
/// repeated inspections of a borderline sample must not flap.
const SIMILARITY_EPSILON: f64 = 1e-8;

const DENOISE_STRENGTH: f32 = 10.0;

pub struct CompareContext<'a> {
    pub product: &'a str,
    pub golden: &'a GoldenStore,
    pub extractor: Arc<dyn FeatureExtractor>,
    /// Session output directory for crop artifacts; `None` skips artifact
    /// writes (unit tests, dry runs).
    pub output_dir: Option<&'a Path>,
}

pub fn detect(frame: &RgbImage, roi: &Roi, ctx: &CompareContext<'_>) -> RoiOutcome {
    let Some(crop) = vision::crop(frame, roi.coords) else {
        return RoiOutcome::Error {
            message: format!("ROI {} rectangle lies outside the frame", roi.roi_id),
        };
    };

    let threshold = roi.ai_threshold.unwrap_or(0.9);
    let captured_file = write_artifact(ctx.output_dir, roi.roi_id, "captured", &crop);

    let normalized = vision::denoise(&crop, DENOISE_STRENGTH);
    let captured_features = match ctx.extractor.extract(&normalized) {
        Ok(features) => features,
        Err(e) => {
            return RoiOutcome::Error {
                message: format!("feature extraction failed for ROI {}: {e}", roi.roi_id),
            }
        }
    };

    let goldens = ctx.golden.list(ctx.product, roi.roi_id);
    if goldens.is_empty() {
        // No references configured yet. Not a detector error: the result
        // is simply "different", with nothing to compare against.
        debug!("ROI {}: no golden samples for product {}", roi.roi_id, ctx.product);
        return RoiOutcome::Compare {
            similarity: 0.0,
            threshold,
            passed: false,
            captured_file,
            reference_file: None,
        };
    }

    let mut best_similarity = 0.0f64;
    let mut best_image: Option<RgbImage> = None;

    for (position, golden_path) in goldens.iter().enumerate() {
        let Some((golden_img, similarity)) =
            score_golden(golden_path, &crop, &captured_features, ctx)
        else {
            continue;
        };

        if similarity > best_similarity || best_image.is_none() {
            best_similarity = similarity;
            best_image = Some(golden_img.clone());
        }

        if similarity + SIMILARITY_EPSILON >= threshold {
            // Position 0 is the current best golden: nothing to promote,
            // and the remaining files are never touched.
            if position > 0 {
                debug!(
                    "ROI {}: promoting {:?} (similarity {similarity:.4})",
                    roi.roi_id,
                    golden_path.file_name().unwrap_or_default()
                );
                if let Err(e) = ctx.golden.promote(ctx.product, roi.roi_id, golden_path) {
                    warn!("ROI {}: golden promotion failed: {e}", roi.roi_id);
                }
            }
            let reference_file = write_artifact(ctx.output_dir, roi.roi_id, "golden", &golden_img);
            return RoiOutcome::Compare {
                similarity,
                threshold,
                passed: true,
                captured_file,
                reference_file,
            };
        }
    }

    let reference_file = best_image
        .as_ref()
        .and_then(|img| write_artifact(ctx.output_dir, roi.roi_id, "golden", img));
    debug!(
        "ROI {}: no golden matched (best {best_similarity:.4} < {threshold})",
        roi.roi_id
    );
    RoiOutcome::Compare {
        similarity: best_similarity,
        threshold,
        passed: false,
        captured_file,
        reference_file,
    }
}

/// Load one golden sample and score it against the captured features.
/// Unreadable or unprocessable samples are skipped, not fatal.
fn score_golden(
    path: &PathBuf,
    crop: &RgbImage,
    captured_features: &[f32],
    ctx: &CompareContext<'_>,
) -> Option<(RgbImage, f64)> {
    let golden = match vision::load_rgb(path) {
        Ok(img) => img,
        Err(e) => {
            warn!("skipping unreadable golden {path:?}: {e}");
            return None;
        }
    };

    // A golden captured at different dimensions still counts; bring it to
    // the crop's size before extraction.
    let golden = if golden.dimensions() != crop.dimensions() {
        vision::resize_to(&golden, crop.width(), crop.height())
    } else {
        golden
    };

    let normalized = vision::denoise(&golden, DENOISE_STRENGTH);
    match ctx.extractor.extract(&normalized) {
        Ok(features) => {
            let similarity = vision::cosine_similarity(&features, captured_features);
            Some((golden, similarity))
        }
        Err(e) => {
            warn!("skipping golden {path:?}: feature extraction failed: {e}");
            None
        }
    }
}

fn write_artifact(
    output_dir: Option<&Path>,
    roi_id: i64,
    kind: &str,
    img: &RgbImage,
) -> Option<String> {
    let dir = output_dir?;
    let filename = format!("roi_{roi_id}_{kind}.jpg");
    match vision::save_jpeg(&dir.join(&filename), img) {
        Ok(()) => Some(filename),
        Err(e) => {
            warn!("failed to write artifact {filename}: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::EngineError;
    use image::Rgb;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    use aoi_types::{RoiRect, RoiType};

    /// Counts extractions so tests can observe the short-circuit.
    struct CountingExtractor {
        calls: AtomicUsize,
    }

    impl CountingExtractor {
        fn new() -> Arc<Self> {
            Arc::new(Self { calls: AtomicUsize::new(0) })
        }
    }

    impl FeatureExtractor for CountingExtractor {
        fn name(&self) -> &str {
            "counting"
        }

        fn extract(&self, img: &RgbImage) -> Result<Vec<f32>, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Mean RGB is feature enough: solid colors compare exactly.
            let mean = vision::mean_rgb(img);
            Ok(vec![
                f32::from(mean[0]) + 1.0,
                f32::from(mean[1]) + 1.0,
                f32::from(mean[2]) + 1.0,
            ])
        }
    }

    fn compare_roi(roi_id: i64, threshold: f64) -> Roi {
        Roi {
            roi_id,
            roi_type: RoiType::Compare,
            coords: RoiRect::new(0, 0, 16, 16),
            focus: 305,
            exposure: 1200,
            ai_threshold: Some(threshold),
            detection_method: "counting".into(),
            rotation: 0,
            device_id: 1,
            expected_text: None,
            is_device_barcode: true,
            color_config: None,
        }
    }

    fn solid(rgb: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(16, 16, Rgb(rgb))
    }

    #[test]
    fn no_goldens_scores_zero_without_error() {
        let tmp = TempDir::new().unwrap();
        let store = GoldenStore::new(tmp.path());
        let extractor = CountingExtractor::new();
        let ctx = CompareContext {
            product: "widget",
            golden: &store,
            extractor: extractor.clone(),
            output_dir: None,
        };

        let outcome = detect(&solid([100, 100, 100]), &compare_roi(1, 0.9), &ctx);
        match outcome {
            RoiOutcome::Compare { similarity, passed, reference_file, .. } => {
                assert_eq!(similarity, 0.0);
                assert!(!passed);
                assert!(reference_file.is_none());
            }
            other => panic!("expected compare outcome, got {other:?}"),
        }
    }

    #[test]
    fn matching_best_golden_short_circuits() {
        let tmp = TempDir::new().unwrap();
        let store = GoldenStore::new(tmp.path());
        let frame = solid([120, 60, 30]);

        store.save_initial("widget", 2, &frame).unwrap();
        // A second golden that must never be touched on the fast path.
        vision::save_jpeg(
            &store.roi_dir("widget", 2).join("alt.jpg"),
            &solid([0, 255, 0]),
        )
        .unwrap();

        let extractor = CountingExtractor::new();
        let ctx = CompareContext {
            product: "widget",
            golden: &store,
            extractor: extractor.clone(),
            output_dir: None,
        };

        let outcome = detect(&frame, &compare_roi(2, 0.9), &ctx);
        assert!(outcome.passed());
        // One extraction for the capture, one for the best golden — the
        // alternative was never featurized.
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
        // And no promotion happened.
        assert!(store.roi_dir("widget", 2).join("alt.jpg").exists());
    }

    #[test]
    fn matching_alternative_is_promoted() {
        let tmp = TempDir::new().unwrap();
        let store = GoldenStore::new(tmp.path());
        let frame = solid([200, 10, 10]);

        // Current best mismatches; the alternative is the frame itself.
        store.save_initial("widget", 3, &solid([10, 200, 10])).unwrap();
        vision::save_jpeg(&store.roi_dir("widget", 3).join("alt.jpg"), &frame).unwrap();

        let ctx = CompareContext {
            product: "widget",
            golden: &store,
            extractor: CountingExtractor::new(),
            output_dir: None,
        };

        let outcome = detect(&frame, &compare_roi(3, 0.99), &ctx);
        assert!(outcome.passed());

        // The alternative now owns the best slot; the former best became a
        // timestamped backup; exactly one best exists.
        let dir = store.roi_dir("widget", 3);
        assert!(!dir.join("alt.jpg").exists());
        assert!(dir.join("best_golden.jpg").exists());
        let backups = std::fs::read_dir(&dir)
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().contains("_golden_sample"))
            .count();
        assert_eq!(backups, 1);
    }

    #[test]
    fn mismatch_reports_best_similarity() {
        let tmp = TempDir::new().unwrap();
        let store = GoldenStore::new(tmp.path());
        store.save_initial("widget", 4, &solid([0, 0, 255])).unwrap();

        let ctx = CompareContext {
            product: "widget",
            golden: &store,
            extractor: CountingExtractor::new(),
            output_dir: None,
        };

        let outcome = detect(&solid([255, 0, 0]), &compare_roi(4, 0.999), &ctx);
        match outcome {
            RoiOutcome::Compare { similarity, passed, .. } => {
                assert!(!passed);
                assert!(similarity > 0.0 && similarity < 0.999);
            }
            other => panic!("expected compare outcome, got {other:?}"),
        }
    }

    #[test]
    fn golden_with_other_dimensions_is_resized() {
        let tmp = TempDir::new().unwrap();
        let store = GoldenStore::new(tmp.path());
        // 64x64 golden against a 16x16 crop of the same solid color.
        store
            .save_initial("widget", 5, &RgbImage::from_pixel(64, 64, Rgb([77, 77, 77])))
            .unwrap();

        let ctx = CompareContext {
            product: "widget",
            golden: &store,
            extractor: CountingExtractor::new(),
            output_dir: None,
        };
        let outcome = detect(&solid([77, 77, 77]), &compare_roi(5, 0.99), &ctx);
        assert!(outcome.passed());
    }

    #[test]
    fn artifacts_are_written_to_output_dir() {
        let tmp = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let store = GoldenStore::new(tmp.path());
        let frame = solid([9, 9, 9]);
        store.save_initial("widget", 6, &frame).unwrap();

        let ctx = CompareContext {
            product: "widget",
            golden: &store,
            extractor: CountingExtractor::new(),
            output_dir: Some(out.path()),
        };
        let outcome = detect(&frame, &compare_roi(6, 0.9), &ctx);
        match outcome {
            RoiOutcome::Compare { captured_file, reference_file, .. } => {
                assert_eq!(captured_file.as_deref(), Some("roi_6_captured.jpg"));
                assert_eq!(reference_file.as_deref(), Some("roi_6_golden.jpg"));
                assert!(out.path().join("roi_6_captured.jpg").exists());
                assert!(out.path().join("roi_6_golden.jpg").exists());
            }
            other => panic!("expected compare outcome, got {other:?}"),
        }
    }
}
