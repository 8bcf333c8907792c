//! OCR detector.
//!
//! The crop is pre-rotated (canvas-expanding, nothing cropped away) before
//! recognition. Detected fragments join with single spaces, and the result
//! text always carries exactly one `[PASS: ...]` or `[FAIL: ...]` tag that
//! agrees with the boolean verdict.
//!
//! When an expected text is configured the match is a case-insensitive
//! substring test: physical labels routinely append lot and serial
//! characters after the SKU the ROI is actually checking for.

use image::RgbImage;

use aoi_types::{Roi, RoiOutcome};

use crate::engines::OcrEngine;
use crate::vision;

pub fn detect(frame: &RgbImage, roi: &Roi, engine: &dyn OcrEngine) -> RoiOutcome {
    let Some(crop) = vision::crop(frame, roi.coords) else {
        return RoiOutcome::Error {
            message: format!("ROI {} rectangle lies outside the frame", roi.roi_id),
        };
    };

    let oriented = vision::rotate(&crop, roi.rotation);

    let fragments = match engine.recognize(&oriented) {
        Ok(fragments) => fragments,
        Err(e) => {
            return RoiOutcome::Error {
                message: format!("ROI {}: OCR failed: {e}", roi.roi_id),
            }
        }
    };

    let detected = fragments
        .iter()
        .map(|f| f.trim())
        .filter(|f| !f.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    let expected = roi.expected_text.as_deref().filter(|e| !e.trim().is_empty());
    let (text, passed) = annotate(&detected, expected);

    RoiOutcome::Ocr {
        text,
        expected: expected.map(str::to_string),
        passed,
        rotation: roi.rotation,
    }
}

fn annotate(detected: &str, expected: Option<&str>) -> (String, bool) {
    match expected {
        Some(expected) => {
            let passed = detected.to_lowercase().contains(&expected.to_lowercase());
            let text = if passed {
                format!("{detected} [PASS: Contains '{expected}']")
            } else {
                format!("{detected} [FAIL: Expected '{expected}', detected '{detected}']")
            };
            (text, passed)
        }
        None => {
            if detected.is_empty() {
                ("[FAIL: No text detected]".to_string(), false)
            } else {
                (format!("{detected} [PASS: Text detected]"), true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::EngineError;
    use aoi_types::{RoiRect, RoiType};
    use image::Rgb;
    use std::sync::Mutex;

    struct FixedOcr(Vec<String>);

    impl OcrEngine for FixedOcr {
        fn recognize(&self, _img: &RgbImage) -> Result<Vec<String>, EngineError> {
            Ok(self.0.clone())
        }
    }

    /// Records the dimensions the engine was handed, to observe rotation.
    struct DimRecordingOcr(Mutex<Option<(u32, u32)>>);

    impl OcrEngine for DimRecordingOcr {
        fn recognize(&self, img: &RgbImage) -> Result<Vec<String>, EngineError> {
            *self.0.lock().unwrap() = Some(img.dimensions());
            Ok(vec!["X".into()])
        }
    }

    fn ocr_roi(expected: Option<&str>, rotation: i64) -> Roi {
        Roi {
            roi_id: 9,
            roi_type: RoiType::Ocr,
            coords: RoiRect::new(0, 0, 60, 20),
            focus: 305,
            exposure: 1200,
            ai_threshold: None,
            detection_method: "opencv".into(),
            rotation,
            device_id: 1,
            expected_text: expected.map(str::to_string),
            is_device_barcode: true,
            color_config: None,
        }
    }

    fn frame() -> RgbImage {
        RgbImage::from_pixel(100, 50, Rgb([255, 255, 255]))
    }

    fn tag_count(text: &str) -> usize {
        text.matches("[PASS:").count() + text.matches("[FAIL:").count()
    }

    #[test]
    fn substring_match_passes_case_insensitively() {
        let engine = FixedOcr(vec!["ASSY".into(), "pcb-V1.2".into()]);
        let outcome = detect(&frame(), &ocr_roi(Some("PCB"), 0), &engine);
        match &outcome {
            RoiOutcome::Ocr { text, passed, .. } => {
                assert!(passed);
                assert!(text.contains("[PASS: Contains 'PCB']"), "{text}");
                assert!(text.starts_with("ASSY pcb-V1.2"));
                assert_eq!(tag_count(text), 1);
            }
            other => panic!("expected ocr outcome, got {other:?}"),
        }
    }

    #[test]
    fn missing_expected_substring_fails() {
        let engine = FixedOcr(vec!["ABC123".into()]);
        let outcome = detect(&frame(), &ocr_roi(Some("PCB"), 0), &engine);
        match &outcome {
            RoiOutcome::Ocr { text, passed, .. } => {
                assert!(!passed);
                assert!(
                    text.contains("[FAIL: Expected 'PCB', detected 'ABC123']"),
                    "{text}"
                );
                assert_eq!(tag_count(text), 1);
            }
            other => panic!("expected ocr outcome, got {other:?}"),
        }
    }

    #[test]
    fn without_expectation_any_text_passes_and_none_fails() {
        let some = detect(&frame(), &ocr_roi(None, 0), &FixedOcr(vec!["LOT 42".into()]));
        assert!(some.passed());

        let none = detect(&frame(), &ocr_roi(None, 0), &FixedOcr(vec![]));
        match &none {
            RoiOutcome::Ocr { text, passed, .. } => {
                assert!(!passed);
                assert_eq!(text, "[FAIL: No text detected]");
            }
            other => panic!("expected ocr outcome, got {other:?}"),
        }
    }

    #[test]
    fn blank_expected_text_behaves_as_unset() {
        let outcome = detect(&frame(), &ocr_roi(Some("  "), 0), &FixedOcr(vec!["Z".into()]));
        match &outcome {
            RoiOutcome::Ocr { text, expected, passed, .. } => {
                assert!(passed);
                assert!(expected.is_none());
                assert!(text.contains("[PASS: Text detected]"));
            }
            other => panic!("expected ocr outcome, got {other:?}"),
        }
    }

    #[test]
    fn rotation_expands_canvas_before_recognition() {
        let engine = DimRecordingOcr(Mutex::new(None));
        let outcome = detect(&frame(), &ocr_roi(None, 90), &engine);
        // The 60x20 crop arrives rotated as 20x60 — full content, swapped
        // dimensions.
        assert_eq!(*engine.0.lock().unwrap(), Some((20, 60)));
        match outcome {
            RoiOutcome::Ocr { rotation, .. } => assert_eq!(rotation, 90),
            other => panic!("expected ocr outcome, got {other:?}"),
        }
    }
}
