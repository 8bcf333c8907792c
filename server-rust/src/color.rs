//! Color detector.
//!
//! Two configuration modes:
//! - expected-color: the configured RGB target is mapped onto one of
//!   twelve predefined color ranges, and the ROI passes when enough pixels
//!   fall inside that range
//! - legacy ranges: explicit named RGB boxes, with per-name percentage
//!   summation (multiple boxes describing one color add up — the raw sum
//!   may exceed 100 and downstream consumers must not assume otherwise)
//!
//! The predefined range boundaries are an external contract; tooling on
//! the operator side renders the same table.

use image::RgbImage;

use aoi_types::{ColorConfig, Roi, RoiOutcome};

use crate::vision;

const DENOISE_STRENGTH: f32 = 5.0;

/// Inclusive RGB boxes, in resolution order.
pub const PREDEFINED_RANGES: [(&str, [u8; 3], [u8; 3]); 12] = [
    ("Black", [0, 0, 0], [50, 50, 50]),
    ("White", [230, 230, 230], [255, 255, 255]),
    ("Gray", [80, 80, 80], [200, 200, 200]),
    ("Red", [170, 0, 0], [255, 90, 90]),
    ("Green", [0, 170, 0], [100, 255, 100]),
    ("Blue", [0, 0, 170], [100, 100, 255]),
    ("Yellow", [220, 220, 0], [255, 255, 120]),
    ("Orange", [210, 120, 0], [255, 200, 80]),
    ("Purple", [120, 0, 160], [220, 100, 255]),
    ("Pink", [220, 120, 180], [255, 200, 255]),
    ("Brown", [120, 60, 0], [200, 140, 80]),
    ("Cyan", [0, 180, 180], [120, 255, 255]),
];

/// Map an expected RGB to a predefined range: the first range that either
/// contains the color or whose midpoint lies within distance 80 of it.
/// Unmatchable colors degrade to a zero-width custom range.
pub fn range_for_expected(rgb: [u8; 3]) -> (String, [u8; 3], [u8; 3]) {
    let [r, g, b] = rgb.map(f64::from);
    for (name, lower, upper) in PREDEFINED_RANGES {
        let in_range = (0..3).all(|c| rgb[c] >= lower[c] && rgb[c] <= upper[c]);
        let mid = [
            (f64::from(lower[0]) + f64::from(upper[0])) / 2.0,
            (f64::from(lower[1]) + f64::from(upper[1])) / 2.0,
            (f64::from(lower[2]) + f64::from(upper[2])) / 2.0,
        ];
        let dist = ((r - mid[0]).powi(2) + (g - mid[1]).powi(2) + (b - mid[2]).powi(2)).sqrt();
        if in_range || dist < 80.0 {
            return (name.to_string(), lower, upper);
        }
    }
    (
        format!("Custom RGB({},{},{})", rgb[0], rgb[1], rgb[2]),
        rgb,
        rgb,
    )
}

pub fn detect(frame: &RgbImage, roi: &Roi) -> RoiOutcome {
    let Some(crop) = vision::crop(frame, roi.coords) else {
        return RoiOutcome::Error {
            message: format!("ROI {} rectangle lies outside the frame", roi.roi_id),
        };
    };

    // Gentler denoise than the compare path: color information matters
    // more than texture here.
    let normalized = vision::denoise(&crop, DENOISE_STRENGTH);
    let dominant_rgb = vision::mean_rgb(&normalized);

    match &roi.color_config {
        Some(ColorConfig::Expected {
            expected_color,
            min_pixel_percentage,
            ..
        }) => {
            let (name, lower, upper) = range_for_expected(*expected_color);
            let percentage = vision::in_range_percentage(&normalized, lower, upper);
            let passed = percentage >= *min_pixel_percentage;
            RoiOutcome::Color {
                detected_color: if passed { name } else { "No Match".to_string() },
                match_percentage: percentage,
                match_percentage_raw: percentage,
                dominant_rgb,
                expected_color: Some(*expected_color),
                threshold: *min_pixel_percentage,
                passed,
            }
        }
        Some(ColorConfig::Ranges { color_ranges }) if !color_ranges.is_empty() => {
            // Percentages aggregate per range *name*; the threshold for a
            // name is the first one seen for it.
            let mut totals: Vec<(String, f64, f64)> = Vec::new();
            for range in color_ranges {
                let percentage =
                    vision::in_range_percentage(&normalized, range.lower, range.upper);
                match totals.iter_mut().find(|(name, _, _)| *name == range.name) {
                    Some((_, total, _)) => *total += percentage,
                    None => totals.push((range.name.clone(), percentage, range.threshold)),
                }
            }

            // Strictly-greater comparison over insertion order: an exact
            // percentage tie goes to the first-seen name.
            let mut winner: Option<(String, f64, f64)> = None;
            for (name, total, threshold) in &totals {
                let best_so_far = winner.as_ref().map_or(0.0, |(_, t, _)| *t);
                if *total > best_so_far {
                    winner = Some((name.clone(), *total, *threshold));
                }
            }
            match winner {
                Some((name, raw_total, threshold)) => {
                    let passed = raw_total >= threshold;
                    RoiOutcome::Color {
                        detected_color: name,
                        match_percentage: raw_total.min(100.0),
                        match_percentage_raw: raw_total,
                        dominant_rgb,
                        expected_color: None,
                        threshold,
                        passed,
                    }
                }
                None => RoiOutcome::Color {
                    detected_color: "Unknown".to_string(),
                    match_percentage: 0.0,
                    match_percentage_raw: 0.0,
                    dominant_rgb,
                    expected_color: None,
                    threshold: 50.0,
                    passed: false,
                },
            }
        }
        // No usable configuration. Historical behavior: report the
        // dominant color and pass; validation stops new configs from
        // getting here.
        _ => RoiOutcome::Color {
            detected_color: "Undefined".to_string(),
            match_percentage: 0.0,
            match_percentage_raw: 0.0,
            dominant_rgb,
            expected_color: None,
            threshold: 0.0,
            passed: true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aoi_types::{ColorRange, RoiRect, RoiType};
    use image::Rgb;

    fn color_roi(config: Option<ColorConfig>) -> Roi {
        Roi {
            roi_id: 11,
            roi_type: RoiType::Color,
            coords: RoiRect::new(0, 0, 24, 24),
            focus: 305,
            exposure: 1200,
            ai_threshold: None,
            detection_method: "opencv".into(),
            rotation: 0,
            device_id: 1,
            expected_text: None,
            is_device_barcode: true,
            color_config: config,
        }
    }

    fn solid_frame(rgb: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(32, 32, Rgb(rgb))
    }

    #[test]
    fn expected_red_maps_to_red_range() {
        let (name, lower, upper) = range_for_expected([255, 0, 0]);
        assert_eq!(name, "Red");
        assert_eq!(lower, [170, 0, 0]);
        assert_eq!(upper, [255, 90, 90]);
    }

    #[test]
    fn contained_colors_resolve_by_membership() {
        assert_eq!(range_for_expected([0, 0, 255]).0, "Blue");
        assert_eq!(range_for_expected([255, 255, 255]).0, "White");
        assert_eq!(range_for_expected([5, 5, 5]).0, "Black");
        assert_eq!(range_for_expected([90, 220, 220]).0, "Cyan");
    }

    #[test]
    fn far_off_colors_degrade_to_custom_range() {
        let (name, lower, upper) = range_for_expected([255, 0, 255]);
        assert_eq!(name, "Custom RGB(255,0,255)");
        assert_eq!(lower, [255, 0, 255]);
        assert_eq!(upper, [255, 0, 255]);
    }

    #[test]
    fn expected_mode_reddish_crop_passes() {
        let config = ColorConfig::Expected {
            expected_color: [255, 0, 0],
            color_tolerance: 10,
            min_pixel_percentage: 5.0,
        };
        // Mean RGB ~(240, 20, 20): inside the Red box for every pixel.
        let outcome = detect(&solid_frame([240, 20, 20]), &color_roi(Some(config)));
        match outcome {
            RoiOutcome::Color { detected_color, match_percentage, passed, threshold, .. } => {
                assert!(passed);
                assert_eq!(detected_color, "Red");
                assert!(match_percentage > 99.0);
                assert_eq!(threshold, 5.0);
            }
            other => panic!("expected color outcome, got {other:?}"),
        }
    }

    #[test]
    fn expected_mode_wrong_color_fails_as_no_match() {
        let config = ColorConfig::Expected {
            expected_color: [255, 0, 0],
            color_tolerance: 10,
            min_pixel_percentage: 5.0,
        };
        let outcome = detect(&solid_frame([20, 20, 240]), &color_roi(Some(config)));
        match outcome {
            RoiOutcome::Color { detected_color, passed, .. } => {
                assert!(!passed);
                assert_eq!(detected_color, "No Match");
            }
            other => panic!("expected color outcome, got {other:?}"),
        }
    }

    #[test]
    fn ranges_mode_sums_per_name_and_can_exceed_100() {
        // Two overlapping boxes under one name: a fully matching crop
        // scores 200 raw, capped to 100 for display.
        let config = ColorConfig::Ranges {
            color_ranges: vec![
                ColorRange {
                    name: "red".into(),
                    lower: [170, 0, 0],
                    upper: [255, 90, 90],
                    threshold: 150.0,
                },
                ColorRange {
                    name: "red".into(),
                    lower: [100, 0, 0],
                    upper: [255, 120, 120],
                    threshold: 90.0,
                },
            ],
        };
        let outcome = detect(&solid_frame([200, 30, 30]), &color_roi(Some(config)));
        match outcome {
            RoiOutcome::Color {
                detected_color,
                match_percentage,
                match_percentage_raw,
                threshold,
                passed,
                ..
            } => {
                assert_eq!(detected_color, "red");
                assert!((match_percentage_raw - 200.0).abs() < 1e-6);
                assert_eq!(match_percentage, 100.0);
                // First-seen threshold for the name wins.
                assert_eq!(threshold, 150.0);
                assert!(passed);
            }
            other => panic!("expected color outcome, got {other:?}"),
        }
    }

    #[test]
    fn ranges_mode_tie_resolves_to_first_seen_name() {
        // Both names match the whole crop (100% each); the tie must go to
        // the first-seen name, whose threshold then decides the verdict.
        let config = ColorConfig::Ranges {
            color_ranges: vec![
                ColorRange {
                    name: "alpha".into(),
                    lower: [0, 0, 0],
                    upper: [255, 255, 255],
                    threshold: 150.0,
                },
                ColorRange {
                    name: "beta".into(),
                    lower: [0, 0, 0],
                    upper: [255, 255, 255],
                    threshold: 90.0,
                },
            ],
        };
        let outcome = detect(&solid_frame([128, 128, 128]), &color_roi(Some(config)));
        match outcome {
            RoiOutcome::Color { detected_color, threshold, passed, .. } => {
                assert_eq!(detected_color, "alpha");
                assert_eq!(threshold, 150.0);
                assert!(!passed);
            }
            other => panic!("expected color outcome, got {other:?}"),
        }
    }

    #[test]
    fn ranges_mode_picks_highest_total() {
        let config = ColorConfig::Ranges {
            color_ranges: vec![
                ColorRange {
                    name: "blue".into(),
                    lower: [0, 0, 170],
                    upper: [100, 100, 255],
                    threshold: 50.0,
                },
                ColorRange {
                    name: "green".into(),
                    lower: [0, 170, 0],
                    upper: [100, 255, 100],
                    threshold: 50.0,
                },
            ],
        };
        let outcome = detect(&solid_frame([10, 220, 10]), &color_roi(Some(config)));
        match outcome {
            RoiOutcome::Color { detected_color, passed, .. } => {
                assert_eq!(detected_color, "green");
                assert!(passed);
            }
            other => panic!("expected color outcome, got {other:?}"),
        }
    }

    #[test]
    fn missing_config_reports_undefined() {
        let outcome = detect(&solid_frame([9, 9, 9]), &color_roi(None));
        match outcome {
            RoiOutcome::Color { detected_color, dominant_rgb, passed, .. } => {
                assert_eq!(detected_color, "Undefined");
                assert_eq!(dominant_rgb, [9, 9, 9]);
                assert!(passed);
            }
            other => panic!("expected color outcome, got {other:?}"),
        }
    }
}
