//! Typed per-ROI inspection results.
//!
//! Every detector produces exactly one [`RoiOutcome`] variant; the variant
//! tag is part of the response contract, so downstream consumers switch on
//! `kind` instead of probing optional fields.

use serde::{Deserialize, Serialize};

use crate::roi::RoiType;

// ── Per-ROI outcome ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoiOutcome {
    /// Decoded barcode values. Passed iff at least one non-empty value.
    Barcode { values: Vec<String>, passed: bool },
    /// Golden-sample similarity comparison.
    Compare {
        similarity: f64,
        threshold: f64,
        passed: bool,
        /// Artifact file name of the captured crop in the session output
        /// directory, when one was written.
        #[serde(skip_serializing_if = "Option::is_none")]
        captured_file: Option<String>,
        /// Artifact file name of the matched reference crop.
        #[serde(skip_serializing_if = "Option::is_none")]
        reference_file: Option<String>,
    },
    /// OCR text with its `[PASS: ...]` / `[FAIL: ...]` annotation.
    Ocr {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        expected: Option<String>,
        passed: bool,
        rotation: i64,
    },
    /// Color range match.
    Color {
        detected_color: String,
        /// Display percentage, capped at 100.
        match_percentage: f64,
        /// True aggregated percentage; legacy multi-range sums can exceed 100.
        match_percentage_raw: f64,
        dominant_rgb: [u8; 3],
        #[serde(skip_serializing_if = "Option::is_none")]
        expected_color: Option<[u8; 3]>,
        threshold: f64,
        passed: bool,
    },
    /// The detector itself failed. Isolated to this ROI; never fails the
    /// inspection.
    Error { message: String },
}

impl RoiOutcome {
    pub fn passed(&self) -> bool {
        match self {
            Self::Barcode { passed, .. }
            | Self::Compare { passed, .. }
            | Self::Ocr { passed, .. }
            | Self::Color { passed, .. } => *passed,
            Self::Error { .. } => false,
        }
    }
}

/// One ROI's result with enough of its configuration to aggregate by device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoiResult {
    pub roi_id: i64,
    pub roi_type: RoiType,
    pub device_id: i64,
    pub is_device_barcode: bool,
    #[serde(flatten)]
    pub outcome: RoiOutcome,
}

impl RoiResult {
    pub fn passed(&self) -> bool {
        self.outcome.passed()
    }

    /// First decoded barcode value, for device-barcode resolution.
    pub fn barcode_value(&self) -> Option<&str> {
        match &self.outcome {
            RoiOutcome::Barcode { values, .. } => {
                values.iter().map(String::as_str).find(|v| !v.trim().is_empty())
            }
            _ => None,
        }
    }
}

// ── Overall verdict ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallResult {
    Pass,
    Fail,
}

impl OverallResult {
    pub fn from_bool(passed: bool) -> Self {
        if passed {
            Self::Pass
        } else {
            Self::Fail
        }
    }
}
