//! Canonical ROI model.
//!
//! Everything in here is vocabulary-free: the serialized shapes (legacy
//! arrays, server objects, client objects) live in [`crate::codec`].

use serde::{Deserialize, Serialize};

// ── ROI type ──────────────────────────────────────────────────────────────────

/// Detector selector. The integer values are part of the on-disk contract
/// (legacy array position 1 and the server object's `type` field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum RoiType {
    /// 1D/2D barcode decode
    Barcode = 1,
    /// Golden-sample image similarity
    Compare = 2,
    /// Optical character recognition
    Ocr = 3,
    /// Color range match
    Color = 4,
}

impl RoiType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Barcode),
            2 => Some(Self::Compare),
            3 => Some(Self::Ocr),
            4 => Some(Self::Color),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Name used by the client vocabulary (`roi_type_name`).
    pub fn name(self) -> &'static str {
        match self {
            Self::Barcode => "barcode",
            Self::Compare => "compare",
            Self::Ocr => "ocr",
            Self::Color => "color",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "barcode" => Some(Self::Barcode),
            "compare" => Some(Self::Compare),
            "ocr" => Some(Self::Ocr),
            "color" => Some(Self::Color),
            _ => None,
        }
    }
}

// ── Rectangle ─────────────────────────────────────────────────────────────────

/// Pixel rectangle in the captured frame, `[x1, y1, x2, y2]` on the wire.
/// Stored as signed values so that out-of-range input survives until
/// validation reports it; valid rectangles satisfy `x1 < x2` and `y1 < y2`
/// inside the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoiRect {
    pub x1: i64,
    pub y1: i64,
    pub x2: i64,
    pub y2: i64,
}

impl RoiRect {
    pub fn new(x1: i64, y1: i64, x2: i64, y2: i64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn from_array(a: [i64; 4]) -> Self {
        Self::new(a[0], a[1], a[2], a[3])
    }

    pub fn to_array(self) -> [i64; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }

    pub fn width(&self) -> i64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i64 {
        self.y2 - self.y1
    }

    /// Well-formed and fully inside a `width × height` frame.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.x1 >= 0
            && self.y1 >= 0
            && self.x1 < self.x2
            && self.y1 < self.y2
            && self.x2 <= i64::from(width)
            && self.y2 <= i64::from(height)
    }
}

// ── Color configuration ───────────────────────────────────────────────────────

/// One named RGB box for the legacy ranges mode. Multiple ranges may share
/// a `name`; their match percentages are summed per name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorRange {
    pub name: String,
    pub lower: [u8; 3],
    pub upper: [u8; 3],
    #[serde(default = "ColorRange::default_threshold")]
    pub threshold: f64,
}

impl ColorRange {
    fn default_threshold() -> f64 {
        50.0
    }
}

/// Color-ROI configuration. Two shapes coexist in the field:
/// the expected-color form (a single RGB target resolved to a predefined
/// range) and the legacy explicit-ranges form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColorConfig {
    Expected {
        expected_color: [u8; 3],
        #[serde(default = "ColorConfig::default_tolerance")]
        color_tolerance: i64,
        #[serde(default = "ColorConfig::default_min_pixel_percentage")]
        min_pixel_percentage: f64,
    },
    Ranges {
        color_ranges: Vec<ColorRange>,
    },
}

impl ColorConfig {
    pub fn default_tolerance() -> i64 {
        10
    }

    pub fn default_min_pixel_percentage() -> f64 {
        5.0
    }
}

// ── Canonical ROI ─────────────────────────────────────────────────────────────

/// The canonical in-memory ROI. Produced only by [`crate::codec::normalize`];
/// emitted on the wire via [`crate::codec::ServerRoi`] / [`crate::codec::ClientRoi`].
#[derive(Debug, Clone, PartialEq)]
pub struct Roi {
    /// Identity, unique within a product. `next id = max + 1`.
    pub roi_id: i64,
    pub roi_type: RoiType,
    pub coords: RoiRect,
    /// Camera focus required to capture this ROI (valid range 0..=1000).
    pub focus: i64,
    /// Camera exposure in microseconds (valid range 0..=10000).
    pub exposure: i64,
    /// Similarity cutoff, Compare only.
    pub ai_threshold: Option<f64>,
    /// Detector sub-algorithm hint, e.g. "mobilenet" or "opencv".
    pub detection_method: String,
    /// Pre-rotation applied before OCR, multiple of 90 degrees.
    pub rotation: i64,
    /// Physical device observed by this ROI (1..=4).
    pub device_id: i64,
    /// Reference text (OCR) or SKU (Barcode).
    pub expected_text: Option<String>,
    /// Whether a barcode ROI identifies the device it belongs to.
    pub is_device_barcode: bool,
    /// Color only.
    pub color_config: Option<ColorConfig>,
}

impl Roi {
    /// Group key shared by every ROI captured with the same camera settings.
    pub fn group_key(&self) -> String {
        group_key(self.focus, self.exposure)
    }
}

/// `"<focus>,<exposure>"` — the string keying one capture group.
pub fn group_key(focus: i64, exposure: i64) -> String {
    format!("{focus},{exposure}")
}

/// Next free ROI id for a product configuration.
pub fn next_roi_id(rois: &[Roi]) -> i64 {
    rois.iter().map(|r| r.roi_id).max().map_or(1, |m| m + 1)
}

/// Partition ROIs into capture groups keyed by `(focus, exposure)`,
/// preserving the order groups first appear in the configuration. The
/// first group's settings are the ones the camera is initialized with.
pub fn group_rois(rois: &[Roi]) -> Vec<(String, (i64, i64), Vec<Roi>)> {
    let mut groups: Vec<(String, (i64, i64), Vec<Roi>)> = Vec::new();
    for roi in rois {
        let key = roi.group_key();
        match groups.iter_mut().find(|(k, _, _)| *k == key) {
            Some((_, _, members)) => members.push(roi.clone()),
            None => groups.push((key, (roi.focus, roi.exposure), vec![roi.clone()])),
        }
    }
    groups
}

/// Devices that need a manually entered barcode: every device id from 1 to
/// the highest id seen in the configuration that has no device-barcode ROI.
/// Devices with no ROIs at all still count — the operator must be able to
/// enter a barcode for them.
pub fn devices_needing_barcode(rois: &[Roi]) -> Vec<i64> {
    let max_device = rois.iter().map(|r| r.device_id).max().unwrap_or(0).max(1);
    let mut needing = Vec::new();
    for device_id in 1..=max_device {
        let has_device_barcode = rois.iter().any(|r| {
            r.device_id == device_id && r.roi_type == RoiType::Barcode && r.is_device_barcode
        });
        if !has_device_barcode {
            needing.push(device_id);
        }
    }
    needing
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roi(roi_id: i64, roi_type: RoiType, device_id: i64, focus: i64, exposure: i64) -> Roi {
        Roi {
            roi_id,
            roi_type,
            coords: RoiRect::new(0, 0, 10, 10),
            focus,
            exposure,
            ai_threshold: None,
            detection_method: "opencv".into(),
            rotation: 0,
            device_id,
            expected_text: None,
            is_device_barcode: true,
            color_config: None,
        }
    }

    #[test]
    fn groups_preserve_first_appearance_order() {
        let rois = vec![
            roi(1, RoiType::Compare, 1, 305, 1200),
            roi(2, RoiType::Barcode, 1, 400, 2000),
            roi(3, RoiType::Ocr, 2, 305, 1200),
        ];
        let groups = group_rois(&rois);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "305,1200");
        assert_eq!(groups[0].2.len(), 2);
        assert_eq!(groups[1].0, "400,2000");
    }

    #[test]
    fn device_barcode_analysis_covers_gap_devices() {
        // Device 3 has a barcode ROI; devices 1 and 2 have none at all.
        let rois = vec![roi(1, RoiType::Barcode, 3, 305, 1200)];
        assert_eq!(devices_needing_barcode(&rois), vec![1, 2]);
    }

    #[test]
    fn non_device_barcode_does_not_satisfy_device() {
        let mut r = roi(1, RoiType::Barcode, 1, 305, 1200);
        r.is_device_barcode = false;
        assert_eq!(devices_needing_barcode(&[r]), vec![1]);
    }

    #[test]
    fn rect_bounds() {
        let r = RoiRect::new(0, 0, 640, 480);
        assert!(r.fits_within(640, 480));
        assert!(!r.fits_within(639, 480));
        assert!(!RoiRect::new(10, 0, 10, 480).fits_within(640, 480));
        assert!(!RoiRect::new(-1, 0, 10, 10).fits_within(640, 480));
    }

    #[test]
    fn next_id_is_max_plus_one() {
        assert_eq!(next_roi_id(&[]), 1);
        let rois = vec![roi(7, RoiType::Ocr, 1, 305, 1200), roi(3, RoiType::Ocr, 1, 305, 1200)];
        assert_eq!(next_roi_id(&rois), 8);
    }
}
