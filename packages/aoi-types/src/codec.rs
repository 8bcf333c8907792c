//! ROI codec — the single translation point between serialized ROI shapes
//! and the canonical [`Roi`].
//!
//! Accepted on read, in any mix within one config file:
//! - legacy positional arrays of 3 to 12 elements
//! - server-named objects (`idx`, `type`, `coords`, `device_location`,
//!   `feature_method`, ...)
//! - client-named objects (`roi_id`, `roi_type_name`, `coordinates`,
//!   `device_id`, `detection_method`, ...)
//!
//! Emitted on write: [`ServerRoi`] (persisted configs, server API) and
//! [`ClientRoi`] (operator UI).
//!
//! Numeric fields tolerate string encodings ("305" is a focus value some
//! old config writers produced).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::roi::{ColorConfig, ColorRange, Roi, RoiRect, RoiType};

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum RoiCodecError {
    #[error("invalid ROI: {0}")]
    InvalidRoi(String),
}

impl RoiCodecError {
    fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRoi(msg.into())
    }
}

/// One field-level validation failure. A batch save returns every failure
/// found, not just the first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

// ── Lenient scalar coercion ───────────────────────────────────────────────────

fn as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
        }
        _ => None,
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn as_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|i| i != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn as_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn is_set(v: Option<&Value>) -> bool {
    matches!(v, Some(v) if !v.is_null())
}

// ── Normalization ─────────────────────────────────────────────────────────────

/// Normalize any accepted serialized shape into the canonical [`Roi`].
pub fn normalize(raw: &Value) -> Result<Roi, RoiCodecError> {
    match raw {
        Value::Array(items) => normalize_array(items),
        Value::Object(_) => normalize_object(raw),
        other => Err(RoiCodecError::invalid(format!(
            "expected ROI array or object, got {}",
            type_name(other)
        ))),
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn parse_coords(v: &Value) -> Result<RoiRect, RoiCodecError> {
    let items = v
        .as_array()
        .ok_or_else(|| RoiCodecError::invalid("coords must be a 4-element array"))?;
    if items.len() != 4 {
        return Err(RoiCodecError::invalid(format!(
            "coords must have 4 elements, got {}",
            items.len()
        )));
    }
    let mut out = [0i64; 4];
    for (i, item) in items.iter().enumerate() {
        out[i] = as_i64(item)
            .ok_or_else(|| RoiCodecError::invalid(format!("coords[{i}] is not numeric")))?;
    }
    Ok(RoiRect::from_array(out))
}

fn parse_roi_type(v: &Value) -> Result<RoiType, RoiCodecError> {
    if let Some(n) = as_i64(v) {
        return u8::try_from(n)
            .ok()
            .and_then(RoiType::from_u8)
            .ok_or_else(|| RoiCodecError::invalid(format!("unknown ROI type {n}")));
    }
    if let Some(s) = v.as_str() {
        return RoiType::from_name(s)
            .ok_or_else(|| RoiCodecError::invalid(format!("unknown ROI type {s:?}")));
    }
    Err(RoiCodecError::invalid("ROI type is neither numeric nor a name"))
}

fn parse_color_config(v: &Value) -> Result<Option<ColorConfig>, RoiCodecError> {
    if v.is_null() {
        return Ok(None);
    }
    serde_json::from_value::<ColorConfig>(v.clone())
        .map(Some)
        .map_err(|e| RoiCodecError::invalid(format!("malformed color config: {e}")))
}

/// Default detector method when none is stored. Short legacy arrays carry
/// a type-dependent default; everything else falls back to "opencv".
fn ladder_method(roi_type: RoiType) -> String {
    if roi_type == RoiType::Compare {
        "mobilenet".to_string()
    } else {
        "opencv".to_string()
    }
}

/// Legacy positional array, length 3..=12:
/// `[idx, type, coords, focus, exposure, ai_threshold, feature_method,
///   rotation, device_location, expected_text, is_device_barcode, color_config]`
///
/// Length quirks carried over from the historical writers:
/// - length 5 stores `ai_threshold` in slot 4 (no exposure field at all)
/// - lengths 3..=5 default exposure to 3000, not 1200
/// - lengths 3..=5 default `ai_threshold` to 0.9 for Compare ROIs
fn normalize_array(items: &[Value]) -> Result<Roi, RoiCodecError> {
    if !(3..=12).contains(&items.len()) {
        return Err(RoiCodecError::invalid(format!(
            "ROI array must have 3 to 12 elements, got {}",
            items.len()
        )));
    }

    let roi_id = as_i64(&items[0])
        .ok_or_else(|| RoiCodecError::invalid("ROI index (element 0) is not numeric"))?;
    let roi_type = parse_roi_type(&items[1])?;
    let coords = parse_coords(&items[2])?;

    let focus = match items.get(3) {
        Some(v) if !v.is_null() => as_i64(v)
            .ok_or_else(|| RoiCodecError::invalid("focus (element 3) is not numeric"))?,
        _ => 305,
    };

    let (exposure, ai_threshold) = match items.len() {
        3 | 4 => (3000, compare_default_threshold(roi_type)),
        5 => {
            let threshold = match &items[4] {
                Value::Null => compare_default_threshold(roi_type),
                v => Some(as_f64(v).ok_or_else(|| {
                    RoiCodecError::invalid("ai_threshold (element 4) is not numeric")
                })?),
            };
            (3000, threshold)
        }
        _ => {
            let exposure = match &items[4] {
                Value::Null => 1200,
                v => as_i64(v)
                    .ok_or_else(|| RoiCodecError::invalid("exposure (element 4) is not numeric"))?,
            };
            let threshold = match &items[5] {
                Value::Null => None,
                v => Some(as_f64(v).ok_or_else(|| {
                    RoiCodecError::invalid("ai_threshold (element 5) is not numeric")
                })?),
            };
            (exposure, threshold)
        }
    };

    let detection_method = if items.len() <= 6 {
        ladder_method(roi_type)
    } else {
        match &items[6] {
            Value::Null => "opencv".to_string(),
            v => as_string(v).ok_or_else(|| {
                RoiCodecError::invalid("feature_method (element 6) is not a string")
            })?,
        }
    };

    let rotation = match items.get(7) {
        Some(v) if !v.is_null() => as_i64(v)
            .ok_or_else(|| RoiCodecError::invalid("rotation (element 7) is not numeric"))?,
        _ => 0,
    };

    let device_id = match items.get(8) {
        Some(v) if !v.is_null() => as_i64(v)
            .ok_or_else(|| RoiCodecError::invalid("device_location (element 8) is not numeric"))?,
        _ => 1,
    };

    let expected_text = items.get(9).and_then(|v| as_string(v));

    let is_device_barcode = match items.get(10) {
        Some(v) if !v.is_null() => as_bool(v)
            .ok_or_else(|| RoiCodecError::invalid("is_device_barcode (element 10) is not a bool"))?,
        _ => true,
    };

    let color_config = match items.get(11) {
        Some(v) => parse_color_config(v)?,
        None => None,
    };

    Ok(Roi {
        roi_id,
        roi_type,
        coords,
        focus,
        exposure,
        ai_threshold,
        detection_method,
        rotation,
        device_id,
        expected_text,
        is_device_barcode,
        color_config,
    })
}

fn compare_default_threshold(roi_type: RoiType) -> Option<f64> {
    if roi_type == RoiType::Compare {
        Some(0.9)
    } else {
        None
    }
}

/// Object form in either vocabulary. Server names take precedence when both
/// are present; the client aliases are accepted field by field.
fn normalize_object(raw: &Value) -> Result<Roi, RoiCodecError> {
    let field = |names: &[&str]| -> Option<&Value> {
        names.iter().find_map(|n| raw.get(n)).filter(|v| !v.is_null())
    };

    let roi_id = match field(&["idx", "roi_id"]) {
        Some(v) => as_i64(v).ok_or_else(|| RoiCodecError::invalid("roi id is not numeric"))?,
        None => 0,
    };

    let roi_type = match field(&["type", "roi_type", "roi_type_name"]) {
        Some(v) => parse_roi_type(v)?,
        None => RoiType::Barcode,
    };

    let coords = match field(&["coords", "coordinates"]) {
        Some(v) => parse_coords(v)?,
        None => return Err(RoiCodecError::invalid("ROI object is missing coords")),
    };

    let focus = match field(&["focus"]) {
        Some(v) => as_i64(v).ok_or_else(|| RoiCodecError::invalid("focus is not numeric"))?,
        None => 305,
    };
    let exposure = match field(&["exposure"]) {
        Some(v) => as_i64(v).ok_or_else(|| RoiCodecError::invalid("exposure is not numeric"))?,
        None => 1200,
    };
    let ai_threshold = match field(&["ai_threshold"]) {
        Some(v) => {
            Some(as_f64(v).ok_or_else(|| RoiCodecError::invalid("ai_threshold is not numeric"))?)
        }
        None => None,
    };
    let detection_method = match field(&["feature_method", "detection_method"]) {
        Some(v) => as_string(v)
            .ok_or_else(|| RoiCodecError::invalid("detection method is not a string"))?,
        None => "opencv".to_string(),
    };
    let rotation = match field(&["rotation"]) {
        Some(v) => as_i64(v).ok_or_else(|| RoiCodecError::invalid("rotation is not numeric"))?,
        None => 0,
    };
    let device_id = match field(&["device_location", "device_id", "device"]) {
        Some(v) => as_i64(v).ok_or_else(|| RoiCodecError::invalid("device id is not numeric"))?,
        None => 1,
    };
    let expected_text = field(&["expected_text"]).and_then(as_string);
    let is_device_barcode = match field(&["is_device_barcode"]) {
        Some(v) => {
            as_bool(v).ok_or_else(|| RoiCodecError::invalid("is_device_barcode is not a bool"))?
        }
        None => true,
    };

    // Color fields are flattened into the ROI object. The expected-color
    // form wins when both are present.
    let color_config = if is_set(raw.get("expected_color")) {
        let expected: [u8; 3] = serde_json::from_value(raw["expected_color"].clone())
            .map_err(|e| RoiCodecError::invalid(format!("malformed expected_color: {e}")))?;
        let tolerance = match field(&["color_tolerance"]) {
            Some(v) => as_i64(v)
                .ok_or_else(|| RoiCodecError::invalid("color_tolerance is not numeric"))?,
            None => ColorConfig::default_tolerance(),
        };
        let min_pct = match field(&["min_pixel_percentage"]) {
            Some(v) => as_f64(v)
                .ok_or_else(|| RoiCodecError::invalid("min_pixel_percentage is not numeric"))?,
            None => ColorConfig::default_min_pixel_percentage(),
        };
        Some(ColorConfig::Expected {
            expected_color: expected,
            color_tolerance: tolerance,
            min_pixel_percentage: min_pct,
        })
    } else if is_set(raw.get("color_ranges")) {
        let ranges: Vec<ColorRange> = serde_json::from_value(raw["color_ranges"].clone())
            .map_err(|e| RoiCodecError::invalid(format!("malformed color_ranges: {e}")))?;
        Some(ColorConfig::Ranges { color_ranges: ranges })
    } else {
        None
    };

    Ok(Roi {
        roi_id,
        roi_type,
        coords,
        focus,
        exposure,
        ai_threshold,
        detection_method,
        rotation,
        device_id,
        expected_text,
        is_device_barcode,
        color_config,
    })
}

// ── Wire shapes ───────────────────────────────────────────────────────────────

/// Server vocabulary. This is the persisted form and the shape the server
/// API speaks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerRoi {
    pub idx: i64,
    #[serde(rename = "type")]
    pub roi_type: u8,
    pub coords: [i64; 4],
    pub focus: i64,
    pub exposure: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_threshold: Option<f64>,
    pub feature_method: String,
    pub rotation: i64,
    pub device_location: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_text: Option<String>,
    pub is_device_barcode: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_color: Option<[u8; 3]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_tolerance: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_pixel_percentage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_ranges: Option<Vec<ColorRange>>,
}

/// Client (operator UI) vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRoi {
    pub roi_id: i64,
    pub roi_type: u8,
    pub roi_type_name: String,
    pub coordinates: [i64; 4],
    pub focus: i64,
    pub exposure: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_threshold: Option<f64>,
    pub detection_method: String,
    pub rotation: i64,
    pub device_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_text: Option<String>,
    pub is_device_barcode: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_color: Option<[u8; 3]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_tolerance: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_pixel_percentage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_ranges: Option<Vec<ColorRange>>,
}

fn split_color(
    config: &Option<ColorConfig>,
) -> (Option<[u8; 3]>, Option<i64>, Option<f64>, Option<Vec<ColorRange>>) {
    match config {
        Some(ColorConfig::Expected {
            expected_color,
            color_tolerance,
            min_pixel_percentage,
        }) => (
            Some(*expected_color),
            Some(*color_tolerance),
            Some(*min_pixel_percentage),
            None,
        ),
        Some(ColorConfig::Ranges { color_ranges }) => {
            (None, None, None, Some(color_ranges.clone()))
        }
        None => (None, None, None, None),
    }
}

impl ServerRoi {
    pub fn from_roi(roi: &Roi) -> Self {
        let (expected_color, color_tolerance, min_pixel_percentage, color_ranges) =
            split_color(&roi.color_config);
        Self {
            idx: roi.roi_id,
            roi_type: roi.roi_type.as_u8(),
            coords: roi.coords.to_array(),
            focus: roi.focus,
            exposure: roi.exposure,
            ai_threshold: roi.ai_threshold,
            feature_method: roi.detection_method.clone(),
            rotation: roi.rotation,
            device_location: roi.device_id,
            expected_text: roi.expected_text.clone(),
            is_device_barcode: roi.is_device_barcode,
            expected_color,
            color_tolerance,
            min_pixel_percentage,
            color_ranges,
        }
    }

    pub fn to_roi(&self) -> Result<Roi, RoiCodecError> {
        normalize(&serde_json::to_value(self).map_err(|e| RoiCodecError::invalid(e.to_string()))?)
    }
}

impl ClientRoi {
    pub fn from_roi(roi: &Roi) -> Self {
        let (expected_color, color_tolerance, min_pixel_percentage, color_ranges) =
            split_color(&roi.color_config);
        Self {
            roi_id: roi.roi_id,
            roi_type: roi.roi_type.as_u8(),
            roi_type_name: roi.roi_type.name().to_string(),
            coordinates: roi.coords.to_array(),
            focus: roi.focus,
            exposure: roi.exposure,
            ai_threshold: roi.ai_threshold,
            detection_method: roi.detection_method.clone(),
            rotation: roi.rotation,
            device_id: roi.device_id,
            expected_text: roi.expected_text.clone(),
            is_device_barcode: roi.is_device_barcode,
            expected_color,
            color_tolerance,
            min_pixel_percentage,
            color_ranges,
        }
    }

    pub fn to_roi(&self) -> Result<Roi, RoiCodecError> {
        normalize(&serde_json::to_value(self).map_err(|e| RoiCodecError::invalid(e.to_string()))?)
    }
}

impl Roi {
    pub fn to_server(&self) -> ServerRoi {
        ServerRoi::from_roi(self)
    }

    pub fn to_client(&self) -> ClientRoi {
        ClientRoi::from_roi(self)
    }
}

// ── Validation ────────────────────────────────────────────────────────────────

/// Field-level validation of a normalized ROI. Returns every violation,
/// so a batch save can report the full picture in one response.
/// `frame` bounds the coordinates when the capture dimensions are known.
pub fn validate(roi: &Roi, frame: Option<(u32, u32)>) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if roi.roi_id < 0 {
        errors.push(ValidationError::new("roi_id", "must be >= 0"));
    }
    if !(0..=1000).contains(&roi.focus) {
        errors.push(ValidationError::new("focus", "must be within 0..=1000"));
    }
    if !(0..=10_000).contains(&roi.exposure) {
        errors.push(ValidationError::new("exposure", "must be within 0..=10000 us"));
    }
    if let Some(t) = roi.ai_threshold {
        if !(0.0..=1.0).contains(&t) {
            errors.push(ValidationError::new("ai_threshold", "must be within 0.0..=1.0"));
        }
    }
    if !matches!(roi.rotation, 0 | 90 | 180 | 270) {
        errors.push(ValidationError::new("rotation", "must be one of 0, 90, 180, 270"));
    }
    if !(1..=4).contains(&roi.device_id) {
        errors.push(ValidationError::new("device_id", "must be within 1..=4"));
    }

    let c = roi.coords;
    if c.x1 < 0 || c.y1 < 0 {
        errors.push(ValidationError::new("coords", "x1/y1 must be >= 0"));
    }
    if c.x1 >= c.x2 || c.y1 >= c.y2 {
        errors.push(ValidationError::new("coords", "requires x1 < x2 and y1 < y2"));
    }
    if let Some((w, h)) = frame {
        if c.x2 > i64::from(w) || c.y2 > i64::from(h) {
            errors.push(ValidationError::new(
                "coords",
                format!("rectangle exceeds the {w}x{h} frame"),
            ));
        }
    }

    match (&roi.roi_type, &roi.color_config) {
        (RoiType::Color, None) => {
            errors.push(ValidationError::new("color_config", "required for color ROIs"));
        }
        (RoiType::Color, Some(ColorConfig::Expected { min_pixel_percentage, color_tolerance, .. })) => {
            if !(0.0..=100.0).contains(min_pixel_percentage) {
                errors.push(ValidationError::new(
                    "min_pixel_percentage",
                    "must be within 0.0..=100.0",
                ));
            }
            if *color_tolerance < 0 {
                errors.push(ValidationError::new("color_tolerance", "must be >= 0"));
            }
        }
        (RoiType::Color, Some(ColorConfig::Ranges { color_ranges })) => {
            if color_ranges.is_empty() {
                errors.push(ValidationError::new("color_ranges", "must not be empty"));
            }
            for range in color_ranges {
                if range.lower.iter().zip(range.upper.iter()).any(|(l, u)| l > u) {
                    errors.push(ValidationError::new(
                        "color_ranges",
                        format!("range '{}' has lower > upper", range.name),
                    ));
                }
            }
        }
        (_, Some(_)) => {
            errors.push(ValidationError::new(
                "color_config",
                "only valid on color ROIs",
            ));
        }
        _ => {}
    }

    errors
}
