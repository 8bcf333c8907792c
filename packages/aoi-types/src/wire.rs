//! Request/response payloads of the server HTTP API.
//!
//! ROI groups travel as an ordered array (not a JSON object): the client
//! applies the first group's camera settings at initialization, so group
//! order is part of the contract and JSON objects do not guarantee one.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::ServerRoi;
use crate::result::{OverallResult, RoiResult};

// ── Products ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductInfo {
    pub product_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_device_count")]
    pub device_count: i64,
    #[serde(default)]
    pub roi_count: usize,
}

fn default_device_count() -> i64 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListProductsResponse {
    pub products: Vec<ProductInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProductRequest {
    pub product_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_device_count")]
    pub device_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProductResponse {
    pub product_name: String,
}

// ── ROI configuration ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetRoisResponse {
    pub rois: Vec<ServerRoi>,
}

/// ROIs are submitted as raw JSON values so the codec can accept either
/// vocabulary and the legacy array shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveRoisRequest {
    pub rois: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveRoisResponse {
    pub message: String,
    pub count: usize,
}

/// One capture group: the ROIs sharing a `(focus, exposure)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoiGroup {
    /// `"<focus>,<exposure>"`
    pub key: String,
    pub focus: i64,
    pub exposure: i64,
    pub rois: Vec<ServerRoi>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoiGroupsResponse {
    /// Configuration order; the first entry's settings are applied at
    /// camera initialization.
    pub roi_groups: Vec<RoiGroup>,
}

// ── Golden samples ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoldenSampleInfo {
    pub filename: String,
    pub file_path: String,
    pub is_best: bool,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoldenSamplesResponse {
    pub golden_samples: Vec<GoldenSampleInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreGoldenRequest {
    pub filename: String,
}

/// Install a reference image from a file already on the shared mount
/// (typically a session capture), optionally cropped to the ROI rectangle
/// first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveGoldenRequest {
    pub image_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coords: Option<[i64; 4]>,
}

// ── Sessions ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientInfo {
    #[serde(default)]
    pub hostname: String,
    /// The camera must be initialized before a session may be created.
    #[serde(default)]
    pub camera_ready: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub product_name: String,
    #[serde(default)]
    pub client_info: ClientInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub roi_groups_count: usize,
    pub devices_need_barcode: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseSessionResponse {
    pub status: String,
}

// ── Inspection ────────────────────────────────────────────────────────────────

/// Client-supplied barcode for a device whose code cannot be read optically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceBarcodeEntry {
    pub device_id: i64,
    pub barcode: String,
}

/// One captured frame and the ROIs it services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedGroup {
    pub focus: i64,
    pub exposure: i64,
    /// Raw ROI payloads; normalized server-side by the codec.
    pub rois: Vec<Value>,
    /// Path of the frame on the shared mount, relative to the shared root
    /// or absolute within it.
    pub image_path: String,
    pub width: u32,
    pub height: u32,
}

/// `device_barcodes` is tri-state: absent means "use the session cache",
/// an empty list means "override the cache with nothing", entries mean
/// "override with these". `Option<Vec<_>>` keeps absent and empty distinct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectRequest {
    pub session_id: String,
    pub product: String,
    pub captured_images: HashMap<String, CapturedGroup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_barcodes: Option<Vec<DeviceBarcodeEntry>>,
    /// Seconds the client spent capturing; echoed into the response
    /// timings.
    #[serde(default)]
    pub capture_time: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub device_id: i64,
    /// Linked barcode (or raw when linking is unavailable). Empty when the
    /// device has none.
    pub barcode: String,
    pub device_passed: bool,
    /// Failed ROIs first, configured order otherwise.
    pub roi_results: Vec<RoiResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectionSummary {
    pub overall_result: OverallResult,
    pub total_devices: usize,
    pub pass_count: usize,
    pub fail_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectResponse {
    pub device_summaries: Vec<DeviceSummary>,
    pub summary: InspectionSummary,
    /// Seconds, as reported by the client for the capture phase.
    pub capture_time: f64,
    /// Seconds spent decoding and running detectors.
    pub processing_time: f64,
    pub total_time: f64,
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_barcodes_tristate_survives_serde() {
        let absent: InspectRequest = serde_json::from_str(
            r#"{"session_id":"s","product":"p","captured_images":{}}"#,
        )
        .unwrap();
        assert!(absent.device_barcodes.is_none());

        let empty: InspectRequest = serde_json::from_str(
            r#"{"session_id":"s","product":"p","captured_images":{},"device_barcodes":[]}"#,
        )
        .unwrap();
        assert_eq!(empty.device_barcodes, Some(vec![]));

        let provided: InspectRequest = serde_json::from_str(
            r#"{"session_id":"s","product":"p","captured_images":{},
                "device_barcodes":[{"device_id":1,"barcode":"X"}]}"#,
        )
        .unwrap();
        assert_eq!(
            provided.device_barcodes,
            Some(vec![DeviceBarcodeEntry { device_id: 1, barcode: "X".into() }])
        );

        // Absent must stay absent on re-serialization.
        let round = serde_json::to_string(&absent).unwrap();
        assert!(!round.contains("device_barcodes"));
    }
}
