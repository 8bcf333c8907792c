//! Device aggregation.
//!
//! ROI results group by the device they observe; each device gets a
//! barcode (optical, possibly overridden by the client, always passed
//! through barcode-link with raw fallback) and a verdict that is the
//! conjunction of its ROI results. The overall verdict is the conjunction
//! over devices.

use aoi_types::{
    DeviceBarcodeEntry, DeviceSummary, InspectionSummary, OverallResult, RoiResult,
};

use crate::barcode_link::BarcodeLinker;

/// Which barcode list applies to this inspection.
///
/// `override_entries` carries the request's tri-state `device_barcodes`:
/// - `None` (key absent): the session's cached entries apply
/// - `Some([])` (explicit empty): no entries apply — the cache is ignored
/// - `Some(entries)`: exactly these apply
pub fn effective_barcodes(
    override_entries: Option<&[DeviceBarcodeEntry]>,
    cached: &[DeviceBarcodeEntry],
) -> Vec<DeviceBarcodeEntry> {
    match override_entries {
        Some(entries) => entries.to_vec(),
        None => cached.to_vec(),
    }
}

pub async fn aggregate(
    mut results: Vec<RoiResult>,
    entries: &[DeviceBarcodeEntry],
    linker: &BarcodeLinker,
) -> (Vec<DeviceSummary>, InspectionSummary) {
    results.sort_by_key(|r| r.roi_id);

    let mut device_ids: Vec<i64> = results
        .iter()
        .map(|r| r.device_id)
        .chain(entries.iter().map(|e| e.device_id))
        .collect();
    device_ids.sort_unstable();
    device_ids.dedup();

    let mut summaries = Vec::with_capacity(device_ids.len());
    for device_id in device_ids {
        let device_results: Vec<RoiResult> = results
            .iter()
            .filter(|r| r.device_id == device_id)
            .cloned()
            .collect();

        // Optical value: the first non-empty device-barcode read, in ROI
        // order. An explicit client entry for this device wins over it.
        let optical = device_results
            .iter()
            .filter(|r| r.is_device_barcode)
            .find_map(|r| r.barcode_value())
            .map(str::to_string);
        let supplied = entries
            .iter()
            .find(|e| e.device_id == device_id)
            .map(|e| e.barcode.clone());
        let raw = supplied.or(optical).unwrap_or_default();

        // Linking is always attempted; an idempotent link returns its
        // input, and an unreachable link service falls back to raw.
        let barcode = if raw.is_empty() {
            raw
        } else {
            linker.lookup_with_fallback(&raw).await
        };

        let device_passed = device_results.iter().all(RoiResult::passed);

        // Presentation order: failures first so the operator sees them
        // without scrolling, configured order within each half.
        let (failed, passed): (Vec<RoiResult>, Vec<RoiResult>) =
            device_results.into_iter().partition(|r| !r.passed());
        let mut roi_results = failed;
        roi_results.extend(passed);

        summaries.push(DeviceSummary {
            device_id,
            barcode,
            device_passed,
            roi_results,
        });
    }

    let pass_count = summaries.iter().filter(|d| d.device_passed).count();
    let summary = InspectionSummary {
        overall_result: OverallResult::from_bool(summaries.iter().all(|d| d.device_passed)),
        total_devices: summaries.len(),
        pass_count,
        fail_count: summaries.len() - pass_count,
    };
    (summaries, summary)
}
