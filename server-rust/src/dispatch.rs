//! ROI dispatcher.
//!
//! One inspection request carries a map of capture groups; each group's
//! frame is decoded once and every ROI in it becomes a detector task on
//! the blocking pool, capped by a semaphore at the configured worker
//! count. Detector failures (including panics) surface as that ROI's
//! error result — a single bad ROI never fails the inspection.
//!
//! The dispatcher only reads ROI configuration; the one mutation in the
//! pipeline (golden promotion) happens inside the compare detector under
//! the store's own lock. Results are reassembled in `roi_id` order no
//! matter how the pool schedules them.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use image::RgbImage;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use aoi_types::{codec, CapturedGroup, Roi, RoiOutcome, RoiResult, RoiType};

use crate::compare::{self, CompareContext};
use crate::state::AppState;
use crate::{barcode, color, ocr};

/// Run every ROI of every captured group, returning results sorted by
/// `roi_id`.
pub async fn process_groups(
    state: &AppState,
    session_id: &str,
    product: &str,
    captured: &HashMap<String, CapturedGroup>,
) -> Vec<RoiResult> {
    let output_dir = state.shared.output_dir(session_id);
    let limiter = Arc::new(Semaphore::new(state.config.max_workers.max(1)));
    let mut tasks: JoinSet<RoiResult> = JoinSet::new();
    let mut results: Vec<RoiResult> = Vec::new();

    for (group_key, group) in captured {
        let rois = decode_group_rois(group_key, group, &mut results);
        if rois.is_empty() {
            continue;
        }

        let frame = match load_frame(state, &group.image_path).await {
            Ok(frame) => Arc::new(frame),
            Err(message) => {
                // The whole group shares one frame; without it every ROI
                // in the group fails, and the other groups proceed.
                warn!("group {group_key}: {message}");
                for roi in rois {
                    results.push(error_result(&roi, message.clone()));
                }
                continue;
            }
        };

        debug!(
            "group {group_key}: dispatching {} ROI(s) over a {}x{} frame",
            rois.len(),
            frame.width(),
            frame.height()
        );

        for roi in rois {
            let frame = frame.clone();
            let limiter = limiter.clone();
            let product = product.to_string();
            let output_dir = output_dir.clone();
            let golden = state.golden.clone();
            let engines = state.engines.clone();

            tasks.spawn(async move {
                // Keep the ROI's identity on this side of the move: a
                // crashed detector must still be reported against its own
                // roi_id and device, not a placeholder.
                let (roi_id, roi_type, device_id, is_device_barcode) =
                    (roi.roi_id, roi.roi_type, roi.device_id, roi.is_device_barcode);

                let _permit = match limiter.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return error_result(&roi, "worker pool closed".to_string()),
                };

                let handle = tokio::task::spawn_blocking(move || {
                    let outcome = run_detector(
                        &frame,
                        &roi,
                        &product,
                        &golden,
                        &engines,
                        &output_dir,
                    );
                    RoiResult {
                        roi_id: roi.roi_id,
                        roi_type: roi.roi_type,
                        device_id: roi.device_id,
                        is_device_barcode: roi.is_device_barcode,
                        outcome,
                    }
                });

                match handle.await {
                    Ok(result) => result,
                    Err(join_err) => {
                        // A panicking detector is contained here.
                        warn!("detector for ROI {roi_id} aborted: {join_err}");
                        RoiResult {
                            roi_id,
                            roi_type,
                            device_id,
                            is_device_barcode,
                            outcome: RoiOutcome::Error {
                                message: format!("detector crashed: {join_err}"),
                            },
                        }
                    }
                }
            });
        }
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => warn!("lost a detector task: {e}"),
        }
    }

    results.sort_by_key(|r| r.roi_id);
    results
}

/// Normalize the group's raw ROI payloads. Unparseable entries become
/// error results immediately (there is nothing to dispatch).
fn decode_group_rois(
    group_key: &str,
    group: &CapturedGroup,
    results: &mut Vec<RoiResult>,
) -> Vec<Roi> {
    let mut rois = Vec::with_capacity(group.rois.len());
    for raw in &group.rois {
        match codec::normalize(raw) {
            Ok(roi) => rois.push(roi),
            Err(e) => {
                warn!("group {group_key}: unparseable ROI: {e}");
                results.push(RoiResult {
                    roi_id: guess_roi_id(raw),
                    roi_type: RoiType::Compare,
                    device_id: 1,
                    is_device_barcode: false,
                    outcome: RoiOutcome::Error {
                        message: format!("unparseable ROI: {e}"),
                    },
                });
            }
        }
    }
    rois
}

fn guess_roi_id(raw: &serde_json::Value) -> i64 {
    raw.get("idx")
        .or_else(|| raw.get("roi_id"))
        .or_else(|| raw.get(0))
        .and_then(|v| v.as_i64())
        .unwrap_or(-1)
}

async fn load_frame(state: &AppState, image_path: &str) -> Result<RgbImage, String> {
    let path: PathBuf = state
        .shared
        .safe_join(image_path)
        .map_err(|e| format!("rejected image path: {e}"))?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| format!("cannot read frame {}: {e}", path.display()))?;
    tokio::task::spawn_blocking(move || {
        image::load_from_memory(&bytes)
            .map(|img| img.to_rgb8())
            .map_err(|e| format!("cannot decode frame: {e}"))
    })
    .await
    .map_err(|e| format!("frame decode task failed: {e}"))?
}

fn run_detector(
    frame: &RgbImage,
    roi: &Roi,
    product: &str,
    golden: &crate::golden::GoldenStore,
    engines: &crate::engines::Engines,
    output_dir: &std::path::Path,
) -> RoiOutcome {
    match roi.roi_type {
        RoiType::Barcode => barcode::detect(frame, roi, engines.barcode.as_ref()),
        RoiType::Compare => compare::detect(
            frame,
            roi,
            &CompareContext {
                product,
                golden,
                extractor: engines.extractor_for(&roi.detection_method),
                output_dir: Some(output_dir),
            },
        ),
        RoiType::Ocr => ocr::detect(frame, roi, engines.ocr.as_ref()),
        RoiType::Color => color::detect(frame, roi),
    }
}

fn error_result(roi: &Roi, message: String) -> RoiResult {
    RoiResult {
        roi_id: roi.roi_id,
        roi_type: roi.roi_type,
        device_id: roi.device_id,
        is_device_barcode: roi.is_device_barcode,
        outcome: RoiOutcome::Error { message },
    }
}
