//! Capture-cycle orchestration.
//!
//! One cycle: fetch the product's ROI groups, make sure the camera is
//! playing at the first group's settings, capture one frame per group into
//! the shared folder, submit the inspection, absorb the response.
//!
//! Two timing contracts live here:
//! - the first group's capture skips the focus-settle delay, because the
//!   camera was initialized (or reverted) to exactly those settings
//! - after a response arrives, a background task reverts the camera to
//!   the first group's settings so the *next* cycle also skips its first
//!   settle

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{info, warn};

use aoi_types::{
    CapturedGroup, ClientInfo, CreateSessionRequest, DeviceBarcodeEntry, InspectRequest,
    InspectResponse, RoiGroup,
};

use crate::api::{ApiError, ServerApi};
use crate::camera::{CameraController, CameraError};
use crate::shared::{SharedWriteError, SharedWriter};

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("server call failed: {0}")]
    Api(#[from] ApiError),
    #[error("camera: {0}")]
    Camera(#[from] CameraError),
    #[error("shared folder: {0}")]
    Shared(#[from] SharedWriteError),
    #[error("product {0:?} has no ROI groups configured")]
    NoRoiGroups(String),
}

pub struct Orchestrator {
    api: Arc<ServerApi>,
    camera: CameraController,
    shared: SharedWriter,
    product: String,
    hostname: String,
    session_id: Option<String>,
    first_group_settings: Option<(i64, i64)>,
    /// Device barcodes carried between cycles; auto-filled from each
    /// response and sent with the next request.
    device_barcodes: Vec<DeviceBarcodeEntry>,
}

impl Orchestrator {
    pub fn new(
        api: Arc<ServerApi>,
        camera: CameraController,
        shared: SharedWriter,
        product: impl Into<String>,
    ) -> Self {
        Self {
            api,
            camera,
            shared,
            product: product.into(),
            hostname: std::env::var("HOSTNAME").unwrap_or_else(|_| "aoi-client".to_string()),
            session_id: None,
            first_group_settings: None,
            device_barcodes: Vec::new(),
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn shared(&self) -> &SharedWriter {
        &self.shared
    }

    /// Manually entered barcode for a device whose code has no optical ROI.
    pub fn set_device_barcode(&mut self, device_id: i64, barcode: impl Into<String>) {
        let barcode = barcode.into();
        match self.device_barcodes.iter_mut().find(|e| e.device_id == device_id) {
            Some(entry) => entry.barcode = barcode,
            None => self.device_barcodes.push(DeviceBarcodeEntry { device_id, barcode }),
        }
    }

    async fn ensure_session(&mut self) -> Result<String, CycleError> {
        if let Some(session_id) = &self.session_id {
            return Ok(session_id.clone());
        }
        let response = self
            .api
            .create_session(&CreateSessionRequest {
                product_name: self.product.clone(),
                client_info: ClientInfo {
                    hostname: self.hostname.clone(),
                    camera_ready: true,
                },
            })
            .await?;
        info!(
            "session {} created ({} ROI group(s))",
            response.session_id, response.roi_groups_count
        );
        if !response.devices_need_barcode.is_empty() {
            info!(
                "devices needing manual barcodes: {:?}",
                response.devices_need_barcode
            );
        }
        self.session_id = Some(response.session_id.clone());
        Ok(response.session_id)
    }

    /// Run one full capture-and-inspect cycle.
    pub async fn run_cycle(&mut self) -> Result<InspectResponse, CycleError> {
        let groups = self.api.get_roi_groups(&self.product).await?;
        let Some(first) = groups.first() else {
            return Err(CycleError::NoRoiGroups(self.product.clone()));
        };
        self.first_group_settings = Some((first.focus, first.exposure));

        // Initialization applies the first group's settings, so the first
        // capture needs no settle; a pipeline that is already playing at
        // those settings (previous cycle's revert) is reused as-is.
        self.camera.ensure_ready(first.focus, first.exposure).await?;

        let session_id = self.ensure_session().await?;

        let capture_started = Instant::now();
        let mut captured_images: HashMap<String, CapturedGroup> = HashMap::new();
        for group in &groups {
            self.capture_group(&session_id, group, &mut captured_images).await?;
        }
        let capture_time = capture_started.elapsed().as_secs_f64();
        info!(
            "captured {} group(s) in {capture_time:.2}s",
            captured_images.len()
        );

        let request = InspectRequest {
            session_id: session_id.clone(),
            product: self.product.clone(),
            captured_images,
            device_barcodes: if self.device_barcodes.is_empty() {
                None
            } else {
                Some(self.device_barcodes.clone())
            },
            capture_time,
        };

        // Both sides stamp RFC3339 UTC, so string order is time order;
        // anything stamped after this floor belongs to this request.
        let request_floor = chrono::Utc::now().to_rfc3339();
        let response = match self.api.inspect(&request).await {
            Ok(response) => response,
            Err(e) => {
                // A slow inspection can outlive the HTTP timeout while the
                // server still finishes and writes results.json; prefer
                // that over failing the cycle.
                match self.shared.read_results(&session_id) {
                    Some(results) if results.timestamp > request_floor => {
                        warn!("inspect call failed ({e}), recovered results from shared folder");
                        results
                    }
                    _ => return Err(e.into()),
                }
            }
        };

        self.absorb_barcodes(&response);
        self.spawn_revert();

        info!(
            "cycle result: {:?} ({}/{} devices passed)",
            response.summary.overall_result,
            response.summary.pass_count,
            response.summary.total_devices,
        );
        Ok(response)
    }

    async fn capture_group(
        &self,
        session_id: &str,
        group: &RoiGroup,
        captured_images: &mut HashMap<String, CapturedGroup>,
    ) -> Result<(), CycleError> {
        // The controller skips the settle delay when the hardware already
        // sits at these settings (first group after init/revert).
        self.camera.apply_settings(group.focus, group.exposure, false).await?;
        let frame = self.camera.capture().await?;

        // Catch resolution mismatches between the ROI editor and this
        // camera before the server reports every crop as out-of-frame.
        for roi in &group.rois {
            let rect = aoi_types::RoiRect::from_array(roi.coords);
            if !rect.fits_within(frame.width(), frame.height()) {
                warn!(
                    "ROI {} ({}x{}) does not fit the {}x{} frame",
                    roi.idx,
                    rect.width(),
                    rect.height(),
                    frame.width(),
                    frame.height()
                );
            }
        }

        let path = self.shared.write_capture(session_id, &group.key, &frame)?;

        let rois = group
            .rois
            .iter()
            .filter_map(|roi| match serde_json::to_value(roi) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("unserializable ROI in group {}: {e}", group.key);
                    None
                }
            })
            .collect();

        captured_images.insert(
            group.key.clone(),
            CapturedGroup {
                focus: group.focus,
                exposure: group.exposure,
                rois,
                image_path: path.to_string_lossy().to_string(),
                width: frame.width(),
                height: frame.height(),
            },
        );
        Ok(())
    }

    /// Auto-fill the barcode cache from the response, so the operator only
    /// corrects what the optics misread.
    fn absorb_barcodes(&mut self, response: &InspectResponse) {
        for device in &response.device_summaries {
            if device.barcode.is_empty() {
                continue;
            }
            match self
                .device_barcodes
                .iter_mut()
                .find(|e| e.device_id == device.device_id)
            {
                Some(entry) => entry.barcode = device.barcode.clone(),
                None => self.device_barcodes.push(DeviceBarcodeEntry {
                    device_id: device.device_id,
                    barcode: device.barcode.clone(),
                }),
            }
        }
    }

    /// Eagerly move the camera back to the first group's settings while
    /// the operator reads the result; by the next cycle the hardware has
    /// settled on its own and the first capture starts immediately.
    fn spawn_revert(&self) {
        let Some((focus, exposure)) = self.first_group_settings else {
            return;
        };
        let camera = self.camera.clone();
        tokio::spawn(async move {
            match camera.apply_settings(focus, exposure, true).await {
                Ok(()) => info!("camera reverted to first group settings ({focus}, {exposure})"),
                Err(CameraError::Busy) => {
                    // Someone is already capturing; they will set what
                    // they need.
                }
                Err(e) => warn!("camera revert failed: {e}"),
            }
        });
    }

    /// Close the server-side session; captures are discarded server-side,
    /// outputs retained.
    pub async fn close(&mut self) {
        if let Some(session_id) = self.session_id.take() {
            match self.api.close_session(&session_id).await {
                Ok(_) => info!("session {session_id} closed"),
                Err(e) => warn!("failed to close session {session_id}: {e}"),
            }
        }
    }
}
