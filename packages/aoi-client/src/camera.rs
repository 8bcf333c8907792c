//! Camera access.
//!
//! The vendor driver is an opaque component; [`CameraDriver`] is its
//! interface, and [`SimulatedCamera`] is the implementation used on
//! benches without hardware. The pipeline state machine is explicit:
//!
//! ```text
//! Uninitialized --initialize--> Playing
//! Playing       --capture----> Playing            (reuse, no warm-up)
//! Initialized   --restart----> Playing            (intermediate state)
//! Error         --reset+init-> Playing            (last resort)
//! ```
//!
//! [`CameraController`] wraps a driver for the orchestrator: it owns the
//! settle-delay bookkeeping and the busy policy. The camera is a single
//! hardware device — a second caller is refused immediately with
//! [`CameraError::Busy`], never queued.

use std::sync::Arc;
use std::time::Duration;

use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// How long a refused caller should wait before retrying.
pub const BUSY_RETRY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialized,
    /// Pipeline built but not streaming — an intermediate state seen
    /// after partial startups; restart gets it playing.
    Initialized,
    Playing,
    Error,
}

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera busy, retry after {}s", BUSY_RETRY.as_secs())]
    Busy,
    #[error("camera not initialized")]
    NotInitialized,
    #[error("camera fault: {0}")]
    Fault(String),
}

// ── Driver interface ──────────────────────────────────────────────────────────

pub trait CameraDriver: Send {
    fn initialize(&mut self, serial: &str, focus: i64, exposure: i64) -> Result<(), CameraError>;
    /// Push new focus/exposure to the hardware. Settling is the
    /// controller's business, not the driver's.
    fn set_properties(&mut self, focus: i64, exposure: i64) -> Result<(), CameraError>;
    fn capture(&mut self) -> Result<RgbImage, CameraError>;
    /// Reduced-latency capture path; quality is the caller's trade-off.
    fn capture_fast(&mut self) -> Result<RgbImage, CameraError>;
    fn pipeline_state(&self) -> PipelineState;
    fn restart_pipeline(&mut self) -> Result<(), CameraError>;
    fn reset_pipeline(&mut self) -> Result<(), CameraError>;
}

// ── Simulated hardware ────────────────────────────────────────────────────────

/// Deterministic stand-in for the vendor camera. Frames are a gradient
/// whose brightness follows exposure and whose detail follows focus, with
/// a little sensor noise so compare thresholds behave realistically.
pub struct SimulatedCamera {
    width: u32,
    height: u32,
    state: PipelineState,
    serial: Option<String>,
    focus: i64,
    exposure: i64,
    rng: StdRng,
}

impl SimulatedCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            state: PipelineState::Uninitialized,
            serial: None,
            focus: 0,
            exposure: 0,
            rng: StdRng::seed_from_u64(0x0a01),
        }
    }

    fn render_frame(&mut self, noise_amplitude: i16) -> RgbImage {
        let brightness = (self.exposure.clamp(0, 10_000) as f64 / 10_000.0 * 180.0) as i16 + 40;
        let detail = (self.focus.clamp(0, 1000) as f64 / 1000.0 * 60.0) as i16;
        let (w, h) = (self.width, self.height);
        let mut img = RgbImage::new(w, h);
        for (x, y, px) in img.enumerate_pixels_mut() {
            let stripe = if (x / 16 + y / 16) % 2 == 0 { detail } else { -detail };
            let noise: i16 = self.rng.gen_range(-noise_amplitude..=noise_amplitude);
            let base = brightness + stripe + noise;
            let r = (base + (x % 32) as i16 / 4).clamp(0, 255) as u8;
            let g = base.clamp(0, 255) as u8;
            let b = (base - (y % 32) as i16 / 4).clamp(0, 255) as u8;
            *px = Rgb([r, g, b]);
        }
        img
    }
}

impl CameraDriver for SimulatedCamera {
    fn initialize(&mut self, serial: &str, focus: i64, exposure: i64) -> Result<(), CameraError> {
        self.serial = Some(serial.to_string());
        self.focus = focus;
        self.exposure = exposure;
        self.state = PipelineState::Playing;
        info!("simulated camera {serial} initialized (focus {focus}, exposure {exposure})");
        Ok(())
    }

    fn set_properties(&mut self, focus: i64, exposure: i64) -> Result<(), CameraError> {
        if self.state == PipelineState::Uninitialized {
            return Err(CameraError::NotInitialized);
        }
        self.focus = focus;
        self.exposure = exposure;
        Ok(())
    }

    fn capture(&mut self) -> Result<RgbImage, CameraError> {
        match self.state {
            PipelineState::Playing => Ok(self.render_frame(2)),
            PipelineState::Uninitialized => Err(CameraError::NotInitialized),
            _ => Err(CameraError::Fault(format!(
                "pipeline not playing ({:?})",
                self.state
            ))),
        }
    }

    fn capture_fast(&mut self) -> Result<RgbImage, CameraError> {
        match self.state {
            PipelineState::Playing => Ok(self.render_frame(6)),
            PipelineState::Uninitialized => Err(CameraError::NotInitialized),
            _ => Err(CameraError::Fault(format!(
                "pipeline not playing ({:?})",
                self.state
            ))),
        }
    }

    fn pipeline_state(&self) -> PipelineState {
        self.state
    }

    fn restart_pipeline(&mut self) -> Result<(), CameraError> {
        if self.state == PipelineState::Uninitialized {
            return Err(CameraError::NotInitialized);
        }
        self.state = PipelineState::Playing;
        Ok(())
    }

    fn reset_pipeline(&mut self) -> Result<(), CameraError> {
        self.state = PipelineState::Uninitialized;
        Ok(())
    }
}

// ── Controller ────────────────────────────────────────────────────────────────

struct CameraInner {
    driver: Box<dyn CameraDriver>,
    /// Settings currently applied at the hardware; captures with the same
    /// settings need no settle delay.
    applied: Option<(i64, i64)>,
}

#[derive(Clone)]
pub struct CameraController {
    inner: Arc<Mutex<CameraInner>>,
    serial: String,
    settle_delay: Duration,
    fast_capture: bool,
}

impl CameraController {
    pub fn new(
        driver: Box<dyn CameraDriver>,
        serial: impl Into<String>,
        settle_delay: Duration,
        fast_capture: bool,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CameraInner { driver, applied: None })),
            serial: serial.into(),
            settle_delay,
            fast_capture,
        }
    }

    /// Non-blocking acquisition of the single camera. Another caller mid-
    /// capture means `Busy` now, not a queue entry.
    fn try_lock(&self) -> Result<tokio::sync::OwnedMutexGuard<CameraInner>, CameraError> {
        self.inner.clone().try_lock_owned().map_err(|_| CameraError::Busy)
    }

    pub async fn is_ready(&self) -> bool {
        match self.inner.try_lock() {
            Ok(inner) => inner.driver.pipeline_state() == PipelineState::Playing,
            // Locked means someone is actively using a working camera.
            Err(_) => true,
        }
    }

    /// Bring the pipeline to Playing with the given settings applied.
    ///
    /// A pipeline already in Playing is reused untouched — a full
    /// reinitialization costs seconds of warm-up per refresh. An
    /// intermediate state gets a restart; a faulted pipeline gets the
    /// full reset as a last resort.
    pub async fn ensure_ready(&self, focus: i64, exposure: i64) -> Result<(), CameraError> {
        let mut inner = self.try_lock()?;

        match inner.driver.pipeline_state() {
            PipelineState::Playing => {
                debug!("camera pipeline already playing, reusing");
                if inner.applied != Some((focus, exposure)) {
                    inner.driver.set_properties(focus, exposure)?;
                    inner.applied = Some((focus, exposure));
                    drop(inner);
                    tokio::time::sleep(self.settle_delay).await;
                }
                Ok(())
            }
            PipelineState::Initialized => {
                info!("camera pipeline in intermediate state, restarting");
                if inner.driver.restart_pipeline().is_err() {
                    warn!("restart failed, resetting pipeline");
                    inner.driver.reset_pipeline()?;
                    inner.driver.initialize(&self.serial, focus, exposure)?;
                } else {
                    inner.driver.set_properties(focus, exposure)?;
                }
                inner.applied = Some((focus, exposure));
                Ok(())
            }
            PipelineState::Error => {
                warn!("camera pipeline faulted, full reset");
                inner.driver.reset_pipeline()?;
                inner.driver.initialize(&self.serial, focus, exposure)?;
                inner.applied = Some((focus, exposure));
                Ok(())
            }
            PipelineState::Uninitialized => {
                inner.driver.initialize(&self.serial, focus, exposure)?;
                inner.applied = Some((focus, exposure));
                Ok(())
            }
        }
    }

    /// Apply group settings. `skip_settle` is for settings the camera
    /// already sits at (the first group right after initialization, or a
    /// completed background revert).
    pub async fn apply_settings(
        &self,
        focus: i64,
        exposure: i64,
        skip_settle: bool,
    ) -> Result<(), CameraError> {
        let already_applied = {
            let mut inner = self.try_lock()?;
            let already = inner.applied == Some((focus, exposure));
            if !already {
                inner.driver.set_properties(focus, exposure)?;
                inner.applied = Some((focus, exposure));
            }
            already
        };

        if !skip_settle && !already_applied {
            debug!("settling {}ms after focus/exposure change", self.settle_delay.as_millis());
            tokio::time::sleep(self.settle_delay).await;
        }
        Ok(())
    }

    pub async fn capture(&self) -> Result<RgbImage, CameraError> {
        let mut inner = self.try_lock()?;
        if self.fast_capture {
            inner.driver.capture_fast()
        } else {
            inner.driver.capture()
        }
    }
}
