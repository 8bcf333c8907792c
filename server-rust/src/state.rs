//! Server configuration and shared application state.
//!
//! All process-wide resources (product store, session registry, golden
//! store, engines, barcode linker) are owned by one [`AppState`] built at
//! startup and passed to handlers as `Arc<AppState>`. Nothing in the
//! pipeline reaches for globals.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::barcode_link::BarcodeLinker;
use crate::engines::Engines;
use crate::golden::GoldenStore;
use crate::products::ProductStore;
use crate::sessions::SessionRegistry;
use crate::shared_folder::SharedFolder;

// ── Configuration ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Root of product configs and golden samples (`config/products/...`).
    pub config_root: PathBuf,
    /// Root of the client-visible shared mount.
    pub shared_root: PathBuf,
    /// Barcode-link endpoint; linking is skipped when unset.
    pub link_url: Option<String>,
    pub link_enabled: bool,
    /// OCR sidecar endpoint; OCR ROIs fail individually when unset.
    pub ocr_url: Option<String>,
    /// Barcode-decoder sidecar endpoint; barcode ROIs fail individually
    /// when unset.
    pub barcode_url: Option<String>,
    /// Detector worker pool size.
    pub max_workers: usize,
}

impl ServerConfig {
    /// Environment-driven configuration with workable local-dev defaults.
    pub fn from_env() -> Self {
        let port = std::env::var("AOI_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5000);
        let config_root = std::env::var("AOI_CONFIG_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"));
        let shared_root = std::env::var("AOI_SHARED_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/mnt/visual-aoi-shared"));
        let link_url = std::env::var("AOI_LINK_URL").ok().filter(|v| !v.is_empty());
        let link_enabled = std::env::var("AOI_LINK_ENABLED")
            .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
            .unwrap_or(true);
        let ocr_url = std::env::var("AOI_OCR_URL").ok().filter(|v| !v.is_empty());
        let barcode_url = std::env::var("AOI_BARCODE_URL").ok().filter(|v| !v.is_empty());
        let max_workers = std::env::var("AOI_MAX_WORKERS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| {
                std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
            });

        Self {
            port,
            config_root,
            shared_root,
            link_url,
            link_enabled,
            ocr_url,
            barcode_url,
            max_workers,
        }
    }
}

// ── Application state ─────────────────────────────────────────────────────────

pub struct AppState {
    pub config: ServerConfig,
    pub products: ProductStore,
    pub sessions: SessionRegistry,
    pub golden: GoldenStore,
    pub shared: SharedFolder,
    pub linker: BarcodeLinker,
    pub engines: Engines,
    pub started_at: Instant,
}

pub type SharedAppState = Arc<AppState>;

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let shared = SharedFolder::new(config.shared_root.clone());
        Self {
            products: ProductStore::new(config.config_root.clone()),
            sessions: SessionRegistry::new(shared.clone()),
            golden: GoldenStore::new(config.config_root.clone()),
            linker: BarcodeLinker::new(config.link_url.clone(), config.link_enabled),
            engines: Engines::from_config(&config),
            shared,
            started_at: Instant::now(),
            config,
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
