//! main.rs — AOI client entry point
//!
//! Drives the camera side of the inspection suite: select a product, run
//! capture cycles against the server, print per-device verdicts. The
//! camera behind the controller is the simulated driver unless a real
//! vendor driver is linked in behind the same trait.

mod api;
mod camera;
mod orchestrator;
mod shared;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use api::ServerApi;
use camera::{CameraController, SimulatedCamera};
use orchestrator::Orchestrator;
use shared::SharedWriter;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "aoi-client", about = "AOI camera client")]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
    /// Server URL (overrides config)
    #[arg(long)]
    server: Option<String>,
    /// Product to inspect
    #[arg(short, long)]
    product: Option<String>,
    /// Number of inspection cycles to run
    #[arg(long, default_value = "1")]
    cycles: u32,
    /// Manual device barcodes, as device_id=BARCODE (repeatable)
    #[arg(long = "barcode")]
    barcodes: Vec<String>,
    /// List products known to the server and exit
    #[arg(long)]
    list_products: bool,
}

// ── Config structs ────────────────────────────────────────────────────────────

#[derive(Debug, serde::Deserialize)]
struct FullConfig {
    server: ServerConfig,
    camera: CameraConfig,
    shared_folder: SharedFolderConfig,
}

#[derive(Debug, serde::Deserialize)]
struct ServerConfig {
    url: String,
    inspect_timeout_secs: u64,
    meta_timeout_secs: u64,
}

#[derive(Debug, serde::Deserialize)]
struct CameraConfig {
    serial: String,
    settle_delay_ms: u64,
    fast_capture: bool,
    frame_width: u32,
    frame_height: u32,
}

#[derive(Debug, serde::Deserialize)]
struct SharedFolderConfig {
    root: String,
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aoi_client=info".into()),
        )
        .init();

    let args = Args::parse();

    let cfg = match load_config(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("{e:#}");
            std::process::exit(2);
        }
    };

    let server_url = args.server.as_deref().unwrap_or(&cfg.server.url);
    let api = Arc::new(ServerApi::new(
        server_url,
        Duration::from_secs(cfg.server.meta_timeout_secs),
        Duration::from_secs(cfg.server.inspect_timeout_secs),
    ));
    info!("AOI client v{} — server {server_url}", env!("CARGO_PKG_VERSION"));

    if args.list_products {
        match api.list_products().await {
            Ok(products) => {
                for p in products {
                    println!(
                        "{}\t{} device(s)\t{} ROI(s)\t{}",
                        p.product_name, p.device_count, p.roi_count, p.description
                    );
                }
            }
            Err(e) => {
                error!("cannot list products: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    let Some(product) = args.product else {
        error!("--product is required (or use --list-products)");
        std::process::exit(2);
    };

    let shared = SharedWriter::new(&cfg.shared_folder.root);
    if !shared.is_accessible() {
        warn!(
            "shared folder {:?} is not writable; captures will fail",
            cfg.shared_folder.root
        );
    }

    let camera = CameraController::new(
        Box::new(SimulatedCamera::new(cfg.camera.frame_width, cfg.camera.frame_height)),
        cfg.camera.serial.clone(),
        Duration::from_millis(cfg.camera.settle_delay_ms),
        cfg.camera.fast_capture,
    );

    let mut orchestrator = Orchestrator::new(api, camera, shared, product);
    for spec in &args.barcodes {
        match parse_barcode_arg(spec) {
            Some((device_id, barcode)) => orchestrator.set_device_barcode(device_id, barcode),
            None => warn!("ignoring malformed --barcode {spec:?} (expected device_id=BARCODE)"),
        }
    }

    let mut failures = 0u32;
    for cycle in 1..=args.cycles {
        info!("── cycle {cycle}/{} ──", args.cycles);
        match orchestrator.run_cycle().await {
            Ok(response) => {
                for device in &response.device_summaries {
                    println!(
                        "device {}: {} barcode={:?} ({} ROI(s))",
                        device.device_id,
                        if device.device_passed { "PASS" } else { "FAIL" },
                        device.barcode,
                        device.roi_results.len(),
                    );
                    for roi in device.roi_results.iter().filter(|r| !r.passed()) {
                        println!("  roi {}: FAIL {}", roi.roi_id, describe_failure(roi));
                        if let aoi_types::RoiOutcome::Compare {
                            captured_file: Some(file), ..
                        } = &roi.outcome
                        {
                            if let Some(session) = orchestrator.session_id() {
                                if let Some(path) =
                                    orchestrator.shared().artifact_path(session, file)
                                {
                                    println!("  roi {}: crop at {}", roi.roi_id, path.display());
                                }
                            }
                        }
                    }
                }
                println!(
                    "cycle {cycle}: {:?} — capture {:.2}s, processing {:.2}s",
                    response.summary.overall_result,
                    response.capture_time,
                    response.processing_time,
                );
            }
            Err(e) => {
                // The session stays open; the next cycle retries.
                failures += 1;
                error!("cycle {cycle} failed: {e}");
            }
        }
    }

    orchestrator.close().await;
    if failures > 0 {
        std::process::exit(1);
    }
}

/// Read the config file, falling back to the built-in defaults when the
/// file is absent (first run on a fresh bench).
fn load_config(path: &str) -> anyhow::Result<FullConfig> {
    use anyhow::Context;
    let config_str = std::fs::read_to_string(path)
        .unwrap_or_else(|_| include_str!("../config.toml").to_string());
    toml::from_str(&config_str).with_context(|| format!("invalid config {path}"))
}

fn describe_failure(roi: &aoi_types::RoiResult) -> String {
    use aoi_types::RoiOutcome;
    match &roi.outcome {
        RoiOutcome::Barcode { .. } => "no barcode decoded".to_string(),
        RoiOutcome::Compare { similarity, threshold, .. } => {
            format!("similarity {similarity:.4} below {threshold}")
        }
        RoiOutcome::Ocr { text, .. } => text.clone(),
        RoiOutcome::Color { detected_color, match_percentage, threshold, .. } => {
            format!("{detected_color} at {match_percentage:.1}% (needs {threshold}%)")
        }
        RoiOutcome::Error { message } => message.clone(),
    }
}

fn parse_barcode_arg(spec: &str) -> Option<(i64, String)> {
    let (device, barcode) = spec.split_once('=')?;
    let device_id = device.trim().parse().ok()?;
    Some((device_id, barcode.trim().to_string()))
}
