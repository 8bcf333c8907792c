//! End-to-end pipeline tests: product config -> session -> dispatch ->
//! aggregation, over real temp directories, with the recognition engines
//! replaced by fakes behind their traits.

use std::collections::HashMap;
use std::sync::Arc;

use image::{Rgb, RgbImage};
use serde_json::json;
use tempfile::TempDir;

use aoi_server::aggregate;
use aoi_server::dispatch;
use aoi_server::engines::{
    BarcodeDecoder, EngineError, Engines, FeatureExtractor, OcrEngine, OpponentColorFeatures,
};
use aoi_server::state::{AppState, ServerConfig};
use aoi_server::vision;
use aoi_types::{
    codec, normalize, CapturedGroup, ClientInfo, DeviceBarcodeEntry, OverallResult, RoiOutcome,
};

// ── Fake engines ──────────────────────────────────────────────────────────────

struct FixedOcr(Vec<String>);

impl OcrEngine for FixedOcr {
    fn recognize(&self, _img: &RgbImage) -> Result<Vec<String>, EngineError> {
        Ok(self.0.clone())
    }
}

struct FixedBarcode(Vec<String>);

impl BarcodeDecoder for FixedBarcode {
    fn decode(&self, _jpeg: &[u8]) -> Result<Vec<String>, EngineError> {
        Ok(self.0.clone())
    }
}

// ── Harness ───────────────────────────────────────────────────────────────────

struct Harness {
    _config_dir: TempDir,
    _shared_dir: TempDir,
    state: Arc<AppState>,
}

impl Harness {
    fn new(ocr: Vec<String>, barcodes: Vec<String>) -> Self {
        let config_dir = TempDir::new().unwrap();
        let shared_dir = TempDir::new().unwrap();
        let config = ServerConfig {
            port: 0,
            config_root: config_dir.path().to_path_buf(),
            shared_root: shared_dir.path().to_path_buf(),
            link_url: None,
            link_enabled: true,
            ocr_url: None,
            barcode_url: None,
            max_workers: 4,
        };
        let mut state = AppState::new(config);
        let extractors: Vec<Arc<dyn FeatureExtractor>> = vec![Arc::new(OpponentColorFeatures)];
        state.engines = Engines::with_engines(
            extractors,
            Arc::new(FixedOcr(ocr)),
            Arc::new(FixedBarcode(barcodes)),
        );
        Self {
            _config_dir: config_dir,
            _shared_dir: shared_dir,
            state: Arc::new(state),
        }
    }

    async fn session(&self, product: &str) -> String {
        self.state.products.create(product, "", 2).await.unwrap();
        self.state
            .sessions
            .create(
                product,
                &ClientInfo { hostname: "test".into(), camera_ready: true },
            )
            .await
            .unwrap()
            .session_id
    }

    /// Write a frame into the session captures directory and build its
    /// capture-group payload for the given raw ROIs.
    fn group(
        &self,
        session_id: &str,
        key: &str,
        frame: &RgbImage,
        rois: Vec<serde_json::Value>,
    ) -> (String, CapturedGroup) {
        let path = self
            .state
            .shared
            .captures_dir(session_id)
            .join(format!("group_{}.jpg", key.replace(',', "_")));
        vision::save_jpeg(&path, frame).unwrap();
        let (focus, exposure) = key.split_once(',').unwrap();
        (
            key.to_string(),
            CapturedGroup {
                focus: focus.parse().unwrap(),
                exposure: exposure.parse().unwrap(),
                rois,
                image_path: path.to_string_lossy().to_string(),
                width: frame.width(),
                height: frame.height(),
            },
        )
    }
}

fn solid(w: u32, h: u32, rgb: [u8; 3]) -> RgbImage {
    RgbImage::from_pixel(w, h, Rgb(rgb))
}

// ── Scenarios ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn single_device_compare_pass_without_promotion() {
    let harness = Harness::new(vec![], vec![]);
    let session_id = harness.session("widget").await;

    let frame = solid(64, 64, [60, 120, 180]);
    let crop = vision::crop(&frame, aoi_types::RoiRect::new(8, 8, 40, 40)).unwrap();
    harness.state.golden.save_initial("widget", 1, &crop).unwrap();

    let roi = json!([1, 2, [8, 8, 40, 40], 305, 1200, 0.9, "opencv", 0, 1]);
    let (key, group) = harness.group(&session_id, "305,1200", &frame, vec![roi]);
    let captured = HashMap::from([(key, group)]);

    let results = dispatch::process_groups(&harness.state, &session_id, "widget", &captured).await;
    assert_eq!(results.len(), 1);
    match &results[0].outcome {
        RoiOutcome::Compare { similarity, passed, .. } => {
            assert!(*passed, "similarity {similarity}");
            assert!(*similarity > 0.99);
        }
        other => panic!("expected compare outcome, got {other:?}"),
    }

    // The matching best stayed best; nothing was promoted or backed up.
    let files = harness.state.golden.list("widget", 1);
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].file_name().unwrap(), "best_golden.jpg");

    let (devices, summary) = aggregate::aggregate(results, &[], &harness.state.linker).await;
    assert_eq!(summary.overall_result, OverallResult::Pass);
    assert_eq!(devices.len(), 1);
    assert!(devices[0].device_passed);
}

#[tokio::test]
async fn alternative_golden_match_promotes() {
    let harness = Harness::new(vec![], vec![]);
    let session_id = harness.session("widget").await;

    let frame = solid(64, 64, [200, 30, 30]);
    let crop = vision::crop(&frame, aoi_types::RoiRect::new(0, 0, 32, 32)).unwrap();

    // Current best is a different color; the alternative matches.
    harness
        .state
        .golden
        .save_initial("widget", 5, &solid(32, 32, [30, 200, 30]))
        .unwrap();
    let alt_path = harness.state.golden.roi_dir("widget", 5).join("alternative.jpg");
    vision::save_jpeg(&alt_path, &crop).unwrap();

    let roi = json!([5, 2, [0, 0, 32, 32], 305, 1200, 0.9, "opencv", 0, 1]);
    let (key, group) = harness.group(&session_id, "305,1200", &frame, vec![roi]);
    let captured = HashMap::from([(key, group)]);

    let results = dispatch::process_groups(&harness.state, &session_id, "widget", &captured).await;
    assert!(results[0].passed());

    let dir = harness.state.golden.roi_dir("widget", 5);
    assert!(dir.join("best_golden.jpg").exists());
    assert!(!alt_path.exists(), "alternative should have moved into the best slot");
    let backups: Vec<String> = std::fs::read_dir(&dir)
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|n| n.contains("_golden_sample"))
        .collect();
    assert_eq!(backups.len(), 1, "former best must survive as a backup: {backups:?}");
    let bests = std::fs::read_dir(&dir)
        .unwrap()
        .flatten()
        .filter(|e| e.file_name() == "best_golden.jpg")
        .count();
    assert_eq!(bests, 1);
}

#[tokio::test]
async fn ocr_substring_pass_and_fail() {
    let frame = solid(64, 64, [255, 255, 255]);
    let roi = json!({
        "idx": 3, "type": 3, "coords": [0, 0, 60, 20],
        "expected_text": "PCB", "device_location": 1
    });

    // Label carries the SKU plus extra assembly characters.
    let harness = Harness::new(vec!["ASSY".into(), "PCB-V1.2".into()], vec![]);
    let session_id = harness.session("widget").await;
    let (key, group) = harness.group(&session_id, "305,1200", &frame, vec![roi.clone()]);
    let results = dispatch::process_groups(
        &harness.state,
        &session_id,
        "widget",
        &HashMap::from([(key, group)]),
    )
    .await;
    match &results[0].outcome {
        RoiOutcome::Ocr { text, passed, .. } => {
            assert!(passed);
            assert!(text.contains("[PASS: Contains 'PCB']"), "{text}");
        }
        other => panic!("expected ocr outcome, got {other:?}"),
    }

    // Unrelated text fails with the FAIL tag.
    let harness = Harness::new(vec!["ABC123".into()], vec![]);
    let session_id = harness.session("widget").await;
    let (key, group) = harness.group(&session_id, "305,1200", &frame, vec![roi]);
    let results = dispatch::process_groups(
        &harness.state,
        &session_id,
        "widget",
        &HashMap::from([(key, group)]),
    )
    .await;
    match &results[0].outcome {
        RoiOutcome::Ocr { text, passed, .. } => {
            assert!(!passed);
            assert!(
                text.contains("[FAIL: Expected 'PCB', detected 'ABC123']"),
                "{text}"
            );
        }
        other => panic!("expected ocr outcome, got {other:?}"),
    }
}

#[tokio::test]
async fn expected_color_red_passes_over_reddish_crop() {
    let harness = Harness::new(vec![], vec![]);
    let session_id = harness.session("widget").await;

    let frame = solid(80, 80, [240, 20, 20]);
    let roi = json!({
        "idx": 7, "type": 4, "coords": [10, 10, 44, 44],
        "expected_color": [255, 0, 0], "min_pixel_percentage": 5.0,
        "device_location": 2
    });
    let (key, group) = harness.group(&session_id, "400,2000", &frame, vec![roi]);
    let results = dispatch::process_groups(
        &harness.state,
        &session_id,
        "widget",
        &HashMap::from([(key, group)]),
    )
    .await;

    match &results[0].outcome {
        RoiOutcome::Color { detected_color, match_percentage, passed, .. } => {
            assert!(passed);
            assert_eq!(detected_color, "Red");
            assert!(*match_percentage > 99.0);
        }
        other => panic!("expected color outcome, got {other:?}"),
    }
    assert_eq!(results[0].device_id, 2);
}

#[tokio::test]
async fn tristate_device_barcodes_through_full_aggregation() {
    let harness = Harness::new(vec![], vec![]);
    let session_id = harness.session("widget").await;
    harness
        .state
        .sessions
        .cache_device_barcodes(
            &session_id,
            &[DeviceBarcodeEntry { device_id: 1, barcode: "OLD".into() }],
        )
        .await;
    let cached = harness
        .state
        .sessions
        .active(&session_id)
        .await
        .unwrap()
        .device_barcodes;

    let frame = solid(32, 32, [255, 255, 255]);
    let run = |rois: Vec<serde_json::Value>, key: &str| {
        let (k, g) = harness.group(&session_id, key, &frame, rois);
        HashMap::from([(k, g)])
    };
    let roi = json!({"idx": 1, "type": 3, "coords": [0, 0, 10, 10], "device_location": 1});

    // Key absent: the cached OLD applies (link is unreachable, so raw).
    let results =
        dispatch::process_groups(&harness.state, &session_id, "widget", &run(vec![roi.clone()], "305,1200"))
            .await;
    let entries = aggregate::effective_barcodes(None, &cached);
    let (devices, _) = aggregate::aggregate(results.clone(), &entries, &harness.state.linker).await;
    assert_eq!(devices[0].barcode, "OLD");

    // Key present and empty: the cache is suppressed.
    let entries = aggregate::effective_barcodes(Some(&[]), &cached);
    let (devices, _) = aggregate::aggregate(results.clone(), &entries, &harness.state.linker).await;
    assert_eq!(devices[0].barcode, "");

    // Key present with an entry: it overrides.
    let provided = vec![DeviceBarcodeEntry { device_id: 1, barcode: "X".into() }];
    let entries = aggregate::effective_barcodes(Some(&provided), &cached);
    let (devices, _) = aggregate::aggregate(results, &entries, &harness.state.linker).await;
    assert_eq!(devices[0].barcode, "X");
}

#[tokio::test]
async fn detector_failure_is_isolated_to_its_roi() {
    // No OCR fragments and an unavailable barcode decoder would both be
    // ordinary outcomes; an out-of-frame compare ROI is a real per-ROI
    // error. The second ROI still runs.
    let harness = Harness::new(vec!["OK".into()], vec![]);
    let session_id = harness.session("widget").await;

    let frame = solid(32, 32, [10, 10, 10]);
    let bad = json!([1, 2, [500, 500, 600, 600], 305, 1200, 0.9, "opencv", 0, 1]);
    let good = json!({"idx": 2, "type": 3, "coords": [0, 0, 20, 20], "device_location": 1});
    let (key, group) = harness.group(&session_id, "305,1200", &frame, vec![bad, good]);

    let results = dispatch::process_groups(
        &harness.state,
        &session_id,
        "widget",
        &HashMap::from([(key, group)]),
    )
    .await;
    assert_eq!(results.len(), 2);
    assert!(matches!(results[0].outcome, RoiOutcome::Error { .. }));
    assert!(results[1].passed());

    let (devices, summary) = aggregate::aggregate(results, &[], &harness.state.linker).await;
    assert!(!devices[0].device_passed);
    assert_eq!(summary.overall_result, OverallResult::Fail);
}

#[tokio::test]
async fn traversal_image_path_fails_the_group_not_the_process() {
    let harness = Harness::new(vec![], vec![]);
    let session_id = harness.session("widget").await;

    let roi = json!({"idx": 1, "type": 3, "coords": [0, 0, 10, 10], "device_location": 1});
    let group = CapturedGroup {
        focus: 305,
        exposure: 1200,
        rois: vec![roi],
        image_path: "../../../etc/passwd".into(),
        width: 32,
        height: 32,
    };
    let captured = HashMap::from([("305,1200".to_string(), group)]);

    let results = dispatch::process_groups(&harness.state, &session_id, "widget", &captured).await;
    assert_eq!(results.len(), 1);
    match &results[0].outcome {
        RoiOutcome::Error { message } => assert!(message.contains("rejected image path")),
        other => panic!("expected error outcome, got {other:?}"),
    }
}

#[tokio::test]
async fn results_reassemble_in_roi_id_order() {
    let harness = Harness::new(vec!["T".into()], vec!["B".into()]);
    let session_id = harness.session("widget").await;

    let frame = solid(48, 48, [128, 128, 128]);
    let rois: Vec<serde_json::Value> = [9, 2, 7, 4]
        .iter()
        .map(|id| json!({"idx": id, "type": 1, "coords": [0, 0, 16, 16], "device_location": 1}))
        .collect();
    let (key, group) = harness.group(&session_id, "305,1200", &frame, rois);
    let results = dispatch::process_groups(
        &harness.state,
        &session_id,
        "widget",
        &HashMap::from([(key, group)]),
    )
    .await;

    let ids: Vec<i64> = results.iter().map(|r| r.roi_id).collect();
    assert_eq!(ids, vec![2, 4, 7, 9]);
    assert!(results.iter().all(|r| r.passed()));
}

#[test]
fn normalization_idempotence_holds_for_every_accepted_shape() {
    let shapes = vec![
        json!([1, 1, [0, 0, 10, 10]]),
        json!([2, 2, [0, 0, 10, 10], 400]),
        json!([3, 2, [0, 0, 10, 10], 400, 0.8]),
        json!([4, 3, [0, 0, 10, 10], 400, 1500, null, "easyocr", 90, 2, "SKU", false]),
        json!({"idx": 5, "type": 4, "coords": [0, 0, 10, 10],
               "expected_color": [0, 0, 255], "color_tolerance": 20,
               "min_pixel_percentage": 10.0}),
        json!({"roi_id": 6, "roi_type_name": "compare", "coordinates": [1, 2, 3, 4],
               "detection_method": "mobilenet", "device_id": 3}),
    ];
    for shape in shapes {
        let once = normalize(&shape).unwrap();
        let again = normalize(&serde_json::to_value(codec::ServerRoi::from_roi(&once)).unwrap())
            .unwrap();
        assert_eq!(once, again, "idempotence failed for {shape}");
    }
}
