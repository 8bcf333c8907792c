//! Golden-sample store.
//!
//! One directory per (product, ROI) holds the current reference as
//! `best_golden.jpg` plus timestamped backups of every former best.
//! Promotion — swapping an alternative sample into the best slot — is two
//! renames and runs under a process-wide mutex; the dispatcher executes
//! ROIs in parallel and unsynchronized promotions for the same ROI corrupt
//! the directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use image::RgbImage;
use tracing::{info, warn};

use aoi_types::GoldenSampleInfo;

use crate::error::ApiError;
use crate::vision;

pub const BEST_GOLDEN: &str = "best_golden.jpg";

#[derive(Clone)]
pub struct GoldenStore {
    config_root: PathBuf,
    /// Serializes every promotion in the process. Reads stay lock-free.
    promote_lock: Arc<Mutex<()>>,
}

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn now_unix_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

impl GoldenStore {
    pub fn new(config_root: impl Into<PathBuf>) -> Self {
        Self {
            config_root: config_root.into(),
            promote_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn roi_dir(&self, product: &str, roi_id: i64) -> PathBuf {
        self.config_root
            .join("products")
            .join(product)
            .join("golden_rois")
            .join(format!("roi_{roi_id}"))
    }

    /// All golden samples for a ROI: `best_golden.jpg` first when present,
    /// then the remaining `.jpg` files in name order. A missing directory
    /// is an empty set, never an error.
    pub fn list(&self, product: &str, roi_id: i64) -> Vec<PathBuf> {
        let dir = self.roi_dir(product, roi_id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut best = None;
        let mut rest = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let is_jpg = path
                .extension()
                .map(|e| e.eq_ignore_ascii_case("jpg"))
                .unwrap_or(false);
            if !is_jpg {
                continue;
            }
            if path.file_name().map(|n| n == BEST_GOLDEN).unwrap_or(false) {
                best = Some(path);
            } else {
                rest.push(path);
            }
        }
        rest.sort();

        let mut out = Vec::with_capacity(rest.len() + 1);
        if let Some(best) = best {
            out.push(best);
        }
        out.extend(rest);
        out
    }

    /// Listing with metadata for the golden-sample API.
    pub fn sample_infos(&self, product: &str, roi_id: i64) -> Vec<GoldenSampleInfo> {
        self.list(product, roi_id)
            .into_iter()
            .filter_map(|path| {
                let filename = path.file_name()?.to_string_lossy().to_string();
                let size_bytes = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                Some(GoldenSampleInfo {
                    is_best: filename == BEST_GOLDEN,
                    file_path: path.to_string_lossy().to_string(),
                    filename,
                    size_bytes,
                })
            })
            .collect()
    }

    /// Install a new reference image, preserving any previous best as
    /// `original_<unix_s>.jpg`.
    pub fn save_initial(
        &self,
        product: &str,
        roi_id: i64,
        img: &RgbImage,
    ) -> Result<PathBuf, ApiError> {
        let dir = self.roi_dir(product, roi_id);
        fs::create_dir_all(&dir)?;
        let best = dir.join(BEST_GOLDEN);
        if best.exists() {
            let backup = unique_name(&dir, &format!("original_{}", now_unix_secs()), ".jpg");
            fs::rename(&best, &backup)?;
        }
        vision::save_jpeg(&best, img)
            .map_err(|e| ApiError::internal(format!("saving golden sample: {e}")))?;
        Ok(best)
    }

    /// Promote `candidate` (a path inside the ROI directory) to
    /// `best_golden.jpg`.
    ///
    /// Runs entirely under the promotion mutex:
    /// 1. current best -> `<unix_ms>_golden_sample.jpg` (collision-bumped
    ///    so concurrent promotions never share a backup name)
    /// 2. candidate -> `best_golden.jpg`
    ///
    /// After step 1 there is no best file, so a failure in step 2 still
    /// leaves the directory with zero-or-one `best_golden.jpg`.
    pub fn promote(&self, product: &str, roi_id: i64, candidate: &Path) -> Result<(), ApiError> {
        let _guard = self.promote_lock.lock().map_err(|_| {
            ApiError::internal("golden promotion lock poisoned")
        })?;

        let dir = self.roi_dir(product, roi_id);
        let best = dir.join(BEST_GOLDEN);

        if candidate == best {
            return Ok(());
        }
        if !candidate.exists() {
            return Err(ApiError::not_found(format!(
                "golden candidate {}",
                candidate.display()
            )));
        }

        if best.exists() {
            let backup = unique_name(&dir, &format!("{}_golden_sample", now_unix_ms()), ".jpg");
            fs::rename(&best, &backup)?;
            info!(
                "golden roi_{roi_id}: backed up previous best as {}",
                backup.file_name().unwrap_or_default().to_string_lossy()
            );
        }

        fs::rename(candidate, &best)?;
        info!(
            "golden roi_{roi_id}: promoted {} to {BEST_GOLDEN}",
            candidate.file_name().unwrap_or_default().to_string_lossy()
        );
        Ok(())
    }

    /// Promote a named backup file back into the best slot.
    pub fn restore(&self, product: &str, roi_id: i64, filename: &str) -> Result<(), ApiError> {
        if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
            return Err(ApiError::invalid(format!("unsafe golden filename {filename:?}")));
        }
        let candidate = self.roi_dir(product, roi_id).join(filename);
        if !candidate.exists() {
            return Err(ApiError::not_found(format!("golden sample {filename}")));
        }
        self.promote(product, roi_id, &candidate)
    }
}

/// First free `<stem><bump>?.jpg` name in `dir`. Promotions are serialized,
/// but two promotions inside the same millisecond would otherwise produce
/// the same backup name and the second rename would clobber the first.
fn unique_name(dir: &Path, stem: &str, ext: &str) -> PathBuf {
    let plain = dir.join(format!("{stem}{ext}"));
    if !plain.exists() {
        return plain;
    }
    let mut bump = 1u32;
    loop {
        let candidate = dir.join(format!("{stem}_{bump}{ext}"));
        if !candidate.exists() {
            return candidate;
        }
        bump += 1;
        if bump > 10_000 {
            warn!("golden backup namespace exhausted for {stem}");
            return plain;
        }
    }
}
