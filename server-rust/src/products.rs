//! Product and ROI configuration store.
//!
//! One directory per product under `config/products/<name>/`:
//! - `product.json` — name, description, device count
//! - `rois_config_<name>.json` — the ROI list, written in the modern
//!   server-object form; reads accept every shape the codec knows about,
//!   so configs from any era keep loading.

use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tracing::{info, warn};

use aoi_types::{codec, validate, ProductInfo, Roi, ValidationError};

use crate::error::ApiError;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProductMeta {
    product_name: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_device_count")]
    device_count: i64,
    #[serde(default)]
    created_at: String,
}

fn default_device_count() -> i64 {
    1
}

#[derive(Debug, Clone)]
pub struct ProductStore {
    config_root: PathBuf,
}

impl ProductStore {
    pub fn new(config_root: impl Into<PathBuf>) -> Self {
        Self {
            config_root: config_root.into(),
        }
    }

    fn products_dir(&self) -> PathBuf {
        self.config_root.join("products")
    }

    fn product_dir(&self, name: &str) -> PathBuf {
        self.products_dir().join(name)
    }

    fn meta_file(&self, name: &str) -> PathBuf {
        self.product_dir(name).join("product.json")
    }

    fn rois_file(&self, name: &str) -> PathBuf {
        self.product_dir(name).join(format!("rois_config_{name}.json"))
    }

    /// Product names become directory names, so they must not navigate.
    fn check_name(name: &str) -> Result<(), ApiError> {
        let ok = !name.is_empty()
            && name.len() <= 128
            && !name.contains(['/', '\\'])
            && name != "."
            && name != ".."
            && !name.starts_with('.');
        if ok {
            Ok(())
        } else {
            Err(ApiError::invalid(format!("invalid product name {name:?}")))
        }
    }

    pub async fn exists(&self, name: &str) -> bool {
        Self::check_name(name).is_ok() && fs::metadata(self.product_dir(name)).await.is_ok()
    }

    pub async fn list(&self) -> Result<Vec<ProductInfo>, ApiError> {
        let mut products = Vec::new();
        let mut entries = match fs::read_dir(self.products_dir()).await {
            Ok(entries) => entries,
            // No products created yet is a valid, empty catalogue.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(products),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let meta = self.read_meta(&name).await;
            let roi_count = self.get_rois(&name).await.map(|r| r.len()).unwrap_or(0);
            products.push(ProductInfo {
                product_name: name.clone(),
                description: meta.as_ref().map(|m| m.description.clone()).unwrap_or_default(),
                device_count: meta.map(|m| m.device_count).unwrap_or(1),
                roi_count,
            });
        }
        products.sort_by(|a, b| a.product_name.cmp(&b.product_name));
        Ok(products)
    }

    async fn read_meta(&self, name: &str) -> Option<ProductMeta> {
        let data = fs::read_to_string(self.meta_file(name)).await.ok()?;
        match serde_json::from_str(&data) {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!("malformed product.json for {name}: {e}");
                None
            }
        }
    }

    pub async fn create(
        &self,
        name: &str,
        description: &str,
        device_count: i64,
    ) -> Result<(), ApiError> {
        Self::check_name(name)?;
        if !(1..=4).contains(&device_count) {
            return Err(ApiError::invalid("device_count must be within 1..=4"));
        }
        if self.exists(name).await {
            return Err(ApiError::conflict(format!("product {name:?} already exists")));
        }

        fs::create_dir_all(self.product_dir(name)).await?;
        let meta = ProductMeta {
            product_name: name.to_string(),
            description: description.to_string(),
            device_count,
            created_at: Utc::now().to_rfc3339(),
        };
        fs::write(self.meta_file(name), serde_json::to_string_pretty(&meta)?).await?;
        // A product starts with no ROIs; that is a valid state, not a 404.
        fs::write(self.rois_file(name), "[]").await?;
        info!("created product {name:?} ({device_count} devices)");
        Ok(())
    }

    /// Load and normalize a product's ROI list. Entries that no longer
    /// parse are skipped with a warning rather than poisoning the rest of
    /// the config.
    pub async fn get_rois(&self, name: &str) -> Result<Vec<Roi>, ApiError> {
        Self::check_name(name)?;
        if !self.exists(name).await {
            return Err(ApiError::not_found(format!("product {name}")));
        }

        let raw = match fs::read_to_string(self.rois_file(name)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let values: Vec<Value> = serde_json::from_str(&raw)
            .map_err(|e| ApiError::internal(format!("corrupt ROI config for {name}: {e}")))?;

        let mut rois = Vec::with_capacity(values.len());
        for (i, value) in values.iter().enumerate() {
            match codec::normalize(value) {
                Ok(roi) => rois.push(roi),
                Err(e) => warn!("skipping unreadable ROI #{i} in {name}: {e}"),
            }
        }
        Ok(rois)
    }

    /// Validate and persist a full ROI list. The whole batch is checked
    /// first and every violation is reported together; nothing is written
    /// unless all entries pass.
    pub async fn save_rois(&self, name: &str, raw: &[Value]) -> Result<usize, ApiError> {
        Self::check_name(name)?;
        if !self.exists(name).await {
            return Err(ApiError::not_found(format!("product {name}")));
        }

        let mut rois = Vec::with_capacity(raw.len());
        let mut errors: Vec<ValidationError> = Vec::new();
        for (i, value) in raw.iter().enumerate() {
            match codec::normalize(value) {
                Ok(roi) => {
                    for err in validate(&roi, None) {
                        errors.push(ValidationError::new(
                            &format!("rois[{i}].{}", err.field),
                            err.message,
                        ));
                    }
                    rois.push(roi);
                }
                Err(e) => errors.push(ValidationError::new(&format!("rois[{i}]"), e.to_string())),
            }
        }

        let mut seen_ids = std::collections::HashSet::new();
        for roi in &rois {
            if !seen_ids.insert(roi.roi_id) {
                errors.push(ValidationError::new(
                    "roi_id",
                    format!("duplicate roi_id {}", roi.roi_id),
                ));
            }
        }

        if !errors.is_empty() {
            return Err(ApiError::invalid_with(
                format!("{} validation error(s) in ROI batch", errors.len()),
                errors,
            ));
        }

        let servers: Vec<_> = rois.iter().map(Roi::to_server).collect();
        fs::write(self.rois_file(name), serde_json::to_string_pretty(&servers)?).await?;
        info!("saved {} ROI(s) for product {name:?}", rois.len());
        Ok(rois.len())
    }
}
