//! Session registry and lifecycle.
//!
//! A session is one inspection transaction: a registry entry plus a
//! directory pair on the shared mount (`captures/` written by the client,
//! `output/` written by the server). Closing a session deletes the captures
//! and keeps the output for history; a periodic sweep removes temp
//! directories and leftover captures older than 24 hours so crashed
//! sessions cannot accumulate forever.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use aoi_types::{ClientInfo, DeviceBarcodeEntry};

use crate::error::ApiError;
use crate::shared_folder::SharedFolder;

pub const SWEEP_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub product: String,
    pub created_at: chrono::DateTime<Utc>,
    /// Cached device barcodes; used when an inspect request omits the
    /// `device_barcodes` key entirely.
    pub device_barcodes: Vec<DeviceBarcodeEntry>,
    pub closed: bool,
}

#[derive(Clone)]
pub struct SessionRegistry {
    shared: SharedFolder,
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl SessionRegistry {
    pub fn new(shared: SharedFolder) -> Self {
        Self {
            shared,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a session and its directories. The camera must already be
    /// initialized on the client; sessions for a blind camera are refused.
    pub async fn create(
        &self,
        product: &str,
        client_info: &ClientInfo,
    ) -> Result<Session, ApiError> {
        if !client_info.camera_ready {
            return Err(ApiError::conflict(
                "camera is not initialized; initialize it before creating a session",
            ));
        }

        let session_id = format!(
            "session_{product}_{}_{}",
            Utc::now().format("%Y%m%d_%H%M%S"),
            &Uuid::new_v4().simple().to_string()[..8]
        );

        fs::create_dir_all(self.shared.captures_dir(&session_id)).await?;
        fs::create_dir_all(self.shared.output_dir(&session_id)).await?;

        let session = Session {
            session_id: session_id.clone(),
            product: product.to_string(),
            created_at: Utc::now(),
            device_barcodes: Vec::new(),
            closed: false,
        };
        self.sessions.write().await.insert(session_id.clone(), session.clone());
        info!("created session {session_id} for product {product:?}");
        Ok(session)
    }

    /// Active (unclosed) session, or the appropriate error kind.
    pub async fn active(&self, session_id: &str) -> Result<Session, ApiError> {
        let sessions = self.sessions.read().await;
        match sessions.get(session_id) {
            Some(s) if s.closed => Err(ApiError::conflict(format!(
                "session {session_id} is closed"
            ))),
            Some(s) => Ok(s.clone()),
            None => Err(ApiError::not_found(format!("session {session_id}"))),
        }
    }

    /// Refresh the cached device barcodes after a successful inspection.
    pub async fn cache_device_barcodes(&self, session_id: &str, entries: &[DeviceBarcodeEntry]) {
        if let Some(session) = self.sessions.write().await.get_mut(session_id) {
            for entry in entries {
                match session
                    .device_barcodes
                    .iter_mut()
                    .find(|e| e.device_id == entry.device_id)
                {
                    Some(existing) => existing.barcode = entry.barcode.clone(),
                    None => session.device_barcodes.push(entry.clone()),
                }
            }
        }
    }

    /// Mark closed and delete the captures directory; output stays around
    /// for history.
    pub async fn close(&self, session_id: &str) -> Result<(), ApiError> {
        {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| ApiError::not_found(format!("session {session_id}")))?;
            session.closed = true;
        }

        let captures = self.shared.captures_dir(session_id);
        if let Err(e) = fs::remove_dir_all(&captures).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to remove captures for {session_id}: {e}");
            }
        }
        info!("closed session {session_id}");
        Ok(())
    }

    /// Close every session still open (process shutdown).
    pub async fn close_all(&self) {
        let ids: Vec<String> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| !s.closed)
            .map(|s| s.session_id.clone())
            .collect();
        for id in ids {
            if let Err(e) = self.close(&id).await {
                warn!("failed to close session {id} on shutdown: {e}");
            }
        }
    }

    /// Remove temp directories and orphaned session captures older than
    /// `max_age`. Runs at startup and on a timer; a crashed client's
    /// session eventually disappears on its own.
    pub async fn sweep(&self, max_age: Duration) -> usize {
        let mut removed = 0;
        removed += sweep_dir(&self.shared.temp_dir(), max_age, false).await;

        // Orphaned captures: session directories nobody closed.
        let known: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        if let Ok(mut entries) = fs::read_dir(self.shared.sessions_dir()).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let name = entry.file_name().to_string_lossy().to_string();
                if known.contains(&name) {
                    continue;
                }
                let captures = entry.path().join("captures");
                removed += sweep_dir(&captures, max_age, true).await;
            }
        }

        if removed > 0 {
            info!("sweep removed {removed} stale director{}", if removed == 1 { "y" } else { "ies" });
        }
        removed
    }
}

/// Remove `dir` itself (`whole=true`) or its entries when older than
/// `max_age`. Missing directories count as already clean.
async fn sweep_dir(dir: &std::path::Path, max_age: Duration, whole: bool) -> usize {
    let now = SystemTime::now();
    let is_stale = |modified: SystemTime| {
        now.duration_since(modified).map(|age| age > max_age).unwrap_or(false)
    };

    if whole {
        let stale = fs::metadata(dir)
            .await
            .ok()
            .and_then(|m| m.modified().ok())
            .map(is_stale)
            .unwrap_or(false);
        if stale && fs::remove_dir_all(dir).await.is_ok() {
            return 1;
        }
        return 0;
    }

    let mut removed = 0;
    if let Ok(mut entries) = fs::read_dir(dir).await {
        while let Ok(Some(entry)) = entries.next_entry().await {
            let stale = entry
                .metadata()
                .await
                .ok()
                .and_then(|m| m.modified().ok())
                .map(is_stale)
                .unwrap_or(false);
            if !stale {
                continue;
            }
            let path = entry.path();
            let ok = if path.is_dir() {
                fs::remove_dir_all(&path).await.is_ok()
            } else {
                fs::remove_file(&path).await.is_ok()
            };
            if ok {
                removed += 1;
            }
        }
    }
    removed
}
