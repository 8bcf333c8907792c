//! Client-side shared-folder writes.
//!
//! The client never ships image bytes over HTTP; it writes each captured
//! frame into the session's captures directory on the shared mount and
//! sends the server the path.

use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use thiserror::Error;
use tracing::info;

const JPEG_QUALITY: u8 = 95;

#[derive(Debug, Error)]
pub enum SharedWriteError {
    #[error("shared folder io: {0}")]
    Io(#[from] std::io::Error),
    #[error("jpeg encode: {0}")]
    Encode(#[from] image::ImageError),
}

#[derive(Debug, Clone)]
pub struct SharedWriter {
    root: PathBuf,
}

impl SharedWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The mount must be both readable and writable before any cycle can
    /// run.
    pub fn is_accessible(&self) -> bool {
        self.root.is_dir()
            && std::fs::metadata(&self.root)
                .map(|m| !m.permissions().readonly())
                .unwrap_or(false)
    }

    pub fn captures_dir(&self, session_id: &str) -> PathBuf {
        self.root.join("sessions").join(session_id).join("captures")
    }

    pub fn output_dir(&self, session_id: &str) -> PathBuf {
        self.root.join("sessions").join(session_id).join("output")
    }

    /// Write one group's frame as `group_<focus>_<exposure>.jpg` and
    /// return its absolute path (the same path the server resolves).
    pub fn write_capture(
        &self,
        session_id: &str,
        group_key: &str,
        frame: &RgbImage,
    ) -> Result<PathBuf, SharedWriteError> {
        let dir = self.captures_dir(session_id);
        std::fs::create_dir_all(&dir)?;

        let filename = format!("group_{}.jpg", group_key.replace(',', "_"));
        let path = dir.join(filename);

        let mut file = std::fs::File::create(&path)?;
        frame.write_with_encoder(JpegEncoder::new_with_quality(&mut file, JPEG_QUALITY))?;

        info!(
            "saved capture {} ({}x{})",
            path.display(),
            frame.width(),
            frame.height()
        );
        Ok(path)
    }

    /// Server-written results for a session, if the inspection has run.
    pub fn read_results(&self, session_id: &str) -> Option<aoi_types::InspectResponse> {
        let path = self.output_dir(session_id).join("results.json");
        let data = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&data) {
            Ok(results) => Some(results),
            Err(e) => {
                tracing::warn!("malformed results.json in {session_id}: {e}");
                None
            }
        }
    }

    /// Path of a server-written crop artifact (for UI display), only when
    /// it exists.
    pub fn artifact_path(&self, session_id: &str, filename: &str) -> Option<PathBuf> {
        let path = self.output_dir(session_id).join(filename);
        path.is_file().then_some(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::TempDir;

    #[test]
    fn capture_filename_follows_group_key() {
        let tmp = TempDir::new().unwrap();
        let writer = SharedWriter::new(tmp.path());
        let frame = RgbImage::from_pixel(32, 24, Rgb([5, 5, 5]));

        let path = writer.write_capture("session_x", "305,1200", &frame).unwrap();
        assert!(path.ends_with("sessions/session_x/captures/group_305_1200.jpg"));
        assert!(path.exists());

        let reread = image::open(&path).unwrap().to_rgb8();
        assert_eq!(reread.dimensions(), (32, 24));
    }

    #[test]
    fn accessibility_check() {
        let tmp = TempDir::new().unwrap();
        assert!(SharedWriter::new(tmp.path()).is_accessible());
        assert!(!SharedWriter::new(tmp.path().join("missing")).is_accessible());
    }
}
