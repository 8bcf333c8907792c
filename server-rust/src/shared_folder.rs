//! Shared-folder layout and path safety.
//!
//! The server and client exchange image artifacts through one mounted
//! directory tree:
//!
//! ```text
//! <shared>/
//! ├── sessions/<session_id>/captures/   client-written frames
//! ├── sessions/<session_id>/output/     server-written crops + results.json
//! └── temp/                             scratch, swept after 24h
//! ```
//!
//! Every client-supplied path is resolved through [`SharedFolder::safe_join`],
//! which rejects anything that would escape the root.

use std::path::{Component, Path, PathBuf};

use crate::error::ApiError;

#[derive(Debug, Clone)]
pub struct SharedFolder {
    root: PathBuf,
}

impl SharedFolder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root.join("temp")
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.sessions_dir().join(session_id)
    }

    pub fn captures_dir(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("captures")
    }

    pub fn output_dir(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("output")
    }

    /// Resolve a client-supplied path against the shared root.
    ///
    /// Accepts either a path relative to the root or an absolute path that
    /// already lies under it (clients on the same mount often report
    /// absolute paths). Rejects `..` and `.` components outright rather
    /// than canonicalizing, so the check does not depend on the file
    /// existing yet.
    pub fn safe_join(&self, supplied: &str) -> Result<PathBuf, ApiError> {
        let supplied_path = Path::new(supplied);

        let relative = if supplied_path.is_absolute() {
            supplied_path.strip_prefix(&self.root).map_err(|_| {
                ApiError::invalid(format!("path {supplied:?} is outside the shared folder"))
            })?
        } else {
            supplied_path
        };

        for component in relative.components() {
            match component {
                Component::Normal(_) => {}
                Component::ParentDir | Component::CurDir => {
                    return Err(ApiError::invalid(format!(
                        "path {supplied:?} contains traversal components"
                    )));
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(ApiError::invalid(format!(
                        "path {supplied:?} is not relative to the shared folder"
                    )));
                }
            }
        }

        Ok(self.root.join(relative))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder() -> SharedFolder {
        SharedFolder::new("/mnt/aoi-shared")
    }

    #[test]
    fn joins_relative_paths() {
        let p = folder().safe_join("sessions/s1/captures/group_305_1200.jpg").unwrap();
        assert_eq!(
            p,
            PathBuf::from("/mnt/aoi-shared/sessions/s1/captures/group_305_1200.jpg")
        );
    }

    #[test]
    fn accepts_absolute_paths_under_root() {
        let p = folder().safe_join("/mnt/aoi-shared/sessions/s1/x.jpg").unwrap();
        assert_eq!(p, PathBuf::from("/mnt/aoi-shared/sessions/s1/x.jpg"));
    }

    #[test]
    fn rejects_traversal() {
        assert!(folder().safe_join("sessions/../../etc/passwd").is_err());
        assert!(folder().safe_join("../outside.jpg").is_err());
        assert!(folder().safe_join("sessions/./s1/x.jpg").is_err());
    }

    #[test]
    fn rejects_absolute_paths_outside_root() {
        assert!(folder().safe_join("/etc/passwd").is_err());
        assert!(folder().safe_join("/mnt/other/x.jpg").is_err());
    }

    #[test]
    fn rejects_absolute_path_with_traversal_inside_root() {
        assert!(folder().safe_join("/mnt/aoi-shared/sessions/../../../etc/passwd").is_err());
    }
}
