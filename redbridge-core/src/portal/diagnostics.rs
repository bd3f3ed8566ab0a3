//! Best-effort screenshot capture. The portal reports nothing
//! structured on failure; these files are the only post-hoc artifact a
//! human operator gets after a failed run, so capture must itself never
//! abort the pipeline.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, warn};

use crate::config::DiagnosticsSection;

use super::surface::PortalSurface;

#[derive(Debug, Clone)]
pub struct DiagnosticsRecorder {
    dir: PathBuf,
    enabled: bool,
}

impl DiagnosticsRecorder {
    pub fn new(section: &DiagnosticsSection) -> Self {
        Self {
            dir: PathBuf::from(&section.screenshot_dir),
            enabled: section.enabled,
        }
    }

    pub fn disabled() -> Self {
        Self {
            dir: PathBuf::new(),
            enabled: false,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Captures a full-page screenshot tagged with `tag`. Returns the
    /// written path, or `None` when capture is disabled or failed;
    /// failures are logged and swallowed.
    pub async fn capture(&self, surface: &dyn PortalSurface, tag: &str) -> Option<PathBuf> {
        if !self.enabled {
            return None;
        }
        let bytes = match surface.screenshot().await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(tag, error = %err, "screenshot capture failed");
                return None;
            }
        };
        let filename = format!("{}-{tag}.png", Utc::now().format("%Y%m%dT%H%M%S%3f"));
        let path = self.dir.join(filename);
        if let Err(err) = tokio::fs::create_dir_all(&self.dir).await {
            warn!(tag, error = %err, "could not create screenshot directory");
            return None;
        }
        match tokio::fs::write(&path, &bytes).await {
            Ok(()) => {
                debug!(tag, path = %path.display(), "screenshot written");
                Some(path)
            }
            Err(err) => {
                warn!(tag, error = %err, "screenshot write failed");
                None
            }
        }
    }
}
