//! ==============================================================================
//! lifecycle.rs - pid file
//! ==============================================================================
//!
//! purpose:
//!     the one on-disk artifact of a running exporter. written once the
//!     listener is bound, removed after both tasks have stopped.
//!
//! relationships:
//!     - used by: supervisor.rs (Starting writes it, Stopped removes it)
//!     - configured by: config.rs (lifecycle.pid_file)
//!
//! ==============================================================================

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// a pid file written at startup and removed at shutdown
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn create(path: &Path) -> Result<Self> {
        std::fs::write(path, format!("{}\n", std::process::id()))
            .with_context(|| format!("Failed to write pid file {}", path.display()))?;
        tracing::info!(path = %path.display(), "Wrote pid file");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// best effort; a failure is logged and never blocks exit
    pub fn remove(self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::info!(path = %self.path.display(), "Removed pid file"),
            Err(e) => tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove pid file"),
        }
    }
}
