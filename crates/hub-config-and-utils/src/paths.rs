//! File system paths.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

/// Locations of camhub's on-disk state.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory (~/.camhub)
    base_dir: PathBuf,
}

impl Paths {
    /// Paths rooted at `~/.camhub`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;
        Ok(Self {
            base_dir: home.join(".camhub"),
        })
    }

    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// ~/.camhub/config.json
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        Ok(())
    }
}
