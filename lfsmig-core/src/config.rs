//! Migration configuration
//!
//! Can be loaded from a JSON file and then overridden from the command line.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// The `.gitattributes` file name
pub const ATTRIBUTES_FILE: &str = ".gitattributes";

fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Settings for one migration run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrateConfig {
    /// LFS endpoint; `None` converts locally without uploading
    #[serde(default)]
    pub lfs_url: Option<String>,
    /// File name suffixes moved into LFS (`.bin`, `.psd`, ...)
    #[serde(default)]
    pub suffixes: Vec<String>,
    /// Scratch directory for blobs while they are hashed
    pub staging_dir: PathBuf,
    /// Content-addressed LFS object cache (`xx/yy/<oid>`)
    pub lfs_objects_dir: PathBuf,
    /// Maximum number of refs converted concurrently
    #[serde(default = "default_jobs")]
    pub jobs: usize,
}

impl MigrateConfig {
    /// Defaults rooted at a destination git directory:
    /// `lfs/tmp` for staging and `lfs/objects` for the cache.
    pub fn for_destination(git_dir: &Path) -> Self {
        Self {
            lfs_url: None,
            suffixes: Vec::new(),
            staging_dir: git_dir.join("lfs").join("tmp"),
            lfs_objects_dir: git_dir.join("lfs").join("objects"),
            jobs: default_jobs(),
        }
    }

    /// Load config from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read migration config from {:?}", path))?;
        let config: MigrateConfig = serde_json::from_str(&data)
            .with_context(|| "Failed to parse migration config JSON")?;
        Ok(config)
    }

    /// Save config as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp_path = path.with_extension("tmp");
        let data = serde_json::to_string_pretty(self)?;
        fs::write(&tmp_path, &data)?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.jobs == 0 {
            anyhow::bail!("jobs must be at least 1");
        }
        if let Some(bad) = self.suffixes.iter().find(|s| s.is_empty() || s.contains('/')) {
            anyhow::bail!("Invalid suffix {:?}", bad);
        }
        Ok(())
    }

    /// Whether a file name is tracked by LFS
    pub fn is_tracked(&self, name: &[u8]) -> bool {
        self.suffixes.iter().any(|s| name.ends_with(s.as_bytes()))
    }
}
