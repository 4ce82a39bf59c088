use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::digest::DigestAlgorithm;

/// User-facing cache configuration.
///
/// Deserialized from the downloader's configuration file; an unknown digest
/// algorithm name fails deserialization, so misconfiguration surfaces at
/// startup rather than on individual cache calls.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Directory the cache lives under. Content and the index document are
    /// placed in a `cache` subdirectory.
    pub cache_dir: PathBuf,

    /// Digest algorithm used for content addressing.
    #[serde(default)]
    pub digest_algorithm: DigestAlgorithm,
}

impl CacheConfig {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        CacheConfig {
            cache_dir: cache_dir.into(),
            digest_algorithm: DigestAlgorithm::default(),
        }
    }

    /// Reads the configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let source = fs::read_to_string(path)
            .with_context(|| format!("failed to open config file {}", path.display()))?;
        serde_json::from_str(&source)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }
}
