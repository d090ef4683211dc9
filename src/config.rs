use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use crate::{
    auth::{NonBlankToken, StaticTokens, TokenValidator},
    common::VtfsResult,
};

/// Runtime settings, usually read from a JSON file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VtfsConfig {
    /// Database file.
    pub db_path: PathBuf,
    /// Create the root directory on open if it is missing.
    pub bootstrap_root: bool,
    /// Accepted tokens. Empty means any non-blank token is accepted.
    pub tokens: Vec<String>,
    /// Writes ending past this many bytes fail with `OutOfSpace`.
    pub max_file_size: Option<u64>,
    /// Default `env_logger` filter when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for VtfsConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("vtfs.db"),
            bootstrap_root: true,
            tokens: Vec::new(),
            max_file_size: None,
            log_filter: "info".into(),
        }
    }
}

impl VtfsConfig {
    pub fn load(path: impl AsRef<Path>) -> VtfsResult<Self> {
        let raw = fs::read(path)?;
        Ok(serde_json::from_slice(&raw)?)
    }

    pub fn token_validator(&self) -> Arc<dyn TokenValidator> {
        if self.tokens.is_empty() {
            Arc::new(NonBlankToken)
        } else {
            Arc::new(StaticTokens::new(self.tokens.iter().cloned()))
        }
    }
}
