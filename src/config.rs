//! Process configuration: identity, messaging bootstrap parameters, and
//! log level. Loading itself (file format, CLI precedence) is this
//! crate's business; the config *source* beyond that is external.

use crate::error::{Error, Result};
use crate::model::PublicKey;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingConfig {
    pub discovery: String,
    pub server_count: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub pubkey: PublicKey,
    pub seckey: String,
    pub messaging: MessagingConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| Error::protocol(format!("parsing config: {e}")))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::transport(format!("reading config {}: {e}", path.display())))?;
        Self::from_json_str(&contents)
    }

    /// `RUST_LOG`-compatible filter directive, falling back to `log_level`
    /// when the environment variable is unset.
    pub fn env_filter_directive(&self) -> String {
        std::env::var("RUST_LOG").unwrap_or_else(|_| self.log_level.clone())
    }
}
