//! Engine configuration
//!
//! Every field has a default, so a partial JSON document is valid:
//!
//! ```json
//! { "asset_root": "assets", "identity_seed": 42 }
//! ```

use crate::error::Result;
use crate::logging::LogSeverity;
use crate::memory::LeakAction;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory asset paths are resolved against
    pub asset_root: PathBuf,
    /// Fixed seed for the identity generator; random when `None`
    pub identity_seed: Option<u64>,
    /// Severity of the allocation dump when leaks are found at shutdown
    pub leak_severity: LogSeverity,
    /// `Abort` stops the process on a leak so a debugger can catch it
    pub leak_action: LeakAction,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            asset_root: PathBuf::new(),
            identity_seed: None,
            leak_severity: LogSeverity::Error,
            leak_action: LeakAction::Log,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
