//! Viewport scripts: a JSON list of steps replayed against a tile cache.
//!
//! ```json
//! {
//!   "settle_timeout_ms": 5000,
//!   "steps": [
//!     {"op": "sync", "bounds": {"min": [0, 0], "max": [512, 512]}, "scale": 1.0},
//!     {"op": "cancel", "address": "2-0-0"},
//!     {"op": "labels", "enabled": true},
//!     {"op": "invalidate"},
//!     {"op": "wait"}
//!   ]
//! }
//! ```

use std::path::Path;

use foundation::Aabb2;
use serde::{Deserialize, Serialize};
use streaming::{Filter, ParseAddressError, TileAddress};

#[derive(Debug)]
pub enum ScriptError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Address {
        step: usize,
        source: ParseAddressError,
    },
}

impl std::fmt::Display for ScriptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScriptError::Io(e) => write!(f, "failed to read script: {e}"),
            ScriptError::Parse(e) => write!(f, "invalid script: {e}"),
            ScriptError::Address { step, source } => write!(f, "step {step}: {source}"),
        }
    }
}

impl std::error::Error for ScriptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScriptError::Io(e) => Some(e),
            ScriptError::Parse(e) => Some(e),
            ScriptError::Address { source, .. } => Some(source),
        }
    }
}

fn default_settle_timeout_ms() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    /// Upper bound on waiting for outstanding fetches after a step.
    #[serde(default = "default_settle_timeout_ms")]
    pub settle_timeout_ms: u64,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Sync {
        bounds: Aabb2,
        scale: f64,
        #[serde(default)]
        filter: Filter,
        /// Drain completions until nothing is pending before the next step.
        #[serde(default = "default_true")]
        wait: bool,
    },
    /// Cancel one in-flight tile, `"level-x-y"`.
    Cancel { address: String },
    Invalidate,
    Clear,
    Labels { enabled: bool },
    Wait,
}

impl Script {
    pub fn from_json(text: &str) -> Result<Self, ScriptError> {
        let script: Script = serde_json::from_str(text).map_err(ScriptError::Parse)?;
        script.validate()?;
        Ok(script)
    }

    pub fn load(path: &Path) -> Result<Self, ScriptError> {
        let text = std::fs::read_to_string(path).map_err(ScriptError::Io)?;
        Self::from_json(&text)
    }

    fn validate(&self) -> Result<(), ScriptError> {
        for (step, s) in self.steps.iter().enumerate() {
            if let Step::Cancel { address } = s {
                address
                    .parse::<TileAddress>()
                    .map_err(|source| ScriptError::Address { step, source })?;
            }
        }
        Ok(())
    }

    /// True if any step turns labels on.
    pub fn enables_labels(&self) -> bool {
        self.steps
            .iter()
            .any(|s| matches!(s, Step::Labels { enabled: true }))
    }
}
