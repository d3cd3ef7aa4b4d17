use crate::residency::NodeStatus;

/// Why a fetch did not produce a payload.
///
/// Both variants are ordinary lifecycle events: the cache evicts the node and
/// a later sync requests the address again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The transport reported an error.
    Failed { message: String },
    /// The fetch was aborted by the cache or its owner.
    Cancelled,
}

impl FetchError {
    pub fn failed(message: impl Into<String>) -> Self {
        FetchError::Failed {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Failed { message } => write!(f, "fetch failed: {message}"),
            FetchError::Cancelled => write!(f, "fetch cancelled"),
        }
    }
}

impl std::error::Error for FetchError {}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// `fetch` was called on a stream that is not `Empty`.
    NotEmpty { status: NodeStatus },
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeError::NotEmpty { status } => {
                write!(f, "fetch requires an empty node, found {status:?}")
            }
        }
    }
}

impl std::error::Error for NodeError {}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    InvalidRootBounds,
    InvalidTileSize { tile_px: f64 },
    InvalidLevelRange { min_level: u8, max_level: u8 },
    UnsortedThresholds,
    InvalidScaleEpsilon { epsilon: f64 },
    Parse(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidRootBounds => {
                write!(f, "root bounds must be finite with positive area")
            }
            ConfigError::InvalidTileSize { tile_px } => {
                write!(f, "tile size must be positive and finite: tile_px={tile_px}")
            }
            ConfigError::InvalidLevelRange {
                min_level,
                max_level,
            } => write!(
                f,
                "invalid level range: min_level={min_level} max_level={max_level}"
            ),
            ConfigError::UnsortedThresholds => {
                write!(f, "scale thresholds must be finite and strictly increasing")
            }
            ConfigError::InvalidScaleEpsilon { epsilon } => {
                write!(f, "scale epsilon must be finite and >= 0: epsilon={epsilon}")
            }
            ConfigError::Parse(msg) => write!(f, "config parse error: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}
