use foundation::Aabb2;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::lod::LodPolicy;

/// Default relative tolerance when deciding whether the scale changed.
pub const DEFAULT_SCALE_EPSILON: f64 = 1e-9;

/// Configuration for a [`crate::TileCache`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileCacheConfig {
    /// Full extent of the data; level 0 is exactly this box.
    pub root_bounds: Aabb2,

    pub lod: LodPolicy,

    /// Extra ring of cells fetched around the viewport so renderers can
    /// continue features across the clip edge.
    pub neighbor_margin: u32,

    /// Fetch the label stream alongside every tile.
    pub labels_enabled: bool,

    /// Cap on resident nodes. Nodes outside the current viewport are trimmed
    /// least-recently-required first once the cap is exceeded.
    pub max_resident: Option<usize>,

    /// Relative scale change below which a sync still counts as a pan.
    pub scale_epsilon: f64,
}

impl Default for TileCacheConfig {
    fn default() -> Self {
        Self {
            root_bounds: Aabb2::from_extent(-180.0, -90.0, 180.0, 90.0),
            lod: LodPolicy::default(),
            neighbor_margin: 0,
            labels_enabled: false,
            max_resident: None,
            scale_epsilon: DEFAULT_SCALE_EPSILON,
        }
    }
}

impl TileCacheConfig {
    pub fn with_root_bounds(root_bounds: Aabb2) -> Self {
        Self {
            root_bounds,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.root_bounds.is_finite() || !self.root_bounds.has_area() {
            return Err(ConfigError::InvalidRootBounds);
        }
        validate_epsilon(self.scale_epsilon)?;
        self.lod.validate()
    }
}

/// Configuration for a [`crate::RasterCache`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterCacheConfig {
    /// Inactive groups kept around (hidden) for quick swaps; older ones are
    /// evicted after each response.
    pub max_inactive_groups: usize,

    pub scale_epsilon: f64,
}

impl Default for RasterCacheConfig {
    fn default() -> Self {
        Self {
            max_inactive_groups: 4,
            scale_epsilon: DEFAULT_SCALE_EPSILON,
        }
    }
}

impl RasterCacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_epsilon(self.scale_epsilon)
    }
}

/// Top-level configuration file for a streaming client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    pub tiles: TileCacheConfig,
    pub raster: RasterCacheConfig,
}

impl StreamingConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: StreamingConfig =
            serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tiles.validate()?;
        self.raster.validate()
    }
}

fn validate_epsilon(epsilon: f64) -> Result<(), ConfigError> {
    if !epsilon.is_finite() || epsilon < 0.0 {
        return Err(ConfigError::InvalidScaleEpsilon { epsilon });
    }
    Ok(())
}

/// True when `a` and `b` differ by more than `epsilon` relative to their magnitude.
pub(crate) fn scale_changed(a: f64, b: f64, epsilon: f64) -> bool {
    let magnitude = a.abs().max(b.abs()).max(f64::MIN_POSITIVE);
    (a - b).abs() / magnitude > epsilon
}
