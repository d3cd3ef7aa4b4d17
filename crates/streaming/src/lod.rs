use foundation::Aabb2;
use serde::{Deserialize, Serialize};

use crate::address::MAX_LEVEL;
use crate::error::ConfigError;

/// Maps a view scale (screen pixels per map unit) to a discrete level.
///
/// Both policies are monotonic: a larger scale never yields a coarser level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LodPolicy {
    /// Pick the shallowest level whose tiles are at most `tile_px` pixels
    /// wide on screen, clamped to `[min_level, max_level]`.
    TileSize {
        tile_px: f64,
        min_level: u8,
        max_level: u8,
    },
    /// Level `i` is selected once the scale reaches `scales[i - 1]`; below
    /// the first threshold the level is 0.
    Thresholds { scales: Vec<f64> },
}

impl Default for LodPolicy {
    fn default() -> Self {
        LodPolicy::TileSize {
            tile_px: 256.0,
            min_level: 0,
            max_level: 20,
        }
    }
}

impl LodPolicy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            LodPolicy::TileSize {
                tile_px,
                min_level,
                max_level,
            } => {
                if !tile_px.is_finite() || *tile_px <= 0.0 {
                    return Err(ConfigError::InvalidTileSize { tile_px: *tile_px });
                }
                if min_level > max_level || *max_level > MAX_LEVEL {
                    return Err(ConfigError::InvalidLevelRange {
                        min_level: *min_level,
                        max_level: *max_level,
                    });
                }
                Ok(())
            }
            LodPolicy::Thresholds { scales } => {
                let finite = scales.iter().all(|s| s.is_finite());
                let increasing = scales.windows(2).all(|w| w[0] < w[1]);
                if !finite || !increasing {
                    return Err(ConfigError::UnsortedThresholds);
                }
                if scales.len() > MAX_LEVEL as usize {
                    return Err(ConfigError::InvalidLevelRange {
                        min_level: 0,
                        max_level: u8::try_from(scales.len()).unwrap_or(u8::MAX),
                    });
                }
                Ok(())
            }
        }
    }

    pub fn level_for_scale(&self, scale: f64, root: &Aabb2) -> u8 {
        match self {
            LodPolicy::TileSize {
                tile_px,
                min_level,
                max_level,
            } => {
                let extent = root.width().max(root.height());
                let screen_px = scale * extent;
                if !screen_px.is_finite() || screen_px <= 0.0 {
                    return *min_level;
                }
                let level = (screen_px / tile_px).log2().ceil();
                if level <= *min_level as f64 {
                    *min_level
                } else if level >= *max_level as f64 {
                    *max_level
                } else {
                    level as u8
                }
            }
            LodPolicy::Thresholds { scales } => {
                if scale.is_nan() {
                    return 0;
                }
                let reached = scales.iter().take_while(|t| scale >= **t).count();
                reached.min(MAX_LEVEL as usize) as u8
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use foundation::Aabb2;

    use super::LodPolicy;
    use crate::error::ConfigError;

    fn root() -> Aabb2 {
        Aabb2::from_extent(0.0, 0.0, 1024.0, 1024.0)
    }

    #[test]
    fn tile_size_policy_doubles_per_level() {
        let lod = LodPolicy::default();
        assert_eq!(lod.level_for_scale(0.25, &root()), 0);
        assert_eq!(lod.level_for_scale(1.0, &root()), 2);
        assert_eq!(lod.level_for_scale(1.5, &root()), 3);
        assert_eq!(lod.level_for_scale(2.0, &root()), 3);
        assert_eq!(lod.level_for_scale(1e12, &root()), 20);
        assert_eq!(lod.level_for_scale(-1.0, &root()), 0);
        assert_eq!(lod.level_for_scale(f64::NAN, &root()), 0);
    }

    #[test]
    fn tile_size_policy_is_monotonic() {
        let lod = LodPolicy::default();
        let mut last = 0;
        for i in 1..4000 {
            let level = lod.level_for_scale(i as f64 * 0.01, &root());
            assert!(level >= last, "level decreased at scale {}", i as f64 * 0.01);
            last = level;
        }
    }

    #[test]
    fn thresholds_policy_counts_reached_scales() {
        let lod = LodPolicy::Thresholds {
            scales: vec![0.5, 1.0, 4.0],
        };
        assert!(lod.validate().is_ok());
        assert_eq!(lod.level_for_scale(0.1, &root()), 0);
        assert_eq!(lod.level_for_scale(0.5, &root()), 1);
        assert_eq!(lod.level_for_scale(3.9, &root()), 2);
        assert_eq!(lod.level_for_scale(100.0, &root()), 3);
    }

    #[test]
    fn validate_rejects_bad_policies() {
        let unsorted = LodPolicy::Thresholds {
            scales: vec![1.0, 0.5],
        };
        assert_eq!(unsorted.validate(), Err(ConfigError::UnsortedThresholds));

        let inverted = LodPolicy::TileSize {
            tile_px: 256.0,
            min_level: 5,
            max_level: 2,
        };
        assert!(matches!(
            inverted.validate(),
            Err(ConfigError::InvalidLevelRange { .. })
        ));

        let zero = LodPolicy::TileSize {
            tile_px: 0.0,
            min_level: 0,
            max_level: 2,
        };
        assert!(matches!(zero.validate(), Err(ConfigError::InvalidTileSize { .. })));
    }

    #[test]
    fn policy_deserializes_from_tagged_json() {
        let lod: LodPolicy =
            serde_json::from_str(r#"{"kind":"thresholds","scales":[0.5,2.0]}"#).unwrap();
        assert_eq!(
            lod,
            LodPolicy::Thresholds {
                scales: vec![0.5, 2.0]
            }
        );
    }
}
