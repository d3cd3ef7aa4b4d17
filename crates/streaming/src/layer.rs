use serde::{Deserialize, Serialize};

use crate::metrics::CacheStats;
use crate::raster_cache::RasterCache;
use crate::tile_cache::TileCache;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    /// Per-cell tiles with incremental reuse.
    Vector,
    /// Whole-viewport image batches.
    Raster,
}

/// The cache backing one map layer.
pub enum LayerCache<T, L, P> {
    Vector(TileCache<T, L>),
    Raster(RasterCache<P>),
}

impl<T: 'static, L: 'static, P: 'static> LayerCache<T, L, P> {
    pub fn kind(&self) -> LayerKind {
        match self {
            LayerCache::Vector(_) => LayerKind::Vector,
            LayerCache::Raster(_) => LayerKind::Raster,
        }
    }

    pub fn as_vector(&mut self) -> Option<&mut TileCache<T, L>> {
        match self {
            LayerCache::Vector(cache) => Some(cache),
            LayerCache::Raster(_) => None,
        }
    }

    pub fn as_raster(&mut self) -> Option<&mut RasterCache<P>> {
        match self {
            LayerCache::Vector(_) => None,
            LayerCache::Raster(cache) => Some(cache),
        }
    }

    /// Forces the next sync of this layer to start from scratch.
    pub fn invalidate(&mut self) {
        match self {
            LayerCache::Vector(cache) => cache.invalidate(),
            LayerCache::Raster(cache) => cache.invalidate(),
        }
    }

    pub fn clear(&mut self) {
        match self {
            LayerCache::Vector(cache) => cache.clear(),
            LayerCache::Raster(cache) => cache.clear(),
        }
    }

    pub fn is_pending(&self) -> bool {
        match self {
            LayerCache::Vector(cache) => cache.pending_count() > 0,
            LayerCache::Raster(cache) => cache.is_pending(),
        }
    }

    pub fn stats(&self) -> CacheStats {
        match self {
            LayerCache::Vector(cache) => cache.stats(),
            LayerCache::Raster(cache) => cache.stats(),
        }
    }
}
