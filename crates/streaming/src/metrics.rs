use serde::Serialize;

/// Deterministic counters describing cache activity since construction.
///
/// Counters only ever grow; take two snapshots and diff them to measure a
/// single sync pass.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub syncs: u64,
    /// Syncs that discarded every resident node (scale/filter/level change
    /// or explicit invalidation).
    pub refreshes: u64,
    pub fetches_issued: u64,
    pub fetches_cancelled: u64,
    pub fetches_failed: u64,
    pub loaded: u64,
    /// Completions dropped because their node or generation was gone.
    pub stale_dropped: u64,
    /// `on_ready` deliveries or registrations for nodes that were already resident.
    pub replays: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stable `(name, value)` pairs for logs and debug output.
    pub fn snapshot(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("evictions", self.evictions),
            ("fetches_cancelled", self.fetches_cancelled),
            ("fetches_failed", self.fetches_failed),
            ("fetches_issued", self.fetches_issued),
            ("loaded", self.loaded),
            ("refreshes", self.refreshes),
            ("replays", self.replays),
            ("stale_dropped", self.stale_dropped),
            ("syncs", self.syncs),
        ]
    }

    /// Field-wise `self - earlier`, saturating at zero.
    pub fn since(&self, earlier: &CacheStats) -> CacheStats {
        CacheStats {
            syncs: self.syncs.saturating_sub(earlier.syncs),
            refreshes: self.refreshes.saturating_sub(earlier.refreshes),
            fetches_issued: self.fetches_issued.saturating_sub(earlier.fetches_issued),
            fetches_cancelled: self.fetches_cancelled.saturating_sub(earlier.fetches_cancelled),
            fetches_failed: self.fetches_failed.saturating_sub(earlier.fetches_failed),
            loaded: self.loaded.saturating_sub(earlier.loaded),
            stale_dropped: self.stale_dropped.saturating_sub(earlier.stale_dropped),
            replays: self.replays.saturating_sub(earlier.replays),
            evictions: self.evictions.saturating_sub(earlier.evictions),
        }
    }
}
