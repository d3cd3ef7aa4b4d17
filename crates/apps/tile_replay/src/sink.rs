use std::cell::Cell;

use bytes::Bytes;
use serde::Serialize;
use streaming::{EvictedTile, ReadyTile, TileAddress, TileSink};
use tracing::{debug, info};

/// Counts what a renderer would have been told.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SinkSummary {
    pub ready: u64,
    pub ready_bytes: u64,
    pub labels_ready: u64,
    pub evicted: u64,
    pub labels_evicted: u64,
    pub fetch_done: u64,
}

/// A [`TileSink`] that logs every notification through `tracing`.
#[derive(Debug, Default)]
pub struct TracingSink {
    summary: Cell<SinkSummary>,
}

impl TracingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(&self) -> SinkSummary {
        self.summary.get()
    }

    fn update(&self, f: impl FnOnce(&mut SinkSummary)) {
        let mut summary = self.summary.get();
        f(&mut summary);
        self.summary.set(summary);
    }
}

impl TileSink<Bytes, Bytes> for TracingSink {
    fn on_ready(&self, tile: ReadyTile<'_, Bytes>) {
        let len = tile.payload.len() as u64;
        self.update(|s| {
            s.ready += 1;
            s.ready_bytes += len;
        });
        debug!(address = %tile.address, bytes = len, "tile ready");
    }

    fn on_labels_ready(&self, tile: ReadyTile<'_, Bytes>) {
        self.update(|s| s.labels_ready += 1);
        debug!(address = %tile.address, bytes = tile.payload.len(), "labels ready");
    }

    fn on_evict(&self, tile: &EvictedTile) {
        self.update(|s| s.evicted += 1);
        debug!(address = %tile.address, status = ?tile.status, reason = ?tile.reason, "tile evicted");
    }

    fn on_labels_evict(&self, address: TileAddress) {
        self.update(|s| s.labels_evicted += 1);
        debug!(%address, "labels evicted");
    }

    fn on_fetch_done(&self) {
        self.update(|s| s.fetch_done += 1);
        info!("all fetches settled");
    }
}
