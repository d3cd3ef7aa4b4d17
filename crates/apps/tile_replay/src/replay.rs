use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use streaming::{
    CacheStats, Completion, ConfigError, Resolution, Stream, TileAddress, TileCache,
    TileCacheConfig, TileSink,
};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::script::{Script, Step};
use crate::sink::{SinkSummary, TracingSink};
use crate::source::DataSource;
use crate::transport::{Fetched, TokioTransport};

/// Final report printed by the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct ReplaySummary {
    pub steps: usize,
    pub level: Option<u8>,
    pub resident: usize,
    pub pending: usize,
    pub timed_out: usize,
    pub stats: CacheStats,
    pub sink: SinkSummary,
}

/// Drives a [`TileCache`] from a script, feeding transport completions back in.
pub struct Replay {
    cache: TileCache<Bytes, Bytes>,
    completions: mpsc::UnboundedReceiver<Fetched>,
    sink: Rc<TracingSink>,
    settle_timeout: Duration,
    timed_out: usize,
}

impl Replay {
    pub fn new(
        config: TileCacheConfig,
        source: Arc<dyn DataSource>,
        runtime: Handle,
        settle_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let (transport, completions) = TokioTransport::new(source, runtime);
        let cache = TileCache::new(config, Box::new(transport))?;
        Ok(Self {
            cache,
            completions,
            sink: Rc::new(TracingSink::new()),
            settle_timeout,
            timed_out: 0,
        })
    }

    pub fn cache(&self) -> &TileCache<Bytes, Bytes> {
        &self.cache
    }

    pub async fn run(&mut self, script: &Script) -> ReplaySummary {
        for (i, step) in script.steps.iter().enumerate() {
            debug!(step = i, ?step, "replaying step");
            self.apply(step).await;
        }
        self.summary(script.steps.len())
    }

    async fn apply(&mut self, step: &Step) {
        let sink: Rc<dyn TileSink<Bytes, Bytes>> = self.sink.clone();
        match step {
            Step::Sync {
                bounds,
                scale,
                filter,
                wait,
            } => {
                let report = self.cache.sync(*bounds, *scale, filter, &sink);
                info!(
                    level = report.level,
                    required = report.required,
                    fetched = report.fetched,
                    replayed = report.replayed,
                    evicted = report.evicted,
                    refreshed = report.refreshed,
                    "sync"
                );
                if *wait {
                    self.settle().await;
                }
            }
            Step::Cancel { address } => match address.parse::<TileAddress>() {
                Ok(address) => {
                    if !self.cache.cancel(&address) {
                        debug!(%address, "nothing in flight to cancel");
                    }
                }
                Err(err) => warn!("skipping cancel: {err}"),
            },
            Step::Invalidate => self.cache.invalidate(),
            Step::Clear => self.cache.clear(),
            Step::Labels { enabled } => self.cache.set_labels_enabled(*enabled),
            Step::Wait => self.settle().await,
        }
    }

    /// Feeds completions into the cache until nothing is pending or the
    /// settle timeout expires.
    pub async fn settle(&mut self) {
        let deadline = Instant::now() + self.settle_timeout;
        while self.cache.pending_count() > 0 {
            match tokio::time::timeout_at(deadline, self.completions.recv()).await {
                Ok(Some(fetched)) => {
                    self.deliver(fetched);
                }
                Ok(None) => break,
                Err(_) => {
                    self.timed_out += 1;
                    warn!(pending = self.cache.pending_count(), "timed out waiting for fetches");
                    break;
                }
            }
        }
    }

    pub fn deliver(&mut self, fetched: Fetched) -> Resolution {
        let Fetched { ticket, result } = fetched;
        let completion = Completion { ticket, result };
        match ticket.stream {
            Stream::Base => self.cache.resolve(completion),
            Stream::Labels => self.cache.resolve_labels(completion),
        }
    }

    pub fn summary(&self, steps: usize) -> ReplaySummary {
        ReplaySummary {
            steps,
            level: self.cache.current_level(),
            resident: self.cache.len(),
            pending: self.cache.pending_count(),
            timed_out: self.timed_out,
            stats: self.cache.stats(),
            sink: self.sink.summary(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use foundation::Aabb2;
    use pretty_assertions::assert_eq;
    use streaming::{NodeStatus, TileAddress, TileCacheConfig};
    use tokio::runtime::Handle;

    use super::Replay;
    use crate::script::Script;
    use crate::source::FilesystemSource;

    fn write_level(root: &Path, level: u8, labels: bool) {
        let n = 1u32 << level;
        for x in 0..n {
            let dir = root.join(level.to_string()).join(x.to_string());
            std::fs::create_dir_all(&dir).unwrap();
            for y in 0..n {
                std::fs::write(dir.join(format!("{y}.pbf")), format!("{level}/{x}/{y}")).unwrap();
                if labels {
                    std::fs::write(dir.join(format!("{y}.labels.json")), b"[]").unwrap();
                }
            }
        }
    }

    fn replay(root: &Path, labels_enabled: bool) -> Replay {
        let config = TileCacheConfig {
            labels_enabled,
            ..TileCacheConfig::with_root_bounds(Aabb2::from_extent(0.0, 0.0, 1024.0, 1024.0))
        };
        Replay::new(
            config,
            Arc::new(FilesystemSource::new(root, "pbf")),
            Handle::current(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn pan_then_zoom_over_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        write_level(dir.path(), 2, false);
        write_level(dir.path(), 3, false);

        let script = Script::from_json(
            r#"{"steps": [
                {"op": "sync", "bounds": {"min": [0, 0], "max": [768, 256]}, "scale": 1.0},
                {"op": "sync", "bounds": {"min": [128, 0], "max": [896, 256]}, "scale": 1.0},
                {"op": "sync", "bounds": {"min": [0, 0], "max": [256, 256]}, "scale": 2.0}
            ]}"#,
        )
        .unwrap();

        let mut replay = replay(dir.path(), false);
        let summary = replay.run(&script).await;

        assert_eq!(summary.level, Some(3));
        assert_eq!(summary.pending, 0);
        assert_eq!(summary.timed_out, 0);
        // 3 + 1 tiles at level 2, then 2x2 at level 3.
        assert_eq!(summary.stats.fetches_issued, 8);
        assert_eq!(summary.stats.loaded, 8);
        assert_eq!(summary.stats.refreshes, 1);
        assert_eq!(summary.sink.evicted, 4);
        // 3 on the first sync, 4 on the pan (3 replays + 1 new), 4 after the zoom.
        assert_eq!(summary.sink.ready, 11);
        assert_eq!(summary.sink.fetch_done, 3);
        assert_eq!(summary.resident, 4);
    }

    #[tokio::test]
    async fn missing_tiles_are_evicted_as_failures() {
        let dir = tempfile::tempdir().unwrap();
        let script = Script::from_json(
            r#"{"steps": [
                {"op": "sync", "bounds": {"min": [0, 0], "max": [100, 100]}, "scale": 1.0}
            ]}"#,
        )
        .unwrap();

        let mut replay = replay(dir.path(), false);
        let summary = replay.run(&script).await;
        assert_eq!(summary.stats.fetches_failed, 1);
        assert_eq!(summary.resident, 0);
        assert_eq!(summary.sink.evicted, 1);
        assert_eq!(summary.sink.ready, 0);
    }

    #[tokio::test]
    async fn labels_toggle_and_cancel_steps() {
        let dir = tempfile::tempdir().unwrap();
        write_level(dir.path(), 2, true);

        let script = Script::from_json(
            r#"{"steps": [
                {"op": "sync", "bounds": {"min": [0, 0], "max": [100, 100]}, "scale": 1.0},
                {"op": "labels", "enabled": false},
                {"op": "sync", "bounds": {"min": [300, 0], "max": [400, 100]}, "scale": 1.0, "wait": false},
                {"op": "cancel", "address": "2-1-0"},
                {"op": "wait"}
            ]}"#,
        )
        .unwrap();

        let mut replay = replay(dir.path(), true);
        let summary = replay.run(&script).await;

        assert_eq!(summary.sink.labels_ready, 1);
        assert_eq!(summary.sink.labels_evicted, 1);
        assert_eq!(summary.pending, 0);
        assert_eq!(summary.resident, 1);
        assert_eq!(
            replay.cache().status(&TileAddress::new(2, 0, 0)),
            Some(NodeStatus::Loaded)
        );
        assert_eq!(replay.cache().status(&TileAddress::new(2, 1, 0)), None);
    }
}
