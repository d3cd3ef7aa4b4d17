use std::collections::BTreeMap;
use std::rc::Rc;

use foundation::Aabb2;
use tracing::{debug, trace, warn};

use crate::address::{TileAddress, TileRange};
use crate::config::{TileCacheConfig, scale_changed};
use crate::error::ConfigError;
use crate::labeled::LabeledNode;
use crate::metrics::CacheStats;
use crate::node::{ReadyTile, Resolution};
use crate::request::{Completion, Filter, Generation, Stream};
use crate::residency::NodeStatus;
use crate::transport::TileTransport;

/// Receives residency changes from a [`TileCache`].
///
/// Calls may arrive in any order across tiles. Within one sync pass each
/// required tile is reported ready once, either during the sync (already
/// loaded) or later from [`TileCache::resolve`].
pub trait TileSink<T, L = ()> {
    fn on_ready(&self, tile: ReadyTile<'_, T>);

    fn on_labels_ready(&self, _tile: ReadyTile<'_, L>) {}

    fn on_evict(&self, tile: &EvictedTile);

    /// Labels of a still-resident tile were dropped (labels disabled). Only
    /// sent for labels previously delivered through `on_labels_ready`.
    fn on_labels_evict(&self, _address: TileAddress) {}

    /// No fetches are outstanding anymore.
    fn on_fetch_done(&self) {}
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EvictReason {
    /// Scale, filter or level changed, or the cache was invalidated.
    Refresh,
    /// The owner cancelled the node's fetch.
    Cancelled,
    FetchFailed,
    /// Dropped to stay within `max_resident`.
    Trimmed,
    Cleared,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct EvictedTile {
    pub address: TileAddress,
    pub bounds: Aabb2,
    /// Status of the base stream at the moment of eviction.
    pub status: NodeStatus,
    pub reason: EvictReason,
}

/// Summary of one [`TileCache::sync`] pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub level: u8,
    /// Every resident node was evicted before reconciling.
    pub refreshed: bool,
    pub required: usize,
    /// Nodes created (and fetched) by this pass.
    pub fetched: usize,
    /// Required nodes that were already resident or loading.
    pub replayed: usize,
    pub evicted: usize,
    /// Fetches still outstanding when the pass returned.
    pub pending: usize,
}

struct Entry<T, L> {
    node: LabeledNode<T, L>,
    /// Tick of the last sync that required this node.
    last_required: u64,
}

/// Viewport-driven cache of `(level, x, y)` tiles with incremental reuse.
///
/// Pans keep resident nodes and only fetch what is missing; any change of
/// scale, filter or level discards everything first. Completions are fed back
/// through [`TileCache::resolve`] / [`TileCache::resolve_labels`]; those that
/// no longer match a live node generation are dropped.
pub struct TileCache<T, L = ()> {
    config: TileCacheConfig,
    transport: Box<dyn TileTransport>,
    sink: Option<Rc<dyn TileSink<T, L>>>,
    nodes: BTreeMap<TileAddress, Entry<T, L>>,
    current_level: Option<u8>,
    last_scale: Option<f64>,
    last_filter: Option<Filter>,
    invalidated: bool,
    labels_enabled: bool,
    pending: usize,
    next_generation: u64,
    tick: u64,
    stats: CacheStats,
}

impl<T: 'static, L: 'static> TileCache<T, L> {
    pub fn new(
        config: TileCacheConfig,
        transport: Box<dyn TileTransport>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            labels_enabled: config.labels_enabled,
            config,
            transport,
            sink: None,
            nodes: BTreeMap::new(),
            current_level: None,
            last_scale: None,
            last_filter: None,
            invalidated: false,
            pending: 0,
            next_generation: 0,
            tick: 0,
            stats: CacheStats::new(),
        })
    }

    pub fn config(&self) -> &TileCacheConfig {
        &self.config
    }

    pub fn current_level(&self) -> Option<u8> {
        self.current_level
    }

    /// Fetches in flight, base and label streams combined.
    pub fn pending_count(&self) -> usize {
        self.pending
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn labels_enabled(&self) -> bool {
        self.labels_enabled
    }

    pub fn node(&self, address: &TileAddress) -> Option<&LabeledNode<T, L>> {
        self.nodes.get(address).map(|e| &e.node)
    }

    pub fn status(&self, address: &TileAddress) -> Option<NodeStatus> {
        self.node(address).map(|n| n.status())
    }

    /// Resident addresses in ascending order.
    pub fn addresses(&self) -> impl Iterator<Item = TileAddress> + '_ {
        self.nodes.keys().copied()
    }

    /// Forces the next [`TileCache::sync`] to evict every resident node.
    pub fn invalidate(&mut self) {
        self.invalidated = true;
    }

    /// Reconciles resident nodes against the viewport `bounds` at `scale`.
    pub fn sync(
        &mut self,
        bounds: Aabb2,
        scale: f64,
        filter: &Filter,
        sink: &Rc<dyn TileSink<T, L>>,
    ) -> SyncReport {
        self.tick += 1;
        self.stats.syncs += 1;
        self.sink = Some(Rc::clone(sink));

        let root = self.config.root_bounds;
        // A scale within epsilon of the last one keeps its level, so jitter
        // across a level boundary stays a pan.
        let level = match (self.current_level, self.last_scale) {
            (Some(level), Some(last))
                if !scale_changed(last, scale, self.config.scale_epsilon) =>
            {
                level
            }
            _ => self.config.lod.level_for_scale(scale, &root),
        };
        let refreshed = self.needs_refresh(level, scale, filter);
        let mut report = SyncReport {
            level,
            refreshed,
            ..SyncReport::default()
        };

        if refreshed {
            report.evicted = self.evict_all(EvictReason::Refresh);
            self.stats.refreshes += 1;
            debug!(level, evicted = report.evicted, "tile cache refresh");
        }

        self.current_level = Some(level);
        if refreshed || self.last_scale.is_none() {
            self.last_scale = Some(scale);
        }
        if self.last_filter.as_ref() != Some(filter) {
            self.last_filter = Some(filter.clone());
        }
        self.invalidated = false;

        let range = TileRange::covering(&bounds, level, &root)
            .map(|r| r.expanded(self.config.neighbor_margin));

        if let Some(range) = range {
            for address in range.iter() {
                report.required += 1;
                if self.nodes.contains_key(&address) {
                    self.replay(address, filter, sink);
                    report.replayed += 1;
                } else {
                    self.create(address, filter, sink);
                    report.fetched += 1;
                }
            }
            report.evicted += self.trim(&range);
        }

        report.pending = self.pending;
        trace!(
            level,
            required = report.required,
            fetched = report.fetched,
            replayed = report.replayed,
            pending = report.pending,
            "tile cache sync"
        );

        if self.pending == 0 {
            sink.on_fetch_done();
        }
        report
    }

    /// Feeds a base-stream completion back into the cache.
    pub fn resolve(&mut self, completion: Completion<T>) -> Resolution {
        let Completion { ticket, result } = completion;
        let resolution = match self.nodes.get_mut(&ticket.address) {
            Some(entry) if entry.node.generation() == ticket.generation => {
                entry.node.resolve(&ticket, result)
            }
            _ => Resolution::Stale,
        };
        self.finish_resolution(ticket.address, ticket.generation, Stream::Base, resolution)
    }

    /// Feeds a label-stream completion back into the cache.
    pub fn resolve_labels(&mut self, completion: Completion<L>) -> Resolution {
        let Completion { ticket, result } = completion;
        let resolution = match self.nodes.get_mut(&ticket.address) {
            Some(entry) if entry.node.generation() == ticket.generation => {
                entry.node.resolve_labels(&ticket, result)
            }
            _ => Resolution::Stale,
        };
        self.finish_resolution(ticket.address, ticket.generation, Stream::Labels, resolution)
    }

    /// Cancels the in-flight fetches of `address` and evicts it.
    ///
    /// Returns `false` if the node is absent or has nothing in flight.
    pub fn cancel(&mut self, address: &TileAddress) -> bool {
        let loading = self
            .nodes
            .get(address)
            .map(|e| e.node.loading_streams() > 0)
            .unwrap_or(false);
        if !loading {
            return false;
        }
        self.evict(*address, EvictReason::Cancelled);
        self.settle();
        true
    }

    /// Evicts everything and forgets the current level, scale and filter.
    pub fn clear(&mut self) {
        let had_pending = self.pending > 0;
        self.evict_all(EvictReason::Cleared);
        self.current_level = None;
        self.last_scale = None;
        self.last_filter = None;
        self.invalidated = false;
        if had_pending {
            self.settle();
        }
    }

    /// Turns the label stream on or off for the whole cache.
    ///
    /// Disabling drops labels from every node right away; enabling takes
    /// effect on the next sync.
    pub fn set_labels_enabled(&mut self, enabled: bool) {
        if self.labels_enabled == enabled {
            return;
        }
        self.labels_enabled = enabled;
        if enabled {
            return;
        }

        let had_pending = self.pending > 0;
        for (address, entry) in self.nodes.iter_mut() {
            let before = entry.node.clear_labels(self.transport.as_mut());
            if before == NodeStatus::Loading {
                self.pending = self.pending.saturating_sub(1);
                self.stats.fetches_cancelled += 1;
            }
            if before == NodeStatus::Loaded
                && let Some(sink) = &self.sink
            {
                sink.on_labels_evict(*address);
            }
        }
        if had_pending {
            self.settle();
        }
    }

    fn needs_refresh(&self, level: u8, scale: f64, filter: &Filter) -> bool {
        if self.current_level.is_none() {
            return false;
        }
        self.invalidated
            || self.current_level != Some(level)
            || self
                .last_scale
                .is_none_or(|s| scale_changed(s, scale, self.config.scale_epsilon))
            || self.last_filter.as_ref() != Some(filter)
    }

    fn create(&mut self, address: TileAddress, filter: &Filter, sink: &Rc<dyn TileSink<T, L>>) {
        self.next_generation += 1;
        let generation = Generation(self.next_generation);
        let mut node = LabeledNode::new(address, &self.config.root_bounds, generation);

        let s = Rc::clone(sink);
        let issued = node.fetch(self.transport.as_mut(), filter, move |res| {
            if let Ok(tile) = res {
                s.on_ready(tile);
            }
        });
        if issued.is_ok() {
            self.pending += 1;
            self.stats.fetches_issued += 1;
        }

        if self.labels_enabled {
            let s = Rc::clone(sink);
            let issued = node.fetch_labels(self.transport.as_mut(), filter, move |res| {
                if let Ok(tile) = res {
                    s.on_labels_ready(tile);
                }
            });
            if issued.is_ok() {
                self.pending += 1;
                self.stats.fetches_issued += 1;
            }
        }

        trace!(%address, generation = generation.0, "tile fetch issued");
        self.nodes.insert(
            address,
            Entry {
                node,
                last_required: self.tick,
            },
        );
    }

    fn replay(&mut self, address: TileAddress, filter: &Filter, sink: &Rc<dyn TileSink<T, L>>) {
        let Some(entry) = self.nodes.get_mut(&address) else {
            return;
        };
        entry.last_required = self.tick;

        let s = Rc::clone(sink);
        if entry.node.apply(move |tile| s.on_ready(tile)) {
            self.stats.replays += 1;
        }

        if !self.labels_enabled {
            return;
        }
        if entry.node.label_status() == NodeStatus::Empty {
            let s = Rc::clone(sink);
            let issued = entry
                .node
                .fetch_labels(self.transport.as_mut(), filter, move |res| {
                    if let Ok(tile) = res {
                        s.on_labels_ready(tile);
                    }
                });
            if issued.is_ok() {
                self.pending += 1;
                self.stats.fetches_issued += 1;
            }
        } else {
            let s = Rc::clone(sink);
            entry.node.apply_labels(move |tile| s.on_labels_ready(tile));
        }
    }

    fn finish_resolution(
        &mut self,
        address: TileAddress,
        generation: Generation,
        stream: Stream,
        resolution: Resolution,
    ) -> Resolution {
        match &resolution {
            Resolution::Stale => {
                self.stats.stale_dropped += 1;
                debug!(%address, generation = generation.0, ?stream, "dropping stale completion");
            }
            Resolution::Loaded => {
                self.pending = self.pending.saturating_sub(1);
                self.stats.loaded += 1;
                self.settle();
            }
            Resolution::Failed(err) => {
                self.pending = self.pending.saturating_sub(1);
                self.stats.fetches_failed += 1;
                warn!(%address, ?stream, "tile fetch failed: {err}");
                self.evict(address, EvictReason::FetchFailed);
                self.settle();
            }
        }
        resolution
    }

    fn evict(&mut self, address: TileAddress, reason: EvictReason) -> bool {
        let Some(mut entry) = self.nodes.remove(&address) else {
            return false;
        };
        self.discard(&mut entry, reason);
        true
    }

    fn evict_all(&mut self, reason: EvictReason) -> usize {
        let nodes = std::mem::take(&mut self.nodes);
        let count = nodes.len();
        for (_, mut entry) in nodes {
            self.discard(&mut entry, reason);
        }
        debug_assert_eq!(self.pending, 0, "pending fetches left after evicting every node");
        self.pending = 0;
        count
    }

    /// Cancels whatever is in flight for a node already removed from the map
    /// and reports it to the sink.
    fn discard(&mut self, entry: &mut Entry<T, L>, reason: EvictReason) {
        let status = entry.node.status();
        let cancelled = entry.node.cancel(self.transport.as_mut());
        self.pending = self.pending.saturating_sub(cancelled);
        self.stats.fetches_cancelled += cancelled as u64;
        self.stats.evictions += 1;
        if let Some(sink) = &self.sink {
            sink.on_evict(&EvictedTile {
                address: entry.node.address(),
                bounds: entry.node.bounds(),
                status,
                reason,
            });
        }
    }

    /// Evicts off-view nodes, least recently required first, down to `max_resident`.
    fn trim(&mut self, required: &TileRange) -> usize {
        let Some(max) = self.config.max_resident else {
            return 0;
        };
        let excess = self.nodes.len().saturating_sub(max);
        if excess == 0 {
            return 0;
        }

        let mut candidates: Vec<(u64, TileAddress)> = self
            .nodes
            .iter()
            .filter(|(address, _)| !required.contains(address))
            .map(|(address, e)| (e.last_required, *address))
            .collect();
        candidates.sort();

        let mut evicted = 0;
        for (_, address) in candidates.into_iter().take(excess) {
            if self.evict(address, EvictReason::Trimmed) {
                evicted += 1;
            }
        }
        if evicted > 0 {
            debug!(evicted, resident = self.nodes.len(), "trimmed off-view tiles");
        }
        evicted
    }

    fn settle(&self) {
        if self.pending == 0
            && let Some(sink) = &self.sink
        {
            sink.on_fetch_done();
        }
    }
}
