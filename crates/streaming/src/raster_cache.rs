use std::collections::BTreeMap;
use std::rc::Rc;

use foundation::Aabb2;
use tracing::{debug, trace, warn};

use crate::config::{RasterCacheConfig, scale_changed};
use crate::error::{ConfigError, FetchError};
use crate::metrics::CacheStats;
use crate::request::{FetchHandle, Generation, RasterRequest};
use crate::transport::RasterTransport;

/// One image of a raster batch.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterImage<P> {
    /// Group the image belongs to; `None` means the response's own group.
    pub group: Option<String>,
    pub bounds: Aabb2,
    pub payload: P,
}

/// Decoded answer to a [`RasterRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct RasterResponse<P> {
    /// Group produced for the request; it becomes the active one.
    pub group: String,
    pub images: Vec<RasterImage<P>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RasterCompletion<P> {
    pub generation: Generation,
    pub result: Result<RasterResponse<P>, FetchError>,
}

impl<P> RasterCompletion<P> {
    pub fn ok(generation: Generation, response: RasterResponse<P>) -> Self {
        Self {
            generation,
            result: Ok(response),
        }
    }

    pub fn err(generation: Generation, err: FetchError) -> Self {
        Self {
            generation,
            result: Err(err),
        }
    }
}

/// A named set of images shown or hidden together.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterGroup<P> {
    id: String,
    images: Vec<RasterImage<P>>,
    active: bool,
    generation: Generation,
}

impl<P> RasterGroup<P> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn images(&self) -> &[RasterImage<P>] {
        &self.images
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Batch that last delivered this group.
    pub fn generation(&self) -> Generation {
        self.generation
    }
}

pub trait RasterSink<P> {
    /// Called for every resident group after each successful batch, with its
    /// current visibility.
    fn on_ready(&self, group: &RasterGroup<P>);

    fn on_evict(&self, group: &RasterGroup<P>);

    fn on_fetch_done(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterSyncReport {
    pub generation: Generation,
    /// Every group was evicted before issuing the new batch.
    pub refreshed: bool,
    /// A previous batch was still in flight and got cancelled.
    pub superseded: bool,
    pub evicted: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RasterResolution {
    Loaded { groups: usize },
    Failed(FetchError),
    /// Not the latest issued batch.
    Stale,
}

/// Whole-viewport raster batches grouped by id, one group active at a time.
///
/// Unlike [`crate::TileCache`] there is no per-cell reuse: every sync issues
/// a single request for the visible area and supersedes any batch in flight.
pub struct RasterCache<P> {
    config: RasterCacheConfig,
    transport: Box<dyn RasterTransport>,
    sink: Option<Rc<dyn RasterSink<P>>>,
    groups: BTreeMap<String, RasterGroup<P>>,
    in_flight: Option<(Generation, FetchHandle)>,
    last_scale: Option<f64>,
    invalidated: bool,
    next_generation: u64,
    stats: CacheStats,
}

impl<P: 'static> RasterCache<P> {
    pub fn new(
        config: RasterCacheConfig,
        transport: Box<dyn RasterTransport>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            transport,
            sink: None,
            groups: BTreeMap::new(),
            in_flight: None,
            last_scale: None,
            invalidated: false,
            next_generation: 0,
            stats: CacheStats::new(),
        })
    }

    pub fn config(&self) -> &RasterCacheConfig {
        &self.config
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn is_pending(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn group(&self, id: &str) -> Option<&RasterGroup<P>> {
        self.groups.get(id)
    }

    /// Groups ordered by id.
    pub fn groups(&self) -> impl Iterator<Item = &RasterGroup<P>> + '_ {
        self.groups.values()
    }

    pub fn active_group(&self) -> Option<&RasterGroup<P>> {
        self.groups.values().find(|g| g.active)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn invalidate(&mut self) {
        self.invalidated = true;
    }

    /// Requests one batch for `bounds` at `scale`.
    ///
    /// A pan keeps the current groups visible until the new batch lands; a
    /// scale change or invalidation evicts them first.
    pub fn sync(
        &mut self,
        bounds: Aabb2,
        scale: f64,
        sink: &Rc<dyn RasterSink<P>>,
    ) -> RasterSyncReport {
        self.stats.syncs += 1;
        self.sink = Some(Rc::clone(sink));

        let superseded = match self.in_flight.take() {
            Some((generation, handle)) => {
                self.transport.cancel(handle);
                self.stats.fetches_cancelled += 1;
                trace!(generation = generation.0, "raster batch superseded");
                true
            }
            None => false,
        };

        let refreshed = match self.last_scale {
            Some(last) => {
                self.invalidated || scale_changed(last, scale, self.config.scale_epsilon)
            }
            None => false,
        };
        let evicted = if refreshed {
            self.stats.refreshes += 1;
            self.evict_all()
        } else {
            0
        };
        self.last_scale = Some(scale);
        self.invalidated = false;

        self.next_generation += 1;
        let generation = Generation(self.next_generation);
        let handle = self.transport.issue(RasterRequest {
            generation,
            bounds,
            scale,
        });
        self.in_flight = Some((generation, handle));
        self.stats.fetches_issued += 1;
        debug!(generation = generation.0, refreshed, superseded, "raster batch issued");

        RasterSyncReport {
            generation,
            refreshed,
            superseded,
            evicted,
        }
    }

    pub fn resolve(&mut self, completion: RasterCompletion<P>) -> RasterResolution {
        let RasterCompletion { generation, result } = completion;
        match self.in_flight {
            Some((latest, _)) if latest == generation => {}
            _ => {
                self.stats.stale_dropped += 1;
                debug!(generation = generation.0, "dropping stale raster batch");
                return RasterResolution::Stale;
            }
        }
        self.in_flight = None;

        let response = match result {
            Ok(response) => response,
            Err(err) => {
                self.stats.fetches_failed += 1;
                warn!(generation = generation.0, "raster fetch failed: {err}");
                if let Some(sink) = &self.sink {
                    sink.on_fetch_done();
                }
                return RasterResolution::Failed(err);
            }
        };

        let active = response.group;
        let mut batches: BTreeMap<String, Vec<RasterImage<P>>> = BTreeMap::new();
        batches.insert(active.clone(), Vec::new());
        for image in response.images {
            let id = image.group.clone().unwrap_or_else(|| active.clone());
            batches.entry(id).or_default().push(image);
        }

        for (id, images) in batches {
            let group = RasterGroup {
                id: id.clone(),
                images,
                active: false,
                generation,
            };
            if let Some(old) = self.groups.insert(id, group) {
                self.report_evicted(&old);
            }
        }
        for group in self.groups.values_mut() {
            group.active = group.id == active;
        }
        self.trim_inactive();

        self.stats.loaded += 1;
        if let Some(sink) = &self.sink {
            for group in self.groups.values() {
                sink.on_ready(group);
            }
            sink.on_fetch_done();
        }
        RasterResolution::Loaded {
            groups: self.groups.len(),
        }
    }

    /// Cancels any batch in flight and evicts every group.
    pub fn clear(&mut self) {
        if let Some((_, handle)) = self.in_flight.take() {
            self.transport.cancel(handle);
            self.stats.fetches_cancelled += 1;
        }
        self.evict_all();
        self.last_scale = None;
        self.invalidated = false;
    }

    fn trim_inactive(&mut self) {
        let mut inactive: Vec<(Generation, String)> = self
            .groups
            .values()
            .filter(|g| !g.active)
            .map(|g| (g.generation, g.id.clone()))
            .collect();
        let excess = inactive.len().saturating_sub(self.config.max_inactive_groups);
        if excess == 0 {
            return;
        }
        inactive.sort();
        for (_, id) in inactive.into_iter().take(excess) {
            if let Some(old) = self.groups.remove(&id) {
                self.report_evicted(&old);
            }
        }
    }

    fn evict_all(&mut self) -> usize {
        let groups = std::mem::take(&mut self.groups);
        let count = groups.len();
        for group in groups.values() {
            self.report_evicted(group);
        }
        count
    }

    fn report_evicted(&mut self, group: &RasterGroup<P>) {
        self.stats.evictions += 1;
        if let Some(sink) = &self.sink {
            sink.on_evict(group);
        }
    }
}
