//! Recording doubles shared by the unit tests.

use std::cell::RefCell;
use std::rc::Rc;

use crate::address::TileAddress;
use crate::node::ReadyTile;
use crate::raster_cache::{RasterGroup, RasterSink};
use crate::request::{FetchHandle, FetchTicket, RasterRequest, Stream, TileRequest};
use crate::tile_cache::{EvictReason, EvictedTile, TileSink};
use crate::transport::{RasterTransport, TileTransport};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Issued(TileRequest),
    RasterIssued(RasterRequest),
    Cancelled(FetchHandle),
    Ready(TileAddress, u32),
    LabelsReady(TileAddress, String),
    Evicted(TileAddress, EvictReason),
    LabelsEvicted(TileAddress),
    RasterReady {
        group: String,
        active: bool,
        images: usize,
    },
    RasterEvicted(String),
    FetchDone,
}

/// Ordered log shared between a transport and a sink.
#[derive(Debug, Clone, Default)]
pub struct Journal(Rc<RefCell<Vec<(Event, Option<FetchHandle>)>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: Event) {
        self.0.borrow_mut().push((event, None));
    }

    fn push_issued(&self, event: Event, handle: FetchHandle) {
        self.0.borrow_mut().push((event, Some(handle)));
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.borrow().iter().map(|(e, _)| e.clone()).collect()
    }

    pub fn requests(&self) -> Vec<TileRequest> {
        self.0
            .borrow()
            .iter()
            .filter_map(|(e, _)| match e {
                Event::Issued(req) => Some(req.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn raster_requests(&self) -> Vec<RasterRequest> {
        self.0
            .borrow()
            .iter()
            .filter_map(|(e, _)| match e {
                Event::RasterIssued(req) => Some(req.clone()),
                _ => None,
            })
            .collect()
    }

    /// Latest ticket issued for `address` on `stream`.
    pub fn ticket(&self, address: TileAddress, stream: Stream) -> Option<FetchTicket> {
        self.latest_issue(address, stream).map(|(ticket, _)| ticket)
    }

    /// Handle of the latest fetch issued for `address` on `stream`.
    pub fn handle(&self, address: TileAddress, stream: Stream) -> Option<FetchHandle> {
        self.latest_issue(address, stream).map(|(_, handle)| handle)
    }

    fn latest_issue(&self, address: TileAddress, stream: Stream) -> Option<(FetchTicket, FetchHandle)> {
        self.0.borrow().iter().rev().find_map(|(e, handle)| match (e, handle) {
            (Event::Issued(req), Some(handle))
                if req.ticket.address == address && req.ticket.stream == stream =>
            {
                Some((req.ticket, *handle))
            }
            _ => None,
        })
    }

    pub fn cancelled(&self) -> Vec<FetchHandle> {
        self.0
            .borrow()
            .iter()
            .filter_map(|(e, _)| match e {
                Event::Cancelled(handle) => Some(*handle),
                _ => None,
            })
            .collect()
    }

    pub fn ready(&self) -> Vec<(TileAddress, u32)> {
        self.0
            .borrow()
            .iter()
            .filter_map(|(e, _)| match e {
                Event::Ready(address, payload) => Some((*address, *payload)),
                _ => None,
            })
            .collect()
    }

    pub fn evicted(&self) -> Vec<(TileAddress, EvictReason)> {
        self.0
            .borrow()
            .iter()
            .filter_map(|(e, _)| match e {
                Event::Evicted(address, reason) => Some((*address, *reason)),
                _ => None,
            })
            .collect()
    }

    pub fn fetch_done_count(&self) -> usize {
        self.0
            .borrow()
            .iter()
            .filter(|(e, _)| *e == Event::FetchDone)
            .count()
    }
}

/// Hands out sequential handles and records every issue and cancel.
pub struct RecordingTransport {
    journal: Journal,
    next_handle: u64,
}

impl RecordingTransport {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            next_handle: 0,
        }
    }

    pub fn boxed(journal: &Journal) -> Box<Self> {
        Box::new(Self::new(journal))
    }

    fn next(&mut self) -> FetchHandle {
        self.next_handle += 1;
        FetchHandle(self.next_handle)
    }
}

impl TileTransport for RecordingTransport {
    fn issue(&mut self, request: TileRequest) -> FetchHandle {
        let handle = self.next();
        self.journal.push_issued(Event::Issued(request), handle);
        handle
    }

    fn cancel(&mut self, handle: FetchHandle) {
        self.journal.push(Event::Cancelled(handle));
    }
}

impl RasterTransport for RecordingTransport {
    fn issue(&mut self, request: RasterRequest) -> FetchHandle {
        let handle = self.next();
        self.journal.push_issued(Event::RasterIssued(request), handle);
        handle
    }

    fn cancel(&mut self, handle: FetchHandle) {
        self.journal.push(Event::Cancelled(handle));
    }
}

pub struct RecordingSink {
    journal: Journal,
}

impl RecordingSink {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
        }
    }
}

impl TileSink<u32, String> for RecordingSink {
    fn on_ready(&self, tile: ReadyTile<'_, u32>) {
        self.journal.push(Event::Ready(tile.address, *tile.payload));
    }

    fn on_labels_ready(&self, tile: ReadyTile<'_, String>) {
        self.journal
            .push(Event::LabelsReady(tile.address, tile.payload.clone()));
    }

    fn on_evict(&self, tile: &EvictedTile) {
        self.journal.push(Event::Evicted(tile.address, tile.reason));
    }

    fn on_labels_evict(&self, address: TileAddress) {
        self.journal.push(Event::LabelsEvicted(address));
    }

    fn on_fetch_done(&self) {
        self.journal.push(Event::FetchDone);
    }
}

impl RasterSink<u32> for RecordingSink {
    fn on_ready(&self, group: &RasterGroup<u32>) {
        self.journal.push(Event::RasterReady {
            group: group.id().to_string(),
            active: group.is_active(),
            images: group.images().len(),
        });
    }

    fn on_evict(&self, group: &RasterGroup<u32>) {
        self.journal.push(Event::RasterEvicted(group.id().to_string()));
    }

    fn on_fetch_done(&self) {
        self.journal.push(Event::FetchDone);
    }
}
