use foundation::Aabb2;

use crate::address::TileAddress;
use crate::error::{FetchError, NodeError};
use crate::node::{CacheNode, ReadyTile, Resolution, resolve_stream};
use crate::request::{FetchHandle, FetchTicket, Filter, Generation, Stream, TileRequest};
use crate::residency::{NodeStatus, Residency};
use crate::transport::TileTransport;

/// A cache node with a second, independently fetched label stream.
///
/// Both streams share address, generation and eviction: cancelling the node
/// cancels both, so labels never outlive the cell's own data.
pub struct LabeledNode<T, L> {
    node: CacheNode<T>,
    labels: Residency<L>,
}

impl<T: 'static, L: 'static> LabeledNode<T, L> {
    pub fn new(address: TileAddress, root: &Aabb2, generation: Generation) -> Self {
        Self {
            node: CacheNode::new(address, root, generation),
            labels: Residency::new(),
        }
    }

    pub fn node(&self) -> &CacheNode<T> {
        &self.node
    }

    pub fn address(&self) -> TileAddress {
        self.node.address()
    }

    pub fn bounds(&self) -> Aabb2 {
        self.node.bounds()
    }

    pub fn generation(&self) -> Generation {
        self.node.generation()
    }

    pub fn status(&self) -> NodeStatus {
        self.node.status()
    }

    pub fn payload(&self) -> Option<&T> {
        self.node.payload()
    }

    pub fn label_status(&self) -> NodeStatus {
        self.labels.status()
    }

    pub fn labels(&self) -> Option<&L> {
        self.labels.payload()
    }

    /// Number of streams with a fetch in flight (0..=2).
    pub fn loading_streams(&self) -> usize {
        usize::from(self.node.status() == NodeStatus::Loading) + usize::from(self.labels.is_loading())
    }

    pub fn fetch(
        &mut self,
        transport: &mut dyn TileTransport,
        filter: &Filter,
        on_done: impl FnOnce(Result<ReadyTile<'_, T>, &FetchError>) + 'static,
    ) -> Result<FetchHandle, NodeError> {
        self.node.fetch(transport, filter, on_done)
    }

    pub fn fetch_labels(
        &mut self,
        transport: &mut dyn TileTransport,
        filter: &Filter,
        on_done: impl FnOnce(Result<ReadyTile<'_, L>, &FetchError>) + 'static,
    ) -> Result<FetchHandle, NodeError> {
        let status = self.labels.status();
        if status != NodeStatus::Empty {
            return Err(NodeError::NotEmpty { status });
        }
        let ticket = self.node.ticket(Stream::Labels, self.labels.next_attempt());
        let handle = transport.issue(TileRequest {
            ticket,
            bounds: self.bounds(),
            filter: filter.clone(),
        });
        let (address, bounds) = (self.address(), self.bounds());
        self.labels.begin(
            ticket.attempt,
            handle,
            Box::new(move |res: Result<&L, &FetchError>| {
                on_done(res.map(|payload| ReadyTile {
                    address,
                    bounds,
                    payload,
                }))
            }),
        )?;
        Ok(handle)
    }

    pub fn apply(&mut self, callback: impl FnOnce(ReadyTile<'_, T>) + 'static) -> bool {
        self.node.apply(callback)
    }

    pub fn apply_labels(&mut self, callback: impl FnOnce(ReadyTile<'_, L>) + 'static) -> bool {
        let (address, bounds) = (self.address(), self.bounds());
        self.labels.observe(Box::new(move |payload: &L| {
            callback(ReadyTile {
                address,
                bounds,
                payload,
            })
        }))
    }

    /// Cancels both streams. Returns how many fetches were aborted.
    pub fn cancel(&mut self, transport: &mut dyn TileTransport) -> usize {
        let labels = self.cancel_labels(transport);
        usize::from(self.node.cancel(transport)) + usize::from(labels)
    }

    /// Cancels and forgets the label stream only, leaving it `Empty`.
    ///
    /// Returns the label status before clearing.
    pub fn clear_labels(&mut self, transport: &mut dyn TileTransport) -> NodeStatus {
        let before = self.labels.status();
        self.cancel_labels(transport);
        self.labels.reset();
        before
    }

    fn cancel_labels(&mut self, transport: &mut dyn TileTransport) -> bool {
        match self.labels.abort(&FetchError::Cancelled) {
            Some(handle) => {
                transport.cancel(handle);
                true
            }
            None => false,
        }
    }

    pub fn resolve(&mut self, ticket: &FetchTicket, result: Result<T, FetchError>) -> Resolution {
        self.node.resolve(ticket, result)
    }

    pub fn resolve_labels(
        &mut self,
        ticket: &FetchTicket,
        result: Result<L, FetchError>,
    ) -> Resolution {
        if ticket.generation != self.generation()
            || ticket.address != self.address()
            || ticket.stream != Stream::Labels
        {
            return Resolution::Stale;
        }
        resolve_stream(&mut self.labels, ticket.attempt, result)
    }
}

impl<T: std::fmt::Debug, L: std::fmt::Debug> std::fmt::Debug for LabeledNode<T, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LabeledNode")
            .field("node", &self.node)
            .field("labels", &self.labels)
            .finish()
    }
}
