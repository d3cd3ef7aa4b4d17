use foundation::Aabb2;

use crate::address::TileAddress;
use crate::error::{FetchError, NodeError};
use crate::request::{FetchHandle, FetchTicket, Filter, Generation, Stream, TileRequest};
use crate::residency::{NodeStatus, Residency};
use crate::transport::TileTransport;

/// A resident (or loading) payload together with where it lives.
#[derive(Debug)]
pub struct ReadyTile<'a, P> {
    pub address: TileAddress,
    pub bounds: Aabb2,
    pub payload: &'a P,
}

/// Outcome of feeding a completion to a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Loaded,
    Failed(FetchError),
    /// The completion belongs to another generation or the stream is not
    /// loading anymore. Nothing was changed.
    Stale,
}

/// One addressable cache slot.
pub struct CacheNode<T> {
    address: TileAddress,
    bounds: Aabb2,
    generation: Generation,
    residency: Residency<T>,
}

impl<T: 'static> CacheNode<T> {
    pub fn new(address: TileAddress, root: &Aabb2, generation: Generation) -> Self {
        Self {
            address,
            bounds: address.bounds(root),
            generation,
            residency: Residency::new(),
        }
    }

    pub fn address(&self) -> TileAddress {
        self.address
    }

    pub fn bounds(&self) -> Aabb2 {
        self.bounds
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn status(&self) -> NodeStatus {
        self.residency.status()
    }

    pub fn payload(&self) -> Option<&T> {
        self.residency.payload()
    }

    pub fn pending_fetch(&self) -> Option<FetchHandle> {
        self.residency.handle()
    }

    pub(crate) fn ticket(&self, stream: Stream, attempt: u32) -> FetchTicket {
        FetchTicket {
            address: self.address,
            generation: self.generation,
            stream,
            attempt,
        }
    }

    /// Issues the base fetch. `on_done` runs exactly once, with the payload
    /// or with the error/cancellation that ended the fetch.
    pub fn fetch(
        &mut self,
        transport: &mut dyn TileTransport,
        filter: &Filter,
        on_done: impl FnOnce(Result<ReadyTile<'_, T>, &FetchError>) + 'static,
    ) -> Result<FetchHandle, NodeError> {
        let status = self.status();
        if status != NodeStatus::Empty {
            return Err(NodeError::NotEmpty { status });
        }
        let ticket = self.ticket(Stream::Base, self.residency.next_attempt());
        let handle = transport.issue(TileRequest {
            ticket,
            bounds: self.bounds,
            filter: filter.clone(),
        });
        let (address, bounds) = (self.address, self.bounds);
        self.residency.begin(
            ticket.attempt,
            handle,
            Box::new(move |res: Result<&T, &FetchError>| {
                on_done(res.map(|payload| ReadyTile {
                    address,
                    bounds,
                    payload,
                }))
            }),
        )?;
        Ok(handle)
    }

    /// Cancels an in-flight fetch. Returns `false` (and does nothing) when
    /// the node is not loading.
    pub fn cancel(&mut self, transport: &mut dyn TileTransport) -> bool {
        match self.residency.abort(&FetchError::Cancelled) {
            Some(handle) => {
                transport.cancel(handle);
                true
            }
            None => false,
        }
    }

    /// Observes the payload: immediately when loaded, on completion when
    /// loading. Returns `false` if the node has nothing to observe yet.
    pub fn apply(&mut self, callback: impl FnOnce(ReadyTile<'_, T>) + 'static) -> bool {
        let (address, bounds) = (self.address, self.bounds);
        self.residency.observe(Box::new(move |payload: &T| {
            callback(ReadyTile {
                address,
                bounds,
                payload,
            })
        }))
    }

    /// Applies a base-stream completion, guarded by generation.
    pub fn resolve(&mut self, ticket: &FetchTicket, result: Result<T, FetchError>) -> Resolution {
        if ticket.generation != self.generation
            || ticket.address != self.address
            || ticket.stream != Stream::Base
        {
            return Resolution::Stale;
        }
        resolve_stream(&mut self.residency, ticket.attempt, result)
    }
}

pub(crate) fn resolve_stream<P>(
    residency: &mut Residency<P>,
    attempt: u32,
    result: Result<P, FetchError>,
) -> Resolution {
    if residency.loading_attempt() != Some(attempt) {
        return Resolution::Stale;
    }
    match result {
        Ok(payload) => {
            residency.complete(payload);
            Resolution::Loaded
        }
        Err(err) => {
            residency.abort(&err);
            Resolution::Failed(err)
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for CacheNode<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheNode")
            .field("address", &self.address)
            .field("generation", &self.generation)
            .field("residency", &self.residency)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use foundation::Aabb2;

    use super::{CacheNode, Resolution};
    use crate::address::TileAddress;
    use crate::error::{FetchError, NodeError};
    use crate::request::{Filter, Generation, Stream};
    use crate::residency::NodeStatus;
    use crate::testing::{Journal, RecordingTransport};

    fn node() -> CacheNode<u32> {
        CacheNode::new(
            TileAddress::new(1, 1, 0),
            &Aabb2::from_extent(0.0, 0.0, 100.0, 100.0),
            Generation(4),
        )
    }

    #[test]
    fn fetch_issues_request_with_node_bounds() {
        let journal = Journal::new();
        let mut transport = RecordingTransport::new(&journal);
        let mut n = node();
        let handle = n.fetch(&mut transport, &Filter::default(), |_| {}).unwrap();

        assert_eq!(n.status(), NodeStatus::Loading);
        assert_eq!(n.pending_fetch(), Some(handle));
        let req = journal.requests().pop().unwrap();
        assert_eq!(req.bounds, Aabb2::from_extent(50.0, 0.0, 100.0, 50.0));
        assert_eq!(req.ticket.generation, Generation(4));
        assert_eq!(req.ticket.stream, Stream::Base);

        let err = n.fetch(&mut transport, &Filter::default(), |_| {}).unwrap_err();
        assert_eq!(err, NodeError::NotEmpty { status: NodeStatus::Loading });
    }

    #[test]
    fn on_done_runs_before_queued_observers() {
        let journal = Journal::new();
        let mut transport = RecordingTransport::new(&journal);
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut n = node();

        let o = order.clone();
        n.fetch(&mut transport, &Filter::default(), move |res| {
            o.borrow_mut().push(format!("done:{}", res.map(|t| *t.payload).unwrap_or(0)));
        })
        .unwrap();
        for i in 0..2 {
            let o = order.clone();
            assert!(n.apply(move |t| o.borrow_mut().push(format!("apply{i}:{}", t.payload))));
        }

        let ticket = journal.ticket(n.address(), Stream::Base).unwrap();
        assert_eq!(n.resolve(&ticket, Ok(11)), Resolution::Loaded);
        assert_eq!(*order.borrow(), vec!["done:11", "apply0:11", "apply1:11"]);

        let o = order.clone();
        assert!(n.apply(move |t| o.borrow_mut().push(format!("late:{}", t.address))));
        assert_eq!(order.borrow().last().unwrap(), "late:1-1-0");
    }

    #[test]
    fn cancel_reports_cancelled_and_makes_completion_stale() {
        let journal = Journal::new();
        let mut transport = RecordingTransport::new(&journal);
        let got = Rc::new(RefCell::new(None));
        let mut n = node();

        let g = got.clone();
        let handle = n
            .fetch(&mut transport, &Filter::default(), move |res| {
                *g.borrow_mut() = Some(res.map(|_| ()).map_err(|e| e.clone()));
            })
            .unwrap();

        assert!(n.cancel(&mut transport));
        assert!(!n.cancel(&mut transport));
        assert_eq!(*got.borrow(), Some(Err(FetchError::Cancelled)));
        assert_eq!(journal.cancelled(), vec![handle]);

        let ticket = journal.ticket(n.address(), Stream::Base).unwrap();
        assert_eq!(n.resolve(&ticket, Ok(1)), Resolution::Stale);
        assert_eq!(n.status(), NodeStatus::Cancelled);
    }

    #[test]
    fn completion_from_other_generation_is_stale() {
        let journal = Journal::new();
        let mut transport = RecordingTransport::new(&journal);
        let mut n = node();
        n.fetch(&mut transport, &Filter::default(), |_| {}).unwrap();

        let mut ticket = journal.ticket(n.address(), Stream::Base).unwrap();
        ticket.generation = Generation(3);
        assert_eq!(n.resolve(&ticket, Ok(5)), Resolution::Stale);
        assert_eq!(n.status(), NodeStatus::Loading);
    }

    #[test]
    fn failure_moves_to_cancelled() {
        let journal = Journal::new();
        let mut transport = RecordingTransport::new(&journal);
        let mut n = node();
        n.fetch(&mut transport, &Filter::default(), |_| {}).unwrap();
        let ticket = journal.ticket(n.address(), Stream::Base).unwrap();
        let err = FetchError::failed("503");
        assert_eq!(n.resolve(&ticket, Err(err.clone())), Resolution::Failed(err));
        assert_eq!(n.status(), NodeStatus::Cancelled);
        assert_eq!(n.payload(), None);
    }

    #[test]
    fn apply_before_fetch_is_a_noop() {
        let mut n = node();
        assert!(!n.apply(|_| panic!("nothing loaded")));
    }
}
