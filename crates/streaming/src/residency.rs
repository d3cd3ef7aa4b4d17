use crate::error::{FetchError, NodeError};
use crate::request::FetchHandle;

/// Lifecycle of one fetched stream of a cache node.
///
/// Empty → Loading → Loaded, or Loading → Cancelled on cancel/failure.
/// `Cancelled` is terminal; the owning cache drops such nodes immediately.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum NodeStatus {
    Empty,
    Loading,
    Loaded,
    Cancelled,
}

pub type Waiter<P> = Box<dyn FnOnce(&P)>;
pub type DoneCallback<P> = Box<dyn FnOnce(Result<&P, &FetchError>)>;

enum Slot<P> {
    Empty,
    Loading {
        handle: FetchHandle,
        attempt: u32,
        on_done: DoneCallback<P>,
        waiters: Vec<Waiter<P>>,
    },
    Loaded(P),
    Cancelled,
}

/// Fetch state of a single payload stream.
///
/// The payload only exists in `Loaded` and the transport handle only in
/// `Loading`; both are carried by the state itself.
pub struct Residency<P> {
    slot: Slot<P>,
    attempts: u32,
}

impl<P> Residency<P> {
    pub fn new() -> Self {
        Self {
            slot: Slot::Empty,
            attempts: 0,
        }
    }

    pub fn status(&self) -> NodeStatus {
        match self.slot {
            Slot::Empty => NodeStatus::Empty,
            Slot::Loading { .. } => NodeStatus::Loading,
            Slot::Loaded(_) => NodeStatus::Loaded,
            Slot::Cancelled => NodeStatus::Cancelled,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.slot, Slot::Loading { .. })
    }

    pub fn payload(&self) -> Option<&P> {
        match &self.slot {
            Slot::Loaded(p) => Some(p),
            _ => None,
        }
    }

    pub fn handle(&self) -> Option<FetchHandle> {
        match &self.slot {
            Slot::Loading { handle, .. } => Some(*handle),
            _ => None,
        }
    }

    /// Attempt number the next `begin` is expected to use.
    ///
    /// Attempts are never reused, even after `reset`, so a completion for an
    /// earlier attempt cannot satisfy a later one.
    pub fn next_attempt(&self) -> u32 {
        self.attempts.wrapping_add(1)
    }

    pub fn loading_attempt(&self) -> Option<u32> {
        match &self.slot {
            Slot::Loading { attempt, .. } => Some(*attempt),
            _ => None,
        }
    }

    /// Empty → Loading.
    pub fn begin(
        &mut self,
        attempt: u32,
        handle: FetchHandle,
        on_done: DoneCallback<P>,
    ) -> Result<(), NodeError> {
        let status = self.status();
        if status != NodeStatus::Empty {
            return Err(NodeError::NotEmpty { status });
        }
        self.attempts = attempt;
        self.slot = Slot::Loading {
            handle,
            attempt,
            on_done,
            waiters: Vec::new(),
        };
        Ok(())
    }

    /// Runs `waiter` now if loaded, queues it if loading, drops it otherwise.
    ///
    /// Returns `false` when the waiter was dropped.
    pub fn observe(&mut self, waiter: Waiter<P>) -> bool {
        match &mut self.slot {
            Slot::Loaded(p) => {
                waiter(&*p);
                true
            }
            Slot::Loading { waiters, .. } => {
                waiters.push(waiter);
                true
            }
            Slot::Empty | Slot::Cancelled => false,
        }
    }

    /// Loading → Loaded. Fires `on_done`, then queued waiters in order.
    ///
    /// Returns `false` without touching state when not loading.
    pub fn complete(&mut self, payload: P) -> bool {
        if !self.is_loading() {
            return false;
        }
        let Slot::Loading {
            on_done, waiters, ..
        } = std::mem::replace(&mut self.slot, Slot::Loaded(payload))
        else {
            return false;
        };
        let Slot::Loaded(p) = &self.slot else {
            return false;
        };
        on_done(Ok(p));
        for waiter in waiters {
            waiter(p);
        }
        true
    }

    /// Loading → Cancelled with `err` delivered to `on_done`. Waiters are dropped.
    ///
    /// Returns the handle that was in flight, if any.
    pub fn abort(&mut self, err: &FetchError) -> Option<FetchHandle> {
        if !self.is_loading() {
            return None;
        }
        let Slot::Loading {
            handle, on_done, ..
        } = std::mem::replace(&mut self.slot, Slot::Cancelled)
        else {
            return None;
        };
        on_done(Err(err));
        Some(handle)
    }

    /// Back to Empty, dropping any payload. In-flight fetches must be aborted first.
    pub fn reset(&mut self) {
        debug_assert!(!self.is_loading(), "reset while a fetch is in flight");
        self.slot = Slot::Empty;
    }
}

impl<P> Default for Residency<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: std::fmt::Debug> std::fmt::Debug for Residency<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.slot {
            Slot::Empty => f.write_str("Empty"),
            Slot::Loading {
                handle,
                attempt,
                waiters,
                ..
            } => f
                .debug_struct("Loading")
                .field("handle", handle)
                .field("attempt", attempt)
                .field("waiters", &waiters.len())
                .finish(),
            Slot::Loaded(p) => f.debug_tuple("Loaded").field(p).finish(),
            Slot::Cancelled => f.write_str("Cancelled"),
        }
    }
}
