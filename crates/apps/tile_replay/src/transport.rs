//! Tokio-backed [`TileTransport`]: one spawned task per fetch.
//!
//! Finished fetches are sent over an unbounded channel; the owner of the
//! cache drains it and feeds each [`Fetched`] back through `resolve`.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use streaming::{FetchError, FetchHandle, FetchTicket, TileRequest, TileTransport};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

use crate::source::DataSource;

#[derive(Debug)]
pub struct Fetched {
    pub ticket: FetchTicket,
    pub result: Result<Bytes, FetchError>,
}

pub struct TokioTransport {
    source: Arc<dyn DataSource>,
    runtime: Handle,
    completions: mpsc::UnboundedSender<Fetched>,
    inflight: Arc<Mutex<HashMap<FetchHandle, AbortHandle>>>,
    next_handle: u64,
}

impl TokioTransport {
    pub fn new(
        source: Arc<dyn DataSource>,
        runtime: Handle,
    ) -> (Self, mpsc::UnboundedReceiver<Fetched>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self {
            source,
            runtime,
            completions: tx,
            inflight: Arc::new(Mutex::new(HashMap::new())),
            next_handle: 0,
        };
        (transport, rx)
    }

    /// Fetches spawned and neither finished nor cancelled.
    pub fn inflight(&self) -> usize {
        self.inflight.lock().len()
    }
}

async fn fetch(source: &dyn DataSource, request: TileRequest) -> Result<Bytes, FetchError> {
    let address = request.address();
    match source
        .get_tile(address, request.ticket.stream, request.filter)
        .await
    {
        Ok(Some(bytes)) => Ok(bytes),
        Ok(None) => Err(FetchError::failed(format!("{address} not found"))),
        Err(err) => Err(FetchError::failed(err.to_string())),
    }
}

impl TileTransport for TokioTransport {
    fn issue(&mut self, request: TileRequest) -> FetchHandle {
        self.next_handle += 1;
        let handle = FetchHandle(self.next_handle);
        let ticket = request.ticket;
        let source = Arc::clone(&self.source);
        let tx = self.completions.clone();
        let table = Arc::clone(&self.inflight);

        // Held across spawn so the task cannot remove its entry before it exists.
        let mut inflight = self.inflight.lock();
        let task = self.runtime.spawn(async move {
            let result = fetch(source.as_ref(), request).await;
            table.lock().remove(&handle);
            // Receiver gone means the replay is shutting down.
            let _ = tx.send(Fetched { ticket, result });
        });
        inflight.insert(handle, task.abort_handle());
        trace!(handle = handle.0, address = %ticket.address, stream = ?ticket.stream, "fetch spawned");
        handle
    }

    fn cancel(&mut self, handle: FetchHandle) {
        if let Some(task) = self.inflight.lock().remove(&handle) {
            task.abort();
            debug!(handle = handle.0, "fetch aborted");
        }
    }
}
