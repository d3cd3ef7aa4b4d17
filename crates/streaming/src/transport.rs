//! Seams to the remote data source.
//!
//! Transports only *issue* and *cancel*. Results travel back through the
//! cache's `resolve*` methods, called by whoever owns the cache once the
//! transport has produced them. Issuing never blocks and never resolves
//! synchronously.

use crate::request::{FetchHandle, RasterRequest, TileRequest};

pub trait TileTransport {
    fn issue(&mut self, request: TileRequest) -> FetchHandle;

    /// Best-effort abort. A completion for `handle` may still arrive later.
    fn cancel(&mut self, handle: FetchHandle);
}

pub trait RasterTransport {
    fn issue(&mut self, request: RasterRequest) -> FetchHandle;

    /// Best-effort abort. A completion for `handle` may still arrive later.
    fn cancel(&mut self, handle: FetchHandle);
}
