use foundation::Aabb2;
use serde::{Deserialize, Serialize};

use crate::address::TileAddress;
use crate::error::FetchError;

/// Transport-assigned handle for an in-flight fetch, used to cancel it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FetchHandle(pub u64);

/// Creation stamp of a cache node (or raster batch).
///
/// Generations are unique per cache and only ever increase, so a completion
/// carrying an older generation can never be mistaken for one addressed to a
/// node that later reused the same address.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Generation(pub u64);

/// Which payload of a node a fetch is for.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stream {
    Base,
    Labels,
}

/// Identifies the node, stream and attempt a completion belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FetchTicket {
    pub address: TileAddress,
    pub generation: Generation,
    pub stream: Stream,
    /// Per-stream fetch counter; a label stream can be cleared and fetched
    /// again within one node generation.
    pub attempt: u32,
}

/// Attribute/layer filter forwarded verbatim to the transport.
///
/// Any change of filter between two syncs forces a full refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default)]
    pub layers: Vec<String>,
    #[serde(default)]
    pub expression: Option<String>,
}

impl Filter {
    pub fn expression(expression: impl Into<String>) -> Self {
        Self {
            layers: Vec::new(),
            expression: Some(expression.into()),
        }
    }
}

/// One tile fetch handed to a [`crate::TileTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct TileRequest {
    pub ticket: FetchTicket,
    pub bounds: Aabb2,
    pub filter: Filter,
}

impl TileRequest {
    pub fn address(&self) -> TileAddress {
        self.ticket.address
    }

    pub fn level(&self) -> u8 {
        self.ticket.address.level
    }
}

/// One raster batch fetch handed to a [`crate::RasterTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct RasterRequest {
    pub generation: Generation,
    pub bounds: Aabb2,
    pub scale: f64,
}

/// Result of a tile fetch, fed back into the cache by its owner.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion<P> {
    pub ticket: FetchTicket,
    pub result: Result<P, FetchError>,
}

impl<P> Completion<P> {
    pub fn ok(ticket: FetchTicket, payload: P) -> Self {
        Self {
            ticket,
            result: Ok(payload),
        }
    }

    pub fn err(ticket: FetchTicket, err: FetchError) -> Self {
        Self {
            ticket,
            result: Err(err),
        }
    }
}
