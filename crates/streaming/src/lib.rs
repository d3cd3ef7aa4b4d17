pub mod address;
pub mod config;
pub mod error;
pub mod labeled;
pub mod layer;
pub mod lod;
pub mod metrics;
pub mod node;
pub mod raster_cache;
pub mod request;
pub mod residency;
pub mod tile_cache;
pub mod transport;

#[cfg(test)]
mod testing;

pub use address::*;
pub use config::*;
pub use error::*;
pub use labeled::*;
pub use layer::*;
pub use lod::*;
pub use metrics::*;
pub use node::*;
pub use raster_cache::*;
pub use request::*;
pub use residency::*;
pub use tile_cache::*;
pub use transport::*;
