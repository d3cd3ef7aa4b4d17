// Foundation crate: small, well-tested primitives only.
pub mod bounds;

pub use bounds::*;
