pub mod document;
mod lease;
mod primitives;
mod snapshot;

pub use lease::*;
pub use primitives::*;
pub use snapshot::*;
