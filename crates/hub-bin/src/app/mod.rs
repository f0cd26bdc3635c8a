//! Application wiring for the hub and edge roles.

mod edge;
mod hub;

pub use edge::run_edge;
pub use hub::run_hub;
