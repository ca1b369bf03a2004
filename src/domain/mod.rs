//! Domain layer types and invariants.

pub mod bindings;
pub mod content;
pub mod error;
pub mod hosts;
pub mod targets;
pub mod types;
