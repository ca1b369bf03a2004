//! Infrastructure adapters and runtime bootstrap.

pub mod db;
pub mod error;
pub mod http;
pub mod jobs;
pub mod memory;
pub mod purge_http;
pub mod telemetry;
pub mod varnish;
