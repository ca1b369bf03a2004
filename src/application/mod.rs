//! The invalidation engine and the services built on it.

pub mod bindings;
pub mod dispatch;
pub mod error;
pub mod fanout;
pub mod jobs;
pub mod repos;
pub mod resolver;
pub mod service;
