//! Job submission and the per-type worker pools.
//!
//! `enqueue` validates and persists a pending job, then hands its id to the
//! queue of its type. Each queue loop claims jobs atomically, runs the
//! stage under the type's timeout and records the outcome.

mod config;
mod integration_tests;
mod runtime;

pub use config::{AtelierConfig, PoolConfig, PoolsConfig, ToolsConfig};
pub use runtime::Dispatcher;
