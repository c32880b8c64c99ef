//! # Common
//!
//! Core shared types and error definitions for the measurement engine.
//! This crate provides the building blocks that all other engine crates
//! depend on:
//!
//! - The event/measurement/service data model shared across the wire
//! - Per-domain error types behind the `EngineError` trait
//! - Timeout validation for embedder-supplied timeouts
//! - The tracing bootstrap used by binaries and tests
//!
//! ## Design Principles
//! - Minimal dependencies to avoid bloat in dependent crates
//! - Serde support for every structure that crosses a process boundary
//! - Use thiserror for library errors, anyhow for application glue

pub mod error;
pub mod logging;
pub mod model;
pub mod timeout;

pub use error::*;
pub use model::{Event, Measurement, Service};
pub use timeout::make_timeout;

/// Version of the engine, stamped into the wire user agent.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
