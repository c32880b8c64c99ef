//! Data model shared across the engine: events streamed to the
//! embedder, measurements shipped to the collector, and backend
//! service descriptors.

pub mod event;
pub mod measurement;
pub mod service;

pub use event::{Event, LogValue};
pub use measurement::{format_time_now_utc, Measurement, DATE_FORMAT};
pub use service::Service;
