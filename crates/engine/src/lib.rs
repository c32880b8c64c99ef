//! # Engine
//!
//! The user-visible measurement tasks.
//!
//! [`task::Task`] runs a full nettest pipeline from embedder-supplied
//! JSON settings and streams [`common::model::Event`]s back;
//! [`submit::CollectorSubmitTask`] submits or resubmits a single
//! serialized measurement to the collector.
//!
//! At most one [`task::Task`] runs at a time per process: executions
//! are serialized on a global single-permit gate, and tasks waiting on
//! the gate announce themselves with a `status.queued` event.

pub mod settings;
pub mod submit;
pub mod task;

pub use settings::{TaskOptions, TaskSettings};
pub use submit::{CollectorSubmitResults, CollectorSubmitTask};
pub use task::{Task, TaskDeps};

/// Version of the engine crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
