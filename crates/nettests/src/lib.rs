//! # Nettests
//!
//! The nettest lifecycle abstraction and the experiments built on it.
//!
//! A [`Nettest`] is a per-run state container. Its operations compose
//! the backend clients into the canonical lifecycle: discover backends
//! through the bouncer, geolocate the probe, open a report, run the
//! experiment per input streaming events, submit each measurement,
//! close the report. The abstraction does not enforce this ordering;
//! the task orchestrator does.

pub mod ndt7;
pub mod nettest;
pub mod psiphontunnel;

pub use nettest::{Experiment, Nettest};
