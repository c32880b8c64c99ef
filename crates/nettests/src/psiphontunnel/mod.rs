//! The psiphontunnel reachability experiment.
//!
//! Bootstraps a Psiphon tunnel through an embedder-provided library
//! binding, then probes the tunnel by fetching a small URL through its
//! SOCKS5 port. The external tunnel library is consumed only through
//! the [`runner::TunnelStarter`] capability trait.

pub mod runner;

use crate::nettest::{Experiment, Nettest};
use async_trait::async_trait;
use backend::httpx::HttpDoer;
use common::model::{Event, Measurement};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Name of this experiment.
pub const TEST_NAME: &str = "psiphontunnel";

const TEST_VERSION: &str = "0.0.1";

/// The psiphontunnel experiment.
pub struct PsiphonTunnelExperiment {
    config: runner::Config,
    doer: Arc<dyn HttpDoer>,
    starter: Arc<dyn runner::TunnelStarter>,
}

impl PsiphonTunnelExperiment {
    pub fn new(
        doer: Arc<dyn HttpDoer>,
        starter: Arc<dyn runner::TunnelStarter>,
        config: runner::Config,
    ) -> PsiphonTunnelExperiment {
        PsiphonTunnelExperiment {
            config,
            doer,
            starter,
        }
    }
}

#[async_trait]
impl Experiment for PsiphonTunnelExperiment {
    async fn run(
        &self,
        token: CancellationToken,
        _input: String,
        mut measurement: Measurement,
        _events: mpsc::Sender<Event>,
    ) -> Measurement {
        let started = tokio::time::Instant::now();
        let keys = runner::run(
            self.doer.as_ref(),
            self.starter.as_ref(),
            &token,
            &self.config,
        )
        .await;
        match serde_json::to_value(&keys) {
            Ok(value) => measurement.test_keys = value,
            Err(e) => debug!(error = %e, "cannot serialize test keys"),
        }
        measurement.measurement_runtime = started.elapsed().as_secs_f64();
        measurement
    }
}

/// Create the psiphontunnel nettest.
pub fn new_nettest(
    doer: Arc<dyn HttpDoer>,
    starter: Arc<dyn runner::TunnelStarter>,
    config: runner::Config,
) -> Nettest {
    Nettest::new(TEST_NAME, TEST_VERSION)
        .with_experiment(Arc::new(PsiphonTunnelExperiment::new(doer, starter, config)))
}
