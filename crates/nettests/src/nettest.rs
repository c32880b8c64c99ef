//! The per-run nettest state container and its lifecycle operations.

use async_trait::async_trait;
use backend::collector::{self, Report, ReportTemplate};
use backend::httpx::HttpDoer;
use backend::{bouncer, geolookup, iplookup, resolver};
use common::error::{CollectorError, GeoError, NetworkError, NettestError};
use common::model::{format_time_now_utc, Event, Measurement, Service};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// The bouncer used when the embedder configures none.
pub const DEFAULT_BOUNCER_ADDRESS: &str = "https://events.proteus.test.ooni.io";

/// Capacity of the per-measurement event stream.
const EVENT_STREAM_CAPACITY: usize = 32;

/// An experiment that can be run by a nettest.
///
/// `run` receives the partially initialized measurement stub, fills
/// `test_keys` and `measurement_runtime`, posts asynchronous events on
/// `events`, and returns the completed measurement. The event stream
/// closes when `run` returns and the sender is dropped; implementations
/// must not hold clones of the sender beyond their own lifetime.
#[async_trait]
pub trait Experiment: Send + Sync {
    async fn run(
        &self,
        token: CancellationToken,
        input: String,
        measurement: Measurement,
        events: mpsc::Sender<Event>,
    ) -> Measurement;
}

/// A nettest run in progress.
///
/// Mutated only by its owner, sequentially; nothing here is shared
/// across tasks except through `start_measurement`.
pub struct Nettest {
    /// Name of the experiment, e.g. `ndt7`.
    pub test_name: String,

    /// Version of the experiment.
    pub test_version: String,

    /// Name of the embedding application.
    pub software_name: String,

    /// Version of the embedding application.
    pub software_version: String,

    /// UTC time at which the test started, report date format.
    pub test_start_time: String,

    /// Bouncers to try, in order. Defaults to
    /// [`DEFAULT_BOUNCER_ADDRESS`] when empty.
    pub available_bouncers: Vec<Service>,

    /// Collectors discovered through the bouncer.
    pub available_collectors: Vec<Service>,

    /// Test helpers discovered through the bouncer, keyed by test name.
    pub available_test_helpers: HashMap<String, Vec<Service>>,

    /// Path to the gzipped country MMDB database.
    pub country_database_path: PathBuf,

    /// Path to the gzipped ASN MMDB database.
    pub asn_database_path: PathBuf,

    pub probe_ip: String,
    pub probe_asn: String,
    pub probe_cc: String,
    pub probe_network_name: String,
    pub resolver_ip: String,

    /// The report bound to this nettest.
    pub report: Report,

    /// The experiment to run, when this nettest has one.
    pub experiment: Option<Arc<dyn Experiment>>,
}

impl Nettest {
    /// Create a nettest with probe facts set to their defaults.
    pub fn new(test_name: impl Into<String>, test_version: impl Into<String>) -> Nettest {
        Nettest {
            test_name: test_name.into(),
            test_version: test_version.into(),
            software_name: String::new(),
            software_version: String::new(),
            test_start_time: format_time_now_utc(),
            available_bouncers: Vec::new(),
            available_collectors: Vec::new(),
            available_test_helpers: HashMap::new(),
            country_database_path: PathBuf::new(),
            asn_database_path: PathBuf::new(),
            probe_ip: iplookup::DEFAULT_PROBE_IP.to_string(),
            probe_asn: geolookup::DEFAULT_PROBE_ASN.to_string(),
            probe_cc: geolookup::DEFAULT_PROBE_CC.to_string(),
            probe_network_name: String::new(),
            resolver_ip: resolver::DEFAULT_RESOLVER_IP.to_string(),
            report: Report::Closed,
            experiment: None,
        }
    }

    pub fn with_experiment(mut self, experiment: Arc<dyn Experiment>) -> Nettest {
        self.experiment = Some(experiment);
        self
    }

    fn bouncers_to_try(&self) -> Vec<Service> {
        if !self.available_bouncers.is_empty() {
            return self.available_bouncers.clone();
        }
        vec![Service {
            kind: "https".to_string(),
            address: DEFAULT_BOUNCER_ADDRESS.to_string(),
        }]
    }

    /// Walk the configured bouncers in order and store the collector
    /// list of the first https bouncer that answers.
    pub async fn discover_available_collectors(
        &mut self,
        doer: &dyn HttpDoer,
        token: &CancellationToken,
    ) -> Result<(), NettestError> {
        for service in self.bouncers_to_try() {
            if !service.is_https() {
                continue;
            }
            let config = bouncer::Config {
                base_url: service.address.clone(),
            };
            match bouncer::get_collectors(doer, token, &config).await {
                Ok(collectors) => {
                    self.available_collectors = collectors;
                    return Ok(());
                }
                Err(e) => {
                    debug!(bouncer = %service.address, error = %e, "bouncer query failed");
                }
            }
        }
        Err(NettestError::NoCollectors)
    }

    /// Like `discover_available_collectors` for test helpers.
    pub async fn discover_available_test_helpers(
        &mut self,
        doer: &dyn HttpDoer,
        token: &CancellationToken,
    ) -> Result<(), NettestError> {
        for service in self.bouncers_to_try() {
            if !service.is_https() {
                continue;
            }
            let config = bouncer::Config {
                base_url: service.address.clone(),
            };
            match bouncer::get_test_helpers(doer, token, &config).await {
                Ok(helpers) => {
                    self.available_test_helpers = helpers;
                    return Ok(());
                }
                Err(e) => {
                    debug!(bouncer = %service.address, error = %e, "bouncer query failed");
                }
            }
        }
        Err(NettestError::NoTestHelpers)
    }

    /// Fill the probe facts: IP, ASN, network name, country code.
    ///
    /// Every field is always populated; on failure a field falls back
    /// to its default and the first error encountered is returned.
    pub async fn geo_lookup(
        &mut self,
        doer: &dyn HttpDoer,
        token: &CancellationToken,
    ) -> Result<(), GeoError> {
        let mut first_error: Option<GeoError> = None;

        match iplookup::perform(doer, token).await {
            Ok(ip) => self.probe_ip = ip,
            Err(e) => {
                self.probe_ip = iplookup::DEFAULT_PROBE_IP.to_string();
                first_error.get_or_insert(e);
            }
        }
        match geolookup::get_asn(&self.asn_database_path, &self.probe_ip).await {
            Ok((asn, org)) => {
                self.probe_asn = asn;
                self.probe_network_name = org;
            }
            Err(e) => {
                self.probe_asn = geolookup::DEFAULT_PROBE_ASN.to_string();
                self.probe_network_name = String::new();
                first_error.get_or_insert(e);
            }
        }
        match geolookup::get_cc(&self.country_database_path, &self.probe_ip).await {
            Ok(cc) => self.probe_cc = cc,
            Err(e) => {
                self.probe_cc = geolookup::DEFAULT_PROBE_CC.to_string();
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Discover the resolver IP, defaulting on failure.
    pub async fn resolver_lookup(
        &mut self,
        token: &CancellationToken,
    ) -> Result<(), NetworkError> {
        match resolver::perform(token).await {
            Ok(ip) => {
                self.resolver_ip = ip;
                Ok(())
            }
            Err(e) => {
                self.resolver_ip = resolver::DEFAULT_RESOLVER_IP.to_string();
                Err(e)
            }
        }
    }

    fn report_template(&self) -> ReportTemplate {
        ReportTemplate {
            probe_asn: self.probe_asn.clone(),
            probe_cc: self.probe_cc.clone(),
            software_name: self.software_name.clone(),
            software_version: self.software_version.clone(),
            test_name: self.test_name.clone(),
            test_version: self.test_version.clone(),
        }
    }

    /// Open a report with the first https collector that accepts one.
    ///
    /// A no-op when the report is already open.
    pub async fn open_report(
        &mut self,
        doer: &dyn HttpDoer,
        token: &CancellationToken,
    ) -> Result<(), NettestError> {
        if self.report.is_open() {
            return Ok(());
        }
        let template = self.report_template();
        for service in &self.available_collectors {
            if !service.is_https() {
                continue;
            }
            let config = collector::Config {
                base_url: service.address.clone(),
            };
            match collector::open(doer, token, config, &template).await {
                Ok(report) => {
                    self.report = report;
                    return Ok(());
                }
                Err(e) => {
                    debug!(collector = %service.address, error = %e, "cannot open report");
                }
            }
        }
        Err(NettestError::CannotOpenReport)
    }

    /// Build a measurement stub for this nettest. The experiment fills
    /// `test_keys` and `measurement_runtime`; the caller sets `input`
    /// for experiments that take one.
    pub fn new_measurement(&self) -> Measurement {
        Measurement {
            data_format_version: "0.2.0".to_string(),
            measurement_start_time: format_time_now_utc(),
            // override before submitting to ship the real address
            probe_ip: iplookup::DEFAULT_PROBE_IP.to_string(),
            probe_asn: self.probe_asn.clone(),
            probe_cc: self.probe_cc.clone(),
            report_id: self.report.id().unwrap_or_default().to_string(),
            software_name: self.software_name.clone(),
            software_version: self.software_version.clone(),
            test_name: self.test_name.clone(),
            test_start_time: self.test_start_time.clone(),
            test_version: self.test_version.clone(),
            ..Default::default()
        }
    }

    /// Run the experiment for one input on a background task.
    ///
    /// Returns the event stream and the handle resolving to the
    /// completed measurement. The stream is closed exactly once, by
    /// the producer, when the experiment returns.
    pub fn start_measurement(
        &self,
        token: &CancellationToken,
        input: &str,
        measurement: Measurement,
    ) -> Result<(mpsc::Receiver<Event>, JoinHandle<Measurement>), NettestError> {
        let experiment = self
            .experiment
            .clone()
            .ok_or(NettestError::MissingExperiment)?;
        let (tx, rx) = mpsc::channel(EVENT_STREAM_CAPACITY);
        let token = token.clone();
        let input = input.to_string();
        let handle = tokio::spawn(async move {
            // tx moves into run; dropping it on return closes the stream
            experiment.run(token, input, measurement, tx).await
        });
        Ok((rx, handle))
    }

    /// Submit a measurement through the open report; stores the
    /// collector-assigned id in `measurement.ooid`.
    pub async fn submit_measurement(
        &self,
        doer: &dyn HttpDoer,
        token: &CancellationToken,
        measurement: &mut Measurement,
    ) -> Result<(), CollectorError> {
        let ooid = self.report.update(doer, token, measurement).await?;
        measurement.ooid = ooid;
        Ok(())
    }

    /// Close the open report.
    pub async fn close_report(
        &mut self,
        doer: &dyn HttpDoer,
        token: &CancellationToken,
    ) -> Result<(), CollectorError> {
        let report = std::mem::take(&mut self.report);
        report.close(doer, token).await
    }
}
