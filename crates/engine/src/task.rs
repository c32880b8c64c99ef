//! The task orchestrator: a fixed pipeline over a nettest, streaming
//! events to the embedder.

use crate::settings::TaskSettings;
use backend::assets;
use backend::httpx::{HttpDoer, WebClient};
use common::model::Event;
use nettests::psiphontunnel::runner::{self, TunnelStarter};
use nettests::{ndt7, psiphontunnel, Nettest};
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Capacity of the task event stream.
const EVENT_STREAM_CAPACITY: usize = 128;

// Full task executions are serialized process-wide; tasks waiting for
// the permit have already announced themselves with `status.queued`.
static TASK_GATE: Semaphore = Semaphore::const_new(1);

/// Capability wiring for a task. The default wiring uses the real
/// HTTP client and no tunnel library.
#[derive(Clone)]
pub struct TaskDeps {
    /// HTTP capability used by every client in the pipeline.
    pub http: Arc<dyn HttpDoer>,

    /// Binding to the external Psiphon tunnel library, when the
    /// embedder links one. Required to run `PsiphonTunnel` tasks.
    pub tunnel_starter: Option<Arc<dyn TunnelStarter>>,
}

impl Default for TaskDeps {
    fn default() -> TaskDeps {
        TaskDeps {
            http: Arc::new(WebClient::new()),
            tunnel_starter: None,
        }
    }
}

/// A running measurement task.
///
/// Consume events with [`Task::next_event`] until it returns `None`:
/// the stream ends with exactly one `status.end` and is closed exactly
/// once, also on interrupt and on startup failure.
pub struct Task {
    token: CancellationToken,
    events: mpsc::Receiver<Event>,
}

impl Task {
    /// Start a task from embedder-supplied JSON settings with the
    /// default wiring. Must be called within a tokio runtime.
    pub fn start(settings: &str) -> Task {
        Task::start_with(settings, TaskDeps::default())
    }

    /// Like [`Task::start`] with explicit capability wiring.
    pub fn start_with(settings: &str, deps: TaskDeps) -> Task {
        let token = CancellationToken::new();
        let (tx, rx) = mpsc::channel(EVENT_STREAM_CAPACITY);
        let runner = TaskRunner {
            deps,
            token: token.clone(),
            out: tx,
            pretty: std::env::var("MK_EVENT_PRETTY").map(|v| v == "1").unwrap_or(false),
        };
        let settings = settings.to_string();
        tokio::spawn(async move {
            // runner owns the only sender; the stream closes when this
            // future returns
            runner.run_all(&settings).await;
        });
        Task { token, events: rx }
    }

    /// Receive the next event; `None` once the task is done.
    pub async fn next_event(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    /// Interrupt the task. Pending operations observe the cancellation
    /// and the pipeline winds down to its terminal events.
    pub fn interrupt(&self) {
        self.token.cancel();
    }
}

#[derive(Serialize)]
struct MeasurementValue<'a> {
    #[serde(skip_serializing_if = "str::is_empty")]
    failure: &'a str,
    idx: usize,
    input: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    json_str: &'a str,
}

struct TaskRunner {
    deps: TaskDeps,
    token: CancellationToken,
    out: mpsc::Sender<Event>,
    pretty: bool,
}

impl TaskRunner {
    async fn emit(&self, event: Event) {
        let _ = self.out.send(event).await;
    }

    async fn emit_payload<T: Serialize>(&self, key: &str, payload: &T) {
        match Event::new(key, payload) {
            Ok(event) => self.emit(event).await,
            Err(e) => {
                self.emit(Event::with_value(
                    "bug.json_dump",
                    json!({ "failure": e.to_string() }),
                ))
                .await
            }
        }
    }

    async fn emit_warning(&self, message: String) {
        warn!("{message}");
        self.emit(Event::log_warning(message)).await;
    }

    async fn failure_startup(&self, failure: String) {
        self.emit(Event::with_value(
            "failure.startup",
            json!({ "failure": failure }),
        ))
        .await;
    }

    async fn run_all(&self, settings: &str) {
        self.emit(Event::with_value("status.queued", json!({}))).await;
        let _permit = match TASK_GATE.acquire().await {
            Ok(permit) => permit,
            Err(_) => return, // the gate is never closed
        };
        self.run(settings).await;
        if self.token.is_cancelled() {
            self.emit(Event::with_value("status.terminated", json!({})))
                .await;
        }
        self.emit(Event::with_value(
            "status.end",
            json!({
                "downloaded_kb": 0.0,
                "failure": "",
                "uploaded_kb": 0.0,
            }),
        ))
        .await;
    }

    fn marshal(&self, measurement: &common::model::Measurement) -> serde_json::Result<String> {
        if self.pretty {
            serde_json::to_string_pretty(measurement)
        } else {
            serde_json::to_string(measurement)
        }
    }

    /// Select the experiment by name. Both known experiments take no
    /// input, so the inputs list is forced to a single empty input.
    fn make_nettest(&self, settings: &TaskSettings) -> Result<(Nettest, Vec<String>), String> {
        match settings.name.as_str() {
            "Ndt7" => Ok((
                ndt7::new_nettest(self.deps.http.clone(), ndt7::Config::default()),
                vec![String::new()],
            )),
            "PsiphonTunnel" => {
                let starter = self
                    .deps
                    .tunnel_starter
                    .clone()
                    .ok_or_else(|| "missing_tunnel_library".to_string())?;
                let config = runner::Config::new(
                    PathBuf::from(&settings.options.config_file_path),
                    PathBuf::from(&settings.options.work_dir_path),
                );
                Ok((
                    psiphontunnel::new_nettest(self.deps.http.clone(), starter, config),
                    vec![String::new()],
                ))
            }
            _ => Err(common::error::ValidationError::UnknownNettest {
                name: settings.name.clone(),
            }
            .to_string()),
        }
    }

    async fn run(&self, settings: &str) {
        let settings: TaskSettings = match serde_json::from_str(settings) {
            Ok(settings) => settings,
            Err(e) => {
                self.failure_startup(e.to_string()).await;
                return;
            }
        };
        if let Err(e) = settings.options.validate() {
            self.failure_startup(e.to_string()).await;
            return;
        }
        let (mut nettest, inputs) = match self.make_nettest(&settings) {
            Ok(selected) => selected,
            Err(failure) => {
                self.failure_startup(failure).await;
                return;
            }
        };
        nettest.software_name = settings.options.software_name.clone();
        nettest.software_version = settings.options.software_version.clone();
        let doer = self.deps.http.clone();

        // Stage 1: backend discovery.
        if !settings.options.no_bouncer {
            self.emit(Event::log_info("discovering available collectors"))
                .await;
            if let Err(e) = nettest
                .discover_available_collectors(doer.as_ref(), &self.token)
                .await
            {
                self.emit_warning(format!("discover_collector_error: {e}"))
                    .await;
                if !settings.options.ignore_bouncer_error {
                    return;
                }
            }
            self.emit_payload("status.available_collectors", &nettest.available_collectors)
                .await;
            if let Err(e) = nettest
                .discover_available_test_helpers(doer.as_ref(), &self.token)
                .await
            {
                self.emit_warning(format!("discover_test_helpers_error: {e}"))
                    .await;
                if !settings.options.ignore_bouncer_error {
                    return;
                }
            }
            self.emit_payload(
                "status.available_test_helpers",
                &nettest.available_test_helpers,
            )
            .await;
        }
        self.emit(Event::progress(0.1, "contacted bouncer")).await;
        if self.token.is_cancelled() {
            return;
        }

        // Stage 2: assets and geolocation.
        if !settings.options.no_geolookup {
            let workdir = Path::new(&settings.options.work_dir_path);
            if let Err(e) = assets::download(doer.as_ref(), &self.token, workdir).await {
                self.failure_startup(format!("download_assets_error: {e}"))
                    .await;
                return;
            }
            nettest.asn_database_path = assets::asn_database_path(workdir);
            nettest.country_database_path = assets::country_database_path(workdir);
            if let Err(e) = nettest.geo_lookup(doer.as_ref(), &self.token).await {
                self.emit_warning(format!("geolookup_error: {e}")).await;
            }
            self.emit_payload(
                "status.geoip_lookup",
                &json!({
                    "probe_ip": nettest.probe_ip,
                    "probe_asn": nettest.probe_asn,
                    "probe_cc": nettest.probe_cc,
                    "probe_network_name": nettest.probe_network_name,
                }),
            )
            .await;
        }
        self.emit(Event::progress(0.2, "geoip lookup")).await;
        if self.token.is_cancelled() {
            return;
        }

        // Stage 3: resolver lookup.
        if !settings.options.no_resolver_lookup {
            if let Err(e) = nettest.resolver_lookup(&self.token).await {
                self.emit_warning(format!("resolver_lookup_error: {e}"))
                    .await;
            }
            self.emit_payload(
                "status.resolver_lookup",
                &json!({ "resolver_ip": nettest.resolver_ip }),
            )
            .await;
        }
        self.emit(Event::progress(0.3, "resolver lookup")).await;
        if self.token.is_cancelled() {
            return;
        }

        // Stage 4: report open. A failure here skips submission but
        // the measurement still runs.
        if !settings.options.no_collector {
            if let Err(e) = nettest.open_report(doer.as_ref(), &self.token).await {
                self.emit_warning(format!("open_report_error: {e}")).await;
            }
            match nettest.report.id() {
                Some(report_id) => {
                    self.emit_payload(
                        "status.report_create",
                        &json!({ "report_id": report_id }),
                    )
                    .await;
                }
                None => {
                    self.emit(Event::with_value(
                        "failure.report_create",
                        json!({ "failure": "sequential_operation_error" }),
                    ))
                    .await;
                }
            }
        }
        self.emit(Event::progress(0.4, "open report")).await;

        // Stage 5: one measurement per input, streams fully drained
        // before the next input begins.
        for (idx, input) in inputs.iter().enumerate() {
            if self.token.is_cancelled() {
                break;
            }
            self.emit_payload(
                "status.measurement_start",
                &MeasurementValue {
                    failure: "",
                    idx,
                    input,
                    json_str: "",
                },
            )
            .await;

            let stub = nettest.new_measurement();
            let (mut events, handle) = match nettest.start_measurement(&self.token, input, stub) {
                Ok(started) => started,
                Err(e) => {
                    self.emit(Event::failure_measurement(idx, e.to_string())).await;
                    continue;
                }
            };
            while let Some(event) = events.recv().await {
                self.emit(event).await;
            }
            let mut measurement = match handle.await {
                Ok(measurement) => measurement,
                Err(e) => {
                    self.emit(Event::failure_measurement(idx, e.to_string())).await;
                    continue;
                }
            };
            measurement.input = input.clone();

            let json_str = match self.marshal(&measurement) {
                Ok(json_str) => json_str,
                Err(e) => {
                    self.emit(Event::with_value(
                        "bug.json_dump",
                        json!({ "failure": e.to_string() }),
                    ))
                    .await;
                    continue;
                }
            };
            self.emit_payload(
                "measurement",
                &MeasurementValue {
                    failure: "",
                    idx,
                    input,
                    json_str: &json_str,
                },
            )
            .await;

            if !settings.options.no_collector && nettest.report.is_open() {
                match nettest
                    .submit_measurement(doer.as_ref(), &self.token, &mut measurement)
                    .await
                {
                    Ok(()) => {
                        self.emit_payload(
                            "status.measurement_submission",
                            &MeasurementValue {
                                failure: "",
                                idx,
                                input,
                                json_str: "",
                            },
                        )
                        .await;
                    }
                    Err(e) => {
                        let failure = e.to_string();
                        self.emit_payload(
                            "failure.measurement_submission",
                            &MeasurementValue {
                                failure: &failure,
                                idx,
                                input,
                                json_str: &json_str,
                            },
                        )
                        .await;
                    }
                }
            }

            self.emit_payload(
                "status.measurement_done",
                &MeasurementValue {
                    failure: "",
                    idx,
                    input,
                    json_str: "",
                },
            )
            .await;
            self.emit(Event::progress(
                0.4 + 0.6 * (idx + 1) as f64 / inputs.len() as f64,
                format!("measured input: '{input}'"),
            ))
            .await;
        }

        if nettest.report.is_open() {
            if let Err(e) = nettest.close_report(doer.as_ref(), &self.token).await {
                self.emit_warning(format!("close_report_error: {e}")).await;
            }
        }
    }
}
