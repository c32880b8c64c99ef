//! The ndt7 throughput experiment.
//!
//! Runs the download and upload subtests against the first discovered
//! server that accepts a WebSocket upgrade with the ndt7 subprotocol.
//! Server measurement messages are opaque to the client and forwarded
//! verbatim as `ndt7.download` events; the upload side samples its own
//! byte counter and emits `ndt7.upload` events.

mod download;
pub mod proto;
mod upload;

use crate::nettest::{Experiment, Nettest};
use async_trait::async_trait;
use backend::httpx::HttpDoer;
use backend::mlabns;
use common::error::{DiscoveryError, NettestError};
use common::model::{Event, Measurement};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Name of this experiment.
pub const TEST_NAME: &str = "ndt7";

const TEST_VERSION: &str = "0.1.0";

// ndt7 is only deployed on the staging locator and on mlab4 machines
// for now.
const MLABNS_BASE_URL: &str = "https://locate-dot-mlab-staging.appspot.com/";
const MLABNS_TOOL: &str = "ndt_ssl";
const SERVER_FQDN_FILTER: &str = "-mlab4-";

/// ndt7 experiment configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Optional server FQDNs to use instead of querying mlab-ns.
    pub fqdns: Vec<String>,
}

/// Application-level byte counter inside a client sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppInfo {
    /// Bytes transferred so far.
    pub num_bytes: i64,
}

/// A client-side upload sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSample {
    /// Seconds elapsed since the beginning of the subtest.
    pub elapsed_seconds: f64,

    pub app_info: AppInfo,
}

/// The experiment result stored in `test_keys`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct TestKeys {
    /// Empty on success, first fatal error otherwise.
    failure: String,

    /// Server measurements received during the download.
    download: Vec<serde_json::Value>,

    /// Client samples emitted during the upload.
    upload: Vec<ClientSample>,
}

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Establish a WebSocket connection with the ndt7 subprotocol.
async fn connect(
    fqdn: &str,
    url_path: &str,
) -> Result<WsStream, tokio_tungstenite::tungstenite::Error> {
    let url = format!("wss://{fqdn}{url_path}");
    let mut request = url.into_client_request()?;
    request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        HeaderValue::from_static(proto::SEC_WEBSOCKET_PROTOCOL),
    );
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(proto::MAX_MESSAGE_SIZE);
    config.max_frame_size = Some(proto::MAX_MESSAGE_SIZE);
    let (stream, _response) =
        tokio_tungstenite::connect_async_with_config(request, Some(config), false).await?;
    Ok(stream)
}

/// The ndt7 experiment.
pub struct Ndt7Experiment {
    config: Config,
    doer: Arc<dyn HttpDoer>,
}

impl Ndt7Experiment {
    pub fn new(doer: Arc<dyn HttpDoer>, config: Config) -> Ndt7Experiment {
        Ndt7Experiment { config, doer }
    }

    /// Servers to try, in order: either the configured ones or the
    /// usable subset of what mlab-ns returns.
    async fn get_servers(&self, token: &CancellationToken) -> Result<Vec<String>, NettestError> {
        if !self.config.fqdns.is_empty() {
            return Ok(self.config.fqdns.clone());
        }
        let config = mlabns::Config {
            base_url: MLABNS_BASE_URL.to_string(),
            tool: MLABNS_TOOL.to_string(),
        };
        let servers = mlabns::geo_options(self.doer.as_ref(), token, &config)
            .await
            .map_err(|e| match e {
                DiscoveryError::Network(e) => NettestError::Network(e),
                DiscoveryError::Protocol(e) => NettestError::Protocol(e),
            })?;
        let fqdns: Vec<String> = servers
            .into_iter()
            .filter(|server| server.fqdn.contains(SERVER_FQDN_FILTER))
            .map(|server| server.fqdn)
            .collect();
        if fqdns.is_empty() {
            return Err(NettestError::NoAvailableServers);
        }
        Ok(fqdns)
    }

    async fn run_subtests(
        &self,
        token: &CancellationToken,
        events: &mpsc::Sender<Event>,
        keys: &mut TestKeys,
    ) {
        let fqdns = match self.get_servers(token).await {
            Ok(fqdns) => fqdns,
            Err(e) => {
                keys.failure = e.to_string();
                let _ = events
                    .send(Event::failure_measurement(0, e.to_string()))
                    .await;
                return;
            }
        };

        let mut first_error: Option<String> = None;

        let mut started = false;
        for fqdn in &fqdns {
            let attempt = tokio::select! {
                _ = token.cancelled() => break,
                attempt = connect(fqdn, proto::DOWNLOAD_URL_PATH) => attempt,
            };
            match attempt {
                Ok(stream) => {
                    debug!(server = %fqdn, "download subtest starting");
                    download::run(token, stream, events, &mut keys.download).await;
                    started = true;
                    break;
                }
                Err(e) => {
                    first_error.get_or_insert_with(|| e.to_string());
                }
            }
        }
        if !started {
            keys.failure = first_error.clone().unwrap_or_default();
        }

        let mut started = false;
        for fqdn in &fqdns {
            let attempt = tokio::select! {
                _ = token.cancelled() => break,
                attempt = connect(fqdn, proto::UPLOAD_URL_PATH) => attempt,
            };
            match attempt {
                Ok(stream) => {
                    debug!(server = %fqdn, "upload subtest starting");
                    upload::run(token, stream, events, &mut keys.upload).await;
                    started = true;
                    break;
                }
                Err(e) => {
                    first_error.get_or_insert_with(|| e.to_string());
                }
            }
        }
        if !started && keys.failure.is_empty() {
            keys.failure = first_error.unwrap_or_default();
        }
    }
}

#[async_trait]
impl Experiment for Ndt7Experiment {
    async fn run(
        &self,
        token: CancellationToken,
        _input: String,
        mut measurement: Measurement,
        events: mpsc::Sender<Event>,
    ) -> Measurement {
        let started = tokio::time::Instant::now();
        let mut keys = TestKeys::default();
        self.run_subtests(&token, &events, &mut keys).await;
        match serde_json::to_value(&keys) {
            Ok(value) => measurement.test_keys = value,
            Err(e) => debug!(error = %e, "cannot serialize test keys"),
        }
        measurement.measurement_runtime = started.elapsed().as_secs_f64();
        measurement
    }
}

/// Create the ndt7 nettest.
pub fn new_nettest(doer: Arc<dyn HttpDoer>, config: Config) -> Nettest {
    Nettest::new(TEST_NAME, TEST_VERSION)
        .with_experiment(Arc::new(Ndt7Experiment::new(doer, config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend::testing::FakeDoer;

    #[tokio::test]
    async fn test_get_servers_prefers_configured_fqdns() {
        let experiment = Ndt7Experiment::new(
            Arc::new(FakeDoer::new()),
            Config {
                fqdns: vec!["ndt.example".to_string()],
            },
        );
        let token = CancellationToken::new();
        let servers = experiment.get_servers(&token).await.unwrap();
        assert_eq!(servers, vec!["ndt.example".to_string()]);
    }

    #[tokio::test]
    async fn test_get_servers_filters_mlab4() {
        let doer = FakeDoer::new().on(
            "policy=geo_options",
            br#"[{"fqdn": "ndt-mlab1-mil01.example"}, {"fqdn": "ndt-mlab4-mil01.example"}]"#
                .to_vec(),
        );
        let experiment = Ndt7Experiment::new(Arc::new(doer), Config::default());
        let token = CancellationToken::new();
        let servers = experiment.get_servers(&token).await.unwrap();
        assert_eq!(servers, vec!["ndt-mlab4-mil01.example".to_string()]);
    }

    #[tokio::test]
    async fn test_get_servers_empty_set_is_an_error() {
        let doer = FakeDoer::new().on(
            "policy=geo_options",
            br#"[{"fqdn": "ndt-mlab1-mil01.example"}]"#.to_vec(),
        );
        let experiment = Ndt7Experiment::new(Arc::new(doer), Config::default());
        let token = CancellationToken::new();
        let err = experiment.get_servers(&token).await.unwrap_err();
        assert!(matches!(err, NettestError::NoAvailableServers));
    }

    #[tokio::test]
    async fn test_run_records_failure_when_discovery_fails() {
        let doer = FakeDoer::new().on_transport_error("policy=geo_options");
        let experiment = Ndt7Experiment::new(Arc::new(doer), Config::default());
        let (tx, mut rx) = mpsc::channel(16);
        let measurement = experiment
            .run(
                CancellationToken::new(),
                String::new(),
                Measurement::default(),
                tx,
            )
            .await;
        let keys: TestKeys = serde_json::from_value(measurement.test_keys).unwrap();
        assert!(!keys.failure.is_empty());
        assert!(keys.download.is_empty());
        assert!(keys.upload.is_empty());
        assert!(measurement.measurement_runtime >= 0.0);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.key, "failure.measurement");
    }
}
