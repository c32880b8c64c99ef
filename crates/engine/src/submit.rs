//! Submit or resubmit a single serialized measurement to the
//! collector: the nettest workflow with the measurement known ahead
//! of time.

use backend::httpx::HttpDoer;
use common::model::Measurement;
use common::timeout::make_timeout;
use nettests::Nettest;
use tokio_util::sync::CancellationToken;

/// Default submission timeout in seconds.
pub const DEFAULT_SUBMIT_TIMEOUT: i64 = 30;

/// Results of a submission.
#[derive(Debug, Clone, Default)]
pub struct CollectorSubmitResults {
    good: bool,
    logs: String,
    updated_report_id: String,
    updated_serialized_measurement: String,
}

impl CollectorSubmitResults {
    /// Whether the submission succeeded.
    pub fn good(&self) -> bool {
        self.good
    }

    /// Logs useful to debug failures.
    pub fn logs(&self) -> &str {
        &self.logs
    }

    /// The report id the measurement was submitted under.
    pub fn updated_report_id(&self) -> &str {
        &self.updated_report_id
    }

    /// The measurement re-serialized with `report_id` and `ooid` set.
    pub fn updated_serialized_measurement(&self) -> &str {
        &self.updated_serialized_measurement
    }
}

/// A one-shot task submitting a serialized measurement.
#[derive(Debug, Clone)]
pub struct CollectorSubmitTask {
    serialized_measurement: String,
    software_name: String,
    software_version: String,
    timeout: i64,
}

impl CollectorSubmitTask {
    pub fn new(
        software_name: impl Into<String>,
        software_version: impl Into<String>,
        serialized_measurement: impl Into<String>,
    ) -> CollectorSubmitTask {
        CollectorSubmitTask {
            serialized_measurement: serialized_measurement.into(),
            software_name: software_name.into(),
            software_version: software_version.into(),
            timeout: DEFAULT_SUBMIT_TIMEOUT,
        }
    }

    /// Replace the measurement to submit.
    pub fn set_serialized_measurement(&mut self, measurement: impl Into<String>) {
        self.serialized_measurement = measurement.into();
    }

    /// Set the timeout in seconds; validated when the task runs.
    pub fn set_timeout(&mut self, timeout: i64) {
        self.timeout = timeout;
    }

    /// Run the submission.
    pub async fn run(&self, doer: &dyn HttpDoer) -> CollectorSubmitResults {
        let mut out = CollectorSubmitResults::default();

        let measurement: Measurement = match serde_json::from_str(&self.serialized_measurement) {
            Ok(measurement) => measurement,
            Err(e) => {
                out.logs = format!("cannot unmarshal measurement: {e}\n");
                return out;
            }
        };
        let duration = match make_timeout(self.timeout) {
            Ok(duration) => duration,
            Err(e) => {
                out.logs = format!("cannot make timeout: {e}\n");
                return out;
            }
        };

        let token = CancellationToken::new();
        let work = self.submit(doer, &token, measurement);
        match tokio::time::timeout(duration, work).await {
            Ok(Ok((serialized, report_id))) => {
                out.updated_serialized_measurement = serialized;
                out.updated_report_id = report_id;
                out.good = true;
            }
            Ok(Err(logs)) => out.logs = logs,
            Err(_elapsed) => {
                token.cancel();
                out.logs = "submission timed out\n".to_string();
            }
        }
        out
    }

    async fn submit(
        &self,
        doer: &dyn HttpDoer,
        token: &CancellationToken,
        mut measurement: Measurement,
    ) -> Result<(String, String), String> {
        let mut nettest = Nettest::new(&measurement.test_name, &measurement.test_version);
        nettest.software_name = self.software_name.clone();
        nettest.software_version = self.software_version.clone();
        nettest.test_start_time = measurement.test_start_time.clone();

        nettest
            .discover_available_collectors(doer, token)
            .await
            .map_err(|e| format!("cannot discover collectors: {e}\n"))?;
        nettest
            .open_report(doer, token)
            .await
            .map_err(|e| format!("cannot open report: {e}\n"))?;
        // the measurement travels under the newly opened report
        measurement.report_id = nettest.report.id().unwrap_or_default().to_string();
        nettest
            .submit_measurement(doer, token, &mut measurement)
            .await
            .map_err(|e| format!("cannot submit measurement: {e}\n"))?;
        let report_id = measurement.report_id.clone();
        let serialized = serde_json::to_string(&measurement)
            .map_err(|e| format!("cannot marshal measurement: {e}\n"))?;
        let _ = nettest.close_report(doer, token).await;
        Ok((serialized, report_id))
    }
}
