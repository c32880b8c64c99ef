//! Collector client, v2.0.0 of the collector specification: open a
//! report, append measurements to it, close it.

use crate::httpx::{self, HttpDoer};
use common::error::{CollectorError, ProtocolError};
use common::model::Measurement;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Collector configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Base URL of the collector.
    pub base_url: String,
}

/// The template used to open a report.
#[derive(Debug, Clone, Serialize)]
pub struct ReportTemplate {
    /// Probe autonomous system number, `AS` followed by digits.
    pub probe_asn: String,

    /// Probe two-letter country code.
    pub probe_cc: String,

    /// Name of the embedding application.
    pub software_name: String,

    /// Version of the embedding application.
    pub software_version: String,

    /// Name of the experiment.
    pub test_name: String,

    /// Version of the experiment.
    pub test_version: String,
}

/// A report session with a collector.
///
/// The report is either closed or open with a collector-assigned id;
/// there is no half-open state to check for at runtime.
#[derive(Debug, Clone, Default)]
pub enum Report {
    #[default]
    Closed,
    Open {
        /// Collector-assigned report identifier.
        id: String,
        /// The collector this report was opened with.
        config: Config,
    },
}

#[derive(Deserialize)]
struct OpenResponse {
    report_id: String,
}

#[derive(Serialize)]
struct UpdateRequest<'a> {
    format: &'static str,
    content: &'a Measurement,
}

#[derive(Deserialize)]
struct UpdateResponse {
    #[serde(default)]
    measurement_id: String,
}

fn decode<T: serde::de::DeserializeOwned>(
    context: &str,
    data: &[u8],
) -> Result<T, CollectorError> {
    serde_json::from_slice(data).map_err(|source| {
        ProtocolError::JsonDecode {
            context: context.to_string(),
            source,
        }
        .into()
    })
}

/// Open a new report. Returns the open report on success.
pub async fn open(
    doer: &dyn HttpDoer,
    token: &CancellationToken,
    config: Config,
    template: &ReportTemplate,
) -> Result<Report, CollectorError> {
    let body = serde_json::to_vec(template).map_err(|source| ProtocolError::JsonEncode {
        context: "report template".to_string(),
        source,
    })?;
    let data = httpx::post_with_base_url(doer, token, &config.base_url, "/report", body).await?;
    let response: OpenResponse = decode("open-report response", &data)?;
    Ok(Report::Open {
        id: response.report_id,
        config,
    })
}

impl Report {
    /// The collector-assigned id, when open.
    pub fn id(&self) -> Option<&str> {
        match self {
            Report::Closed => None,
            Report::Open { id, .. } => Some(id),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Report::Open { .. })
    }

    /// Append a measurement to the report and return the measurement id
    /// assigned by the collector, which may be empty.
    ///
    /// Safe to call concurrently as long as the measurement itself is
    /// not shared: the report id is the only session state.
    pub async fn update(
        &self,
        doer: &dyn HttpDoer,
        token: &CancellationToken,
        measurement: &Measurement,
    ) -> Result<String, CollectorError> {
        let (id, config) = match self {
            Report::Closed => return Err(CollectorError::ReportNotOpen),
            Report::Open { id, config } => (id, config),
        };
        let body = serde_json::to_vec(&UpdateRequest {
            format: "json",
            content: measurement,
        })
        .map_err(|source| ProtocolError::JsonEncode {
            context: "measurement".to_string(),
            source,
        })?;
        let data = httpx::post_with_base_url(
            doer,
            token,
            &config.base_url,
            &format!("/report/{id}"),
            body,
        )
        .await?;
        let response: UpdateResponse = decode("update-report response", &data)?;
        Ok(response.measurement_id)
    }

    /// Close the report. Consumes the report: whatever the collector
    /// answers, the session is over on our side.
    pub async fn close(
        self,
        doer: &dyn HttpDoer,
        token: &CancellationToken,
    ) -> Result<(), CollectorError> {
        let (id, config) = match self {
            Report::Closed => return Err(CollectorError::ReportNotOpen),
            Report::Open { id, config } => (id, config),
        };
        httpx::post_with_base_url(
            doer,
            token,
            &config.base_url,
            &format!("/report/{id}/close"),
            Vec::new(),
        )
        .await?;
        Ok(())
    }
}
