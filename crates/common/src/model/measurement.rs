//! The measurement record shipped to the collector.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Date format used inside reports: `"YYYY-MM-DD HH:MM:SS"`, UTC.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format the current UTC time using the report date format.
pub fn format_time_now_utc() -> String {
    Utc::now().format(DATE_FORMAT).to_string()
}

/// A measurement, wire-compatible with the OONI base data format.
///
/// Optional string fields follow the wire convention of being omitted
/// when empty. `test_keys` is opaque: each experiment stores its own
/// structure there.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Measurement {
    /// Free-form annotations attached by the embedder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<HashMap<String, String>>,

    /// Version of the data format, `"0.2.0"`
    pub data_format_version: String,

    /// Locally generated measurement ID
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    /// The measurement input, for experiments that take one
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub input: String,

    /// When the measurement started, report date format
    pub measurement_start_time: String,

    /// Measurement runtime in seconds. The wire name is `test_runtime`
    /// because that is what the collector expects.
    #[serde(rename = "test_runtime")]
    pub measurement_runtime: f64,

    /// Measurement ID stamped by the collector on submit
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ooid: String,

    /// The probe autonomous system number, `AS` followed by digits
    pub probe_asn: String,

    /// The probe two-letter country code
    pub probe_cc: String,

    /// The probe IP. Defaults to `127.0.0.1` on the wire unless the
    /// embedder explicitly opts into submitting the real address.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub probe_ip: String,

    /// The report this measurement belongs to
    pub report_id: String,

    /// Name of the embedding application
    pub software_name: String,

    /// Version of the embedding application
    pub software_version: String,

    /// Experiment-defined result payload
    pub test_keys: serde_json::Value,

    /// Name of the experiment
    pub test_name: String,

    /// When the overall test started, report date format
    pub test_start_time: String,

    /// Version of the experiment
    pub test_version: String,
}
