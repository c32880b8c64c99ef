//! Events streamed to the embedding application.

use serde::{Deserialize, Serialize};
use serde_json::json;

/// A uniform envelope streamed to the embedder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Key that uniquely identifies the event kind, e.g. `log`,
    /// `status.progress`, `ndt7.download`.
    pub key: String,

    /// Event specific payload.
    pub value: serde_json::Value,
}

/// Payload of `log` and `status.progress` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f64>,
}

impl Event {
    /// Create an event with an arbitrary serializable payload.
    pub fn new<T: Serialize>(key: &str, value: &T) -> Result<Event, serde_json::Error> {
        Ok(Event {
            key: key.to_string(),
            value: serde_json::to_value(value)?,
        })
    }

    /// Create an event from an already-built JSON value.
    pub fn with_value(key: &str, value: serde_json::Value) -> Event {
        Event {
            key: key.to_string(),
            value,
        }
    }

    /// An informational `log` event.
    pub fn log_info(message: impl Into<String>) -> Event {
        Event::with_value(
            "log",
            json!({
                "log_level": "INFO",
                "message": message.into(),
            }),
        )
    }

    /// A warning `log` event.
    pub fn log_warning(message: impl Into<String>) -> Event {
        Event::with_value(
            "log",
            json!({
                "log_level": "WARNING",
                "message": message.into(),
            }),
        )
    }

    /// A `status.progress` event.
    pub fn progress(percentage: f64, message: impl Into<String>) -> Event {
        Event::with_value(
            "status.progress",
            json!({
                "percentage": percentage,
                "message": message.into(),
            }),
        )
    }

    /// A `failure.measurement` event for the input at `idx`.
    pub fn failure_measurement(idx: usize, failure: impl Into<String>) -> Event {
        Event::with_value(
            "failure.measurement",
            json!({
                "failure": failure.into(),
                "idx": idx,
            }),
        )
    }
}
