//! Backend service descriptors.

use serde::{Deserialize, Serialize};

/// An addressable backend of a given kind, as returned by the bouncer.
///
/// Consumers only accept `https` entries; other kinds (e.g. `onion`)
/// are skipped when walking a service list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    /// The service kind, e.g. `https` or `onion`.
    #[serde(rename = "type")]
    pub kind: String,

    /// The URL prefix at which the service is reachable.
    pub address: String,
}

impl Service {
    /// Whether this service is reachable over HTTPS.
    pub fn is_https(&self) -> bool {
        self.kind == "https"
    }
}
