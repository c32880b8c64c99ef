//! Probe IP discovery through a remote lookup endpoint.

use crate::httpx::{self, HttpDoer};
use common::error::{GeoError, ProtocolError};
use serde::Deserialize;
use std::net::IpAddr;
use tokio_util::sync::CancellationToken;

/// The remote endpoint answering with the caller's public address.
pub const LOOKUP_URL: &str = "https://geoip.ubuntu.com/lookup";

/// The probe IP reported when discovery fails.
pub const DEFAULT_PROBE_IP: &str = "127.0.0.1";

// The endpoint answers `<Response><Ip>x.y.z.w</Ip></Response>`.
#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(rename = "Ip")]
    ip: String,
}

/// Discover the probe IP. Callers fall back to [`DEFAULT_PROBE_IP`]
/// when this fails.
pub async fn perform(
    doer: &dyn HttpDoer,
    token: &CancellationToken,
) -> Result<String, GeoError> {
    let data = httpx::get(doer, token, LOOKUP_URL).await?;
    let text = std::str::from_utf8(&data).map_err(|e| ProtocolError::XmlDecode {
        context: "probe-ip lookup".to_string(),
        details: e.to_string(),
    })?;
    let response: LookupResponse =
        quick_xml::de::from_str(text).map_err(|e| ProtocolError::XmlDecode {
            context: "probe-ip lookup".to_string(),
            details: e.to_string(),
        })?;
    let candidate = response.ip.trim();
    let addr: IpAddr = candidate.parse().map_err(|_| GeoError::InvalidIp {
        value: candidate.to_string(),
    })?;
    Ok(addr.to_string())
}
