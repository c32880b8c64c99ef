//! mlab-ns client: discover nearby measurement servers for a tool.

use crate::httpx::{self, HttpDoer};
use common::error::{DiscoveryError, NetworkError, ProtocolError};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Default mlab-ns base URL.
pub const DEFAULT_BASE_URL: &str = "https://mlab-ns.appspot.com/";

/// mlab-ns query configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL; [`DEFAULT_BASE_URL`] when empty.
    pub base_url: String,

    /// The tool to query servers for, e.g. `ndt_ssl`.
    pub tool: String,
}

impl Config {
    pub fn new(tool: impl Into<String>) -> Config {
        Config {
            base_url: DEFAULT_BASE_URL.to_string(),
            tool: tool.into(),
        }
    }
}

/// A server returned by mlab-ns.
#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    /// Fully qualified domain name of the server.
    pub fqdn: String,
}

/// Query mlab-ns with the `geo_options` policy.
pub async fn geo_options(
    doer: &dyn HttpDoer,
    token: &CancellationToken,
    config: &Config,
) -> Result<Vec<Server>, DiscoveryError> {
    let base = if config.base_url.is_empty() {
        DEFAULT_BASE_URL
    } else {
        &config.base_url
    };
    let mut url = Url::parse(base).map_err(|e| NetworkError::InvalidUrl {
        url: base.to_string(),
        source: Box::new(e),
    })?;
    url.set_path(&config.tool);
    url.query_pairs_mut().append_pair("policy", "geo_options");

    let data = httpx::get(doer, token, url.as_str()).await?;
    serde_json::from_slice(&data).map_err(|source| {
        ProtocolError::JsonDecode {
            context: "mlab-ns response".to_string(),
            source,
        }
        .into()
    })
}
