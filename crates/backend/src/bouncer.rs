//! Bouncer client (service discovery), v2.0.0 of the bouncer
//! specification: bare-array collector responses, test helpers keyed
//! by test name.

use crate::httpx::{self, HttpDoer};
use common::error::{DiscoveryError, ProtocolError};
use common::model::Service;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Bouncer configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the bouncer.
    pub base_url: String,
}

async fn get_json<T: DeserializeOwned>(
    doer: &dyn HttpDoer,
    token: &CancellationToken,
    config: &Config,
    path: &str,
) -> Result<T, DiscoveryError> {
    let data = httpx::get_with_base_url(doer, token, &config.base_url, path).await?;
    serde_json::from_slice(&data).map_err(|source| {
        ProtocolError::JsonDecode {
            context: format!("bouncer response for {path}"),
            source,
        }
        .into()
    })
}

/// Query the bouncer for the available collectors.
pub async fn get_collectors(
    doer: &dyn HttpDoer,
    token: &CancellationToken,
    config: &Config,
) -> Result<Vec<Service>, DiscoveryError> {
    get_json(doer, token, config, "/api/v1/collectors").await
}

/// Query the bouncer for the available test helpers, keyed by test name.
pub async fn get_test_helpers(
    doer: &dyn HttpDoer,
    token: &CancellationToken,
    config: &Config,
) -> Result<HashMap<String, Vec<Service>>, DiscoveryError> {
    get_json(doer, token, config, "/api/v1/test-helpers").await
}
