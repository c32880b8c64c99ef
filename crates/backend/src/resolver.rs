//! Resolver IP discovery.
//!
//! `whoami.akamai.net` resolves to the address of the resolver that
//! asked, which is exactly the datum we want to attach to reports.

use common::error::NetworkError;
use tokio_util::sync::CancellationToken;

/// The resolver IP reported when discovery fails.
pub const DEFAULT_RESOLVER_IP: &str = "127.0.0.1";

const WHOAMI_HOST: &str = "whoami.akamai.net";

/// Discover the resolver IP. Callers fall back to
/// [`DEFAULT_RESOLVER_IP`] when this fails.
pub async fn perform(token: &CancellationToken) -> Result<String, NetworkError> {
    let addrs = tokio::select! {
        _ = token.cancelled() => {
            return Err(NetworkError::Cancelled {
                operation: "resolver lookup".to_string(),
            });
        }
        result = tokio::net::lookup_host((WHOAMI_HOST, 53)) => {
            result.map_err(|e| NetworkError::ResolutionFailed {
                host: WHOAMI_HOST.to_string(),
                details: e.to_string(),
            })?
        }
    };
    let addrs: Vec<_> = addrs.collect();
    if addrs.len() != 1 {
        return Err(NetworkError::ResolutionFailed {
            host: WHOAMI_HOST.to_string(),
            details: format!("unexpected number of addresses: {}", addrs.len()),
        });
    }
    Ok(addrs[0].ip().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancelled_scope_short_circuits() {
        let token = CancellationToken::new();
        token.cancel();
        let err = perform(&token).await.unwrap_err();
        assert!(matches!(err, NetworkError::Cancelled { .. }));
    }
}
