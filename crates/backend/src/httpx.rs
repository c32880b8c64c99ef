//! One-shot HTTP requests.
//!
//! The [`HttpDoer`] trait is the capability seam every other client in
//! this crate goes through: production wiring supplies [`WebClient`],
//! tests supply [`crate::testing::FakeDoer`].

use async_trait::async_trait;
use common::error::NetworkError;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::Method;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Upper bound for bodies read fully into memory. Bouncer and
/// collector payloads fit comfortably; measurement data never goes
/// through this helper.
pub const MAX_BODY_SIZE: usize = 8 << 20;

/// The wire user agent.
pub fn user_agent() -> String {
    format!("MKEngine/{}", common::VERSION)
}

/// An HTTP request to perform.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: String,

    /// Optional content type of the request body.
    pub content_type: Option<String>,

    /// Optional user agent; the engine default when not set.
    pub user_agent: Option<String>,

    pub body: Vec<u8>,

    /// When set, a non-200 status is returned as a [`Response`] rather
    /// than a [`NetworkError::RequestFailed`].
    pub no_fail_on_error: bool,

    /// Local SOCKS5 proxy port. When set, all traffic including name
    /// resolution goes through `127.0.0.1:<port>`.
    pub socks5_port: Option<u16>,
}

impl Request {
    /// A GET request for the given URL.
    pub fn get(url: impl Into<String>) -> Request {
        Request {
            method: Method::GET,
            url: url.into(),
            content_type: None,
            user_agent: None,
            body: Vec::new(),
            no_fail_on_error: false,
            socks5_port: None,
        }
    }

    /// A POST request with a JSON body.
    pub fn post_json(url: impl Into<String>, body: Vec<u8>) -> Request {
        Request {
            method: Method::POST,
            url: url.into(),
            content_type: Some("application/json".to_string()),
            user_agent: None,
            body,
            no_fail_on_error: false,
            socks5_port: None,
        }
    }
}

/// An HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// Capability to perform one-shot HTTP requests.
#[async_trait]
pub trait HttpDoer: Send + Sync {
    async fn perform(
        &self,
        token: &CancellationToken,
        request: Request,
    ) -> Result<Response, NetworkError>;
}

/// Production [`HttpDoer`] backed by reqwest.
#[derive(Debug, Clone, Default)]
pub struct WebClient {
    client: reqwest::Client,
}

impl WebClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HttpDoer for WebClient {
    async fn perform(
        &self,
        token: &CancellationToken,
        request: Request,
    ) -> Result<Response, NetworkError> {
        let url = request.url.clone();
        let client = match request.socks5_port {
            Some(port) => {
                // socks5h resolves names on the proxy side, so DNS
                // never bypasses the tunnel.
                let proxy = reqwest::Proxy::all(format!("socks5h://127.0.0.1:{port}"))
                    .map_err(|e| NetworkError::transport_failed(&url, e))?;
                reqwest::Client::builder()
                    .proxy(proxy)
                    .build()
                    .map_err(|e| NetworkError::transport_failed(&url, e))?
            }
            None => self.client.clone(),
        };

        let mut builder = client
            .request(request.method, &request.url)
            .header(
                USER_AGENT,
                request.user_agent.unwrap_or_else(user_agent),
            )
            .body(request.body);
        if let Some(content_type) = request.content_type {
            builder = builder.header(CONTENT_TYPE, content_type);
        }

        let mut response = tokio::select! {
            _ = token.cancelled() => {
                return Err(NetworkError::Cancelled { operation: url });
            }
            result = builder.send() => {
                result.map_err(|e| NetworkError::transport_failed(&url, e))?
            }
        };

        let status = response.status().as_u16();
        if status != 200 && !request.no_fail_on_error {
            return Err(NetworkError::RequestFailed { url, status });
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);

        let mut body = Vec::new();
        loop {
            let chunk = tokio::select! {
                _ = token.cancelled() => {
                    return Err(NetworkError::Cancelled { operation: url });
                }
                result = response.chunk() => {
                    result.map_err(|e| NetworkError::transport_failed(&url, e))?
                }
            };
            match chunk {
                Some(bytes) => {
                    if body.len() + bytes.len() > MAX_BODY_SIZE {
                        return Err(NetworkError::BodyTooLarge {
                            url,
                            limit: MAX_BODY_SIZE,
                        });
                    }
                    body.extend_from_slice(&bytes);
                }
                None => break,
            }
        }

        Ok(Response {
            status,
            content_type,
            body,
        })
    }
}

/// Join a base URL with an absolute path.
pub fn join_url(base_url: &str, path: &str) -> Result<String, NetworkError> {
    let mut url = Url::parse(base_url).map_err(|e| NetworkError::InvalidUrl {
        url: base_url.to_string(),
        source: Box::new(e),
    })?;
    url.set_path(path);
    Ok(url.to_string())
}

/// Perform a GET and return the body.
pub async fn get(
    doer: &dyn HttpDoer,
    token: &CancellationToken,
    url: &str,
) -> Result<Vec<u8>, NetworkError> {
    let response = doer.perform(token, Request::get(url)).await?;
    Ok(response.body)
}

/// Like [`get`], with the URL split into base and path.
pub async fn get_with_base_url(
    doer: &dyn HttpDoer,
    token: &CancellationToken,
    base_url: &str,
    path: &str,
) -> Result<Vec<u8>, NetworkError> {
    get(doer, token, &join_url(base_url, path)?).await
}

/// Perform a JSON POST against base URL plus path and return the body.
pub async fn post_with_base_url(
    doer: &dyn HttpDoer,
    token: &CancellationToken,
    base_url: &str,
    path: &str,
    body: Vec<u8>,
) -> Result<Vec<u8>, NetworkError> {
    let response = doer
        .perform(token, Request::post_json(join_url(base_url, path)?, body))
        .await?;
    Ok(response.body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDoer;

    #[test]
    fn test_user_agent_shape() {
        let ua = user_agent();
        assert!(ua.starts_with("MKEngine/"));
    }

    #[test]
    fn test_join_url() {
        let url = join_url("https://bouncer.example", "/api/v1/collectors").unwrap();
        assert_eq!(url, "https://bouncer.example/api/v1/collectors");
    }

    #[test]
    fn test_join_url_rejects_garbage() {
        assert!(join_url("not a url", "/x").is_err());
    }

    #[tokio::test]
    async fn test_get_returns_body() {
        let doer = FakeDoer::new().on("/hello", b"world".to_vec());
        let token = CancellationToken::new();
        let body = get(&doer, &token, "https://x.example/hello").await.unwrap();
        assert_eq!(body, b"world");
    }

    #[tokio::test]
    async fn test_non_200_fails_by_default() {
        let doer = FakeDoer::new().on_status("/gone", 404);
        let token = CancellationToken::new();
        let err = get(&doer, &token, "https://x.example/gone")
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::RequestFailed { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_no_fail_on_error_passes_status_through() {
        let doer = FakeDoer::new().on_status("/gone", 404);
        let token = CancellationToken::new();
        let mut request = Request::get("https://x.example/gone");
        request.no_fail_on_error = true;
        let response = doer.perform(&token, request).await.unwrap();
        assert_eq!(response.status, 404);
    }
}
