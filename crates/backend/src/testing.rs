//! Test doubles for the HTTP capability seam.
//!
//! Kept outside `#[cfg(test)]` so that downstream crates can drive
//! their own tests through the same fake.

use crate::httpx::{HttpDoer, Request, Response};
use async_trait::async_trait;
use common::error::NetworkError;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

enum Canned {
    Body(Vec<u8>),
    Status(u16),
    TransportError,
}

struct Route {
    url_contains: String,
    canned: Canned,
}

/// An [`HttpDoer`] that answers from a canned route table.
///
/// Routes are matched by substring against the request URL, first
/// match wins. Every request is recorded for later inspection.
#[derive(Default)]
pub struct FakeDoer {
    routes: Vec<Route>,
    requests: Mutex<Vec<Request>>,
}

impl FakeDoer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer 200 with the given body when the URL contains `pattern`.
    pub fn on(mut self, pattern: &str, body: Vec<u8>) -> Self {
        self.routes.push(Route {
            url_contains: pattern.to_string(),
            canned: Canned::Body(body),
        });
        self
    }

    /// Answer with an empty body and the given status.
    pub fn on_status(mut self, pattern: &str, status: u16) -> Self {
        self.routes.push(Route {
            url_contains: pattern.to_string(),
            canned: Canned::Status(status),
        });
        self
    }

    /// Fail the transport when the URL contains `pattern`.
    pub fn on_transport_error(mut self, pattern: &str) -> Self {
        self.routes.push(Route {
            url_contains: pattern.to_string(),
            canned: Canned::TransportError,
        });
        self
    }

    /// Number of requests performed so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Snapshot of the requests performed so far.
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpDoer for FakeDoer {
    async fn perform(
        &self,
        _token: &CancellationToken,
        request: Request,
    ) -> Result<Response, NetworkError> {
        let url = request.url.clone();
        let no_fail_on_error = request.no_fail_on_error;
        self.requests.lock().unwrap().push(request);

        let route = self
            .routes
            .iter()
            .find(|route| url.contains(&route.url_contains));
        match route {
            Some(Route {
                canned: Canned::Body(body),
                ..
            }) => Ok(Response {
                status: 200,
                content_type: Some("application/json".to_string()),
                body: body.clone(),
            }),
            Some(Route {
                canned: Canned::Status(status),
                ..
            }) => {
                if *status != 200 && !no_fail_on_error {
                    Err(NetworkError::RequestFailed {
                        url,
                        status: *status,
                    })
                } else {
                    Ok(Response {
                        status: *status,
                        content_type: None,
                        body: Vec::new(),
                    })
                }
            }
            Some(Route {
                canned: Canned::TransportError,
                ..
            }) => Err(NetworkError::transport_failed(
                &url,
                std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused"),
            )),
            None => Err(NetworkError::transport_failed(
                &url,
                std::io::Error::new(std::io::ErrorKind::NotFound, "no fake route"),
            )),
        }
    }
}
