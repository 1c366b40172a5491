//! The injected HTTP transport boundary.
//!
//! The engine never talks to the network itself: task actions receive a
//! `&dyn Transport` and describe requests as plain data. The concrete
//! client (connection pooling, TLS, proxies) lives behind the trait, so a
//! stub transport can drive the whole engine in tests.
//!
//! A transport reports only transport-level failures (timeouts, refused
//! connections, malformed exchanges). HTTP status handling is scenario
//! business: a 404 may be success for one task and failure for another, so
//! responses come back whole and [`classify_status`] is offered as the
//! common policy for tasks that just want the obvious mapping.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::task::FailureKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

/// Request body, built structurally rather than by string templating so a
/// malformed payload fails at construction instead of on the wire.
#[derive(Debug, Clone)]
pub enum HttpBody {
    Empty,
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
}

/// One request as the engine describes it to the transport.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: HttpBody,
}

impl HttpRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: HttpBody::Empty,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Convenience for the `Authorization: Bearer <token>` header every
    /// authenticated task in a scenario ends up setting.
    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {token}"))
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = HttpBody::Json(body);
        self
    }

    pub fn form(mut self, fields: Vec<(String, String)>) -> Self {
        self.body = HttpBody::Form(fields);
        self
    }
}

/// What came back, status included — classification is left to the caller.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    pub latency: Duration,
}

impl HttpResponse {
    /// Parses the body as JSON, mapping parse failures to
    /// [`FailureKind::ProtocolError`].
    pub fn json(&self) -> Result<serde_json::Value, FailureKind> {
        serde_json::from_str(&self.body).map_err(|_| FailureKind::ProtocolError)
    }
}

/// Maps an HTTP status to the failure taxonomy: `401`/`403` are auth
/// failures, `5xx` are server errors, everything else is not a failure at
/// this layer.
pub fn classify_status(status: u16) -> Option<FailureKind> {
    match status {
        401 | 403 => Some(FailureKind::AuthError),
        500..=599 => Some(FailureKind::ServerError(status)),
        _ => None,
    }
}

/// HTTP-capable client abstraction injected into the engine.
///
/// Implementations must be safe to share across every virtual user; per-call
/// state belongs in the request, per-user state in the session.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, FailureKind>;
}

#[cfg(feature = "reqwest-transport")]
pub use builtins::ReqwestTransport;

#[cfg(feature = "reqwest-transport")]
mod builtins {
    use std::time::Instant;

    use super::*;

    /// The built-in [`Transport`] over a shared [`reqwest::Client`].
    ///
    /// Enforces a per-call timeout so one hung request cannot stall its
    /// user past the configured bound, and maps reqwest's error surface to
    /// the engine's failure taxonomy.
    pub struct ReqwestTransport {
        base_url: String,
        client: reqwest::Client,
        timeout: Duration,
    }

    impl ReqwestTransport {
        pub fn new(base_url: impl Into<String>) -> Self {
            Self {
                base_url: base_url.into(),
                client: reqwest::Client::new(),
                timeout: Duration::from_secs(30),
            }
        }

        pub fn with_timeout(mut self, timeout: Duration) -> Self {
            self.timeout = timeout;
            self
        }

        fn classify_error(err: &reqwest::Error) -> FailureKind {
            if err.is_timeout() {
                FailureKind::Timeout
            } else if err.is_connect() {
                FailureKind::ConnectionError
            } else {
                FailureKind::ProtocolError
            }
        }
    }

    #[async_trait]
    impl Transport for ReqwestTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, FailureKind> {
            let method = match request.method {
                HttpMethod::Get => reqwest::Method::GET,
                HttpMethod::Post => reqwest::Method::POST,
                HttpMethod::Put => reqwest::Method::PUT,
                HttpMethod::Patch => reqwest::Method::PATCH,
                HttpMethod::Delete => reqwest::Method::DELETE,
            };
            let url = format!("{}{}", self.base_url, request.path);

            let mut builder = self.client.request(method, url).timeout(self.timeout);
            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }
            builder = match request.body {
                HttpBody::Empty => builder,
                HttpBody::Json(value) => builder.json(&value),
                HttpBody::Form(fields) => builder.form(&fields),
            };

            let started = Instant::now();
            let response = builder
                .send()
                .await
                .map_err(|e| Self::classify_error(&e))?;
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .map_err(|e| Self::classify_error(&e))?;

            Ok(HttpResponse {
                status,
                body,
                latency: started.elapsed(),
            })
        }
    }
}

#[cfg(test)]
pub(crate) mod stub {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Test transport: sleeps for a configured latency, then returns a
    /// canned status. Counts the calls it served.
    pub(crate) struct StubTransport {
        pub latency: Duration,
        pub status: u16,
        pub calls: AtomicU64,
    }

    impl StubTransport {
        pub(crate) fn instant_ok() -> Self {
            Self {
                latency: Duration::from_millis(1),
                status: 200,
                calls: AtomicU64::new(0),
            }
        }

        pub(crate) fn call_count(&self) -> u64 {
            self.calls.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, FailureKind> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(self.latency).await;
            Ok(HttpResponse {
                status: self.status,
                body: "{}".to_string(),
                latency: self.latency,
            })
        }
    }
}
