//! HTTP transport seam
//!
//! The client signs requests and interprets responses; moving bytes is the
//! job of a [`Transport`]. [`HyperTransport`] is the production implementation:
//!
//! - HTTP/1.1 over hyper-util's pooled legacy client
//! - native-tls (OpenSSL) for TLS
//! - TCP_NODELAY and keepalive on the connector
//! - Per-request timeout
//! - Retries only when the connection itself fails; any HTTP status is
//!   returned to the caller untouched

use crate::fds::client::{FdsError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::HeaderMap;
use hyper::{Method, Request, StatusCode};
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::rt::TokioExecutor;
use native_tls::TlsConnector;
use std::time::Duration;

/// A fully signed request, ready to put on the wire
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Raw response; status interpretation is left to the client
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request. A non-2xx status is still `Ok`.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Connection settings for [`HyperTransport`]
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Extra attempts after a connection-level failure
    pub max_retries: u32,
    /// Skip certificate verification (test clusters only)
    pub insecure_tls: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(10),
            max_retries: 3,
            insecure_tls: false,
        }
    }
}

/// Pooled hyper client. Clone is cheap - the pool is shared.
#[derive(Clone)]
pub struct HyperTransport {
    client: HyperClient<HttpsConnector<HttpConnector>, Full<Bytes>>,
    request_timeout: Duration,
    max_retries: u32,
}

impl HyperTransport {
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let mut http = HttpConnector::new();
        http.set_nodelay(true);
        http.enforce_http(false);
        http.set_connect_timeout(Some(config.connect_timeout));
        http.set_keepalive(Some(Duration::from_secs(90)));

        let tls = if config.insecure_tls {
            tracing::warn!("INSECURE TLS MODE ENABLED: Certificate verification is disabled!");
            TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true)
                .build()
        } else {
            TlsConnector::new()
        }
        .map_err(|e| FdsError::Transport(format!("TLS connector: {}", e)))?;

        let https = HttpsConnector::from((http, tls.into()));

        let client = HyperClient::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(256)
            .set_host(true)
            .build(https);

        Ok(Self {
            client,
            request_timeout: config.request_timeout,
            max_retries: config.max_retries,
        })
    }

    async fn send_once(&self, request: &HttpRequest) -> std::result::Result<HttpResponse, Failure> {
        let mut builder = Request::builder()
            .method(request.method.clone())
            .uri(&request.url);
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        let hyper_request = builder
            .body(Full::new(request.body.clone()))
            .map_err(|e| Failure::Fatal(e.into()))?;

        let exchange = async {
            let response = self.client.request(hyper_request).await.map_err(|e| {
                let message = format!("Request failed: {}", e);
                if e.is_connect() {
                    Failure::Connect(message)
                } else {
                    Failure::Fatal(FdsError::Transport(message))
                }
            })?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response
                .collect()
                .await
                .map_err(|e| Failure::Fatal(FdsError::Transport(format!("Body error: {}", e))))?
                .to_bytes();
            Ok::<_, Failure>(HttpResponse {
                status,
                headers,
                body,
            })
        };

        tokio::time::timeout(self.request_timeout, exchange)
            .await
            .map_err(|_| {
                Failure::Fatal(FdsError::Transport(format!(
                    "{} {} timed out after {:?}",
                    request.method, request.url, self.request_timeout
                )))
            })?
    }
}

/// Outcome of one attempt that did not produce a response
enum Failure {
    /// No connection was made; the request never reached the server
    Connect(String),
    Fatal(FdsError),
}

#[async_trait]
impl Transport for HyperTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut attempt = 0;
        loop {
            match self.send_once(&request).await {
                Ok(response) => return Ok(response),
                Err(Failure::Connect(message)) if attempt < self.max_retries => {
                    let backoff = Duration::from_millis(100u64 * (1 << attempt.min(6)));
                    tracing::warn!(
                        method = %request.method,
                        url = %request.url,
                        attempt = attempt + 1,
                        error = %message,
                        "connection failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(Failure::Connect(message)) => return Err(FdsError::Transport(message)),
                Err(Failure::Fatal(e)) => return Err(e),
            }
        }
    }
}
