//! Connection abstraction consumed by the fetcher.
//!
//! The fetcher never talks to the network directly. It asks a
//! [`ConnectionSupplier`] for a fresh [`Connection`], sets the conditional
//! request headers it needs for resumption, and then opens the connection to
//! obtain a [`Response`]. This keeps transport concerns (TLS, proxies,
//! timeouts, connection pooling) outside the provisioning logic.
//!
//! [`HttpConnectionSupplier`] is the production implementation, built on
//! `reqwest`'s blocking client.

use std::io::Read;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder};

use super::error::{BundleError, BundleResult};

/// Default timeout for HTTP requests in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300; // 5 minutes

/// A not-yet-opened request for the bundle archive.
pub trait Connection: Send {
    /// URL (or other human-readable identity) of the resource.
    fn url(&self) -> &str;

    /// Set an outgoing request header. Only valid before [`Connection::open`].
    fn set_request_header(&mut self, name: &str, value: &str);

    /// Execute the request and return the response.
    fn open(self: Box<Self>) -> BundleResult<Box<dyn Response>>;
}

/// An opened response whose body is consumed through [`Read`].
pub trait Response: Read + Send {
    /// HTTP status code.
    fn status(&self) -> u16;

    /// Value of a response header, looked up case-insensitively.
    fn header(&self, name: &str) -> Option<String>;

    /// Length of this response's body, if the server declared one.
    fn content_length(&self) -> Option<u64>;
}

/// Produces a fresh [`Connection`] for each fetch attempt.
pub trait ConnectionSupplier: Send + Sync {
    /// Create a new, unopened connection.
    fn connect(&self) -> BundleResult<Box<dyn Connection>>;
}

impl<F> ConnectionSupplier for F
where
    F: Fn() -> BundleResult<Box<dyn Connection>> + Send + Sync,
{
    fn connect(&self) -> BundleResult<Box<dyn Connection>> {
        self()
    }
}

/// Supplies blocking HTTP connections to a fixed URL.
#[derive(Debug, Clone)]
pub struct HttpConnectionSupplier {
    client: Client,
    url: String,
    pub(crate) timeout: Duration,
}

impl HttpConnectionSupplier {
    /// Create a supplier with the default timeout.
    pub fn new(url: impl Into<String>) -> BundleResult<Self> {
        Self::with_timeout(url, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create a supplier with a custom timeout.
    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> BundleResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BundleError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }

    /// The URL every connection is opened against.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl ConnectionSupplier for HttpConnectionSupplier {
    fn connect(&self) -> BundleResult<Box<dyn Connection>> {
        Ok(Box::new(HttpConnection {
            client: self.client.clone(),
            url: self.url.clone(),
            headers: Vec::new(),
            timeout: self.timeout,
        }))
    }
}

/// A pending GET request.
struct HttpConnection {
    client: Client,
    url: String,
    headers: Vec<(String, String)>,
    timeout: Duration,
}

impl HttpConnection {
    fn request(&self) -> RequestBuilder {
        self.headers
            .iter()
            .fold(self.client.get(&self.url), |request, (name, value)| {
                request.header(name.as_str(), value.as_str())
            })
    }
}

impl Connection for HttpConnection {
    fn url(&self) -> &str {
        &self.url
    }

    fn set_request_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    fn open(self: Box<Self>) -> BundleResult<Box<dyn Response>> {
        let response = self.request().send().map_err(|e| {
            let reason = if e.is_timeout() {
                format!("timed out after {}s", self.timeout.as_secs())
            } else {
                e.to_string()
            };
            BundleError::DownloadFailed {
                url: self.url.clone(),
                reason,
            }
        })?;

        Ok(Box::new(HttpResponse { inner: response }))
    }
}

struct HttpResponse {
    inner: reqwest::blocking::Response,
}

impl Read for HttpResponse {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Response for HttpResponse {
    fn status(&self) -> u16 {
        self.inner.status().as_u16()
    }

    fn header(&self, name: &str) -> Option<String> {
        self.inner
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    fn content_length(&self) -> Option<u64> {
        self.inner.content_length()
    }
}
