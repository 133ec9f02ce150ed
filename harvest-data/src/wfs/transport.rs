//! Blocking HTTP transport for WFS requests.
//!
//! The [`WfsTransport`] trait is synchronous so the harvest pipeline stays a
//! plain sequential loop. [`HttpWfsTransport`] bridges to `reqwest` by
//! blocking on a Tokio runtime it owns.

use std::time::Duration;

use reqwest::Client;
use reqwest::header::USER_AGENT;
use thiserror::Error;
use tokio::runtime::{Handle, Runtime, RuntimeFlavor};
use url::Url;

use super::TransportError;

/// Default user agent for WFS requests.
pub const DEFAULT_USER_AGENT: &str = "wfs-harvest/0.1";

/// Default request timeout in seconds. Large pages take minutes to render.
const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Issues a GET request and returns the response body.
pub trait WfsTransport {
    /// Fetch `url`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] for network failures and non-success
    /// statuses.
    fn get(&self, url: &Url) -> Result<Vec<u8>, TransportError>;
}

/// Error type for [`HttpWfsTransport`] construction failures.
#[derive(Debug, Error)]
pub enum TransportBuildError {
    /// Failed to build the HTTP client.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
    /// Failed to build the Tokio runtime.
    #[error("failed to build Tokio runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

/// Configuration for [`HttpWfsTransport`].
#[derive(Debug, Clone)]
pub struct HttpWfsTransportConfig {
    /// Request timeout, covering connect and body download.
    pub timeout: Duration,
    /// User agent string sent with every request.
    pub user_agent: String,
}

impl Default for HttpWfsTransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

impl HttpWfsTransportConfig {
    /// Set the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the user agent string.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// `reqwest`-backed [`WfsTransport`].
///
/// Outside any Tokio runtime the transport blocks on its own current-thread
/// runtime. Inside a multi-threaded runtime it borrows that runtime's handle
/// through [`tokio::task::block_in_place`].
pub struct HttpWfsTransport {
    client: Client,
    config: HttpWfsTransportConfig,
    runtime: Runtime,
}

impl std::fmt::Debug for HttpWfsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpWfsTransport")
            .field("client", &self.client)
            .field("config", &self.config)
            .field("runtime", &"<tokio::runtime::Runtime>")
            .finish()
    }
}

impl HttpWfsTransport {
    /// Create a transport with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client or Tokio runtime fails to build.
    pub fn new() -> Result<Self, TransportBuildError> {
        Self::with_config(HttpWfsTransportConfig::default())
    }

    /// Create a transport with explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client or Tokio runtime fails to build.
    pub fn with_config(config: HttpWfsTransportConfig) -> Result<Self, TransportBuildError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30).min(config.timeout))
            .timeout(config.timeout)
            .build()
            .map_err(TransportBuildError::HttpClient)?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(TransportBuildError::Runtime)?;
        Ok(Self {
            client,
            config,
            runtime,
        })
    }

    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, TransportError> {
        let response = self
            .client
            .get(url.clone())
            .header(USER_AGENT, self.config.user_agent.as_str())
            .send()
            .await
            .map_err(|err| self.convert_reqwest_error(&err, url))?
            .error_for_status()
            .map_err(|err| self.convert_reqwest_error(&err, url))?;
        let body = response
            .bytes()
            .await
            .map_err(|err| self.convert_reqwest_error(&err, url))?;
        Ok(body.to_vec())
    }

    fn convert_reqwest_error(&self, error: &reqwest::Error, url: &Url) -> TransportError {
        if error.is_timeout() {
            return TransportError::Timeout {
                url: url.to_string(),
                timeout_secs: self.config.timeout.as_secs(),
            };
        }
        if let Some(status) = error.status() {
            return TransportError::Http {
                url: url.to_string(),
                status: status.as_u16(),
                message: status
                    .canonical_reason()
                    .map_or_else(|| error.to_string(), str::to_owned),
            };
        }
        TransportError::Network {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}

impl WfsTransport for HttpWfsTransport {
    fn get(&self, url: &Url) -> Result<Vec<u8>, TransportError> {
        let future = self.fetch(url);
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| handle.block_on(future))
            }
            // No runtime detected, or current_thread runtime: use our own runtime.
            _ => self.runtime.block_on(future),
        }
    }
}
