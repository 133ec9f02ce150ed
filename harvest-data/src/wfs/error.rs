//! Error types produced by the WFS client.

use std::io;

use camino::Utf8PathBuf;
use harvest_core::RetryExhausted;
use thiserror::Error;

/// Transport-level errors encountered while issuing requests.
///
/// Every variant is treated as transient and retried.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The server returned an HTTP error status.
    #[error("request to {url} failed with status {status}: {message}")]
    Http {
        /// Fully qualified request URL.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Short error description.
        message: String,
    },
    /// The request did not complete in time.
    #[error("request to {url} timed out after {timeout_secs}s")]
    Timeout {
        /// Fully qualified request URL.
        url: String,
        /// Configured timeout.
        timeout_secs: u64,
    },
    /// The request failed below HTTP (DNS, TLS, connection reset).
    #[error("network error contacting {url}: {message}")]
    Network {
        /// Fully qualified request URL.
        url: String,
        /// Error reported by the HTTP client.
        message: String,
    },
    /// The service answered with an OGC exception report.
    #[error("service exception from {url}: {message}")]
    ServiceException {
        /// Fully qualified request URL.
        url: String,
        /// Exception text reported by the service.
        message: String,
    },
}

/// Errors raised by [`crate::CapabilityProbe`].
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Every attempt to fetch the hit count failed.
    #[error(transparent)]
    Exhausted(#[from] RetryExhausted<TransportError>),
    /// The hit count document did not carry a usable count.
    #[error("malformed hit count response from {url}: {reason}")]
    MalformedHits {
        /// Request URL.
        url: String,
        /// What was wrong with the document.
        reason: String,
    },
    /// The capabilities document could not be read.
    #[error("malformed capabilities document from {url}: {reason}")]
    MalformedCapabilities {
        /// Request URL.
        url: String,
        /// Parser diagnostic.
        reason: String,
    },
}

/// Errors raised by [`crate::RetryingFetcher::fetch`].
#[derive(Debug, Error)]
pub enum FetchError {
    /// Every attempt to fetch the page failed.
    #[error("fetching {url} failed after {attempts} attempts: {source}")]
    Exhausted {
        /// Request URL.
        url: String,
        /// Attempts made.
        attempts: u32,
        /// Error from the final attempt.
        source: TransportError,
    },
    /// The page body could not be written to the scratch directory.
    #[error("failed to write page artefact {path}: {source}")]
    WriteArtifact {
        /// Artefact path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
}
