//! Error types emitted by the harvest CLI.
//!
//! Library failures are wrapped rather than flattened so the full source
//! chain reaches the final log line.

use std::sync::Arc;

use camino::Utf8PathBuf;
use harvest_data::{CatalogError, HarvestError, StoreError, TransportBuildError};
use thiserror::Error;
use tracing_subscriber::util::TryInitError;

/// Errors emitted by the harvest CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Provided arguments failed Clap validation.
    #[error(transparent)]
    ArgumentParsing(#[from] clap::Error),
    /// Configuration layering failed (files, env, CLI).
    #[error("failed to load configuration: {0}")]
    Configuration(#[from] Arc<ortho_config::OrthoError>),
    /// A required option is missing after configuration merging.
    #[error("missing {field} (set --{field} or {env})")]
    MissingArgument {
        field: &'static str,
        env: &'static str,
    },
    /// An option was supplied with a value that cannot be used.
    #[error("invalid --{field} value {value:?}: {reason}")]
    InvalidArgument {
        field: &'static str,
        value: String,
        reason: String,
    },
    /// The layer catalogue could not be read, written or queried.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP transport: {0}")]
    Transport(#[from] TransportBuildError),
    /// The SQLite store could not be opened.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The scratch directory could not be prepared.
    #[error("failed to prepare scratch directory {path:?}: {source}")]
    Scratch {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The harvest stopped on a fatal error.
    #[error("harvest failed: {0}")]
    Harvest(#[source] Box<HarvestError>),
    /// A global logger was already installed.
    #[error("failed to initialise logging: {0}")]
    Logging(#[from] TryInitError),
}

impl From<HarvestError> for CliError {
    fn from(source: HarvestError) -> Self {
        Self::Harvest(Box::new(source))
    }
}
