//! `catalog` command implementation.

use camino::Utf8PathBuf;
use clap::Parser;
use harvest_core::{Pause, RetryPolicy};
use harvest_data::{HttpWfsTransport, LayerCatalog, WfsService, WfsTransport};
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::harvest::{DEFAULT_CATALOG, parse_policy, parse_service_root};
use crate::{ARG_MAX_ATTEMPTS, ARG_OUTPUT, ARG_RETRY_DELAY, ARG_SERVICE_ROOT, CliError};

/// CLI arguments for the `catalog` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    long_about = "List every feature type the service publishes, describe \
                 each one, and write the result as the catalogue consulted \
                 by `harvest`. Layers that cannot be described are kept \
                 with their error.",
    about = "Build the layer catalogue"
)]
#[ortho_config(prefix = "WFS_HARVEST")]
pub(crate) struct CatalogArgs {
    /// Where to write the catalogue.
    #[arg(long = ARG_OUTPUT, value_name = "path")]
    #[serde(default)]
    pub(crate) output: Option<Utf8PathBuf>,
    /// Root URL of the GeoServer instance.
    #[arg(long = ARG_SERVICE_ROOT, value_name = "url")]
    #[serde(default)]
    pub(crate) service_root: Option<String>,
    /// Attempts per request before giving up.
    #[arg(long = ARG_MAX_ATTEMPTS, value_name = "n")]
    #[serde(default)]
    pub(crate) max_attempts: Option<u32>,
    /// Seconds to wait between attempts.
    #[arg(long = ARG_RETRY_DELAY, value_name = "secs")]
    #[serde(default)]
    pub(crate) retry_delay_secs: Option<u64>,
}

impl CatalogArgs {
    pub(crate) fn into_config(self) -> Result<CatalogConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        CatalogConfig::try_from(merged)
    }
}

/// Resolved `catalog` command configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CatalogConfig {
    pub(crate) output: Utf8PathBuf,
    pub(crate) service: WfsService,
    pub(crate) policy: RetryPolicy,
}

impl TryFrom<CatalogArgs> for CatalogConfig {
    type Error = CliError;

    fn try_from(args: CatalogArgs) -> Result<Self, Self::Error> {
        Ok(Self {
            output: args
                .output
                .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_CATALOG)),
            service: parse_service_root(args.service_root)?,
            policy: parse_policy(args.max_attempts, args.retry_delay_secs)?,
        })
    }
}

pub(crate) fn run_catalog(args: CatalogArgs, pause: &dyn Pause) -> Result<(), CliError> {
    let config = args.into_config()?;
    let transport = HttpWfsTransport::new()?;
    write_catalog(&config, &transport, pause).map(|_| ())
}

/// Build the catalogue from `transport` and save it to the configured path.
pub(crate) fn write_catalog(
    config: &CatalogConfig,
    transport: &dyn WfsTransport,
    pause: &dyn Pause,
) -> Result<LayerCatalog, CliError> {
    let catalog = LayerCatalog::build(transport, &config.service, &config.policy, pause)?;
    catalog.save(&config.output)?;
    let (layers, failed) = catalog
        .workspaces()
        .flat_map(|(_, workspace)| workspace.layers.values())
        .fold((0_usize, 0_usize), |(layers, failed), entry| {
            (layers + 1, failed + usize::from(entry.schema.is_none()))
        });
    info!(
        "catalogue of {layers} layers written to {} ({failed} without a schema)",
        config.output
    );
    Ok(catalog)
}
