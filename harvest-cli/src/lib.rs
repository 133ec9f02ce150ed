//! Command-line interface for harvesting WFS layers into SQLite.
#![forbid(unsafe_code)]

use clap::{Parser, Subcommand};
use harvest_core::ThreadPause;

mod catalog;
mod error;
mod harvest;
mod logging;

pub use error::CliError;
pub use logging::init_logging;

use catalog::CatalogArgs;
use harvest::HarvestArgs;

pub(crate) const ARG_WORKSPACE: &str = "workspace";
pub(crate) const ARG_LAYER: &str = "layer";
pub(crate) const ARG_START: &str = "start";
pub(crate) const ARG_END: &str = "end";
pub(crate) const ARG_DATABASE: &str = "database";
pub(crate) const ARG_SCHEMA: &str = "schema";
pub(crate) const ARG_SCRATCH_DIR: &str = "scratch-dir";
pub(crate) const ARG_SERVICE_ROOT: &str = "service-root";
pub(crate) const ARG_TARGET_SRID: &str = "target-srid";
pub(crate) const ARG_REQUEST_SRS: &str = "request-srs";
pub(crate) const ARG_SORT_KEY: &str = "sort-key";
pub(crate) const ARG_IDENTITY: &str = "identity";
pub(crate) const ARG_MAX_ATTEMPTS: &str = "max-attempts";
pub(crate) const ARG_RETRY_DELAY: &str = "retry-delay-secs";
pub(crate) const ARG_CATALOG: &str = "catalog";
pub(crate) const ARG_ID_PROPERTY: &str = "id-property";
pub(crate) const ARG_PAGE_CAP: &str = "page-cap";
pub(crate) const ARG_MATCH: &str = "match";
pub(crate) const ARG_OUTPUT: &str = "output";

pub(crate) const ENV_WORKSPACE: &str = "WFS_HARVEST_CMDS_HARVEST_WORKSPACE";
pub(crate) const ENV_LAYER: &str = "WFS_HARVEST_CMDS_HARVEST_LAYER";
pub(crate) const ENV_START: &str = "WFS_HARVEST_CMDS_HARVEST_START";
pub(crate) const ENV_END: &str = "WFS_HARVEST_CMDS_HARVEST_END";

/// Run the CLI with the current process arguments and environment.
///
/// # Errors
///
/// Returns [`CliError`] when arguments or configuration are invalid, or when
/// the selected command fails.
pub fn run() -> Result<(), CliError> {
    let cli = Cli::try_parse().map_err(CliError::ArgumentParsing)?;
    init_logging()?;
    match cli.command {
        Command::Harvest(args) => {
            let report = harvest::run_harvest(args, &ThreadPause)?;
            if !report.is_clean() {
                tracing::warn!("harvest finished with skipped work: {report}");
            }
        }
        Command::Catalog(args) => catalog::run_catalog(args, &ThreadPause)?,
    }
    Ok(())
}

#[derive(Debug, Parser)]
#[command(
    name = "wfs-harvest",
    about = "Harvest paginated WFS layers into a spatially indexed SQLite store",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Harvest one layer for a date range.
    Harvest(HarvestArgs),
    /// Describe every published layer and write the catalogue file.
    Catalog(CatalogArgs),
}

#[cfg(test)]
mod tests;
