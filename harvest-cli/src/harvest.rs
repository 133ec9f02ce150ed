//! `harvest` command implementation.

use std::time::Duration;

use camino::Utf8PathBuf;
use clap::Parser;
use harvest_core::retry::{DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY};
use harvest_core::{
    HarvestContext, HarvestRange, Identifier, IdentityModel, Pause, PropertyName, RetryPolicy,
    Srid, TableRef, default_sort_key,
};
use harvest_data::{
    DEFAULT_SCHEMA, DEFAULT_SERVICE_ROOT, FeatureFilter, FeatureStore, HarvestReport,
    HarvestRequest, Harvester, HttpWfsTransport, LayerCatalog, Literal, Predicate, WfsService,
    WfsTransport,
};
use harvest_fs::ScratchDir;
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    ARG_CATALOG, ARG_DATABASE, ARG_END, ARG_ID_PROPERTY, ARG_IDENTITY, ARG_LAYER, ARG_MATCH,
    ARG_MAX_ATTEMPTS, ARG_PAGE_CAP, ARG_REQUEST_SRS, ARG_RETRY_DELAY, ARG_SCHEMA,
    ARG_SCRATCH_DIR, ARG_SERVICE_ROOT, ARG_SORT_KEY, ARG_START, ARG_TARGET_SRID, ARG_WORKSPACE,
    CliError, ENV_END, ENV_LAYER, ENV_START, ENV_WORKSPACE,
};

pub(crate) const DEFAULT_DATABASE: &str = "wfs_harvest.db";
pub(crate) const DEFAULT_SCRATCH_DIR: &str = "results";
pub(crate) const DEFAULT_CATALOG: &str = "wfs_info.json";

/// CLI arguments for the `harvest` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    long_about = "Harvest one layer of a workspace for a date range. The \
                 layer must be listed in the catalogue file; its date \
                 attribute, when present, restricts the request to \
                 [start, end]; each --match adds a case-insensitive \
                 pattern on an attribute. Options can come from CLI flags, \
                 configuration files, or environment variables.",
    about = "Harvest a WFS layer into the spatial store"
)]
#[ortho_config(prefix = "WFS_HARVEST")]
pub(crate) struct HarvestArgs {
    /// Workspace publishing the layer (e.g. `prodes-cerrado-nb`).
    #[arg(long = ARG_WORKSPACE, value_name = "name")]
    #[serde(default)]
    pub(crate) workspace: Option<String>,
    /// Layer to harvest (e.g. `yearly_deforestation`).
    #[arg(long = ARG_LAYER, value_name = "name")]
    #[serde(default)]
    pub(crate) layer: Option<String>,
    /// Inclusive lower bound of the date range (a year or a date).
    #[arg(long = ARG_START, value_name = "bound")]
    #[serde(default)]
    pub(crate) start: Option<String>,
    /// Inclusive upper bound of the date range (a year or a date).
    #[arg(long = ARG_END, value_name = "bound")]
    #[serde(default)]
    pub(crate) end: Option<String>,
    /// SQLite database receiving the features.
    #[arg(long = ARG_DATABASE, value_name = "path")]
    #[serde(default)]
    pub(crate) database: Option<Utf8PathBuf>,
    /// Schema holding the harvested tables.
    #[arg(long = ARG_SCHEMA, value_name = "name")]
    #[serde(default)]
    pub(crate) schema: Option<String>,
    /// Directory for downloaded pages.
    #[arg(long = ARG_SCRATCH_DIR, value_name = "dir")]
    #[serde(default)]
    pub(crate) scratch_dir: Option<Utf8PathBuf>,
    /// Root URL of the GeoServer instance.
    #[arg(long = ARG_SERVICE_ROOT, value_name = "url")]
    #[serde(default)]
    pub(crate) service_root: Option<String>,
    /// Spatial reference stored in the table (e.g. `4674`).
    #[arg(long = ARG_TARGET_SRID, value_name = "srid")]
    #[serde(default)]
    pub(crate) target_srid: Option<String>,
    /// Spatial reference requested from the service.
    #[arg(long = ARG_REQUEST_SRS, value_name = "srs")]
    #[serde(default)]
    pub(crate) request_srs: Option<String>,
    /// Attribute pages are sorted by.
    #[arg(long = ARG_SORT_KEY, value_name = "property")]
    #[serde(default)]
    pub(crate) sort_key: Option<String>,
    /// `natural-key` or `window-partitioned`.
    #[arg(long = ARG_IDENTITY, value_name = "model")]
    #[serde(default)]
    pub(crate) identity: Option<String>,
    /// Attempts per request before giving up.
    #[arg(long = ARG_MAX_ATTEMPTS, value_name = "n")]
    #[serde(default)]
    pub(crate) max_attempts: Option<u32>,
    /// Seconds to wait between attempts.
    #[arg(long = ARG_RETRY_DELAY, value_name = "secs")]
    #[serde(default)]
    pub(crate) retry_delay_secs: Option<u64>,
    /// Catalogue file written by the `catalog` command.
    #[arg(long = ARG_CATALOG, value_name = "path")]
    #[serde(default)]
    pub(crate) catalog: Option<Utf8PathBuf>,
    /// Attribute to use as the feature identifier when features carry none.
    #[arg(long = ARG_ID_PROPERTY, value_name = "property")]
    #[serde(default)]
    pub(crate) id_property: Option<String>,
    /// Override the page size advertised by the service.
    #[arg(long = ARG_PAGE_CAP, value_name = "n")]
    #[serde(default)]
    pub(crate) page_cap: Option<u64>,
    /// Case-insensitive attribute pattern, `property=pattern`; repeatable.
    /// `%` and `_` act as wildcards.
    #[arg(long = ARG_MATCH, value_name = "property=pattern")]
    #[serde(default)]
    pub(crate) matches: Option<Vec<String>>,
}

impl HarvestArgs {
    pub(crate) fn into_config(self) -> Result<HarvestConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        HarvestConfig::try_from(merged)
    }
}

/// Resolved `harvest` command configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HarvestConfig {
    pub(crate) context: HarvestContext,
    pub(crate) database: Utf8PathBuf,
    pub(crate) schema: Identifier,
    pub(crate) scratch_dir: Utf8PathBuf,
    pub(crate) service: WfsService,
    pub(crate) target_srid: Srid,
    pub(crate) request_srs: Srid,
    pub(crate) sort_key: PropertyName,
    pub(crate) identity: IdentityModel,
    pub(crate) policy: RetryPolicy,
    pub(crate) catalog: Utf8PathBuf,
    pub(crate) id_property: Option<String>,
    pub(crate) page_cap: Option<u64>,
    pub(crate) text_matches: Vec<Predicate>,
}

impl HarvestConfig {
    /// Table receiving this harvest's features.
    pub(crate) fn table(&self) -> Result<TableRef, CliError> {
        let name = self.context.table_name();
        let table = Identifier::new(name.as_str()).map_err(|err| CliError::InvalidArgument {
            field: ARG_LAYER,
            value: name.clone(),
            reason: err.to_string(),
        })?;
        Ok(TableRef::new(self.schema.clone(), table))
    }

    /// Scratch directory dedicated to this harvest.
    pub(crate) fn harvest_scratch(&self) -> Utf8PathBuf {
        self.scratch_dir.join(self.context.artifact_stem())
    }

    /// Build the request for the layer, restricting it to the date range
    /// when the catalogue lists a date attribute. Text matches are ANDed
    /// after the range.
    pub(crate) fn request(&self, catalog: &LayerCatalog) -> Result<HarvestRequest, CliError> {
        let range = match catalog.filter_property(self.context.workspace(), self.context.layer())? {
            Some(property) => self.range_filter(property),
            None => {
                warn!(
                    "{} layer has no date attribute; harvesting without a date range",
                    self.context
                );
                FeatureFilter::default()
            }
        };
        let filter = self
            .text_matches
            .iter()
            .cloned()
            .fold(range, FeatureFilter::and);
        Ok(HarvestRequest {
            context: self.context.clone(),
            filter,
            sort_key: self.sort_key.clone(),
            request_srs: self.request_srs,
            target_srid: self.target_srid,
            identity: self.identity,
            id_property: self.id_property.clone(),
            table: self.table()?,
            page_cap: self.page_cap,
        })
    }

    fn range_filter(&self, property: PropertyName) -> FeatureFilter {
        let Some(range) = self.context.range() else {
            return FeatureFilter::default();
        };
        FeatureFilter::default().and(Predicate::Between {
            property,
            lower: Literal::infer(&range.start),
            upper: Literal::infer(&range.end),
        })
    }
}

impl TryFrom<HarvestArgs> for HarvestConfig {
    type Error = CliError;

    fn try_from(args: HarvestArgs) -> Result<Self, Self::Error> {
        let workspace = args.workspace.ok_or(CliError::MissingArgument {
            field: ARG_WORKSPACE,
            env: ENV_WORKSPACE,
        })?;
        let layer = args.layer.ok_or(CliError::MissingArgument {
            field: ARG_LAYER,
            env: ENV_LAYER,
        })?;
        let start = args.start.ok_or(CliError::MissingArgument {
            field: ARG_START,
            env: ENV_START,
        })?;
        let end = args.end.ok_or(CliError::MissingArgument {
            field: ARG_END,
            env: ENV_END,
        })?;

        let schema_name = args.schema.unwrap_or_else(|| DEFAULT_SCHEMA.to_owned());
        let schema = Identifier::new(schema_name.as_str())
            .map_err(|err| invalid(ARG_SCHEMA, &schema_name, err))?;
        let service = parse_service_root(args.service_root)?;
        let target_srid = parse_srid(ARG_TARGET_SRID, args.target_srid)?;
        let request_srs = parse_srid(ARG_REQUEST_SRS, args.request_srs)?;
        let sort_key = match args.sort_key {
            Some(value) => {
                PropertyName::new(value.as_str()).map_err(|err| invalid(ARG_SORT_KEY, &value, err))?
            }
            None => default_sort_key(),
        };
        let identity = match args.identity {
            Some(value) => value
                .parse::<IdentityModel>()
                .map_err(|err| invalid(ARG_IDENTITY, &value, err))?,
            None => IdentityModel::default(),
        };
        let policy = parse_policy(args.max_attempts, args.retry_delay_secs)?;
        if args.page_cap == Some(0) {
            return Err(invalid(ARG_PAGE_CAP, "0", "must be positive"));
        }
        let text_matches = args
            .matches
            .unwrap_or_default()
            .iter()
            .map(String::as_str)
            .map(parse_match)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            context: HarvestContext::new(workspace, layer).with_range(HarvestRange::new(start, end)),
            database: args
                .database
                .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_DATABASE)),
            schema,
            scratch_dir: args
                .scratch_dir
                .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_SCRATCH_DIR)),
            service,
            target_srid,
            request_srs,
            sort_key,
            identity,
            policy,
            catalog: args
                .catalog
                .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_CATALOG)),
            id_property: args.id_property,
            page_cap: args.page_cap,
            text_matches,
        })
    }
}

pub(crate) fn invalid(field: &'static str, value: &str, reason: impl ToString) -> CliError {
    CliError::InvalidArgument {
        field,
        value: value.to_owned(),
        reason: reason.to_string(),
    }
}

pub(crate) fn parse_service_root(value: Option<String>) -> Result<WfsService, CliError> {
    let root = value.unwrap_or_else(|| DEFAULT_SERVICE_ROOT.to_owned());
    WfsService::new(&root).map_err(|err| invalid(ARG_SERVICE_ROOT, &root, err))
}

pub(crate) fn parse_policy(
    max_attempts: Option<u32>,
    delay_secs: Option<u64>,
) -> Result<RetryPolicy, CliError> {
    let attempts = max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);
    let delay = delay_secs.map_or(DEFAULT_RETRY_DELAY, Duration::from_secs);
    RetryPolicy::new(attempts, delay)
        .map_err(|err| invalid(ARG_MAX_ATTEMPTS, &attempts.to_string(), err))
}

fn parse_match(entry: &str) -> Result<Predicate, CliError> {
    let (property, pattern) = entry
        .split_once('=')
        .ok_or_else(|| invalid(ARG_MATCH, entry, "expected property=pattern"))?;
    let property =
        PropertyName::new(property.trim()).map_err(|err| invalid(ARG_MATCH, entry, err))?;
    Ok(Predicate::ILike {
        property,
        pattern: pattern.to_owned(),
    })
}

fn parse_srid(field: &'static str, value: Option<String>) -> Result<Srid, CliError> {
    match value {
        Some(text) => text.parse::<Srid>().map_err(|err| invalid(field, &text, err)),
        None => Ok(Srid::SIRGAS_2000),
    }
}

pub(crate) fn run_harvest(args: HarvestArgs, pause: &dyn Pause) -> Result<HarvestReport, CliError> {
    let config = args.into_config()?;
    let catalog = LayerCatalog::load(&config.catalog)?;
    let request = config.request(&catalog)?;
    let transport = HttpWfsTransport::new()?;
    execute_harvest(&config, &request, &transport, pause)
}

/// Run a validated harvest against `transport`.
pub(crate) fn execute_harvest(
    config: &HarvestConfig,
    request: &HarvestRequest,
    transport: &dyn WfsTransport,
    pause: &dyn Pause,
) -> Result<HarvestReport, CliError> {
    let scratch_path = config.harvest_scratch();
    let scratch = ScratchDir::create(&scratch_path).map_err(|source| CliError::Scratch {
        path: scratch_path.clone(),
        source,
    })?;
    let mut store = FeatureStore::open(&config.database)?;
    info!(
        "{} harvesting into {} at {}",
        config.context,
        request.table,
        store.location()
    );
    let report = Harvester::new(transport, &config.service, config.policy, pause).run(
        request,
        scratch,
        &mut store,
    )?;
    info!("{} harvest finished: {report}", config.context);
    Ok(report)
}
