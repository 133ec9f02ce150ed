//! Focused unit tests covering harvest configuration and request building.

use super::helpers::{Sandbox, full_args};
use super::*;
use crate::catalog::{CatalogArgs, CatalogConfig};
use crate::harvest::{HarvestArgs, HarvestConfig};
use clap::Parser;
use harvest_core::{IdentityModel, PropertyName, RetryPolicy, Srid, default_sort_key};
use harvest_data::{CatalogError, LayerCatalog, Literal, Predicate};
use rstest::{fixture, rstest};

#[fixture]
fn sandbox() -> Sandbox {
    Sandbox::new()
}

fn catalog(sandbox: &Sandbox) -> LayerCatalog {
    LayerCatalog::load(&sandbox.catalog()).expect("load catalogue")
}

#[rstest]
#[case(ARG_WORKSPACE, ENV_WORKSPACE)]
#[case(ARG_LAYER, ENV_LAYER)]
#[case(ARG_START, ENV_START)]
#[case(ARG_END, ENV_END)]
fn converting_without_required_fields_errors(
    sandbox: Sandbox,
    #[case] field: &'static str,
    #[case] env_var: &'static str,
) {
    let mut args = full_args(&sandbox);
    match field {
        ARG_WORKSPACE => args.workspace = None,
        ARG_LAYER => args.layer = None,
        ARG_START => args.start = None,
        _ => args.end = None,
    }
    let err = HarvestConfig::try_from(args).expect_err("missing field should error");
    match err {
        CliError::MissingArgument {
            field: missing,
            env,
        } => {
            assert_eq!(missing, field);
            assert_eq!(env, env_var);
        }
        other => panic!("expected MissingArgument, found {other:?}"),
    }
}

#[rstest]
fn unset_options_take_defaults() {
    let args = HarvestArgs {
        workspace: Some("deter-amz".into()),
        layer: Some("deter_amz".into()),
        start: Some("2024-01-01".into()),
        end: Some("2024-06-30".into()),
        ..HarvestArgs::default()
    };
    let config = HarvestConfig::try_from(args).expect("valid configuration");
    assert_eq!(config.database.as_str(), "wfs_harvest.db");
    assert_eq!(config.schema.as_str(), "raw_data");
    assert_eq!(config.scratch_dir.as_str(), "results");
    assert_eq!(config.catalog.as_str(), "wfs_info.json");
    assert_eq!(config.target_srid, Srid::SIRGAS_2000);
    assert_eq!(config.request_srs, Srid::SIRGAS_2000);
    assert_eq!(config.sort_key, default_sort_key());
    assert_eq!(config.identity, IdentityModel::NaturalKey);
    assert_eq!(config.policy, RetryPolicy::default());
    assert_eq!(
        config.service.root().as_str(),
        "https://terrabrasilis.dpi.inpe.br/geoserver"
    );
    assert_eq!(
        config.harvest_scratch(),
        config.scratch_dir.join(config.context.artifact_stem())
    );
}

#[rstest]
#[case::identity(
    HarvestArgs { identity: Some("append".into()), ..HarvestArgs::default() },
    ARG_IDENTITY
)]
#[case::srid(
    HarvestArgs { target_srid: Some("9999".into()), ..HarvestArgs::default() },
    ARG_TARGET_SRID
)]
#[case::schema(
    HarvestArgs { schema: Some(String::new()), ..HarvestArgs::default() },
    ARG_SCHEMA
)]
#[case::attempts(
    HarvestArgs { max_attempts: Some(0), ..HarvestArgs::default() },
    ARG_MAX_ATTEMPTS
)]
#[case::page_cap(
    HarvestArgs { page_cap: Some(0), ..HarvestArgs::default() },
    ARG_PAGE_CAP
)]
#[case::service_root(
    HarvestArgs { service_root: Some("ftp://example.org".into()), ..HarvestArgs::default() },
    ARG_SERVICE_ROOT
)]
#[case::match_without_pattern(
    HarvestArgs { matches: Some(vec!["state".into()]), ..HarvestArgs::default() },
    ARG_MATCH
)]
#[case::match_property(
    HarvestArgs { matches: Some(vec!["uf; drop=pa".into()]), ..HarvestArgs::default() },
    ARG_MATCH
)]
fn invalid_values_are_rejected(#[case] overrides: HarvestArgs, #[case] expected: &'static str) {
    let args = HarvestArgs {
        workspace: Some("deter-amz".into()),
        layer: Some("deter_amz".into()),
        start: Some("2024".into()),
        end: Some("2024".into()),
        ..overrides
    };
    match HarvestConfig::try_from(args) {
        Err(CliError::InvalidArgument { field, .. }) => assert_eq!(field, expected),
        other => panic!("expected InvalidArgument for {expected}, found {other:?}"),
    }
}

#[rstest]
fn dated_layers_are_filtered_by_year(sandbox: Sandbox) {
    let config = HarvestConfig::try_from(full_args(&sandbox)).expect("valid configuration");
    let request = config.request(&catalog(&sandbox)).expect("layer is catalogued");
    assert_eq!(
        request.filter.predicates(),
        [Predicate::Between {
            property: PropertyName::new("year").expect("valid property"),
            lower: Literal::Integer(2019),
            upper: Literal::Integer(2020),
        }]
        .as_slice()
    );
    assert_eq!(
        request.table.to_string(),
        "raw_data.prodes_cerrado_nb_yearly_deforestation"
    );
}

#[rstest]
fn text_matches_are_anded_after_the_range(sandbox: Sandbox) {
    let args = HarvestArgs {
        matches: Some(vec!["state=pa".into(), "image_date=2019-%".into()]),
        ..full_args(&sandbox)
    };
    let config = HarvestConfig::try_from(args).expect("valid configuration");
    let request = config.request(&catalog(&sandbox)).expect("layer is catalogued");
    assert_eq!(
        request.filter.to_cql().as_deref(),
        Some("year BETWEEN 2019 AND 2020 AND state ILIKE 'pa' AND image_date ILIKE '2019-%'")
    );
}

#[rstest]
fn undated_layers_keep_their_text_matches(sandbox: Sandbox) {
    let args = HarvestArgs {
        workspace: Some("hydrography".into()),
        layer: Some("rivers".into()),
        matches: Some(vec!["name=rio %".into()]),
        ..full_args(&sandbox)
    };
    let config = HarvestConfig::try_from(args).expect("valid configuration");
    let request = config.request(&catalog(&sandbox)).expect("layer is catalogued");
    assert_eq!(
        request.filter.predicates(),
        [Predicate::ILike {
            property: PropertyName::new("name").expect("valid property"),
            pattern: "rio %".into(),
        }]
        .as_slice()
    );
}

#[rstest]
fn undated_layers_are_harvested_whole(sandbox: Sandbox) {
    let args = HarvestArgs {
        workspace: Some("hydrography".into()),
        layer: Some("rivers".into()),
        ..full_args(&sandbox)
    };
    let config = HarvestConfig::try_from(args).expect("valid configuration");
    let request = config.request(&catalog(&sandbox)).expect("layer is catalogued");
    assert!(request.filter.is_empty());
}

#[rstest]
#[case("prodes-cerrado-nb", "missing")]
#[case("deter-amz", "deter_amz")]
#[case("prodes-cerrado-nb", "broken")]
fn uncatalogued_layers_fail_before_any_request(
    sandbox: Sandbox,
    #[case] workspace: &str,
    #[case] layer: &str,
) {
    let args = HarvestArgs {
        workspace: Some(workspace.into()),
        layer: Some(layer.into()),
        ..full_args(&sandbox)
    };
    let config = HarvestConfig::try_from(args).expect("valid configuration");
    match config.request(&catalog(&sandbox)) {
        Err(CliError::Catalog(
            CatalogError::UnknownWorkspace { .. }
            | CatalogError::UnknownLayer { .. }
            | CatalogError::MissingSchema { .. },
        )) => {}
        other => panic!("expected a catalogue rejection, found {other:?}"),
    }
}

#[rstest]
fn harvest_flags_parse_into_arguments() {
    let cli = Cli::try_parse_from([
        "wfs-harvest",
        "harvest",
        "--workspace",
        "prodes-cerrado-nb",
        "--layer",
        "yearly_deforestation",
        "--start",
        "2019",
        "--end",
        "2020",
        "--identity",
        "window-partitioned",
        "--page-cap",
        "500",
        "--match",
        "state=pa",
        "--match",
        "main_class=desmat%",
    ])
    .expect("arguments parse");
    let Command::Harvest(args) = cli.command else {
        panic!("expected the harvest command");
    };
    let config = HarvestConfig::try_from(args).expect("valid configuration");
    assert_eq!(config.identity, IdentityModel::WindowPartitioned);
    assert_eq!(config.page_cap, Some(500));
    assert_eq!(config.text_matches.len(), 2);
    assert_eq!(config.context.workspace(), "prodes-cerrado-nb");
}

#[rstest]
fn catalog_output_defaults_to_wfs_info() {
    let cli = Cli::try_parse_from(["wfs-harvest", "catalog"]).expect("arguments parse");
    let Command::Catalog(args) = cli.command else {
        panic!("expected the catalog command");
    };
    let config = CatalogConfig::try_from(args).expect("valid configuration");
    assert_eq!(config.output.as_str(), "wfs_info.json");

    let custom = CatalogConfig::try_from(CatalogArgs {
        output: Some("layers.json".into()),
        ..CatalogArgs::default()
    })
    .expect("valid configuration");
    assert_eq!(custom.output.as_str(), "layers.json");
}
