//! Test helpers for catalogue files and layered configuration overrides.

use super::*;
use crate::harvest::{HarvestArgs, HarvestConfig};
use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;

/// Catalogue with one dated layer, one undated layer and one failed layer.
pub(super) const CATALOG_JSON: &str = r#"{
  "prodes-cerrado-nb": {
    "url": "https://terrabrasilis.example/geoserver/prodes-cerrado-nb/wfs",
    "layers": {
      "yearly_deforestation": {
        "schema": {
          "properties": { "uid": "int", "state": "string", "year": "int", "image_date": "date" },
          "geometry": "MultiPolygon",
          "geometry_column": "geom"
        }
      },
      "broken": { "schema": null, "error": "describe timed out" }
    }
  },
  "hydrography": {
    "url": "https://terrabrasilis.example/geoserver/hydrography/wfs",
    "layers": {
      "rivers": { "schema": { "properties": { "name": "string" } } }
    }
  }
}"#;

#[derive(Debug, Clone, Default)]
pub(super) struct LayerOverrides {
    pub(super) workspace: Option<String>,
    pub(super) layer: Option<String>,
    pub(super) database: Option<Utf8PathBuf>,
    pub(super) identity: Option<String>,
}

/// Temporary working directory holding a catalogue file.
pub(super) struct Sandbox {
    _dir: TempDir,
    root: Utf8PathBuf,
}

impl Sandbox {
    pub(super) fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 tempdir");
        harvest_fs::write_file(&root.join("wfs_info.json"), CATALOG_JSON.as_bytes())
            .expect("write catalogue");
        Self { _dir: dir, root }
    }

    pub(super) fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub(super) fn catalog(&self) -> Utf8PathBuf {
        self.root.join("wfs_info.json")
    }

    pub(super) fn database(&self) -> Utf8PathBuf {
        self.root.join("harvest.db")
    }

    pub(super) fn scratch(&self) -> Utf8PathBuf {
        self.root.join("results")
    }
}

/// Arguments naming a complete harvest of the dated layer.
pub(super) fn full_args(sandbox: &Sandbox) -> HarvestArgs {
    HarvestArgs {
        workspace: Some("prodes-cerrado-nb".into()),
        layer: Some("yearly_deforestation".into()),
        start: Some("2019".into()),
        end: Some("2020".into()),
        database: Some(sandbox.database()),
        scratch_dir: Some(sandbox.scratch()),
        catalog: Some(sandbox.catalog()),
        max_attempts: Some(3),
        retry_delay_secs: Some(1),
        ..HarvestArgs::default()
    }
}

/// Resolve `cli_args`, filling unset fields from the environment layer and
/// then the file layer.
pub(super) fn merge_layers(
    mut cli_args: HarvestArgs,
    file_layer: Option<LayerOverrides>,
    env_layer: Option<LayerOverrides>,
) -> Result<HarvestConfig, CliError> {
    merge_field(
        &mut cli_args.workspace,
        extract_field(env_layer.as_ref(), |layer| &layer.workspace),
        extract_field(file_layer.as_ref(), |layer| &layer.workspace),
    );
    merge_field(
        &mut cli_args.layer,
        extract_field(env_layer.as_ref(), |layer| &layer.layer),
        extract_field(file_layer.as_ref(), |layer| &layer.layer),
    );
    merge_field(
        &mut cli_args.database,
        extract_field(env_layer.as_ref(), |layer| &layer.database),
        extract_field(file_layer.as_ref(), |layer| &layer.database),
    );
    merge_field(
        &mut cli_args.identity,
        extract_field(env_layer.as_ref(), |layer| &layer.identity),
        extract_field(file_layer.as_ref(), |layer| &layer.identity),
    );
    HarvestConfig::try_from(cli_args)
}

fn merge_field<T: Clone>(target: &mut Option<T>, env_value: Option<T>, file_value: Option<T>) {
    if target.is_none()
        && let Some(value) = env_value.or(file_value)
    {
        *target = Some(value);
    }
}

fn extract_field<T: Clone>(
    layer: Option<&LayerOverrides>,
    accessor: fn(&LayerOverrides) -> &Option<T>,
) -> Option<T> {
    layer.and_then(|entry| accessor(entry).clone())
}
