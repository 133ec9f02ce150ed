//! Catalogue of published workspaces, layers and attribute schemas.
//!
//! The catalogue is a JSON document shaped as
//! `{ workspace: { url, layers: { layer: { schema, error? } } } }`. Harvests
//! consult it before any network or database work to reject unknown layers
//! and to pick the attribute the date filter applies to.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use harvest_core::{HarvestContext, Pause, PropertyName, RetryPolicy, retry_with_policy};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::wfs::{CapabilityProbe, ProbeError, WfsService, WfsTransport, get_checked};

/// Attributes tried, in order, as the harvest filter property.
pub const FILTER_PROPERTIES: [&str; 3] = ["year", "image_date", "view_date"];

/// Attribute and geometry typing of one layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSchema {
    /// Attribute name to declared type.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// Declared geometry type.
    #[serde(default)]
    pub geometry: Option<String>,
    /// Name of the geometry attribute.
    #[serde(default)]
    pub geometry_column: Option<String>,
}

/// Catalogue entry for one layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerEntry {
    /// Schema, when it could be described.
    pub schema: Option<LayerSchema>,
    /// Why describing the layer failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Catalogue entry for one workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceEntry {
    /// Virtual service endpoint of the workspace.
    pub url: String,
    /// Layers keyed by unqualified name.
    #[serde(default)]
    pub layers: BTreeMap<String, LayerEntry>,
}

/// Errors raised while reading, writing or querying the catalogue.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The catalogue file could not be read.
    #[error("failed to read layer catalogue {path}")]
    Read {
        /// Catalogue path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The catalogue file is not valid JSON of the expected shape.
    #[error("failed to parse layer catalogue {path}")]
    Parse {
        /// Catalogue path.
        path: Utf8PathBuf,
        /// Parser error.
        #[source]
        source: serde_json::Error,
    },
    /// The catalogue could not be serialised.
    #[error("failed to serialise layer catalogue")]
    Serialise(#[source] serde_json::Error),
    /// The catalogue file could not be written.
    #[error("failed to write layer catalogue {path}")]
    Write {
        /// Catalogue path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The workspace is not published.
    #[error("workspace `{workspace}` is not in the layer catalogue")]
    UnknownWorkspace {
        /// Requested workspace.
        workspace: String,
    },
    /// The layer is not published in the workspace.
    #[error("layer `{layer}` is not published in workspace `{workspace}`")]
    UnknownLayer {
        /// Requested workspace.
        workspace: String,
        /// Requested layer.
        layer: String,
    },
    /// The layer has no recorded schema.
    #[error("layer `{workspace}:{layer}` has no schema in the catalogue{}", reason_suffix(.reason))]
    MissingSchema {
        /// Requested workspace.
        workspace: String,
        /// Requested layer.
        layer: String,
        /// Error recorded when the catalogue was built.
        reason: Option<String>,
    },
    /// Listing the published feature types failed.
    #[error(transparent)]
    Probe(#[from] ProbeError),
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason
        .as_deref()
        .map(|reason| format!(": {reason}"))
        .unwrap_or_default()
}

/// Published workspaces keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerCatalog {
    workspaces: BTreeMap<String, WorkspaceEntry>,
}

impl LayerCatalog {
    /// Read a catalogue file.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Read`] or [`CatalogError::Parse`].
    pub fn load(path: &Utf8Path) -> Result<Self, CatalogError> {
        let text = harvest_fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| CatalogError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the catalogue as indented JSON.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Serialise`] or [`CatalogError::Write`].
    pub fn save(&self, path: &Utf8Path) -> Result<(), CatalogError> {
        let text = serde_json::to_string_pretty(self).map_err(CatalogError::Serialise)?;
        harvest_fs::write_file(path, text.as_bytes()).map_err(|source| CatalogError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Workspaces in name order.
    pub fn workspaces(&self) -> impl Iterator<Item = (&str, &WorkspaceEntry)> {
        self.workspaces.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    /// Add or replace a layer entry.
    pub fn insert(&mut self, workspace: &str, url: &str, layer: &str, entry: LayerEntry) {
        let workspace = self
            .workspaces
            .entry(workspace.to_owned())
            .or_insert_with(|| WorkspaceEntry {
                url: url.to_owned(),
                layers: BTreeMap::new(),
            });
        workspace.layers.insert(layer.to_owned(), entry);
    }

    /// Confirm the layer is published and described.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::UnknownWorkspace`],
    /// [`CatalogError::UnknownLayer`] or [`CatalogError::MissingSchema`].
    pub fn check(&self, workspace: &str, layer: &str) -> Result<&LayerSchema, CatalogError> {
        let entry = self
            .workspaces
            .get(workspace)
            .ok_or_else(|| CatalogError::UnknownWorkspace {
                workspace: workspace.to_owned(),
            })?
            .layers
            .get(layer)
            .ok_or_else(|| CatalogError::UnknownLayer {
                workspace: workspace.to_owned(),
                layer: layer.to_owned(),
            })?;
        entry
            .schema
            .as_ref()
            .ok_or_else(|| CatalogError::MissingSchema {
                workspace: workspace.to_owned(),
                layer: layer.to_owned(),
                reason: entry.error.clone(),
            })
    }

    /// Attribute the date range filter should apply to, if any.
    ///
    /// # Errors
    ///
    /// Propagates [`LayerCatalog::check`] failures.
    pub fn filter_property(
        &self,
        workspace: &str,
        layer: &str,
    ) -> Result<Option<PropertyName>, CatalogError> {
        let schema = self.check(workspace, layer)?;
        Ok(FILTER_PROPERTIES
            .iter()
            .find(|name| schema.properties.contains_key(**name))
            .and_then(|name| PropertyName::new(*name).ok()))
    }

    /// Build a catalogue from the service's capabilities, describing every
    /// published layer.
    ///
    /// Layers whose description fails are recorded with their error rather
    /// than aborting the build.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Probe`] when the feature types cannot be
    /// listed.
    pub fn build(
        transport: &dyn WfsTransport,
        service: &WfsService,
        policy: &RetryPolicy,
        pause: &dyn Pause,
    ) -> Result<Self, CatalogError> {
        let root = HarvestContext::new("*", "*");
        let names = CapabilityProbe::new(transport, service, &root).feature_types(policy, pause)?;
        info!("{root} service publishes {} feature types", names.len());

        let mut catalog = Self::default();
        for name in names {
            let Some((workspace, layer)) = name.split_once(':') else {
                warn!("{root} skipping unqualified feature type `{name}`");
                continue;
            };
            let context = HarvestContext::new(workspace, layer);
            let url = service.workspace_endpoint(workspace);
            let entry = match describe_layer(transport, service, policy, pause, &context) {
                Ok(schema) => LayerEntry {
                    schema: Some(schema),
                    error: None,
                },
                Err(reason) => {
                    warn!("{context} could not describe layer: {reason}");
                    LayerEntry {
                        schema: None,
                        error: Some(reason),
                    }
                }
            };
            catalog.insert(workspace, url.as_str(), layer, entry);
        }
        Ok(catalog)
    }
}

fn describe_layer(
    transport: &dyn WfsTransport,
    service: &WfsService,
    policy: &RetryPolicy,
    pause: &dyn Pause,
    context: &HarvestContext,
) -> Result<LayerSchema, String> {
    let url = service.describe_url(context);
    let body = retry_with_policy(policy, pause, context, "describe feature type", |_| {
        get_checked(transport, &url)
    })
    .map_err(|exhausted| exhausted.to_string())?
    .value;
    parse_describe_feature_type(&body).map_err(|err| format!("{url}: {err}"))
}

/// Read a layer schema from a JSON `DescribeFeatureType` response.
///
/// Properties typed in the `gml` namespace describe the geometry; every
/// other property keeps its local type name.
///
/// # Errors
///
/// Returns a description when the body is not JSON or lists no feature
/// type.
pub fn parse_describe_feature_type(body: &[u8]) -> Result<LayerSchema, String> {
    let document: Value = serde_json::from_slice(body).map_err(|err| err.to_string())?;
    let properties = document
        .pointer("/featureTypes/0/properties")
        .and_then(Value::as_array)
        .ok_or_else(|| "response lists no feature type properties".to_owned())?;

    let mut schema = LayerSchema::default();
    for property in properties {
        let Some(name) = property.get("name").and_then(Value::as_str) else {
            continue;
        };
        let declared = property.get("type").and_then(Value::as_str).unwrap_or_default();
        let local = property
            .get("localType")
            .and_then(Value::as_str)
            .map_or_else(
                || declared.rsplit(':').next().unwrap_or(declared).to_owned(),
                str::to_owned,
            );
        if declared.starts_with("gml:") {
            schema.geometry = Some(local);
            schema.geometry_column = Some(name.to_owned());
        } else {
            schema.properties.insert(name.to_owned(), local);
        }
    }
    Ok(schema)
}
