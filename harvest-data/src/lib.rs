//! Network and storage adapters for harvesting WFS layers.
//!
//! Responsibilities:
//! - Talk to OGC Web Feature Services: capabilities, hit counts, pages.
//! - Decode GeoJSON pages into typed records.
//! - Provision and load an SQLite spatial store.
//! - Drive a full harvest from probe to load.
//!
//! Boundaries:
//! - Domain rules (planning, retry budgets, geometry repair, typing) live in
//!   `harvest-core`.
//! - Blocking network calls run on a private Tokio runtime.
//!
//! Invariants:
//! - No global mutable state; every component logs against the
//!   [`harvest_core::HarvestContext`] it was built with.
//! - All SQL identifiers are quoted and all values are bound parameters.

pub mod catalog;
pub mod page;
pub mod pipeline;
pub mod store;
pub mod wfs;

pub use catalog::{
    CatalogError, FILTER_PROPERTIES, LayerCatalog, LayerEntry, LayerSchema, WorkspaceEntry,
    parse_describe_feature_type,
};
pub use page::{PageDecodeError, decode_page};
pub use pipeline::{HarvestError, HarvestReport, HarvestRequest, Harvester};
pub use store::{
    DEFAULT_SCHEMA, FeatureStore, IdempotentLoader, LoadError, LoadSummary, ProvisionError,
    ProvisionStep, SchemaInferencer, StoreError, StoreLocation,
};
pub use wfs::{
    CapabilityProbe, DEFAULT_SERVICE_ROOT, FeatureFilter, FeatureQuery, FetchError,
    HttpWfsTransport, HttpWfsTransportConfig, Literal, PageArtifact, Predicate, ProbeError,
    RetryingFetcher, TransportBuildError, TransportError, WfsService, WfsTransport,
};
