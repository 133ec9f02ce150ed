//! Facade crate for the WFS harvester.
//!
//! This crate re-exports the core domain types and, behind the
//! `store-sqlite` feature, the network and SQLite adapters that drive a
//! harvest end to end.

#![forbid(unsafe_code)]

pub use harvest_core::{
    AttributeValue, FeatureRecord, FetchWindow, GeometryNormalizer, HarvestContext, HarvestRange,
    IdentityModel, PaginationPlan, PropertyName, RetryPolicy, SchemaDescriptor, Srid, TableRef,
    plan_windows,
};

#[cfg(feature = "store-sqlite")]
pub use harvest_data::{
    CapabilityProbe, FeatureFilter, FeatureStore, HarvestError, HarvestReport, HarvestRequest,
    Harvester, HttpWfsTransport, IdempotentLoader, LayerCatalog, RetryingFetcher,
    SchemaInferencer, WfsService, WfsTransport,
};
