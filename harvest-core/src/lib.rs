//! Core domain types for harvesting WFS layers into a spatial store.
//!
//! The crate holds everything that can be decided without talking to a
//! server or a database: pagination planning, the bounded retry state
//! machine, geometry repair and reprojection, attribute typing, and the
//! schema descriptors handed to storage back ends. Network and SQLite
//! integrations live in `harvest-data`.

#![cfg_attr(docsrs, feature(doc_cfg))]

mod context;
pub mod geometry;
mod identity;
mod property;
mod record;
pub mod retry;
pub mod schema;
pub mod srs;
#[cfg(any(test, feature = "test-support"))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-support")))]
pub mod test_support;
mod window;

pub use context::{HarvestContext, HarvestRange};
pub use geometry::{GeometryNormalizer, GeometryRepairError, Normalized, NormalizedBatch, make_valid};
pub use identity::{IdentityModel, ParseIdentityModelError};
pub use property::{PropertyName, PropertyNameError};
pub use record::{
    AttributeValue, Attributes, DecodedPage, FeatureId, FeatureIdError, FeatureRecord, RawFeature,
    ValueTag,
};
pub use retry::{
    Pause, Retried, RetryDecision, RetryExhausted, RetryPhase, RetryPolicy, RetryPolicyError,
    RetryState, ThreadPause, retry_with_policy,
};
pub use schema::{
    ColumnDef, ColumnKind, Identifier, IdentifierError, RESERVED_COLUMNS, SchemaDescriptor, TableRef,
    attribute_column_name, infer_columns,
};
pub use srs::{CrsFamily, ReprojectError, Srid, SridError, reproject};
pub use window::{
    DEFAULT_PAGE_CAP, FetchWindow, PaginationPlan, PlanError, default_sort_key, plan_windows,
};
