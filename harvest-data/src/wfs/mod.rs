//! OGC Web Feature Service client.
//!
//! Requests are assembled by [`WfsService`] and issued through the
//! synchronous [`WfsTransport`] seam. [`CapabilityProbe`] reads the page cap
//! and hit counts; [`RetryingFetcher`] downloads pages under a retry budget
//! and persists their bodies into the scratch directory.

mod error;
mod fetch;
mod probe;
mod request;
mod transport;

#[doc(hidden)]
pub mod test_support;

pub use error::{FetchError, ProbeError, TransportError};
pub use fetch::{PageArtifact, RetryingFetcher};
pub(crate) use probe::get_checked;
pub use probe::{CapabilityProbe, parse_count_default, parse_feature_type_names, parse_hits};
pub use request::{
    DEFAULT_SERVICE_ROOT, FeatureFilter, FeatureQuery, FilterError, Literal, Predicate,
    WfsService,
};
pub use transport::{
    DEFAULT_USER_AGENT, HttpWfsTransport, HttpWfsTransportConfig, TransportBuildError,
    WfsTransport,
};
