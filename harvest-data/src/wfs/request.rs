//! WFS request construction.

use std::fmt;

use harvest_core::{FetchWindow, HarvestContext, PropertyName, Srid};
use thiserror::Error;
use url::Url;

/// GeoServer instance harvested when no service root is configured.
pub const DEFAULT_SERVICE_ROOT: &str = "https://terrabrasilis.dpi.inpe.br/geoserver";

const WFS_VERSION: &str = "2.0.0";
const JSON_OUTPUT: &str = "application/json";

/// Errors raised while configuring a service or a filter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    /// The service root is not an absolute HTTP(S) URL.
    #[error("invalid service root `{url}`: {reason}")]
    InvalidServiceRoot {
        /// Rejected URL text.
        url: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Root of a GeoServer-style WFS deployment.
///
/// Capabilities are read from `{root}/ows`; layer requests go to the virtual
/// service endpoint `{root}/{workspace}/{layer}/wfs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WfsService {
    root: Url,
}

impl WfsService {
    /// Parse and validate a service root.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::InvalidServiceRoot`] for unparsable or non-HTTP
    /// URLs.
    pub fn new(root: &str) -> Result<Self, FilterError> {
        let invalid = |reason: String| FilterError::InvalidServiceRoot {
            url: root.to_owned(),
            reason,
        };
        let url = Url::parse(root.trim()).map_err(|err| invalid(err.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
            return Err(invalid("expected an http or https URL".to_owned()));
        }
        Ok(Self { root: url })
    }

    /// Configured root URL.
    #[must_use]
    pub const fn root(&self) -> &Url {
        &self.root
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.root.clone();
        url.set_query(None);
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Service-wide `GetCapabilities` request.
    #[must_use]
    pub fn capabilities_url(&self) -> Url {
        let mut url = self.endpoint(&["ows"]);
        url.query_pairs_mut()
            .append_pair("service", "WFS")
            .append_pair("version", WFS_VERSION)
            .append_pair("request", "GetCapabilities");
        url
    }

    /// Virtual service endpoint for one workspace.
    #[must_use]
    pub fn workspace_endpoint(&self, workspace: &str) -> Url {
        self.endpoint(&[workspace, "wfs"])
    }

    /// Virtual service endpoint for one layer.
    #[must_use]
    pub fn layer_endpoint(&self, context: &HarvestContext) -> Url {
        self.endpoint(&[context.workspace(), context.layer(), "wfs"])
    }

    /// `DescribeFeatureType` request for `workspace:layer`, as JSON.
    #[must_use]
    pub fn describe_url(&self, context: &HarvestContext) -> Url {
        let mut url = self.layer_endpoint(context);
        url.query_pairs_mut()
            .append_pair("service", "WFS")
            .append_pair("version", WFS_VERSION)
            .append_pair("request", "DescribeFeatureType")
            .append_pair("typeNames", &context.type_name())
            .append_pair("outputFormat", JSON_OUTPUT);
        url
    }

    /// `GetFeature` request returning only the number of matching features.
    #[must_use]
    pub fn hits_url(&self, context: &HarvestContext, filter: &FeatureFilter) -> Url {
        let mut url = self.layer_endpoint(context);
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("service", "WFS")
                .append_pair("version", WFS_VERSION)
                .append_pair("request", "GetFeature")
                .append_pair("typeNames", &context.type_name())
                .append_pair("resultType", "hits");
            if let Some(cql) = filter.to_cql() {
                query.append_pair("CQL_FILTER", &cql);
            }
        }
        url
    }

    /// `GetFeature` request for one window of the result set.
    #[must_use]
    pub fn page_url(
        &self,
        context: &HarvestContext,
        query: &FeatureQuery,
        window: &FetchWindow,
    ) -> Url {
        let mut url = self.layer_endpoint(context);
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("service", "WFS")
                .append_pair("version", WFS_VERSION)
                .append_pair("request", "GetFeature")
                .append_pair("typeNames", &context.type_name())
                .append_pair("outputFormat", JSON_OUTPUT)
                .append_pair("srsName", &query.srs.srs_name())
                .append_pair("sortBy", query.sort_key.as_str())
                .append_pair("count", &window.count.to_string())
                .append_pair("startIndex", &window.start.to_string());
            if let Some(cql) = query.filter.to_cql() {
                pairs.append_pair("CQL_FILTER", &cql);
            }
        }
        url
    }
}

/// Parameters shared by every page request of a harvest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureQuery {
    /// Restriction applied server-side.
    pub filter: FeatureFilter,
    /// Reference the server should return coordinates in.
    pub srs: Srid,
    /// Property the server sorts by before slicing.
    pub sort_key: PropertyName,
}

/// A literal operand in a filter expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    /// Unquoted integer.
    Integer(i64),
    /// Quoted string; embedded quotes are doubled on output.
    Text(String),
}

impl Literal {
    /// Integers stay numeric; anything else becomes quoted text.
    ///
    /// ```
    /// use harvest_data::Literal;
    ///
    /// assert_eq!(Literal::infer("2019"), Literal::Integer(2019));
    /// assert_eq!(Literal::infer("2019-08-01"), Literal::Text("2019-08-01".into()));
    /// ```
    #[must_use]
    pub fn infer(raw: &str) -> Self {
        raw.trim()
            .parse::<i64>()
            .map_or_else(|_| Self::Text(raw.to_owned()), Self::Integer)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "'{}'", value.replace('\'', "''")),
        }
    }
}

/// A single filter condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Inclusive range test.
    Between {
        /// Property tested.
        property: PropertyName,
        /// Lower bound.
        lower: Literal,
        /// Upper bound.
        upper: Literal,
    },
    /// Case-insensitive pattern match (`%` and `_` wildcards).
    ILike {
        /// Property tested.
        property: PropertyName,
        /// Pattern, quoted on output.
        pattern: String,
    },
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Between {
                property,
                lower,
                upper,
            } => write!(f, "{property} BETWEEN {lower} AND {upper}"),
            Self::ILike { property, pattern } => write!(
                f,
                "{property} ILIKE {}",
                Literal::Text(pattern.clone())
            ),
        }
    }
}

/// Conjunction of predicates sent as a `CQL_FILTER`.
///
/// # Examples
///
/// ```
/// use harvest_core::PropertyName;
/// use harvest_data::{FeatureFilter, Literal, Predicate};
///
/// let filter = FeatureFilter::default()
///     .and(Predicate::Between {
///         property: PropertyName::new("year")?,
///         lower: Literal::infer("2019"),
///         upper: Literal::infer("2023"),
///     })
///     .and(Predicate::ILike {
///         property: PropertyName::new("uf")?,
///         pattern: "pa".into(),
///     });
/// assert_eq!(
///     filter.to_cql().as_deref(),
///     Some("year BETWEEN 2019 AND 2023 AND uf ILIKE 'pa'")
/// );
/// # Ok::<(), harvest_core::PropertyNameError>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureFilter {
    predicates: Vec<Predicate>,
}

impl FeatureFilter {
    /// Add a predicate to the conjunction.
    #[must_use]
    pub fn and(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// Whether the filter matches everything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Predicates in order.
    #[must_use]
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// CQL text, or `None` when the filter is empty.
    #[must_use]
    pub fn to_cql(&self) -> Option<String> {
        if self.predicates.is_empty() {
            return None;
        }
        Some(
            self.predicates
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" AND "),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_core::{HarvestRange, default_sort_key};
    use rstest::{fixture, rstest};

    #[fixture]
    fn service() -> WfsService {
        WfsService::new("https://example.org/geoserver/").expect("valid root")
    }

    #[fixture]
    fn ctx() -> HarvestContext {
        HarvestContext::new("prodes-cerrado-nb", "yearly_deforestation")
            .with_range(HarvestRange::new("2019", "2020"))
    }

    fn query_pairs(url: &Url) -> Vec<(String, String)> {
        url.query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    fn date_filter() -> FeatureFilter {
        FeatureFilter::default().and(Predicate::Between {
            property: PropertyName::new("image_date").expect("valid name"),
            lower: Literal::infer("2019-08-01"),
            upper: Literal::infer("2020-07-31"),
        })
    }

    #[rstest]
    fn capabilities_use_the_root_ows_endpoint(service: WfsService) {
        let url = service.capabilities_url();
        assert_eq!(url.path(), "/geoserver/ows");
        assert!(query_pairs(&url).contains(&("request".into(), "GetCapabilities".into())));
    }

    #[rstest]
    fn hits_request_targets_the_layer_endpoint(service: WfsService, ctx: HarvestContext) {
        let url = service.hits_url(&ctx, &date_filter());
        assert_eq!(
            url.path(),
            "/geoserver/prodes-cerrado-nb/yearly_deforestation/wfs"
        );
        let pairs = query_pairs(&url);
        assert!(pairs.contains(&("resultType".into(), "hits".into())));
        assert!(pairs.contains(&(
            "CQL_FILTER".into(),
            "image_date BETWEEN '2019-08-01' AND '2020-07-31'".into()
        )));
    }

    #[rstest]
    fn page_request_carries_window_sort_and_srs(service: WfsService, ctx: HarvestContext) {
        let query = FeatureQuery {
            filter: FeatureFilter::default(),
            srs: Srid::SIRGAS_2000,
            sort_key: default_sort_key(),
        };
        let window = FetchWindow {
            sequence: 2,
            start: 100_000,
            count: 100_000,
            size: 50_000,
        };
        let pairs = query_pairs(&service.page_url(&ctx, &query, &window));
        for expected in [
            ("typeNames", "prodes-cerrado-nb:yearly_deforestation"),
            ("outputFormat", "application/json"),
            ("srsName", "EPSG:4674"),
            ("sortBy", "uid"),
            ("count", "100000"),
            ("startIndex", "100000"),
        ] {
            assert!(
                pairs.contains(&(expected.0.to_owned(), expected.1.to_owned())),
                "missing {expected:?} in {pairs:?}"
            );
        }
        assert!(!pairs.iter().any(|(k, _)| k == "CQL_FILTER"));
    }

    #[rstest]
    fn text_literals_escape_quotes() {
        let filter = FeatureFilter::default().and(Predicate::ILike {
            property: PropertyName::new("name").expect("valid name"),
            pattern: "d'arc%".into(),
        });
        assert_eq!(filter.to_cql().as_deref(), Some("name ILIKE 'd''arc%'"));
    }

    #[rstest]
    #[case("ftp://example.org")]
    #[case("not a url")]
    #[case("mailto:ops@example.org")]
    fn rejects_non_http_roots(#[case] root: &str) {
        assert!(WfsService::new(root).is_err());
    }
}
