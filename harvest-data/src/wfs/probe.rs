//! Capability and hit-count discovery.

use harvest_core::{
    DEFAULT_PAGE_CAP, HarvestContext, Pause, RetryPolicy, retry_with_policy,
};
use log::{info, warn};
use roxmltree::{Document, Node};
use url::Url;

use super::{FeatureFilter, ProbeError, TransportError, WfsService, WfsTransport};

/// Reads the server page cap and the number of features matching a query.
///
/// The hit count is a single read taken before pagination starts. It is not
/// reconciled against the dataset while pages are fetched.
pub struct CapabilityProbe<'a> {
    transport: &'a dyn WfsTransport,
    service: &'a WfsService,
    context: &'a HarvestContext,
}

impl<'a> CapabilityProbe<'a> {
    /// Build a probe for one harvest.
    #[must_use]
    pub const fn new(
        transport: &'a dyn WfsTransport,
        service: &'a WfsService,
        context: &'a HarvestContext,
    ) -> Self {
        Self {
            transport,
            service,
            context,
        }
    }

    /// Page cap advertised by the `CountDefault` constraint.
    ///
    /// Falls back to [`DEFAULT_PAGE_CAP`] with a warning when the request
    /// fails, the document is malformed or the constraint is absent.
    #[must_use]
    pub fn server_limit(&self) -> u64 {
        let url = self.service.capabilities_url();
        let fallback = |reason: &str| {
            warn!(
                "{} could not read CountDefault ({reason}); using {DEFAULT_PAGE_CAP}",
                self.context
            );
            DEFAULT_PAGE_CAP
        };
        let body = match get_checked(self.transport, &url) {
            Ok(body) => body,
            Err(err) => return fallback(&err.to_string()),
        };
        match parse_count_default(&String::from_utf8_lossy(&body)) {
            Ok(Some(cap)) => {
                info!("{} server page cap is {cap}", self.context);
                cap
            }
            Ok(None) => fallback("constraint absent"),
            Err(err) => fallback(&err.to_string()),
        }
    }

    /// Number of features matching `filter`, read from a `resultType=hits`
    /// request retried under `policy`.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Exhausted`] when every attempt failed and
    /// [`ProbeError::MalformedHits`] when the response carries no count.
    pub fn count_max_result(
        &self,
        filter: &FeatureFilter,
        policy: &RetryPolicy,
        pause: &dyn Pause,
    ) -> Result<u64, ProbeError> {
        let url = self.service.hits_url(self.context, filter);
        let retried = retry_with_policy(policy, pause, self.context, "hit count", |_| {
            get_checked(self.transport, &url)
        })?;
        let total = parse_hits(&String::from_utf8_lossy(&retried.value)).map_err(|reason| {
            ProbeError::MalformedHits {
                url: url.to_string(),
                reason,
            }
        })?;
        info!("{} {total} features match the query", self.context);
        Ok(total)
    }

    /// Qualified names of every feature type the service publishes.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Exhausted`] when the capabilities request fails
    /// and [`ProbeError::MalformedCapabilities`] when it cannot be parsed.
    pub fn feature_types(
        &self,
        policy: &RetryPolicy,
        pause: &dyn Pause,
    ) -> Result<Vec<String>, ProbeError> {
        let url = self.service.capabilities_url();
        let retried = retry_with_policy(policy, pause, self.context, "capabilities", |_| {
            get_checked(self.transport, &url)
        })?;
        parse_feature_type_names(&String::from_utf8_lossy(&retried.value)).map_err(|err| {
            ProbeError::MalformedCapabilities {
                url: url.to_string(),
                reason: err.to_string(),
            }
        })
    }
}

/// Issue a request and turn an OGC exception report into an error.
pub(crate) fn get_checked(
    transport: &dyn WfsTransport,
    url: &Url,
) -> Result<Vec<u8>, TransportError> {
    let body = transport.get(url)?;
    match exception_message(&body) {
        Some(message) => Err(TransportError::ServiceException {
            url: url.to_string(),
            message,
        }),
        None => Ok(body),
    }
}

/// Text of an OGC exception report, or `None` for any other body.
pub(crate) fn exception_message(body: &[u8]) -> Option<String> {
    let start = body.iter().position(|b| !b.is_ascii_whitespace())?;
    if body.get(start) != Some(&b'<') {
        return None;
    }
    let text = std::str::from_utf8(body).ok()?;
    let doc = Document::parse(text).ok()?;
    let root = doc.root_element();
    if !root.tag_name().name().ends_with("ExceptionReport") {
        return None;
    }
    let message = root
        .descendants()
        .filter(|node| {
            matches!(node.tag_name().name(), "ExceptionText" | "ServiceException")
        })
        .filter_map(|node| node.text())
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("; ");
    Some(if message.is_empty() {
        "exception report without text".to_owned()
    } else {
        message
    })
}

fn named(node: &Node<'_, '_>, local: &str, name: &str) -> bool {
    node.is_element() && node.tag_name().name() == local && node.attribute("name") == Some(name)
}

/// Read `CountDefault` from a WFS 2.0 capabilities document.
///
/// The constraint is looked up on the `GetFeature` operation first and then
/// among the service-wide constraints. Namespace prefixes are ignored.
///
/// # Errors
///
/// Returns the parser error when `xml` is not well formed.
///
/// # Examples
///
/// ```
/// use harvest_data::wfs::parse_count_default;
///
/// let xml = r#"<wfs:WFS_Capabilities xmlns:wfs="http://www.opengis.net/wfs/2.0"
///     xmlns:ows="http://www.opengis.net/ows/1.1">
///   <ows:OperationsMetadata>
///     <ows:Operation name="GetFeature">
///       <ows:Constraint name="CountDefault">
///         <ows:NoValues/><ows:DefaultValue>50000</ows:DefaultValue>
///       </ows:Constraint>
///     </ows:Operation>
///   </ows:OperationsMetadata>
/// </wfs:WFS_Capabilities>"#;
/// assert_eq!(parse_count_default(xml)?, Some(50_000));
/// # Ok::<(), roxmltree::Error>(())
/// ```
pub fn parse_count_default(xml: &str) -> Result<Option<u64>, roxmltree::Error> {
    let doc = Document::parse(xml)?;
    let operation_scoped = doc
        .descendants()
        .filter(|node| named(node, "Operation", "GetFeature"))
        .flat_map(|op| op.descendants().collect::<Vec<_>>());
    let service_scoped = doc.descendants().filter(|node| {
        node.parent_element()
            .is_some_and(|parent| parent.tag_name().name() == "OperationsMetadata")
    });
    let value = operation_scoped
        .chain(service_scoped)
        .filter(|node| named(node, "Constraint", "CountDefault"))
        .find_map(|constraint| {
            constraint
                .children()
                .find(|child| child.tag_name().name() == "DefaultValue")
                .and_then(|child| child.text())
                .and_then(|text| text.trim().parse::<u64>().ok())
                .filter(|cap| *cap > 0)
        });
    Ok(value)
}

/// Read the hit count from a `resultType=hits` response.
///
/// WFS 2.0 reports `numberMatched`, WFS 1.1 `numberOfFeatures`.
///
/// # Errors
///
/// Returns a description when the document is malformed, the attribute is
/// missing, or the server reports `unknown`.
pub fn parse_hits(xml: &str) -> Result<u64, String> {
    let doc = Document::parse(xml).map_err(|err| err.to_string())?;
    let root = doc.root_element();
    let raw = root
        .attribute("numberMatched")
        .or_else(|| root.attribute("numberOfFeatures"))
        .ok_or_else(|| {
            format!(
                "`{}` carries neither numberMatched nor numberOfFeatures",
                root.tag_name().name()
            )
        })?;
    raw.trim()
        .parse::<u64>()
        .map_err(|_| format!("count `{raw}` is not a non-negative integer"))
}

/// Qualified names listed under `FeatureTypeList`.
///
/// # Errors
///
/// Returns the parser error when `xml` is not well formed.
pub fn parse_feature_type_names(xml: &str) -> Result<Vec<String>, roxmltree::Error> {
    let doc = Document::parse(xml)?;
    Ok(doc
        .descendants()
        .filter(|node| node.tag_name().name() == "FeatureType")
        .filter_map(|feature_type| {
            feature_type
                .children()
                .find(|child| child.tag_name().name() == "Name")
                .and_then(|name| name.text())
                .map(|text| text.trim().to_owned())
        })
        .filter(|name| !name.is_empty())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wfs::test_support::{
        ScriptedTransport, capabilities_document, exception_report, hits_document,
    };
    use harvest_core::test_support::RecordingPause;
    use rstest::{fixture, rstest};
    use std::time::Duration;

    #[fixture]
    fn service() -> WfsService {
        WfsService::new("https://example.org/geoserver").expect("valid root")
    }

    #[fixture]
    fn ctx() -> HarvestContext {
        HarvestContext::new("prodes-amazon-nb", "yearly_deforestation")
    }

    fn policy(max: u32) -> RetryPolicy {
        RetryPolicy::new(max, Duration::from_secs(5)).expect("non-zero attempts")
    }

    #[rstest]
    fn server_limit_reads_count_default(service: WfsService, ctx: HarvestContext) {
        let transport =
            ScriptedTransport::new(|_, _| Ok(capabilities_document(Some(250), &[]).into_bytes()));
        let probe = CapabilityProbe::new(&transport, &service, &ctx);
        assert_eq!(probe.server_limit(), 250);
        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls.first().map(Url::path), Some("/geoserver/ows"));
    }

    #[rstest]
    #[case::constraint_absent(Ok(capabilities_document(None, &[]).into_bytes()))]
    #[case::malformed(Ok(b"<WFS_Capabilities>".to_vec()))]
    #[case::request_failed(Err(()))]
    fn server_limit_falls_back(
        service: WfsService,
        ctx: HarvestContext,
        #[case] response: Result<Vec<u8>, ()>,
    ) {
        let transport = ScriptedTransport::new(move |url, _| {
            response.clone().map_err(|()| TransportError::Network {
                url: url.to_string(),
                message: "connection reset".into(),
            })
        });
        let probe = CapabilityProbe::new(&transport, &service, &ctx);
        assert_eq!(probe.server_limit(), DEFAULT_PAGE_CAP);
    }

    #[rstest]
    fn hit_count_is_retried_until_it_succeeds(service: WfsService, ctx: HarvestContext) {
        let transport = ScriptedTransport::new(|url, call| {
            if call < 2 {
                Err(TransportError::Http {
                    url: url.to_string(),
                    status: 503,
                    message: "Service Unavailable".into(),
                })
            } else {
                Ok(hits_document(250_000).into_bytes())
            }
        });
        let pause = RecordingPause::default();
        let probe = CapabilityProbe::new(&transport, &service, &ctx);
        let total = probe
            .count_max_result(&FeatureFilter::default(), &policy(5), &pause)
            .expect("third attempt succeeds");
        assert_eq!(total, 250_000);
        assert_eq!(transport.calls().len(), 3);
        assert_eq!(pause.delays(), vec![Duration::from_secs(5); 2]);
    }

    #[rstest]
    fn exception_reports_count_as_failures(service: WfsService, ctx: HarvestContext) {
        let transport =
            ScriptedTransport::new(|_, _| Ok(exception_report("Unknown layer").into_bytes()));
        let probe = CapabilityProbe::new(&transport, &service, &ctx);
        let err = probe
            .count_max_result(&FeatureFilter::default(), &policy(2), &RecordingPause::default())
            .expect_err("every attempt is an exception report");
        let ProbeError::Exhausted(exhausted) = err else {
            panic!("expected exhaustion, got {err:?}");
        };
        assert_eq!(exhausted.attempts, 2);
        assert!(matches!(
            exhausted.last_error,
            TransportError::ServiceException { ref message, .. } if message == "Unknown layer"
        ));
    }

    #[rstest]
    fn unknown_hit_count_is_malformed(service: WfsService, ctx: HarvestContext) {
        let transport = ScriptedTransport::new(|_, _| {
            Ok(br#"<wfs:FeatureCollection xmlns:wfs="http://www.opengis.net/wfs/2.0" numberMatched="unknown" numberReturned="0"/>"#.to_vec())
        });
        let probe = CapabilityProbe::new(&transport, &service, &ctx);
        let err = probe
            .count_max_result(&FeatureFilter::default(), &policy(3), &RecordingPause::default())
            .expect_err("unknown is not a count");
        assert!(matches!(err, ProbeError::MalformedHits { .. }));
        assert_eq!(transport.calls().len(), 1);
    }

    #[rstest]
    #[case(r#"<wfs:FeatureCollection xmlns:wfs="http://www.opengis.net/wfs/2.0" numberMatched="42" numberReturned="0"/>"#, 42)]
    #[case(r#"<wfs:FeatureCollection xmlns:wfs="http://www.opengis.net/wfs" numberOfFeatures="7"/>"#, 7)]
    fn hits_are_read_from_either_version(#[case] xml: &str, #[case] expected: u64) {
        assert_eq!(parse_hits(xml), Ok(expected));
    }

    #[rstest]
    fn feature_type_names_are_listed() {
        let xml = capabilities_document(Some(1000), &["ws:a", "ws:b"]);
        assert_eq!(
            parse_feature_type_names(&xml).expect("well formed"),
            vec!["ws:a".to_owned(), "ws:b".to_owned()]
        );
    }

    #[rstest]
    fn json_bodies_are_not_exception_reports() {
        assert_eq!(exception_message(br#"{"type":"FeatureCollection"}"#), None);
        assert_eq!(
            exception_message(exception_report("boom").as_bytes()).as_deref(),
            Some("boom")
        );
    }
}
