//! Scripted transport and canned OGC documents for tests.

use std::cell::RefCell;
use std::fmt::Write as _;

use serde_json::{Value, json};
use url::Url;

use super::{TransportError, WfsTransport};

type Responder = Box<dyn Fn(&Url, usize) -> Result<Vec<u8>, TransportError>>;

/// [`WfsTransport`] answering from a closure and logging every request.
///
/// The closure receives the URL and the zero-based index of the call.
pub struct ScriptedTransport {
    responder: Responder,
    calls: RefCell<Vec<Url>>,
}

impl ScriptedTransport {
    /// Wrap a responder.
    pub fn new(
        responder: impl Fn(&Url, usize) -> Result<Vec<u8>, TransportError> + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Requests issued so far, in order.
    pub fn calls(&self) -> Vec<Url> {
        self.calls.borrow().clone()
    }
}

impl WfsTransport for ScriptedTransport {
    fn get(&self, url: &Url) -> Result<Vec<u8>, TransportError> {
        let index = {
            let mut calls = self.calls.borrow_mut();
            calls.push(url.clone());
            calls.len() - 1
        };
        (self.responder)(url, index)
    }
}

/// Value of the first query parameter named `key`.
pub fn query_value(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(name, _)| name.eq_ignore_ascii_case(key))
        .map(|(_, value)| value.into_owned())
}

/// Whether `url` is a `GetFeature` hit-count request.
pub fn is_hits_request(url: &Url) -> bool {
    query_value(url, "resultType").as_deref() == Some("hits")
}

/// WFS 2.0 capabilities advertising `count_default` and the given types.
pub fn capabilities_document(count_default: Option<u64>, feature_types: &[&str]) -> String {
    let constraint = count_default.map_or_else(String::new, |value| {
        format!(
            r#"<ows:Constraint name="CountDefault"><ows:NoValues/><ows:DefaultValue>{value}</ows:DefaultValue></ows:Constraint>"#
        )
    });
    let mut types = String::new();
    for name in feature_types {
        let _ = write!(
            types,
            "<wfs:FeatureType><wfs:Name>{name}</wfs:Name><wfs:Title>{name}</wfs:Title></wfs:FeatureType>"
        );
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<wfs:WFS_Capabilities version="2.0.0" xmlns:wfs="http://www.opengis.net/wfs/2.0" xmlns:ows="http://www.opengis.net/ows/1.1">
  <ows:OperationsMetadata>
    <ows:Operation name="GetCapabilities"/>
    <ows:Operation name="GetFeature">{constraint}</ows:Operation>
    <ows:Constraint name="ImplementsResultPaging"><ows:NoValues/><ows:DefaultValue>TRUE</ows:DefaultValue></ows:Constraint>
  </ows:OperationsMetadata>
  <wfs:FeatureTypeList>{types}</wfs:FeatureTypeList>
</wfs:WFS_Capabilities>"#
    )
}

/// WFS 2.0 `resultType=hits` response.
pub fn hits_document(total: u64) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><wfs:FeatureCollection xmlns:wfs="http://www.opengis.net/wfs/2.0" numberMatched="{total}" numberReturned="0" timeStamp="2024-01-01T00:00:00Z"/>"#
    )
}

/// OWS exception report carrying `message`.
pub fn exception_report(message: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><ows:ExceptionReport xmlns:ows="http://www.opengis.net/ows/1.1" version="2.0.0"><ows:Exception exceptionCode="InvalidParameterValue"><ows:ExceptionText>{message}</ows:ExceptionText></ows:Exception></ows:ExceptionReport>"#
    )
}

/// GeoJSON feature with a small square polygon at `(x, y)`.
pub fn square_feature(id: &str, x: f64, y: f64, properties: Value) -> Value {
    let side = 0.01;
    json!({
        "type": "Feature",
        "id": id,
        "geometry": {
            "type": "Polygon",
            "coordinates": [[
                [x, y], [x + side, y], [x + side, y + side], [x, y + side], [x, y]
            ]]
        },
        "properties": properties
    })
}

/// GeoJSON feature collection, optionally tagged with a named CRS.
pub fn feature_collection(features: Vec<Value>, srid: Option<u32>) -> String {
    let mut collection = json!({
        "type": "FeatureCollection",
        "features": features,
    });
    if let (Some(code), Some(object)) = (srid, collection.as_object_mut()) {
        object.insert(
            "crs".to_owned(),
            json!({ "type": "name", "properties": { "name": format!("urn:ogc:def:crs:EPSG::{code}") } }),
        );
    }
    collection.to_string()
}

/// Page of deforestation polygons with ids `{prefix}{n}` for each `n` in `range`.
pub fn deforestation_page(prefix: &str, range: std::ops::Range<u32>) -> String {
    let features = range
        .map(|n| {
            let offset = f64::from(n) * 0.02;
            square_feature(
                &format!("{prefix}{n}"),
                -50.0 + offset,
                -10.0,
                json!({
                    "uid": n,
                    "state": "PA",
                    "area_km": 0.25 + f64::from(n),
                    "image_date": "2019-08-01",
                    "main_class": "desmatamento",
                }),
            )
        })
        .collect();
    feature_collection(features, Some(4674))
}
