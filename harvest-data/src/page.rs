//! GeoJSON page decoding.
//!
//! A page is the body of one `GetFeature` response. Decoding keeps the
//! page's declared spatial reference so the normalizer can reproject, and
//! counts features that cannot become records instead of failing the page.

use geo::Geometry;
use geojson::{Feature, GeoJson, JsonObject, feature::Id};
use harvest_core::{
    AttributeValue, Attributes, DecodedPage, FeatureId, HarvestContext, RawFeature, Srid, SridError,
};
use log::warn;
use serde_json::Value;
use thiserror::Error;

/// Errors that make a whole page unusable.
#[derive(Debug, Error)]
pub enum PageDecodeError {
    /// The body is not JSON.
    #[error("page is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The body is JSON but not GeoJSON.
    #[error("page is not valid GeoJSON: {0}")]
    GeoJson(#[from] geojson::Error),
    /// The body is a bare geometry rather than features.
    #[error("page holds a bare geometry, expected a feature collection")]
    BareGeometry,
    /// The declared `crs` is not one the normalizer handles.
    #[error("page declares an unsupported spatial reference: {0}")]
    Srs(#[from] SridError),
}

/// Decode a page body into raw features.
///
/// Feature identifiers come from the GeoJSON `id` member and fall back to
/// `id_property`. Features without an identifier or a convertible geometry
/// are counted in [`DecodedPage::discarded`]. The page spatial reference is
/// read from a named `crs` member and defaults to `requested_srs`, the
/// reference the page was asked for.
///
/// # Errors
///
/// Returns [`PageDecodeError`] when the body cannot be parsed as GeoJSON
/// features or names an unsupported spatial reference.
pub fn decode_page(
    bytes: &[u8],
    id_property: Option<&str>,
    requested_srs: Srid,
    context: &HarvestContext,
) -> Result<DecodedPage, PageDecodeError> {
    let value: Value = serde_json::from_slice(bytes)?;
    let (features, foreign) = match GeoJson::from_json_value(value)? {
        GeoJson::FeatureCollection(collection) => {
            (collection.features, collection.foreign_members)
        }
        GeoJson::Feature(feature) => {
            let foreign = feature.foreign_members.clone();
            (vec![feature], foreign)
        }
        GeoJson::Geometry(_) => return Err(PageDecodeError::BareGeometry),
    };
    let source_srid = declared_srid(foreign.as_ref(), requested_srs)?;

    let mut page = DecodedPage {
        source_srid,
        features: Vec::with_capacity(features.len()),
        discarded: 0,
    };
    for (position, feature) in features.into_iter().enumerate() {
        match convert_feature(feature, id_property) {
            Ok(raw) => page.features.push(raw),
            Err(reason) => {
                warn!("{context} discarding feature #{position}: {reason}");
                page.discarded += 1;
            }
        }
    }
    Ok(page)
}

fn declared_srid(foreign: Option<&JsonObject>, fallback: Srid) -> Result<Srid, SridError> {
    foreign
        .and_then(|members| members.get("crs"))
        .and_then(|crs| crs.pointer("/properties/name"))
        .and_then(Value::as_str)
        .map_or(Ok(fallback), str::parse)
}

fn convert_feature(feature: Feature, id_property: Option<&str>) -> Result<RawFeature, String> {
    let properties = feature.properties.unwrap_or_default();
    let id = feature
        .id
        .as_ref()
        .and_then(|id| match id {
            Id::String(text) => FeatureId::new(text.as_str()).ok(),
            Id::Number(number) => FeatureId::new(number.to_string()).ok(),
        })
        .or_else(|| {
            id_property
                .and_then(|name| properties.get(name))
                .and_then(FeatureId::from_json)
        })
        .ok_or_else(|| "no identifier".to_owned())?;
    let geometry = feature
        .geometry
        .ok_or_else(|| format!("feature {id} has no geometry"))?;
    let geometry = Geometry::<f64>::try_from(geometry.value)
        .map_err(|err| format!("feature {id} geometry is unusable: {err}"))?;
    let attributes: Attributes = properties
        .into_iter()
        .map(|(name, value)| (name, AttributeValue::from_json(value)))
        .collect();
    Ok(RawFeature {
        id,
        attributes,
        geometry,
    })
}
