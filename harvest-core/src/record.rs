//! Feature records and their typed attribute values.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use geo::Geometry;
use serde_json::Value;
use thiserror::Error;

use crate::Srid;

/// Identifier of a feature, unique across a full harvest.
///
/// Numeric GeoJSON identifiers are kept in their decimal text form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeatureId(String);

/// Raised when a feature identifier is empty.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("feature identifier must not be empty")]
pub struct FeatureIdError;

impl FeatureId {
    /// Validate and wrap an identifier.
    ///
    /// # Errors
    ///
    /// Returns [`FeatureIdError`] when the trimmed identifier is empty.
    pub fn new(value: impl Into<String>) -> Result<Self, FeatureIdError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(FeatureIdError);
        }
        Ok(Self(value))
    }

    /// Derive an identifier from a JSON scalar.
    ///
    /// Strings and numbers are accepted; anything else yields `None`.
    #[must_use]
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Self::new(s.as_str()).ok(),
            Value::Number(n) => Self::new(n.to_string()).ok(),
            _ => None,
        }
    }

    /// Borrow the identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for FeatureId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Runtime type of a non-null attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueTag {
    /// 64-bit signed integer.
    Integer,
    /// Double precision float.
    Float,
    /// Boolean flag.
    Boolean,
    /// Date or date-time without zone.
    Timestamp,
    /// Free text.
    Text,
    /// Arrays, objects, or numbers outside the integer range.
    Unknown,
}

/// A single attribute value, closed over the types the store understands.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    /// JSON `null`.
    Null,
    /// Integral number within `i64`.
    Integer(i64),
    /// Any other number.
    Float(f64),
    /// JSON boolean.
    Boolean(bool),
    /// String that parsed as an ISO-8601 date or date-time.
    Timestamp {
        /// Parsed instant, in UTC when the source carried a zone.
        at: NaiveDateTime,
        /// Source text, kept for columns that store text.
        raw: String,
    },
    /// Any other string.
    Text(String),
    /// Arrays and objects, kept verbatim.
    Other(Value),
}

impl AttributeValue {
    /// Classify a decoded JSON value.
    ///
    /// # Examples
    ///
    /// ```
    /// use harvest_core::{AttributeValue, ValueTag};
    /// use serde_json::json;
    ///
    /// assert_eq!(AttributeValue::from_json(json!(42)), AttributeValue::Integer(42));
    /// let date = AttributeValue::from_json(json!("2019-08-01"));
    /// assert_eq!(date.tag(), Some(ValueTag::Timestamp));
    /// assert_eq!(AttributeValue::from_json(json!(null)).tag(), None);
    /// ```
    #[must_use]
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Boolean(b),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Integer)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or_else(|| Self::Other(Value::Number(n))),
            Value::String(s) => match parse_timestamp(&s) {
                Some(at) => Self::Timestamp { at, raw: s },
                None => Self::Text(s),
            },
            other @ (Value::Array(_) | Value::Object(_)) => Self::Other(other),
        }
    }

    /// Runtime type, or `None` for [`AttributeValue::Null`].
    #[must_use]
    pub const fn tag(&self) -> Option<ValueTag> {
        match self {
            Self::Null => None,
            Self::Integer(_) => Some(ValueTag::Integer),
            Self::Float(_) => Some(ValueTag::Float),
            Self::Boolean(_) => Some(ValueTag::Boolean),
            Self::Timestamp { .. } => Some(ValueTag::Timestamp),
            Self::Text(_) => Some(ValueTag::Text),
            Self::Other(_) => Some(ValueTag::Unknown),
        }
    }
}

/// Parse the ISO-8601 shapes GeoServer emits for date properties.
///
/// A trailing `Z` on a bare date (`2019-08-01Z`) is tolerated; zoned
/// date-times are normalised to UTC.
fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let text = raw.trim();
    if text.len() < 10 {
        return None;
    }
    if let Ok(zoned) = DateTime::parse_from_rfc3339(text) {
        return Some(zoned.naive_utc());
    }
    let unzoned = text.strip_suffix('Z').unwrap_or(text);
    NaiveDateTime::parse_from_str(unzoned, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(unzoned, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(unzoned, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Attribute map keyed by property name, in name order.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// A decoded feature before geometry normalisation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFeature {
    /// Natural identifier.
    pub id: FeatureId,
    /// Typed properties.
    pub attributes: Attributes,
    /// Geometry in the page's source reference.
    pub geometry: Geometry<f64>,
}

/// Features decoded from one page artefact.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPage {
    /// Spatial reference the page's coordinates are expressed in.
    pub source_srid: Srid,
    /// Features with an identifier and a geometry.
    pub features: Vec<RawFeature>,
    /// Features discarded while decoding (no identifier or no geometry).
    pub discarded: u64,
}

/// A feature ready for loading.
///
/// The geometry is valid and expressed in the harvest's target reference.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRecord {
    /// Natural identifier.
    pub id: FeatureId,
    /// Typed properties.
    pub attributes: Attributes,
    /// Normalised geometry.
    pub geometry: Geometry<f64>,
}
