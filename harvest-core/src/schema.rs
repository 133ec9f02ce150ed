//! Column typing and table descriptors.
//!
//! Attribute columns are inferred once, from the first normalised batch of a
//! harvest. The mapping from runtime value types to column kinds is a total
//! function over closed enums; mixed observations widen deterministically.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;

use log::warn;
use thiserror::Error;

use crate::{FeatureRecord, Srid, ValueTag};

/// Columns every feature table carries in addition to inferred attributes.
pub const RESERVED_COLUMNS: [&str; 3] = ["fid", "feature_id", "geometry"];

/// Prefix applied to attributes whose names clash with a reserved column.
const RESERVED_PREFIX: &str = "attr_";

/// An SQL identifier, always emitted double-quoted.
///
/// # Examples
///
/// ```
/// use harvest_core::Identifier;
///
/// let ident = Identifier::new("odd\"name")?;
/// assert_eq!(ident.quoted(), "\"odd\"\"name\"");
/// assert!(Identifier::new("").is_err());
/// # Ok::<(), harvest_core::IdentifierError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(String);

/// Errors raised when validating an [`Identifier`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    /// Identifiers must not be empty.
    #[error("identifier must not be empty")]
    Empty,
    /// Identifiers must not contain NUL bytes.
    #[error("identifier `{0}` contains a NUL byte")]
    ContainsNul(String),
}

impl Identifier {
    /// Validate an identifier.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError`] for empty names or names containing NUL.
    pub fn new(value: impl Into<String>) -> Result<Self, IdentifierError> {
        let value = value.into();
        if value.is_empty() {
            return Err(IdentifierError::Empty);
        }
        if value.contains('\0') {
            return Err(IdentifierError::ContainsNul(value));
        }
        Ok(Self(value))
    }

    /// Unquoted name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name wrapped in double quotes with embedded quotes doubled.
    #[must_use]
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0.replace('"', "\"\""))
    }
}

impl Deref for Identifier {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    /// Namespace holding the table.
    pub schema: Identifier,
    /// Table name within the namespace.
    pub name: Identifier,
}

impl TableRef {
    /// Pair a schema with a table name.
    #[must_use]
    pub const fn new(schema: Identifier, name: Identifier) -> Self {
        Self { schema, name }
    }

    /// `"schema"."name"`, ready to splice into SQL.
    #[must_use]
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.schema.quoted(), self.name.quoted())
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Storage type of an attribute column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    /// 64-bit integers.
    Integer,
    /// Double precision floats.
    Float,
    /// Booleans.
    Boolean,
    /// Dates and date-times.
    Timestamp,
    /// Text, and anything without a better fit.
    Text,
}

impl ColumnKind {
    /// Map a runtime value type to a column kind. Total over [`ValueTag`].
    #[must_use]
    pub const fn from_tag(tag: ValueTag) -> Self {
        match tag {
            ValueTag::Integer => Self::Integer,
            ValueTag::Float => Self::Float,
            ValueTag::Boolean => Self::Boolean,
            ValueTag::Timestamp => Self::Timestamp,
            ValueTag::Text | ValueTag::Unknown => Self::Text,
        }
    }

    /// Smallest kind able to hold values of both `self` and `other`.
    ///
    /// Integers and floats widen to floats; any other disagreement falls
    /// back to text.
    #[must_use]
    pub const fn widen(self, other: Self) -> Self {
        match (self, other) {
            (Self::Integer, Self::Integer) => Self::Integer,
            (Self::Float, Self::Float)
            | (Self::Integer, Self::Float)
            | (Self::Float, Self::Integer) => Self::Float,
            (Self::Boolean, Self::Boolean) => Self::Boolean,
            (Self::Timestamp, Self::Timestamp) => Self::Timestamp,
            _ => Self::Text,
        }
    }

    /// Declared SQL type.
    #[must_use]
    pub const fn sql_type(self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Float => "FLOAT",
            Self::Boolean => "BOOLEAN",
            Self::Timestamp => "TIMESTAMP",
            Self::Text => "TEXT",
        }
    }

    /// Recover a kind from a declared SQL type; unknown types read as text.
    #[must_use]
    pub fn from_sql_type(declared: &str) -> Self {
        match declared.trim().to_ascii_uppercase().as_str() {
            "INTEGER" | "INT" | "BIGINT" => Self::Integer,
            "FLOAT" | "REAL" | "DOUBLE" => Self::Float,
            "BOOLEAN" | "BOOL" => Self::Boolean,
            "TIMESTAMP" | "DATETIME" | "DATE" => Self::Timestamp,
            _ => Self::Text,
        }
    }
}

/// One inferred attribute column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    /// Column name in the table.
    pub name: Identifier,
    /// Storage kind.
    pub kind: ColumnKind,
    /// Whether the column accepts nulls.
    pub nullable: bool,
}

impl ColumnDef {
    /// Name of the feature attribute stored in this column.
    #[must_use]
    pub fn attribute_name(&self) -> &str {
        self.name
            .strip_prefix(RESERVED_PREFIX)
            .filter(|rest| is_reserved(rest))
            .unwrap_or(self.name.as_str())
    }
}

/// Column name used to store the attribute `name`.
///
/// Attributes that collide with a reserved column gain an `attr_` prefix.
///
/// ```
/// use harvest_core::attribute_column_name;
///
/// assert_eq!(attribute_column_name("uf"), "uf");
/// assert_eq!(attribute_column_name("FID"), "attr_FID");
/// ```
#[must_use]
pub fn attribute_column_name(name: &str) -> String {
    if is_reserved(name) {
        format!("{RESERVED_PREFIX}{name}")
    } else {
        name.to_owned()
    }
}

fn is_reserved(name: &str) -> bool {
    RESERVED_COLUMNS
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name))
}

/// Everything a store needs to create, or describe, a feature table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDescriptor {
    /// Destination table.
    pub table: TableRef,
    /// Attribute columns in table order.
    pub columns: Vec<ColumnDef>,
    /// Spatial reference of the geometry column.
    pub srid: Srid,
}

impl SchemaDescriptor {
    /// Infer a descriptor from a sample batch.
    #[must_use]
    pub fn infer(table: TableRef, srid: Srid, sample: &[FeatureRecord]) -> Self {
        Self {
            table,
            columns: infer_columns(sample),
            srid,
        }
    }

    /// Look up the column storing the attribute `name`.
    #[must_use]
    pub fn column_for(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.attribute_name() == name)
    }
}

#[derive(Default)]
struct Observation {
    kind: Option<ColumnKind>,
    present: usize,
    saw_null: bool,
}

/// Infer attribute columns from a batch of records.
///
/// Columns appear in attribute-name order. A column is nullable when any
/// record lacks the attribute or holds null for it. Attributes with only
/// null values become text columns. Attributes whose column name would
/// clash case-insensitively with an earlier column are skipped.
///
/// # Examples
///
/// ```
/// use geo::{Geometry, Point};
/// use harvest_core::{
///     AttributeValue, Attributes, ColumnKind, FeatureId, FeatureRecord, infer_columns,
/// };
///
/// let record = |area: AttributeValue| FeatureRecord {
///     id: FeatureId::new("1").expect("non-empty"),
///     attributes: Attributes::from([("area".to_owned(), area)]),
///     geometry: Geometry::Point(Point::new(0.0, 0.0)),
/// };
/// let columns = infer_columns(&[
///     record(AttributeValue::Integer(3)),
///     record(AttributeValue::Float(2.5)),
/// ]);
/// assert_eq!(columns[0].kind, ColumnKind::Float);
/// assert!(!columns[0].nullable);
/// ```
#[must_use]
pub fn infer_columns(sample: &[FeatureRecord]) -> Vec<ColumnDef> {
    let mut observed: BTreeMap<&str, Observation> = BTreeMap::new();
    for record in sample {
        for (name, value) in &record.attributes {
            let entry = observed.entry(name.as_str()).or_default();
            entry.present += 1;
            match value.tag() {
                None => entry.saw_null = true,
                Some(tag) => {
                    let kind = ColumnKind::from_tag(tag);
                    entry.kind = Some(entry.kind.map_or(kind, |seen| seen.widen(kind)));
                }
            }
        }
    }

    let mut columns: Vec<ColumnDef> = Vec::with_capacity(observed.len());
    for (attribute, observation) in observed {
        let name = match Identifier::new(attribute_column_name(attribute)) {
            Ok(name) => name,
            Err(err) => {
                warn!("skipping attribute `{attribute}`: {err}");
                continue;
            }
        };
        if columns
            .iter()
            .any(|c| c.name.eq_ignore_ascii_case(name.as_str()))
        {
            warn!("skipping attribute `{attribute}`: column name clashes with an earlier column");
            continue;
        }
        columns.push(ColumnDef {
            name,
            kind: observation.kind.unwrap_or(ColumnKind::Text),
            nullable: observation.saw_null || observation.present < sample.len(),
        });
    }
    columns
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AttributeValue, Attributes, FeatureId};
    use chrono::NaiveDate;
    use geo::{Geometry, Point};
    use rstest::rstest;

    const ALL_TAGS: [ValueTag; 6] = [
        ValueTag::Integer,
        ValueTag::Float,
        ValueTag::Boolean,
        ValueTag::Timestamp,
        ValueTag::Text,
        ValueTag::Unknown,
    ];

    fn record(id: &str, attributes: Vec<(&str, AttributeValue)>) -> FeatureRecord {
        FeatureRecord {
            id: FeatureId::new(id).expect("non-empty id"),
            attributes: attributes
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v))
                .collect::<Attributes>(),
            geometry: Geometry::Point(Point::new(0.0, 0.0)),
        }
    }

    #[rstest]
    fn mapping_is_total_and_deterministic() {
        for tag in ALL_TAGS {
            assert_eq!(ColumnKind::from_tag(tag), ColumnKind::from_tag(tag));
        }
        assert_eq!(ColumnKind::from_tag(ValueTag::Unknown), ColumnKind::Text);
    }

    #[rstest]
    fn widening_is_commutative() {
        for a in ALL_TAGS {
            for b in ALL_TAGS {
                let (ka, kb) = (ColumnKind::from_tag(a), ColumnKind::from_tag(b));
                assert_eq!(ka.widen(kb), kb.widen(ka), "{a:?} vs {b:?}");
            }
        }
    }

    #[rstest]
    #[case(ColumnKind::Integer, ColumnKind::Float, ColumnKind::Float)]
    #[case(ColumnKind::Boolean, ColumnKind::Integer, ColumnKind::Text)]
    #[case(ColumnKind::Timestamp, ColumnKind::Text, ColumnKind::Text)]
    #[case(ColumnKind::Timestamp, ColumnKind::Timestamp, ColumnKind::Timestamp)]
    fn mixed_kinds_widen(#[case] a: ColumnKind, #[case] b: ColumnKind, #[case] expected: ColumnKind) {
        assert_eq!(a.widen(b), expected);
    }

    #[rstest]
    fn sql_types_round_trip() {
        for kind in ALL_TAGS.map(ColumnKind::from_tag) {
            assert_eq!(ColumnKind::from_sql_type(kind.sql_type()), kind);
        }
    }

    #[rstest]
    fn nullability_tracks_missing_and_null_values() {
        let date = NaiveDate::from_ymd_opt(2020, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .expect("valid date");
        let sample = [
            record(
                "1",
                vec![
                    ("uf", AttributeValue::Text("PA".to_owned())),
                    (
                        "image_date",
                        AttributeValue::Timestamp {
                            at: date,
                            raw: "2020-01-01".to_owned(),
                        },
                    ),
                    ("notes", AttributeValue::Null),
                ],
            ),
            record("2", vec![("uf", AttributeValue::Text("MT".to_owned()))]),
        ];
        let columns = infer_columns(&sample);
        let summary: Vec<_> = columns
            .iter()
            .map(|c| (c.name.as_str(), c.kind, c.nullable))
            .collect();
        assert_eq!(
            summary,
            [
                ("image_date", ColumnKind::Timestamp, true),
                ("notes", ColumnKind::Text, true),
                ("uf", ColumnKind::Text, false),
            ]
        );
    }

    #[rstest]
    fn reserved_attribute_names_are_prefixed() {
        let sample = [record("1", vec![("geometry", AttributeValue::Integer(1))])];
        let columns = infer_columns(&sample);
        let column = columns.first().expect("one column");
        assert_eq!(column.name.as_str(), "attr_geometry");
        assert_eq!(column.attribute_name(), "geometry");
    }

    #[rstest]
    fn case_clashes_keep_the_first_column() {
        let sample = [record(
            "1",
            vec![
                ("UF", AttributeValue::Text("PA".to_owned())),
                ("uf", AttributeValue::Text("pa".to_owned())),
            ],
        )];
        let names: Vec<_> = infer_columns(&sample)
            .into_iter()
            .map(|c| c.name.as_str().to_owned())
            .collect();
        assert_eq!(names, ["UF"]);
    }
}
