use geo::BoundingRect;
use harvest_core::{
    AttributeValue, ColumnKind, FeatureRecord, HarvestContext, IdentityModel, SchemaDescriptor,
};
use log::debug;
use rusqlite::{params_from_iter, types::Value};
use thiserror::Error;
use wkt::ToWkt;

use super::{FeatureStore, spatial_index};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Rows written by one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    /// New rows.
    pub inserted: u64,
    /// Records skipped because their identifier was already stored.
    pub duplicates: u64,
}

/// A batch could not be written; nothing from it was committed.
#[derive(Debug, Error)]
pub enum LoadError {
    /// A statement failed.
    #[error("failed to {operation} in {table}")]
    Sqlite {
        /// Operation being performed.
        operation: &'static str,
        /// Target table.
        table: String,
        /// Underlying SQLite error.
        #[source]
        source: rusqlite::Error,
    },
    /// The spatial index name could not be derived.
    #[error("invalid spatial index name for {table}")]
    IndexName {
        /// Target table.
        table: String,
        /// Validation failure.
        #[source]
        source: harvest_core::IdentifierError,
    },
}

/// Writes normalised batches without duplicating stored features.
///
/// With [`IdentityModel::NaturalKey`] rows go through
/// `INSERT ... ON CONFLICT("feature_id") DO NOTHING`, so replaying a batch
/// leaves the table unchanged. With [`IdentityModel::WindowPartitioned`]
/// rows are appended and the fetch plan is relied on to avoid overlap.
#[derive(Debug, Clone, Copy)]
pub struct IdempotentLoader<'a> {
    context: &'a HarvestContext,
    identity: IdentityModel,
}

impl<'a> IdempotentLoader<'a> {
    /// Build a loader for one harvest.
    #[must_use]
    pub const fn new(context: &'a HarvestContext, identity: IdentityModel) -> Self {
        Self { context, identity }
    }

    /// Write `batch` into the table described by `descriptor`.
    ///
    /// The batch commits as a single transaction together with its spatial
    /// index entries. Attributes without a column are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] when any statement fails; the batch is rolled
    /// back.
    pub fn load(
        &self,
        store: &mut FeatureStore,
        descriptor: &SchemaDescriptor,
        batch: &[FeatureRecord],
    ) -> Result<LoadSummary, LoadError> {
        let table = descriptor.table.to_string();
        let sqlite = |operation: &'static str| {
            let table = table.clone();
            move |source| LoadError::Sqlite {
                operation,
                table,
                source,
            }
        };
        let index = spatial_index(&descriptor.table).map_err(|source| LoadError::IndexName {
            table: table.clone(),
            source,
        })?;

        let transaction = store
            .connection_mut()
            .transaction()
            .map_err(sqlite("begin load transaction"))?;
        let mut summary = LoadSummary::default();
        {
            let mut insert_feature = transaction
                .prepare_cached(&self.insert_sql(descriptor))
                .map_err(sqlite("prepare feature insert"))?;
            let mut insert_bounds = transaction
                .prepare_cached(&format!(
                    "INSERT INTO {} (id, minx, maxx, miny, maxy) VALUES (?1, ?2, ?3, ?4, ?5)",
                    index.qualified()
                ))
                .map_err(sqlite("prepare spatial index insert"))?;

            for record in batch {
                let changed = insert_feature
                    .execute(params_from_iter(row_values(descriptor, record)))
                    .map_err(sqlite("insert feature"))?;
                if changed == 0 {
                    debug!("{} feature {} already stored", self.context, record.id);
                    summary.duplicates += 1;
                    continue;
                }
                summary.inserted += 1;
                if let Some(bounds) = record.geometry.bounding_rect() {
                    insert_bounds
                        .execute((
                            transaction.last_insert_rowid(),
                            bounds.min().x,
                            bounds.max().x,
                            bounds.min().y,
                            bounds.max().y,
                        ))
                        .map_err(sqlite("index feature bounds"))?;
                }
            }
        }
        transaction
            .commit()
            .map_err(sqlite("commit load transaction"))?;
        debug!(
            "{} loaded {} rows into {table} ({} duplicates)",
            self.context, summary.inserted, summary.duplicates
        );
        Ok(summary)
    }

    fn insert_sql(&self, descriptor: &SchemaDescriptor) -> String {
        let mut columns = vec!["\"feature_id\"".to_owned()];
        columns.extend(descriptor.columns.iter().map(|column| column.name.quoted()));
        columns.push("\"geometry\"".to_owned());
        let placeholders = (1..=columns.len())
            .map(|n| format!("?{n}"))
            .collect::<Vec<_>>()
            .join(", ");
        let conflict = match self.identity {
            IdentityModel::NaturalKey => " ON CONFLICT(\"feature_id\") DO NOTHING",
            IdentityModel::WindowPartitioned => "",
        };
        format!(
            "INSERT INTO {} ({}) VALUES ({placeholders}){conflict}",
            descriptor.table.qualified(),
            columns.join(", ")
        )
    }
}

fn row_values(descriptor: &SchemaDescriptor, record: &FeatureRecord) -> Vec<Value> {
    let mut values = Vec::with_capacity(descriptor.columns.len() + 2);
    values.push(Value::Text(record.id.as_str().to_owned()));
    values.extend(descriptor.columns.iter().map(|column| {
        record
            .attributes
            .get(column.attribute_name())
            .map_or(Value::Null, |value| sql_value(value, column.kind))
    }));
    values.push(Value::Text(record.geometry.wkt_string()));
    values
}

/// Timestamps in a text column keep their source spelling.
fn sql_value(value: &AttributeValue, kind: ColumnKind) -> Value {
    match value {
        AttributeValue::Null => Value::Null,
        AttributeValue::Integer(n) => Value::Integer(*n),
        AttributeValue::Float(x) => Value::Real(*x),
        AttributeValue::Boolean(flag) => Value::Integer(i64::from(*flag)),
        AttributeValue::Timestamp { raw, .. } if kind == ColumnKind::Text => {
            Value::Text(raw.clone())
        }
        AttributeValue::Timestamp { at, .. } => {
            Value::Text(at.format(TIMESTAMP_FORMAT).to_string())
        }
        AttributeValue::Text(text) => Value::Text(text.clone()),
        AttributeValue::Other(json) => Value::Text(json.to_string()),
    }
}
