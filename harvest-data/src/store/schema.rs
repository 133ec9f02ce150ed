use std::fmt;

use harvest_core::{
    ColumnDef, ColumnKind, FeatureRecord, HarvestContext, Identifier, IdentifierError,
    IdentityModel, RESERVED_COLUMNS, SchemaDescriptor, Srid, TableRef, infer_columns,
};
use log::{debug, info};
use rusqlite::{Connection, OptionalExtension, Transaction};
use thiserror::Error;

use super::{FeatureStore, StoreError, spatial_index, unique_key_index};

/// Provisioning stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionStep {
    /// Attach the schema database.
    Schema,
    /// Verify R*Tree support and create the spatial registry.
    SpatialExtension,
    /// Create the feature table.
    Table,
    /// Create the R*Tree index over geometry bounds.
    SpatialIndex,
    /// Create the unique index on `feature_id`.
    UniqueKey,
    /// Read an existing table's columns back.
    Describe,
}

impl fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Schema => "ensure schema",
            Self::SpatialExtension => "ensure spatial extension",
            Self::Table => "ensure table",
            Self::SpatialIndex => "ensure spatial index",
            Self::UniqueKey => "ensure uniqueness constraint",
            Self::Describe => "describe table",
        })
    }
}

/// Errors raised while provisioning a feature table. All are fatal.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// A provisioning statement failed.
    #[error("failed to {step} for {table}")]
    Step {
        /// Stage that failed.
        step: ProvisionStep,
        /// Target table.
        table: String,
        /// Underlying SQLite error.
        #[source]
        source: rusqlite::Error,
    },
    /// The SQLite build lacks the R*Tree module.
    #[error("SQLite was built without the R*Tree module; cannot index {table}")]
    SpatialExtensionUnavailable {
        /// Target table.
        table: String,
    },
    /// The existing table stores geometries in another reference.
    #[error("{table} stores geometries in EPSG:{found}, expected {expected}")]
    SridMismatch {
        /// Target table.
        table: String,
        /// Reference the harvest produces.
        expected: Srid,
        /// Reference recorded for the table.
        found: i64,
    },
    /// A column or index name is not a valid identifier.
    #[error("invalid identifier in {table}")]
    InvalidIdentifier {
        /// Target table.
        table: String,
        /// Validation failure.
        #[source]
        source: IdentifierError,
    },
    /// Inspecting the store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Creates, once, the table a harvest loads into.
///
/// Every step is conditional on absence, so provisioning an existing table
/// only verifies it and reads its columns back. The schema attachment runs
/// first; the remaining steps commit together.
#[derive(Debug, Clone, Copy)]
pub struct SchemaInferencer<'a> {
    context: &'a HarvestContext,
    identity: IdentityModel,
}

impl<'a> SchemaInferencer<'a> {
    /// Build an inferencer for one harvest.
    #[must_use]
    pub const fn new(context: &'a HarvestContext, identity: IdentityModel) -> Self {
        Self { context, identity }
    }

    /// Ensure `table` exists and describe it.
    ///
    /// Columns are inferred from `sample` when the table is new and read back
    /// from the store otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] naming the failed step.
    pub fn provision(
        &self,
        store: &mut FeatureStore,
        table: &TableRef,
        srid: Srid,
        sample: &[FeatureRecord],
    ) -> Result<SchemaDescriptor, ProvisionError> {
        let label = table.to_string();
        ensure_schema(store, table)?;

        let step_error = |step: ProvisionStep| {
            let table = label.clone();
            move |source| ProvisionError::Step {
                step,
                table,
                source,
            }
        };
        let existed = store.table_exists(table)?;
        let transaction = store
            .connection_mut()
            .transaction()
            .map_err(step_error(ProvisionStep::Table))?;

        ensure_spatial_extension(&transaction, table, srid)?;
        let columns = if existed {
            let columns = describe_columns(&transaction, table)?;
            verify_srid(&transaction, table, srid)?;
            debug!(
                "{} reusing {table} with {} attribute columns",
                self.context,
                columns.len()
            );
            columns
        } else {
            let columns = infer_columns(sample);
            create_table(&transaction, table, &columns, srid)?;
            info!(
                "{} created {table} with {} attribute columns in {srid}",
                self.context,
                columns.len()
            );
            columns
        };
        ensure_spatial_index(&transaction, table)?;
        if self.identity.requires_unique_key() {
            ensure_unique_key(&transaction, table)?;
        }

        transaction
            .commit()
            .map_err(step_error(ProvisionStep::Table))?;

        Ok(SchemaDescriptor {
            table: table.clone(),
            columns,
            srid,
        })
    }
}

fn run_step(
    transaction: &Connection,
    step: ProvisionStep,
    table: &TableRef,
    sql: &str,
) -> Result<(), ProvisionError> {
    transaction
        .execute(sql, [])
        .map(|_| ())
        .map_err(|source| ProvisionError::Step {
            step,
            table: table.to_string(),
            source,
        })
}

fn invalid_identifier(table: &TableRef) -> impl FnOnce(IdentifierError) -> ProvisionError + '_ {
    move |source| ProvisionError::InvalidIdentifier {
        table: table.to_string(),
        source,
    }
}

fn ensure_schema(store: &FeatureStore, table: &TableRef) -> Result<(), ProvisionError> {
    store.attach(&table.schema).map_err(|err| match err {
        StoreError::Sqlite { source, .. } => ProvisionError::Step {
            step: ProvisionStep::Schema,
            table: table.to_string(),
            source,
        },
        other => ProvisionError::Store(other),
    })
}

fn ensure_spatial_extension(
    transaction: &Transaction<'_>,
    table: &TableRef,
    srid: Srid,
) -> Result<(), ProvisionError> {
    let step = ProvisionStep::SpatialExtension;
    let rtree: bool = transaction
        .query_row("SELECT sqlite_compileoption_used('ENABLE_RTREE')", [], |row| {
            row.get(0)
        })
        .map_err(|source| ProvisionError::Step {
            step,
            table: table.to_string(),
            source,
        })?;
    if !rtree {
        return Err(ProvisionError::SpatialExtensionUnavailable {
            table: table.to_string(),
        });
    }
    let schema = table.schema.quoted();
    run_step(
        transaction,
        step,
        table,
        &format!(
            "CREATE TABLE IF NOT EXISTS {schema}.spatial_ref_sys (
                srid INTEGER PRIMARY KEY,
                auth_name TEXT NOT NULL,
                auth_srid INTEGER NOT NULL,
                description TEXT NOT NULL
            )"
        ),
    )?;
    run_step(
        transaction,
        step,
        table,
        &format!(
            "CREATE TABLE IF NOT EXISTS {schema}.geometry_columns (
                f_table_name TEXT NOT NULL,
                f_geometry_column TEXT NOT NULL,
                geometry_type TEXT NOT NULL,
                srid INTEGER NOT NULL REFERENCES spatial_ref_sys(srid),
                PRIMARY KEY (f_table_name, f_geometry_column)
            )"
        ),
    )?;
    transaction
        .execute(
            &format!(
                "INSERT OR IGNORE INTO {schema}.spatial_ref_sys
                    (srid, auth_name, auth_srid, description) VALUES (?1, 'EPSG', ?1, ?2)"
            ),
            (srid.code(), srid.description()),
        )
        .map(|_| ())
        .map_err(|source| ProvisionError::Step {
            step,
            table: table.to_string(),
            source,
        })
}

fn column_sql(column: &ColumnDef) -> String {
    // Later pages may carry nulls the sample did not.
    format!("{} {}", column.name.quoted(), column.kind.sql_type())
}

fn create_table(
    transaction: &Transaction<'_>,
    table: &TableRef,
    columns: &[ColumnDef],
    srid: Srid,
) -> Result<(), ProvisionError> {
    let mut definitions = vec![
        "\"fid\" INTEGER PRIMARY KEY".to_owned(),
        "\"feature_id\" TEXT NOT NULL".to_owned(),
    ];
    definitions.extend(columns.iter().map(column_sql));
    definitions.push("\"geometry\" GEOMETRY NOT NULL".to_owned());
    run_step(
        transaction,
        ProvisionStep::Table,
        table,
        &format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            table.qualified(),
            definitions.join(",\n    ")
        ),
    )?;
    transaction
        .execute(
            &format!(
                "INSERT OR REPLACE INTO {}.geometry_columns
                    (f_table_name, f_geometry_column, geometry_type, srid)
                    VALUES (?1, 'geometry', 'GEOMETRY', ?2)",
                table.schema.quoted()
            ),
            (table.name.as_str(), srid.code()),
        )
        .map(|_| ())
        .map_err(|source| ProvisionError::Step {
            step: ProvisionStep::Table,
            table: table.to_string(),
            source,
        })
}

fn ensure_spatial_index(
    transaction: &Transaction<'_>,
    table: &TableRef,
) -> Result<(), ProvisionError> {
    let index = spatial_index(table).map_err(invalid_identifier(table))?;
    run_step(
        transaction,
        ProvisionStep::SpatialIndex,
        table,
        &format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS {} USING rtree(id, minx, maxx, miny, maxy)",
            index.qualified()
        ),
    )
}

fn ensure_unique_key(
    transaction: &Transaction<'_>,
    table: &TableRef,
) -> Result<(), ProvisionError> {
    let index = unique_key_index(table).map_err(invalid_identifier(table))?;
    run_step(
        transaction,
        ProvisionStep::UniqueKey,
        table,
        &format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {}.{} ON {} (\"feature_id\")",
            table.schema.quoted(),
            index.quoted(),
            table.name.quoted()
        ),
    )
}

fn describe_columns(
    transaction: &Transaction<'_>,
    table: &TableRef,
) -> Result<Vec<ColumnDef>, ProvisionError> {
    let describe = |source| ProvisionError::Step {
        step: ProvisionStep::Describe,
        table: table.to_string(),
        source,
    };
    let mut statement = transaction
        .prepare("SELECT name, type, \"notnull\" FROM pragma_table_info(?1, ?2) ORDER BY cid")
        .map_err(describe)?;
    let rows = statement
        .query_map((table.name.as_str(), table.schema.as_str()), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, bool>(2)?,
            ))
        })
        .map_err(describe)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(describe)?;

    rows.into_iter()
        .filter(|(name, _, _)| {
            !RESERVED_COLUMNS
                .iter()
                .any(|reserved| reserved.eq_ignore_ascii_case(name))
        })
        .map(|(name, declared, not_null)| -> Result<ColumnDef, ProvisionError> {
            Ok(ColumnDef {
                name: Identifier::new(name).map_err(invalid_identifier(table))?,
                kind: ColumnKind::from_sql_type(&declared),
                nullable: !not_null,
            })
        })
        .collect()
}

fn verify_srid(
    transaction: &Transaction<'_>,
    table: &TableRef,
    srid: Srid,
) -> Result<(), ProvisionError> {
    let recorded: Option<i64> = transaction
        .query_row(
            &format!(
                "SELECT srid FROM {}.geometry_columns
                    WHERE f_table_name = ?1 AND f_geometry_column = 'geometry'",
                table.schema.quoted()
            ),
            [table.name.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(|source| ProvisionError::Step {
            step: ProvisionStep::Describe,
            table: table.to_string(),
            source,
        })?;
    match recorded {
        Some(found) if found != i64::from(srid.code()) => Err(ProvisionError::SridMismatch {
            table: table.to_string(),
            expected: srid,
            found,
        }),
        _ => Ok(()),
    }
}
