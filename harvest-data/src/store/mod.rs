//! SQLite spatial store for harvested features.
//!
//! - [`schema`] provisions the namespace, spatial registry, table, R*Tree
//!   index and uniqueness constraint.
//! - [`loader`] writes normalised batches idempotently.
//!
//! Each harvest schema is an attached database, so tables are addressed as
//! `"schema"."table"` throughout.
#![forbid(unsafe_code)]

mod loader;
mod schema;

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use harvest_core::{Identifier, IdentifierError, TableRef};
use rusqlite::{Connection, OptionalExtension};
use thiserror::Error;

pub use loader::{IdempotentLoader, LoadError, LoadSummary};
pub use schema::{ProvisionError, ProvisionStep, SchemaInferencer};

/// Schema used when none is configured.
pub const DEFAULT_SCHEMA: &str = "raw_data";

/// Where the main database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// Private in-memory database; attached schemas are in-memory too.
    Memory,
    /// Database file on disk; attached schemas sit beside it.
    File(Utf8PathBuf),
}

impl fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => f.write_str(":memory:"),
            Self::File(path) => write!(f, "{path}"),
        }
    }
}

/// Errors raised while opening or inspecting the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database parent directory could not be created.
    #[error("failed to prepare directory for {path}")]
    Directory {
        /// Database path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// SQLite refused to open the database.
    #[error("failed to open SQLite database at {location}")]
    Open {
        /// Database location.
        location: StoreLocation,
        /// Underlying SQLite error.
        #[source]
        source: rusqlite::Error,
    },
    /// A derived index name is not a valid identifier.
    #[error(transparent)]
    Identifier(#[from] IdentifierError),
    /// A query against the store failed.
    #[error("failed to {operation}")]
    Sqlite {
        /// Operation being performed.
        operation: &'static str,
        /// Underlying SQLite error.
        #[source]
        source: rusqlite::Error,
    },
}

/// An SQLite connection holding harvested feature tables.
#[derive(Debug)]
pub struct FeatureStore {
    connection: Connection,
    location: StoreLocation,
}

impl FeatureStore {
    /// Open, or create, a database file.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the parent directory cannot be created or
    /// SQLite cannot open the file.
    pub fn open(path: &Utf8Path) -> Result<Self, StoreError> {
        harvest_fs::ensure_parent_dir(path).map_err(|source| StoreError::Directory {
            path: path.to_path_buf(),
            source,
        })?;
        let location = StoreLocation::File(path.to_path_buf());
        let connection = Connection::open(path.as_std_path())
            .map_err(|source| StoreError::Open {
                location: location.clone(),
                source,
            })?;
        Ok(Self {
            connection,
            location,
        })
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Open`] when SQLite cannot allocate it.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let connection = Connection::open_in_memory().map_err(|source| StoreError::Open {
            location: StoreLocation::Memory,
            source,
        })?;
        Ok(Self {
            connection,
            location: StoreLocation::Memory,
        })
    }

    /// Where the main database lives.
    #[must_use]
    pub const fn location(&self) -> &StoreLocation {
        &self.location
    }

    pub(crate) const fn connection(&self) -> &Connection {
        &self.connection
    }

    pub(crate) const fn connection_mut(&mut self) -> &mut Connection {
        &mut self.connection
    }

    /// File backing the attached `schema`.
    ///
    /// For a main database at `data/harvest.db` the schema `raw_data` lives in
    /// `data/harvest.raw_data.db`.
    #[must_use]
    pub fn schema_path(&self, schema: &Identifier) -> String {
        match &self.location {
            StoreLocation::Memory => ":memory:".to_owned(),
            StoreLocation::File(path) => {
                let stem = path.file_stem().unwrap_or("harvest");
                path.with_file_name(format!("{stem}.{schema}.db")).into_string()
            }
        }
    }

    /// Whether `schema` is the main database or already attached.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] when the database list cannot be read.
    pub fn is_attached(&self, schema: &Identifier) -> Result<bool, StoreError> {
        self.connection
            .query_row(
                "SELECT 1 FROM pragma_database_list WHERE name = ?1",
                [schema.as_str()],
                |_| Ok(()),
            )
            .optional()
            .map(|row| row.is_some())
            .map_err(|source| StoreError::Sqlite {
                operation: "list attached databases",
                source,
            })
    }

    /// Attach the database backing `schema` unless it is already attached.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] when SQLite refuses the attachment.
    pub fn attach(&self, schema: &Identifier) -> Result<(), StoreError> {
        if self.is_attached(schema)? {
            return Ok(());
        }
        self.connection
            .execute(
                &format!("ATTACH DATABASE ?1 AS {}", schema.quoted()),
                [self.schema_path(schema).as_str()],
            )
            .map(|_| ())
            .map_err(|source| StoreError::Sqlite {
                operation: "attach schema database",
                source,
            })
    }

    /// Whether `table` exists. A schema that is not attached has no tables.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] when the catalogue cannot be queried.
    pub fn table_exists(&self, table: &TableRef) -> Result<bool, StoreError> {
        self.object_exists(&table.schema, "table", &table.name)
    }

    /// Whether the R*Tree index of `table` exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] when the catalogue cannot be queried.
    pub fn has_spatial_index(&self, table: &TableRef) -> Result<bool, StoreError> {
        let index = spatial_index(table)?;
        self.object_exists(&index.schema, "table", &index.name)
    }

    /// Whether the unique index on `feature_id` of `table` exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] when the catalogue cannot be queried.
    pub fn has_unique_key(&self, table: &TableRef) -> Result<bool, StoreError> {
        self.object_exists(&table.schema, "index", &unique_key_index(table)?)
    }

    fn object_exists(
        &self,
        schema: &Identifier,
        kind: &str,
        name: &Identifier,
    ) -> Result<bool, StoreError> {
        if !self.is_attached(schema)? {
            return Ok(false);
        }
        let sql = format!(
            "SELECT 1 FROM {}.sqlite_master WHERE type = ?1 AND name = ?2",
            schema.quoted()
        );
        self.connection
            .query_row(&sql, [kind, name.as_str()], |_| Ok(()))
            .optional()
            .map(|row| row.is_some())
            .map_err(|source| StoreError::Sqlite {
                operation: "look up schema object",
                source,
            })
    }

    /// Number of rows stored in `table`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] when the table cannot be read.
    pub fn count_rows(&self, table: &TableRef) -> Result<u64, StoreError> {
        count(
            &self.connection,
            &format!("SELECT COUNT(*) FROM {}", table.qualified()),
            "count feature rows",
        )
    }

    /// Number of entries in the spatial index of `table`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] when the index cannot be read.
    pub fn spatial_index_len(&self, table: &TableRef) -> Result<u64, StoreError> {
        let index = spatial_index(table)?;
        count(
            &self.connection,
            &format!("SELECT COUNT(*) FROM {}", index.qualified()),
            "count spatial index entries",
        )
    }

    /// Stored feature identifiers in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] when the table cannot be read.
    pub fn feature_ids(&self, table: &TableRef) -> Result<Vec<String>, StoreError> {
        let read = |source| StoreError::Sqlite {
            operation: "read feature ids",
            source,
        };
        let mut statement = self
            .connection
            .prepare(&format!(
                "SELECT \"feature_id\" FROM {} ORDER BY \"fid\"",
                table.qualified()
            ))
            .map_err(read)?;
        let ids = statement
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(read)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(read)?;
        Ok(ids)
    }
}

fn count(connection: &Connection, sql: &str, operation: &'static str) -> Result<u64, StoreError> {
    connection
        .query_row(sql, [], |row| row.get::<_, i64>(0))
        .map(|n| u64::try_from(n).unwrap_or_default())
        .map_err(|source| StoreError::Sqlite { operation, source })
}

/// R*Tree virtual table indexing the geometry of `table`.
pub(crate) fn spatial_index(table: &TableRef) -> Result<TableRef, IdentifierError> {
    Ok(TableRef::new(
        table.schema.clone(),
        Identifier::new(format!("rtree_{}_geometry", table.name))?,
    ))
}

/// Unique index enforcing one row per feature identifier.
pub(crate) fn unique_key_index(table: &TableRef) -> Result<Identifier, IdentifierError> {
    Identifier::new(format!("uq_{}_feature_id", table.name))
}
