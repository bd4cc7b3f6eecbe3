//! # Catalog Error Types
//!
//! Every fallible catalog operation returns [`DbResult`]. The error kinds
//! mirror the facts a caller can act on: name validation failures, missing
//! or duplicate catalog objects, configuration problems, and OS-level I/O
//! failures.
//!
//! ## Aggregation
//!
//! The table-creation validator does not fail fast. It walks the whole
//! column list, collects every defect it finds, and raises them together as
//! [`DbError::Compound`]. Single-fact checks (name lookups, release
//! underflow, type mismatches) surface a single variant.
//!
//! ## I/O errors
//!
//! OS errors are wrapped, not translated: [`DbError::Io`] keeps the
//! underlying `std::io::Error` so the errno and the OS description stay
//! visible. An I/O failure is fatal to the enclosing operation, never to
//! the database as a whole.

use thiserror::Error;

/// Result alias used throughout the catalog engine.
pub type DbResult<T> = std::result::Result<T, DbError>;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("invalid configuration option: {0}")]
    InvalidConfigurationOption(String),

    #[error("invalid database name '{0}'")]
    InvalidDatabaseName(String),

    #[error("invalid table name '{0}'")]
    InvalidTableName(String),

    #[error("invalid column name '{0}'")]
    InvalidColumnName(String),

    #[error("invalid constraint name '{0}'")]
    InvalidConstraintName(String),

    #[error("table '{database}.{table}' already exists")]
    TableAlreadyExists { database: String, table: String },

    #[error("table '{database}.{table}' does not exist")]
    TableDoesNotExist { database: String, table: String },

    #[error("table '{table}' does not belong to database '{database}' (operation {operation})")]
    TableDoesNotBelongToDatabase {
        database: String,
        table: String,
        operation: &'static str,
    },

    #[error("table type {0} is not supported")]
    TableTypeNotSupported(u32),

    #[error("duplicate column name '{0}' in CREATE TABLE")]
    CreateTableDuplicateColumnName(String),

    #[error("duplicate constraint name '{0}' in CREATE TABLE")]
    CreateTableDuplicateConstraintName(String),

    #[error("more than one {kind} constraint on column '{column}' in CREATE TABLE")]
    CreateTableDuplicateColumnConstraintType { kind: &'static str, column: String },

    #[error("column '{column}' already exists in table '{table}'")]
    ColumnAlreadyExists { table: String, column: String },

    #[error("column #{column_id} does not exist in database '{database}'")]
    ColumnDoesNotExist { database: String, column_id: u64 },

    #[error("column set #{column_set_id} does not exist in database '{database}'")]
    ColumnSetDoesNotExist {
        database: String,
        column_set_id: u64,
    },

    #[error("column definition #{column_definition_id} does not exist in database '{database}'")]
    ColumnDefinitionDoesNotExist {
        database: String,
        column_definition_id: u64,
    },

    #[error("constraint '{constraint}' already exists in database '{database}'")]
    ConstraintAlreadyExists {
        database: String,
        constraint: String,
    },

    #[error("constraint #{constraint_id} does not exist in database '{database}'")]
    ConstraintDoesNotExist {
        database: String,
        constraint_id: u64,
    },

    #[error("constraint type {0} is not supported")]
    ConstraintNotSupported(u32),

    #[error(
        "constraint '{constraint}' on column '{table}.{column}' has type {actual}, expected {expected}"
    )]
    ColumnConstraintTypeMismatch {
        table: String,
        column: String,
        constraint: String,
        actual: u32,
        expected: u32,
    },

    #[error("constraint '{constraint}' on table '{table}' has type {actual}, expected {expected}")]
    TableConstraintTypeMismatch {
        table: String,
        constraint: String,
        actual: u32,
        expected: u32,
    },

    #[error("constraint definition #{constraint_definition_id} does not exist in database '{database}'")]
    ConstraintDefinitionDoesNotExist {
        database: String,
        constraint_definition_id: u64,
    },

    #[error("invalid index name '{0}'")]
    InvalidIndexName(String),

    #[error("index '{index}' already exists in database '{database}'")]
    IndexAlreadyExists { database: String, index: String },

    #[error("index #{index_id} does not exist in database '{database}'")]
    IndexDoesNotExist { database: String, index_id: u64 },

    #[error("no column definitions for column #{column_id} of table #{table_id}")]
    MissingColumnDefinitionsForColumn { table_id: u32, column_id: u64 },

    #[error("database resource exhausted: {0}")]
    ResourceExhausted(&'static str),

    #[error("database '{0}' already exists")]
    DatabaseAlreadyExists(String),

    #[error("database '{0}' does not exist")]
    DatabaseDoesNotExist(String),

    #[error("database '{database}' is in use ({use_count} active handles)")]
    DatabaseInUse { database: String, use_count: usize },

    #[error("cannot lock instance lock file '{path}': {source}")]
    InstanceLockFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("data folder '{path}' of database '{database}' is missing")]
    DatabaseDataFolderMissing { database: String, path: String },

    #[error("initialization flag file '{path}' of database '{database}' is missing")]
    DatabaseInitFileMissing { database: String, path: String },

    #[error("metadata file error for database '{database}': {source}")]
    MetadataFileIoError {
        database: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot release unused database '{0}'")]
    CannotReleaseUnusedDatabase(String),

    #[error("cipher '{0}' is unknown")]
    CipherUnknown(String),

    #[error("invalid key length for cipher '{0}'")]
    InvalidCipherKey(String),

    #[error("corrupted catalog data: {0}")]
    CorruptedCatalog(String),

    #[error("{} errors occurred", .0.len())]
    Compound(Vec<DbError>),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DbError {
    /// Flattened view of the error list; a single error yields itself.
    pub fn errors(&self) -> impl Iterator<Item = &DbError> {
        match self {
            DbError::Compound(errors) => errors.iter(),
            other => std::slice::from_ref(other).iter(),
        }
    }
}
