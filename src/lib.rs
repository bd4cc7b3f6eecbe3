//! # meridb — Relational Catalog Engine
//!
//! meridb is the catalog core of a single-node relational database
//! server: the per-database registries of tables, columns, column sets,
//! column definitions, constraints, constraint definitions and indexes;
//! the object caches backing them; the system/user identifier discipline;
//! the table-creation validator; and the file factory that materializes
//! on-disk objects as plain or transparently-encrypted files.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │  Instance (lock file, database registry)   │
//! ├────────────────────────────────────────────┤
//! │  Database (mutex, validator, id allocator) │
//! ├──────────────────────┬─────────────────────┤
//! │  Registries + caches │  Objects (tables,   │
//! │  (catalog)           │  columns, …)        │
//! ├──────────────────────┴─────────────────────┤
//! │  File factory (plain / encrypted files)    │
//! ├────────────────────────────────────────────┤
//! │  Metadata mmap · catalog snapshot · crypto │
//! └────────────────────────────────────────────┘
//! ```
//!
//! DDL requests enter at the [`Database`], are validated, allocate ids
//! from the system tables' TRID sequences, register entities into the
//! registries, cache object handles, and persist the catalog snapshot
//! through the file factory. Reads go registry → cache → (on miss)
//! materialize-from-record → cache.
//!
//! ## Quick start
//!
//! ```ignore
//! use meridb::{Database, SimpleColumnSpecification};
//! use meridb::catalog::{ColumnDataType, TableType};
//!
//! let db = Database::create("shop", data_dir, "aes128", &key, now, 100)?;
//! let table = db.create_user_table_simple(
//!     "customers",
//!     TableType::Disk,
//!     &[
//!         SimpleColumnSpecification::new("name", ColumnDataType::Text).not_null(),
//!         SimpleColumnSpecification::new("balance", ColumnDataType::Double),
//!     ],
//!     user_id,
//! )?;
//! ```
//!
//! ## Module overview
//!
//! - [`catalog`]: registry records, multi-index registries, object cache,
//!   snapshot persistence, system-table names
//! - [`objects`]: table, column, column set, constraint runtime objects
//! - [`database`]: the central per-database object and its operations
//! - [`instance`]: instance lock, database registry, database lifecycle
//! - [`config`]: instance options loader and constants
//! - [`crypto`]: cipher registry behind the file factory
//! - [`io`]: plain and encrypted positional file handles
//! - [`expr`]: the expression serialization contract the catalog consumes

pub mod catalog;
pub mod config;
pub mod crypto;
pub mod database;
pub mod encoding;
pub mod error;
pub mod expr;
pub mod instance;
pub mod io;
pub mod objects;

pub use database::{
    ColumnSpecification, ConstraintSpecification, Database, SimpleColumnSpecification,
    TransactionParameters,
};
pub use error::{DbError, DbResult};
pub use instance::Instance;
