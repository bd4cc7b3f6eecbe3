//! # Catalog Objects
//!
//! Runtime objects materialized from registry records: tables, columns,
//! column sets, constraints and constraint definitions. Tables and
//! constraint definitions are shared between the database's object caches
//! and callers through `Arc` handles; their lifetime is the longest holder.
//!
//! Back-pointers from objects to their owning database are non-owning
//! (`Weak`): a table cannot keep its database alive, and the database's
//! use-count protocol guarantees it outlives every handle it hands out.

mod column;
mod column_set;
mod constraint;
mod table;

pub use column::Column;
pub use column_set::ColumnSet;
pub use constraint::{Constraint, ConstraintDefinition};
pub use table::{Table, MASTER_COLUMN_NAME};
