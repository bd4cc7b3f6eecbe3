//! # Table Creation
//!
//! The user-facing CREATE TABLE path: column and constraint
//! specifications, the pre-flight validator, and the construction sequence
//! that materializes a validated table.
//!
//! ## Validation
//!
//! The validator walks the column list in input order and accumulates a
//! typed error list instead of failing fast; the caller receives every
//! defect of the request at once as a compound error. Checks per column:
//!
//! 1. the column name satisfies the object-name grammar;
//! 2. the name is unique within the table;
//! 3. each non-empty constraint name satisfies the grammar, is unique
//!    against both the other constraint names of this statement and the
//!    database's constraint index (empty names are assigned later);
//! 4. at most one constraint of each kind per column.
//!
//! Nothing is registered until validation succeeds and the whole
//! construction sequence runs under the catalog mutex, so a rejected
//! request leaves no table, column or constraint observable anywhere.

use hashbrown::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::catalog::records::{ColumnDataType, ConstraintType, TableType};
use crate::catalog::is_valid_object_name;
use crate::database::{CatalogState, Database, TransactionParameters};
use crate::error::{DbError, DbResult};
use crate::expr::{Expression, Literal};
use crate::objects::{Table, MASTER_COLUMN_NAME};

/// One constraint requested on a column. An empty name asks the engine to
/// assign a deterministic one at materialization time.
#[derive(Debug, Clone)]
pub struct ConstraintSpecification {
    pub name: String,
    pub constraint_type: ConstraintType,
    pub expression: Expression,
}

impl ConstraintSpecification {
    pub fn not_null() -> ConstraintSpecification {
        ConstraintSpecification {
            name: String::new(),
            constraint_type: ConstraintType::NotNull,
            expression: Expression::constant(Literal::Bool(true)),
        }
    }

    pub fn default_value(value: Literal) -> ConstraintSpecification {
        ConstraintSpecification {
            name: String::new(),
            constraint_type: ConstraintType::DefaultValue,
            expression: Expression::constant(value),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> ConstraintSpecification {
        self.name = name.into();
        self
    }
}

/// One column of a CREATE TABLE request.
#[derive(Debug, Clone)]
pub struct ColumnSpecification {
    pub name: String,
    pub data_type: ColumnDataType,
    pub constraints: Vec<ConstraintSpecification>,
}

impl ColumnSpecification {
    pub fn new(name: impl Into<String>, data_type: ColumnDataType) -> ColumnSpecification {
        ColumnSpecification {
            name: name.into(),
            data_type,
            constraints: Vec::new(),
        }
    }

    pub fn with_constraint(mut self, constraint: ConstraintSpecification) -> ColumnSpecification {
        self.constraints.push(constraint);
        self
    }

    /// The implicit row-id column every table starts with.
    pub(crate) fn master_column() -> ColumnSpecification {
        ColumnSpecification {
            name: MASTER_COLUMN_NAME.to_owned(),
            data_type: ColumnDataType::UInt64,
            constraints: vec![ConstraintSpecification {
                name: String::new(),
                constraint_type: ConstraintType::NotNull,
                expression: Database::master_column_not_null_expression(),
            }],
        }
    }
}

/// Abbreviated column form used by simple front-ends: a flag and a value
/// instead of explicit constraint specifications.
#[derive(Debug, Clone)]
pub struct SimpleColumnSpecification {
    pub name: String,
    pub data_type: ColumnDataType,
    pub not_null: bool,
    pub default_value: Option<Literal>,
}

impl SimpleColumnSpecification {
    pub fn new(name: impl Into<String>, data_type: ColumnDataType) -> SimpleColumnSpecification {
        SimpleColumnSpecification {
            name: name.into(),
            data_type,
            not_null: false,
            default_value: None,
        }
    }

    pub fn not_null(mut self) -> SimpleColumnSpecification {
        self.not_null = true;
        self
    }

    pub fn with_default(mut self, value: Literal) -> SimpleColumnSpecification {
        self.default_value = Some(value);
        self
    }
}

impl From<&SimpleColumnSpecification> for ColumnSpecification {
    fn from(simple: &SimpleColumnSpecification) -> ColumnSpecification {
        let mut spec = ColumnSpecification::new(simple.name.clone(), simple.data_type);
        if simple.not_null {
            spec.constraints.push(ConstraintSpecification::not_null());
        }
        if let Some(value) = &simple.default_value {
            spec.constraints
                .push(ConstraintSpecification::default_value(value.clone()));
        }
        spec
    }
}

impl Database {
    /// Creates a user table from abbreviated column specifications.
    pub fn create_user_table_simple(
        self: &Arc<Self>,
        name: &str,
        table_type: TableType,
        column_specs: &[SimpleColumnSpecification],
        current_user_id: u32,
    ) -> DbResult<Arc<Table>> {
        let specs: Vec<ColumnSpecification> =
            column_specs.iter().map(ColumnSpecification::from).collect();
        self.create_user_table(name, table_type, &specs, current_user_id)
    }

    /// Creates a user table: validate everything, then materialize the
    /// table, its master column, the user columns and their constraints,
    /// close the column set, and record the definition under a fresh
    /// transaction id.
    pub fn create_user_table(
        self: &Arc<Self>,
        name: &str,
        table_type: TableType,
        column_specs: &[ColumnSpecification],
        current_user_id: u32,
    ) -> DbResult<Arc<Table>> {
        if table_type != TableType::Disk {
            return Err(DbError::TableTypeNotSupported(table_type as u32));
        }

        debug!(
            database = self.name(),
            table = name,
            "creating user table"
        );

        let mut state = self.lock_state();

        let errors = self.validate_column_specs(&state, column_specs);
        if !errors.is_empty() {
            return Err(DbError::Compound(errors));
        }

        let table = self.create_table_unlocked(&mut state, name, table_type, 0, false)?;
        for spec in column_specs {
            self.create_column_unlocked(&mut state, &table, spec, false, false)?;
        }
        self.close_current_column_set_unlocked(&mut state, &table)?;

        let tp = TransactionParameters {
            user_id: current_user_id,
            transaction_id: self.generate_next_transaction_id(),
        };
        self.record_table_definition_unlocked(&state, &table, &tp)?;

        Ok(table)
    }

    /// Pre-flight validation; reads only, in input order, never fails
    /// fast. Errors come back in encounter order.
    fn validate_column_specs(
        &self,
        state: &CatalogState,
        column_specs: &[ColumnSpecification],
    ) -> Vec<DbError> {
        let mut errors = Vec::new();
        let mut known_columns: HashSet<&str> = HashSet::new();
        let mut known_constraints: HashSet<&str> = HashSet::new();
        // First-seen order so duplicate-kind errors come out deterministic.
        let mut constraint_counts: Vec<(ConstraintType, usize)> = Vec::new();

        for column_spec in column_specs {
            if !is_valid_object_name(&column_spec.name) {
                errors.push(DbError::InvalidColumnName(column_spec.name.clone()));
                continue;
            }

            if column_spec.name == MASTER_COLUMN_NAME
                || !known_columns.insert(column_spec.name.as_str())
            {
                errors.push(DbError::CreateTableDuplicateColumnName(
                    column_spec.name.clone(),
                ));
                continue;
            }

            constraint_counts.clear();
            for constraint_spec in &column_spec.constraints {
                // Reject unimplemented kinds here so construction below
                // cannot fail after registration has started.
                match constraint_spec.constraint_type {
                    ConstraintType::NotNull | ConstraintType::DefaultValue => {}
                    other => {
                        errors.push(DbError::ConstraintNotSupported(other as u32));
                        continue;
                    }
                }
                // Empty names count toward the per-kind limit but are
                // assigned (and made unique) later.
                match constraint_counts
                    .iter_mut()
                    .find(|(kind, _)| *kind == constraint_spec.constraint_type)
                {
                    Some((_, count)) => *count += 1,
                    None => constraint_counts.push((constraint_spec.constraint_type, 1)),
                }
                if constraint_spec.name.is_empty() {
                    continue;
                }
                if !is_valid_object_name(&constraint_spec.name) {
                    errors.push(DbError::InvalidConstraintName(
                        constraint_spec.name.clone(),
                    ));
                    continue;
                }
                if !known_constraints.insert(constraint_spec.name.as_str()) {
                    errors.push(DbError::CreateTableDuplicateConstraintName(
                        constraint_spec.name.clone(),
                    ));
                }
                if state
                    .registries
                    .constraints
                    .contains_name(&constraint_spec.name)
                {
                    errors.push(DbError::ConstraintAlreadyExists {
                        database: self.name().to_owned(),
                        constraint: constraint_spec.name.clone(),
                    });
                }
            }

            for &(constraint_type, count) in &constraint_counts {
                if count > 1 {
                    errors.push(DbError::CreateTableDuplicateColumnConstraintType {
                        kind: constraint_type.name_token(),
                        column: column_spec.name.clone(),
                    });
                }
            }
        }

        errors
    }
}
