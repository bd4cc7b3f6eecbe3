//! # Constraints and Constraint Definitions
//!
//! A [`ConstraintDefinition`] is the content-addressed pair of a constraint
//! kind and a serialized expression; equal definitions are stored once per
//! id partition and shared by every constraint that uses them. A
//! [`Constraint`] binds a definition to a column (or, for table-level
//! kinds, to a table alone) under a database-unique name.
//!
//! Definitions are immutable once built; the expression is deserialized at
//! materialization time and kept alongside its byte form so the dedup path
//! can compare bytes without re-serializing.

use std::sync::Arc;

use crate::catalog::records::{ConstraintDefinitionRecord, ConstraintRecord, ConstraintType};
use crate::catalog::{is_system_object_id, is_valid_object_name};
use crate::error::{DbError, DbResult};
use crate::expr::{Expression, Literal};

#[derive(Debug)]
pub struct ConstraintDefinition {
    id: u64,
    constraint_type: ConstraintType,
    expression: Expression,
    serialized_expression: Vec<u8>,
    hash: u64,
}

impl ConstraintDefinition {
    pub(crate) fn new(id: u64, constraint_type: ConstraintType, expression: Expression) -> Self {
        let serialized_expression = expression.serialize();
        let hash =
            ConstraintDefinitionRecord::compute_hash(constraint_type, &serialized_expression);
        Self {
            id,
            constraint_type,
            expression,
            serialized_expression,
            hash,
        }
    }

    pub(crate) fn from_record(record: &ConstraintDefinitionRecord) -> DbResult<Self> {
        let expression = Expression::deserialize(&record.expression)?;
        Ok(Self {
            id: record.id,
            constraint_type: record.constraint_type,
            expression,
            serialized_expression: record.expression.clone(),
            hash: record.hash,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn constraint_type(&self) -> ConstraintType {
        self.constraint_type
    }

    pub fn expression(&self) -> &Expression {
        &self.expression
    }

    pub fn serialized_expression(&self) -> &[u8] {
        &self.serialized_expression
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Whether this definition lives in the engine-managed id partition.
    pub fn is_system(&self) -> bool {
        is_system_object_id(self.id)
    }

    pub(crate) fn to_record(&self) -> ConstraintDefinitionRecord {
        ConstraintDefinitionRecord {
            id: self.id,
            constraint_type: self.constraint_type,
            expression: self.serialized_expression.clone(),
            hash: self.hash,
        }
    }
}

#[derive(Debug)]
pub struct Constraint {
    id: u64,
    name: String,
    table_id: u32,
    column_id: Option<u64>,
    definition: Arc<ConstraintDefinition>,
}

impl Constraint {
    pub(crate) fn new(
        id: u64,
        name: &str,
        table_id: u32,
        column_id: Option<u64>,
        definition: Arc<ConstraintDefinition>,
    ) -> DbResult<Constraint> {
        if !is_valid_object_name(name) {
            return Err(DbError::InvalidConstraintName(name.to_owned()));
        }
        Ok(Constraint {
            id,
            name: name.to_owned(),
            table_id,
            column_id,
            definition,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table_id(&self) -> u32 {
        self.table_id
    }

    pub fn column_id(&self) -> Option<u64> {
        self.column_id
    }

    pub fn definition(&self) -> &Arc<ConstraintDefinition> {
        &self.definition
    }

    pub fn constraint_type(&self) -> ConstraintType {
        self.definition.constraint_type()
    }

    /// For a NOT NULL constraint, whether null values are rejected.
    pub fn is_not_null(&self) -> bool {
        matches!(
            (self.constraint_type(), self.definition.expression()),
            (ConstraintType::NotNull, Expression::Constant(Literal::Bool(true)))
        )
    }

    /// For a DEFAULT constraint, the defaulted value.
    pub fn default_value(&self) -> Option<&Literal> {
        match (self.constraint_type(), self.definition.expression()) {
            (ConstraintType::DefaultValue, Expression::Constant(value)) => Some(value),
            _ => None,
        }
    }

    pub(crate) fn to_record(&self) -> ConstraintRecord {
        ConstraintRecord {
            id: self.id,
            name: self.name.clone(),
            table_id: self.table_id,
            column_id: self.column_id,
            constraint_definition_id: self.definition.id(),
        }
    }
}
