//! Column runtime object. Columns are created with their table (or by an
//! append-column schema change) and never deleted; the only mutable piece
//! is the id of the current column-definition version.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::catalog::is_valid_object_name;
use crate::catalog::records::{ColumnDataType, ColumnRecord};
use crate::error::{DbError, DbResult};

#[derive(Debug)]
pub struct Column {
    id: u64,
    name: String,
    data_type: ColumnDataType,
    table_id: u32,
    current_column_definition_id: AtomicU64,
}

impl Column {
    pub(crate) fn new(
        id: u64,
        name: &str,
        data_type: ColumnDataType,
        table_id: u32,
    ) -> DbResult<Column> {
        if !is_valid_object_name(name) {
            return Err(DbError::InvalidColumnName(name.to_owned()));
        }
        Ok(Column {
            id,
            name: name.to_owned(),
            data_type,
            table_id,
            current_column_definition_id: AtomicU64::new(0),
        })
    }

    pub(crate) fn from_record(record: &ColumnRecord) -> DbResult<Column> {
        let column = Column::new(record.id, &record.name, record.data_type, record.table_id)?;
        column
            .current_column_definition_id
            .store(record.current_column_definition_id, Ordering::Release);
        Ok(column)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> ColumnDataType {
        self.data_type
    }

    pub fn table_id(&self) -> u32 {
        self.table_id
    }

    pub fn current_column_definition_id(&self) -> u64 {
        self.current_column_definition_id.load(Ordering::Acquire)
    }

    pub(crate) fn set_current_column_definition_id(&self, id: u64) {
        self.current_column_definition_id.store(id, Ordering::Release);
    }

    pub(crate) fn to_record(&self) -> ColumnRecord {
        ColumnRecord {
            id: self.id,
            name: self.name.clone(),
            data_type: self.data_type,
            table_id: self.table_id,
            current_column_definition_id: self.current_column_definition_id(),
        }
    }
}
