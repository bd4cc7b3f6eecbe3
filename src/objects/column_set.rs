//! Column set: the ordered snapshot of the columns participating in one
//! schema version of a table. A set starts open, collects one member row
//! per materialized column, and is closed when the schema version is
//! complete. Closing registers the snapshot; a later schema change opens a
//! new set rather than reopening a closed one.

use smallvec::SmallVec;

use crate::catalog::records::{ColumnSetColumnRecord, ColumnSetRecord};

#[derive(Debug, Clone)]
pub struct ColumnSet {
    id: u64,
    table_id: u32,
    columns: SmallVec<[ColumnSetColumnRecord; 8]>,
    open: bool,
}

impl ColumnSet {
    pub(crate) fn new(id: u64, table_id: u32) -> ColumnSet {
        ColumnSet {
            id,
            table_id,
            columns: SmallVec::new(),
            open: true,
        }
    }

    pub(crate) fn from_record(record: &ColumnSetRecord) -> ColumnSet {
        ColumnSet {
            id: record.id,
            table_id: record.table_id,
            columns: record.columns.clone(),
            open: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn table_id(&self) -> u32 {
        self.table_id
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn columns(&self) -> &[ColumnSetColumnRecord] {
        &self.columns
    }

    /// Appends a member row. Only legal while the set is open.
    pub(crate) fn add_column(&mut self, member: ColumnSetColumnRecord) {
        debug_assert!(self.open, "column added to a closed column set");
        self.columns.push(member);
    }

    pub(crate) fn close(&mut self) {
        self.open = false;
    }

    pub(crate) fn to_record(&self) -> ColumnSetRecord {
        ColumnSetRecord {
            id: self.id,
            table_id: self.table_id,
            columns: self.columns.clone(),
        }
    }
}
