//! # Table Runtime Object
//!
//! A table handle shared between the database's table cache and callers.
//! The immutable identity (id, name, type) sits directly on the struct;
//! the schema-shaped state — column handles, the master column, the
//! current column set — lives behind a small mutex that is only touched
//! while the owning database's catalog mutex is held.
//!
//! ## TRID sequences
//!
//! Every table owns two monotonic row-id sequences, one per id partition.
//! For system tables these sequences are where new catalog entity ids come
//! from: `SYS_TABLES` issues table ids, `SYS_COLUMNS` column ids, and so
//! on. The counters store the last issued value and are plain atomics —
//! they are not covered by the catalog mutex.
//!
//! ## Master column
//!
//! Every table carries an implicit first column, `TRID`, holding the row
//! identifier. It is created with the table, is always the first entry of
//! the table's column set, and carries a NOT NULL constraint backed by a
//! shared system constraint definition.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::catalog::records::{ColumnSetColumnRecord, ColumnSetRecord, TableRecord, TableType};
use crate::catalog::{is_valid_object_name, FIRST_USER_OBJECT_ID};
use crate::database::Database;
use crate::error::{DbError, DbResult};
use crate::objects::{Column, ColumnSet};

/// Name of the implicit row-identifier column every table carries.
pub const MASTER_COLUMN_NAME: &str = "TRID";

#[derive(Debug)]
struct TableInner {
    master_column: Option<Arc<Column>>,
    columns: Vec<Arc<Column>>,
    current_column_set: ColumnSet,
}

pub struct Table {
    database: Weak<Database>,
    id: u32,
    name: String,
    table_type: TableType,
    first_user_trid: u64,
    /// Last issued system-range row id.
    last_system_trid: AtomicU64,
    /// Last issued user-range row id.
    last_user_trid: AtomicU64,
    inner: Mutex<TableInner>,
}

impl Table {
    pub(crate) fn new(
        database: Weak<Database>,
        id: u32,
        name: &str,
        table_type: TableType,
        first_user_trid: u64,
        column_set_id: u64,
    ) -> DbResult<Arc<Table>> {
        if !is_valid_object_name(name) {
            return Err(DbError::InvalidTableName(name.to_owned()));
        }
        Ok(Arc::new(Table {
            database,
            id,
            name: name.to_owned(),
            table_type,
            first_user_trid,
            last_system_trid: AtomicU64::new(0),
            last_user_trid: AtomicU64::new(first_user_trid.max(FIRST_USER_OBJECT_ID) - 1),
            inner: Mutex::new(TableInner {
                master_column: None,
                columns: Vec::new(),
                current_column_set: ColumnSet::new(column_set_id, id),
            }),
        }))
    }

    pub(crate) fn from_record(
        database: Weak<Database>,
        record: &TableRecord,
        column_set: &ColumnSetRecord,
        columns: Vec<Arc<Column>>,
    ) -> DbResult<Arc<Table>> {
        let master_column = columns
            .iter()
            .find(|c| c.name() == MASTER_COLUMN_NAME)
            .cloned();
        let table = Table::new(
            database,
            record.id,
            &record.name,
            record.table_type,
            record.first_user_trid,
            record.current_column_set_id,
        )?;
        {
            let mut inner = table.inner.lock();
            inner.master_column = master_column;
            inner.columns = columns;
            inner.current_column_set = ColumnSet::from_record(column_set);
        }
        Ok(table)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn display_name(&self) -> String {
        format!("'{}'", self.name)
    }

    pub fn table_type(&self) -> TableType {
        self.table_type
    }

    pub fn first_user_trid(&self) -> u64 {
        self.first_user_trid
    }

    /// Owning database. Databases outlive every handle they hand out, so
    /// the upgrade cannot fail while the table is reachable.
    pub fn database(&self) -> Arc<Database> {
        self.database
            .upgrade()
            .expect("table outlived its database") // INVARIANT: use-count protocol keeps the database alive
    }

    pub(crate) fn belongs_to(&self, database: &Arc<Database>) -> bool {
        Weak::ptr_eq(&self.database, &Arc::downgrade(database))
    }

    pub fn master_column(&self) -> Option<Arc<Column>> {
        self.inner.lock().master_column.clone()
    }

    pub fn columns(&self) -> Vec<Arc<Column>> {
        self.inner.lock().columns.clone()
    }

    pub fn column_count(&self) -> usize {
        self.inner.lock().columns.len()
    }

    pub fn get_column(&self, name: &str) -> Option<Arc<Column>> {
        self.inner
            .lock()
            .columns
            .iter()
            .find(|c| c.name() == name)
            .cloned()
    }

    pub fn current_column_set_id(&self) -> u64 {
        self.inner.lock().current_column_set.id()
    }

    pub(crate) fn check_column_belongs_to_table(
        &self,
        column: &Column,
        database: &str,
    ) -> DbResult<()> {
        if column.table_id() == self.id {
            Ok(())
        } else {
            Err(DbError::ColumnDoesNotExist {
                database: database.to_owned(),
                column_id: column.id(),
            })
        }
    }

    /// Next row id in the system partition.
    pub fn generate_next_system_trid(&self) -> u64 {
        self.last_system_trid.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Next row id in the user partition.
    pub fn generate_next_user_trid(&self) -> u64 {
        self.last_user_trid.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Moves both TRID sequences forward to continue after already-issued
    /// ids (bootstrap handoff and snapshot reload).
    pub(crate) fn seed_trids(&self, last_system: u64, last_user: u64) {
        self.last_system_trid
            .fetch_max(last_system, Ordering::AcqRel);
        self.last_user_trid.fetch_max(last_user, Ordering::AcqRel);
    }

    /// Registers a freshly materialized column handle. The first column of
    /// a new table is the master column.
    pub(crate) fn add_column_handle(&self, column: Arc<Column>) {
        let mut inner = self.inner.lock();
        if inner.columns.is_empty() && column.name() == MASTER_COLUMN_NAME {
            inner.master_column = Some(Arc::clone(&column));
        }
        inner.columns.push(column);
    }

    /// Appends a member row to the open column set.
    pub(crate) fn add_column_to_current_set(&self, member: ColumnSetColumnRecord) {
        self.inner.lock().current_column_set.add_column(member);
    }

    /// Closes the current column set and returns its registry snapshot.
    pub(crate) fn close_current_column_set(&self) -> ColumnSetRecord {
        let mut inner = self.inner.lock();
        inner.current_column_set.close();
        inner.current_column_set.to_record()
    }

    /// Starts a fresh, open column set for the next schema version. The
    /// previous set stays registered; membership is rebuilt by the caller.
    pub(crate) fn open_new_column_set(&self, column_set_id: u64) {
        let mut inner = self.inner.lock();
        inner.current_column_set = ColumnSet::new(column_set_id, self.id);
    }

    pub(crate) fn to_record(&self) -> TableRecord {
        TableRecord {
            id: self.id,
            name: self.name.clone(),
            table_type: self.table_type,
            first_user_trid: self.first_user_trid,
            current_column_set_id: self.current_column_set_id(),
        }
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("table_type", &self.table_type)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trid_sequences_are_partitioned() {
        let table = Table::new(Weak::new(), 1, "SYS_TABLES", TableType::Disk, 0, 1).unwrap();
        assert_eq!(table.generate_next_system_trid(), 1);
        assert_eq!(table.generate_next_system_trid(), 2);
        assert_eq!(table.generate_next_user_trid(), FIRST_USER_OBJECT_ID);
        assert_eq!(table.generate_next_user_trid(), FIRST_USER_OBJECT_ID + 1);
    }

    #[test]
    fn test_seed_trids_never_moves_backwards() {
        let table = Table::new(Weak::new(), 1, "t", TableType::Disk, 0, 1).unwrap();
        table.seed_trids(10, FIRST_USER_OBJECT_ID + 5);
        table.seed_trids(3, 0);
        assert_eq!(table.generate_next_system_trid(), 11);
        assert_eq!(table.generate_next_user_trid(), FIRST_USER_OBJECT_ID + 6);
    }

    #[test]
    fn test_invalid_table_name_rejected() {
        assert!(matches!(
            Table::new(Weak::new(), 1, "2fast", TableType::Disk, 0, 1),
            Err(DbError::InvalidTableName(_))
        ));
    }
}
