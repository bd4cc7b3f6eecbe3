//! # Multi-Index Registries
//!
//! One registry per entity kind. Each holds its records in a primary
//! `BTreeMap` ordered by id (so lower-bound scans work) plus the secondary
//! indices that entity needs:
//!
//! | Registry | Secondary indices |
//! |---|---|
//! | tables | unique name |
//! | columns | non-unique (table id, column id) |
//! | column sets | — |
//! | column definitions | ordered composite (column id, id) |
//! | constraints | unique name |
//! | constraint definitions | non-unique content hash (equal-range) |
//! | indexes | unique name |
//!
//! `insert` fails on a duplicate id or duplicate unique key — a duplicate
//! here means the caller broke an invariant it was supposed to check under
//! the catalog mutex, or the snapshot on disk is corrupt. `replace` keeps
//! the row's id and moves every secondary index entry in step.

use hashbrown::HashMap;
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet};

use crate::catalog::records::{
    ColumnDefinitionRecord, ColumnRecord, ColumnSetRecord, ConstraintDefinitionRecord,
    ConstraintRecord, IndexRecord, TableRecord,
};
use crate::error::{DbError, DbResult};

fn duplicate(what: &str, key: impl std::fmt::Display) -> DbError {
    DbError::CorruptedCatalog(format!("duplicate {what} {key} in registry"))
}

fn missing(what: &str, key: impl std::fmt::Display) -> DbError {
    DbError::CorruptedCatalog(format!("{what} {key} is not registered"))
}

#[derive(Debug, Default)]
pub struct TableRegistry {
    by_id: BTreeMap<u32, TableRecord>,
    id_by_name: HashMap<String, u32>,
}

impl TableRegistry {
    pub fn insert(&mut self, record: TableRecord) -> DbResult<()> {
        if self.by_id.contains_key(&record.id) {
            return Err(duplicate("table id", record.id));
        }
        if self.id_by_name.contains_key(&record.name) {
            return Err(duplicate("table name", &record.name));
        }
        self.id_by_name.insert(record.name.clone(), record.id);
        self.by_id.insert(record.id, record);
        Ok(())
    }

    pub fn replace(&mut self, record: TableRecord) -> DbResult<()> {
        let old = self
            .by_id
            .get(&record.id)
            .ok_or_else(|| missing("table id", record.id))?;
        if old.name != record.name {
            if self.id_by_name.contains_key(&record.name) {
                return Err(duplicate("table name", &record.name));
            }
            self.id_by_name.remove(&old.name);
            self.id_by_name.insert(record.name.clone(), record.id);
        }
        self.by_id.insert(record.id, record);
        Ok(())
    }

    pub fn get(&self, id: u32) -> Option<&TableRecord> {
        self.by_id.get(&id)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&TableRecord> {
        self.id_by_name.get(name).and_then(|id| self.by_id.get(id))
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.id_by_name.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TableRecord> {
        self.by_id.values()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct ColumnRegistry {
    by_id: BTreeMap<u64, ColumnRecord>,
    by_table: BTreeSet<(u32, u64)>,
}

impl ColumnRegistry {
    pub fn insert(&mut self, record: ColumnRecord) -> DbResult<()> {
        if self.by_id.contains_key(&record.id) {
            return Err(duplicate("column id", record.id));
        }
        self.by_table.insert((record.table_id, record.id));
        self.by_id.insert(record.id, record);
        Ok(())
    }

    pub fn replace(&mut self, record: ColumnRecord) -> DbResult<()> {
        let old = self
            .by_id
            .get(&record.id)
            .ok_or_else(|| missing("column id", record.id))?;
        if old.table_id != record.table_id {
            self.by_table.remove(&(old.table_id, old.id));
            self.by_table.insert((record.table_id, record.id));
        }
        self.by_id.insert(record.id, record);
        Ok(())
    }

    pub fn get(&self, id: u64) -> Option<&ColumnRecord> {
        self.by_id.get(&id)
    }

    /// Column ids of a table, ascending.
    pub fn table_columns(&self, table_id: u32) -> impl Iterator<Item = &ColumnRecord> + '_ {
        self.by_table
            .range((table_id, 0)..=(table_id, u64::MAX))
            .filter_map(move |&(_, id)| self.by_id.get(&id))
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColumnRecord> {
        self.by_id.values()
    }
}

#[derive(Debug, Default)]
pub struct ColumnSetRegistry {
    by_id: BTreeMap<u64, ColumnSetRecord>,
}

impl ColumnSetRegistry {
    pub fn insert(&mut self, record: ColumnSetRecord) -> DbResult<()> {
        if self.by_id.contains_key(&record.id) {
            return Err(duplicate("column set id", record.id));
        }
        self.by_id.insert(record.id, record);
        Ok(())
    }

    pub fn replace(&mut self, record: ColumnSetRecord) -> DbResult<()> {
        if !self.by_id.contains_key(&record.id) {
            return Err(missing("column set id", record.id));
        }
        self.by_id.insert(record.id, record);
        Ok(())
    }

    pub fn get(&self, id: u64) -> Option<&ColumnSetRecord> {
        self.by_id.get(&id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColumnSetRecord> {
        self.by_id.values()
    }
}

#[derive(Debug, Default)]
pub struct ColumnDefinitionRegistry {
    by_id: BTreeMap<u64, ColumnDefinitionRecord>,
    by_column_and_id: BTreeSet<(u64, u64)>,
}

impl ColumnDefinitionRegistry {
    pub fn insert(&mut self, record: ColumnDefinitionRecord) -> DbResult<()> {
        if self.by_id.contains_key(&record.id) {
            return Err(duplicate("column definition id", record.id));
        }
        self.by_column_and_id.insert((record.column_id, record.id));
        self.by_id.insert(record.id, record);
        Ok(())
    }

    pub fn replace(&mut self, record: ColumnDefinitionRecord) -> DbResult<()> {
        let old = self
            .by_id
            .get(&record.id)
            .ok_or_else(|| missing("column definition id", record.id))?;
        if old.column_id != record.column_id {
            self.by_column_and_id.remove(&(old.column_id, old.id));
            self.by_column_and_id.insert((record.column_id, record.id));
        }
        self.by_id.insert(record.id, record);
        Ok(())
    }

    pub fn get(&self, id: u64) -> Option<&ColumnDefinitionRecord> {
        self.by_id.get(&id)
    }

    /// Greatest definition id among rows whose column id matches: one
    /// lower-bound past the end of the column's composite-key range and one
    /// step back.
    pub fn latest_for_column(&self, column_id: u64) -> Option<u64> {
        self.by_column_and_id
            .range(..=(column_id, u64::MAX))
            .next_back()
            .filter(|&&(c, _)| c == column_id)
            .map(|&(_, id)| id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColumnDefinitionRecord> {
        self.by_id.values()
    }
}

#[derive(Debug, Default)]
pub struct ConstraintRegistry {
    by_id: BTreeMap<u64, ConstraintRecord>,
    id_by_name: HashMap<String, u64>,
}

impl ConstraintRegistry {
    pub fn insert(&mut self, record: ConstraintRecord) -> DbResult<()> {
        if self.by_id.contains_key(&record.id) {
            return Err(duplicate("constraint id", record.id));
        }
        if self.id_by_name.contains_key(&record.name) {
            return Err(duplicate("constraint name", &record.name));
        }
        self.id_by_name.insert(record.name.clone(), record.id);
        self.by_id.insert(record.id, record);
        Ok(())
    }

    pub fn replace(&mut self, record: ConstraintRecord) -> DbResult<()> {
        let old = self
            .by_id
            .get(&record.id)
            .ok_or_else(|| missing("constraint id", record.id))?;
        if old.name != record.name {
            if self.id_by_name.contains_key(&record.name) {
                return Err(duplicate("constraint name", &record.name));
            }
            self.id_by_name.remove(&old.name);
            self.id_by_name.insert(record.name.clone(), record.id);
        }
        self.by_id.insert(record.id, record);
        Ok(())
    }

    pub fn get(&self, id: u64) -> Option<&ConstraintRecord> {
        self.by_id.get(&id)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.id_by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConstraintRecord> {
        self.by_id.values()
    }
}

#[derive(Debug, Default)]
pub struct ConstraintDefinitionRegistry {
    by_id: BTreeMap<u64, ConstraintDefinitionRecord>,
    ids_by_hash: HashMap<u64, SmallVec<[u64; 2]>>,
}

impl ConstraintDefinitionRegistry {
    pub fn insert(&mut self, record: ConstraintDefinitionRecord) -> DbResult<()> {
        if self.by_id.contains_key(&record.id) {
            return Err(duplicate("constraint definition id", record.id));
        }
        self.ids_by_hash
            .entry(record.hash)
            .or_default()
            .push(record.id);
        self.by_id.insert(record.id, record);
        Ok(())
    }

    pub fn replace(&mut self, record: ConstraintDefinitionRecord) -> DbResult<()> {
        let old = self
            .by_id
            .get(&record.id)
            .ok_or_else(|| missing("constraint definition id", record.id))?;
        if old.hash != record.hash {
            let old_hash = old.hash;
            if let Some(bucket) = self.ids_by_hash.get_mut(&old_hash) {
                bucket.retain(|&mut id| id != record.id);
                if bucket.is_empty() {
                    self.ids_by_hash.remove(&old_hash);
                }
            }
            self.ids_by_hash
                .entry(record.hash)
                .or_default()
                .push(record.id);
        }
        self.by_id.insert(record.id, record);
        Ok(())
    }

    pub fn get(&self, id: u64) -> Option<&ConstraintDefinitionRecord> {
        self.by_id.get(&id)
    }

    /// All rows sharing a content hash, ascending by id. Callers must still
    /// verify kind and byte equality — hash collisions are possible.
    pub fn equal_range(&self, hash: u64) -> impl Iterator<Item = &ConstraintDefinitionRecord> {
        self.ids_by_hash
            .get(&hash)
            .into_iter()
            .flatten()
            .filter_map(move |id| self.by_id.get(id))
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConstraintDefinitionRecord> {
        self.by_id.values()
    }
}

#[derive(Debug, Default)]
pub struct IndexRegistry {
    by_id: BTreeMap<u64, IndexRecord>,
    id_by_name: HashMap<String, u64>,
}

impl IndexRegistry {
    pub fn insert(&mut self, record: IndexRecord) -> DbResult<()> {
        if self.by_id.contains_key(&record.id) {
            return Err(duplicate("index id", record.id));
        }
        if self.id_by_name.contains_key(&record.name) {
            return Err(duplicate("index name", &record.name));
        }
        self.id_by_name.insert(record.name.clone(), record.id);
        self.by_id.insert(record.id, record);
        Ok(())
    }

    pub fn get(&self, id: u64) -> Option<&IndexRecord> {
        self.by_id.get(&id)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.id_by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexRecord> {
        self.by_id.values()
    }
}

/// The complete registry family of one database, grouped so snapshot
/// persistence can serialize them as a unit.
#[derive(Debug, Default)]
pub struct CatalogRegistries {
    pub tables: TableRegistry,
    pub columns: ColumnRegistry,
    pub column_sets: ColumnSetRegistry,
    pub column_definitions: ColumnDefinitionRegistry,
    pub constraints: ConstraintRegistry,
    pub constraint_definitions: ConstraintDefinitionRegistry,
    pub indexes: IndexRegistry,
}
