//! # Identifier Allocation
//!
//! New entity ids are drawn from the TRID sequences of the system table
//! owning the entity kind: `SYS_TABLES` issues table ids, `SYS_COLUMNS`
//! column ids, and so on, in the system or user partition according to the
//! `system` flag.
//!
//! During bootstrap the system tables do not exist yet, so allocation falls
//! back to in-memory counters. The fallback counters live inside the
//! catalog state (they are only touched under the catalog mutex) and are
//! seeded so both partitions stay disjoint from the first id issued. When
//! a system table is installed, the matching fallback pair is copied into
//! its TRID sequences — the handoff point after which the table is
//! authoritative and the fallback is never consulted again.
//!
//! Table ids must fit 32 bits; saturation is a resource-exhaustion error.

use std::sync::Arc;

use crate::catalog::{system_tables, FIRST_USER_OBJECT_ID};
use crate::database::{CatalogState, Database};
use crate::error::{DbError, DbResult};
use crate::objects::Table;

/// One fallback sequence pair: last issued id per partition.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TridPair {
    last_system: u64,
    last_user: u64,
}

impl TridPair {
    fn new() -> TridPair {
        TridPair {
            last_system: 0,
            last_user: FIRST_USER_OBJECT_ID - 1,
        }
    }

    fn next(&mut self, system: bool) -> u64 {
        if system {
            self.last_system += 1;
            self.last_system
        } else {
            self.last_user += 1;
            self.last_user
        }
    }

    pub(crate) fn last_system(&self) -> u64 {
        self.last_system
    }

    pub(crate) fn last_user(&self) -> u64 {
        self.last_user
    }
}

impl Default for TridPair {
    fn default() -> Self {
        Self::new()
    }
}

/// Fallback counters, one pair per entity kind. Valid only until the
/// corresponding system table is materialized.
#[derive(Debug, Default)]
pub(crate) struct TmpTridCounters {
    pub tables: TridPair,
    pub columns: TridPair,
    pub column_sets: TridPair,
    pub column_set_columns: TridPair,
    pub column_definitions: TridPair,
    pub column_definition_constraints: TridPair,
    pub constraint_definitions: TridPair,
    pub constraints: TridPair,
    pub indexes: TridPair,
    pub index_columns: TridPair,
}

/// Handles of the system tables owning each entity kind's TRID sequences.
#[derive(Debug, Default)]
pub(crate) struct SystemTableHandles {
    pub tables: Option<Arc<Table>>,
    pub columns: Option<Arc<Table>>,
    pub column_sets: Option<Arc<Table>>,
    pub column_set_columns: Option<Arc<Table>>,
    pub column_definitions: Option<Arc<Table>>,
    pub column_definition_constraints: Option<Arc<Table>>,
    pub constraint_definitions: Option<Arc<Table>>,
    pub constraints: Option<Arc<Table>>,
    pub indexes: Option<Arc<Table>>,
    pub index_columns: Option<Arc<Table>>,
}

/// Installs a system table handle, seeding its TRID sequences from the
/// fallback counters so allocation continues without gaps or reuse.
pub(crate) fn install_system_table(state: &mut CatalogState, table: Arc<Table>) {
    let (handle, tmp) = match table.name() {
        system_tables::SYS_TABLES => (&mut state.sys_tables.tables, &state.tmp_trids.tables),
        system_tables::SYS_COLUMNS => (&mut state.sys_tables.columns, &state.tmp_trids.columns),
        system_tables::SYS_COLUMN_SETS => (
            &mut state.sys_tables.column_sets,
            &state.tmp_trids.column_sets,
        ),
        system_tables::SYS_COLUMN_SET_COLUMNS => (
            &mut state.sys_tables.column_set_columns,
            &state.tmp_trids.column_set_columns,
        ),
        system_tables::SYS_COLUMN_DEFS => (
            &mut state.sys_tables.column_definitions,
            &state.tmp_trids.column_definitions,
        ),
        system_tables::SYS_COLUMN_DEF_CONSTRAINTS => (
            &mut state.sys_tables.column_definition_constraints,
            &state.tmp_trids.column_definition_constraints,
        ),
        system_tables::SYS_CONSTRAINT_DEFS => (
            &mut state.sys_tables.constraint_definitions,
            &state.tmp_trids.constraint_definitions,
        ),
        system_tables::SYS_CONSTRAINTS => (
            &mut state.sys_tables.constraints,
            &state.tmp_trids.constraints,
        ),
        system_tables::SYS_INDICES => (&mut state.sys_tables.indexes, &state.tmp_trids.indexes),
        system_tables::SYS_INDEX_COLUMNS => (
            &mut state.sys_tables.index_columns,
            &state.tmp_trids.index_columns,
        ),
        _ => return,
    };
    table.seed_trids(tmp.last_system(), tmp.last_user());
    *handle = Some(table);
}

fn next_entity_id(handle: &Option<Arc<Table>>, tmp: &mut TridPair, system: bool) -> u64 {
    match handle {
        Some(table) => {
            if system {
                table.generate_next_system_trid()
            } else {
                table.generate_next_user_trid()
            }
        }
        None => tmp.next(system),
    }
}

macro_rules! entity_id_generators {
    ($(($unlocked:ident, $public:ident, $field:ident)),* $(,)?) => {
        impl Database {
            $(
                pub(crate) fn $unlocked(&self, state: &mut CatalogState, system: bool) -> u64 {
                    next_entity_id(&state.sys_tables.$field, &mut state.tmp_trids.$field, system)
                }

                pub fn $public(self: &Arc<Self>, system: bool) -> u64 {
                    let mut state = self.lock_state();
                    self.$unlocked(&mut state, system)
                }
            )*
        }
    };
}

entity_id_generators!(
    (generate_next_column_id_unlocked, generate_next_column_id, columns),
    (
        generate_next_column_set_id_unlocked,
        generate_next_column_set_id,
        column_sets
    ),
    (
        generate_next_column_set_column_id_unlocked,
        generate_next_column_set_column_id,
        column_set_columns
    ),
    (
        generate_next_column_definition_id_unlocked,
        generate_next_column_definition_id,
        column_definitions
    ),
    (
        generate_next_column_definition_constraint_id_unlocked,
        generate_next_column_definition_constraint_id,
        column_definition_constraints
    ),
    (
        generate_next_constraint_definition_id_unlocked,
        generate_next_constraint_definition_id,
        constraint_definitions
    ),
    (
        generate_next_constraint_id_unlocked,
        generate_next_constraint_id,
        constraints
    ),
    (generate_next_index_id_unlocked, generate_next_index_id, indexes),
    (
        generate_next_index_column_id_unlocked,
        generate_next_index_column_id,
        index_columns
    ),
);

impl Database {
    /// Table ids additionally must fit 32 bits.
    pub(crate) fn generate_next_table_id_unlocked(
        &self,
        state: &mut CatalogState,
        system: bool,
    ) -> DbResult<u32> {
        let next = next_entity_id(&state.sys_tables.tables, &mut state.tmp_trids.tables, system);
        if next >= u32::MAX as u64 {
            return Err(DbError::ResourceExhausted("table id"));
        }
        Ok(next as u32)
    }

    pub fn generate_next_table_id(self: &Arc<Self>, system: bool) -> DbResult<u32> {
        let mut state = self.lock_state();
        self.generate_next_table_id_unlocked(&mut state, system)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_pair_partitions_ids() {
        let mut pair = TridPair::new();
        assert_eq!(pair.next(true), 1);
        assert_eq!(pair.next(true), 2);
        assert_eq!(pair.next(false), FIRST_USER_OBJECT_ID);
        assert_eq!(pair.next(true), 3);
        assert_eq!(pair.next(false), FIRST_USER_OBJECT_ID + 1);
    }
}
