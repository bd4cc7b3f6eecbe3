//! # Database Object
//!
//! The per-database catalog engine. A [`Database`] owns its registries,
//! the object caches in front of them, the single mutex that is the
//! consistency boundary for all of it, the data directory, the optional
//! encryption contexts, and the memory-mapped metadata record.
//!
//! ## Locking discipline
//!
//! All mutable catalog state lives in one [`CatalogState`] behind a
//! `parking_lot::Mutex`. Public operations lock once and delegate to
//! `*_unlocked` functions taking `&mut CatalogState`; holding that
//! reference proves the lock is held, so internal paths never re-acquire
//! it. Operations under the mutex are linearizable; nothing is promised
//! across databases. The use-count is an atomic CAS outside the mutex.
//!
//! ## Bootstrap
//!
//! Creating a database builds its data directory (recursively removing a
//! stale one), writes and maps the metadata record naming the super-user,
//! derives the UUID from MD5 over the name and creation time, creates the
//! system tables, persists the first catalog snapshot, and writes the
//! `initialized` flag file last — a crash before the flag leaves a
//! recognizable partial state that the next create cleans up.
//!
//! ## Files
//!
//! ```text
//! <dataDir>/db_<uuid>/metadata         fixed-size mapped record
//! <dataDir>/db_<uuid>/initialized      presence flag, written last
//! <dataDir>/db_<uuid>/system_objects   catalog snapshot (via file factory)
//! ```

mod create_table;
mod id_gen;
mod metadata;

pub use create_table::{ColumnSpecification, ConstraintSpecification, SimpleColumnSpecification};

use md5::{Digest, Md5};
use parking_lot::{Mutex, MutexGuard};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::catalog::records::{
    ColumnDefinitionConstraintRecord, ColumnDefinitionRecord, ColumnRecord, ColumnSetColumnRecord,
    ColumnSetRecord, ConstraintDefinitionRecord, ConstraintRecord, ConstraintType,
    IndexColumnRecord, IndexRecord, IndexType, TableRecord, TableType,
};
use crate::catalog::{
    is_system_object_id, is_valid_object_name, persistence, system_tables, CatalogRegistries,
    ObjectCache, FIRST_USER_OBJECT_ID,
};
use crate::config::constants::CONSTRAINT_DEFINITION_CACHE_CAPACITY;
use crate::crypto::{get_cipher, CipherContext};
use crate::database::id_gen::{SystemTableHandles, TmpTridCounters};
use crate::database::metadata::MetadataFile;
use crate::error::{DbError, DbResult};
use crate::expr::{Expression, Literal};
use crate::io::{DbFile, DATA_FILE_CREATE_MODE};
use crate::objects::{Column, Constraint, ConstraintDefinition, Table};

/// Id of the built-in super-user recorded in every metadata file.
pub const SUPER_USER_ID: u32 = 1;

pub const METADATA_FILE_NAME: &str = "metadata";
pub const INITIALIZED_FLAG_FILE_NAME: &str = "initialized";
pub const SYSTEM_OBJECTS_FILE_NAME: &str = "system_objects";

/// Prefix of per-database data directories under the instance data dir.
pub const DATABASE_DIR_PREFIX: &str = "db_";

/// Transaction attribution for a catalog mutation.
#[derive(Debug, Clone, Copy)]
pub struct TransactionParameters {
    pub user_id: u32,
    pub transaction_id: u64,
}

/// Everything guarded by the catalog mutex.
#[derive(Debug)]
pub(crate) struct CatalogState {
    pub registries: CatalogRegistries,
    pub table_cache: ObjectCache<u32, Table>,
    pub constraint_definition_cache: ObjectCache<u64, ConstraintDefinition>,
    pub sys_tables: SystemTableHandles,
    pub tmp_trids: TmpTridCounters,
}

impl CatalogState {
    fn new(table_cache_capacity: usize) -> CatalogState {
        CatalogState {
            registries: CatalogRegistries::default(),
            table_cache: ObjectCache::new(table_cache_capacity),
            constraint_definition_cache: ObjectCache::new(CONSTRAINT_DEFINITION_CACHE_CAPACITY),
            sys_tables: SystemTableHandles::default(),
            tmp_trids: TmpTridCounters::default(),
        }
    }
}

pub struct Database {
    name: String,
    uuid: Uuid,
    data_dir: PathBuf,
    cipher_id: String,
    encryption_context: Option<Arc<dyn CipherContext>>,
    decryption_context: Option<Arc<dyn CipherContext>>,
    metadata: MetadataFile,
    use_count: AtomicUsize,
    state: Mutex<CatalogState>,
}

impl Database {
    /// Creates a new database on disk and bootstraps its catalog.
    pub fn create(
        name: &str,
        data_dir_root: &Path,
        cipher_id: &str,
        cipher_key: &[u8],
        create_timestamp: u64,
        table_cache_capacity: usize,
    ) -> DbResult<Arc<Database>> {
        let name = Self::validate_database_name(name)?;
        let uuid = Self::compute_uuid(name, create_timestamp);
        let data_dir = Self::data_dir_path(data_dir_root, &uuid);
        Self::ensure_data_dir(name, &data_dir, true)?;

        let (encryption_context, decryption_context) =
            Self::resolve_cipher_contexts(cipher_id, cipher_key)?;

        let metadata =
            MetadataFile::create(&data_dir.join(METADATA_FILE_NAME), name, SUPER_USER_ID)?;

        let database = Arc::new(Database {
            name: name.to_owned(),
            uuid,
            data_dir,
            cipher_id: cipher_id.to_owned(),
            encryption_context,
            decryption_context,
            metadata,
            use_count: AtomicUsize::new(0),
            state: Mutex::new(CatalogState::new(table_cache_capacity)),
        });

        database.create_system_tables()?;
        database.create_initialization_flag_file()?;
        info!(
            database = database.name.as_str(),
            uuid = %database.uuid,
            "created database"
        );
        Ok(database)
    }

    /// Opens an existing database, loading the catalog snapshot and
    /// re-materializing the system tables.
    pub fn open(
        name: &str,
        uuid: Uuid,
        data_dir_root: &Path,
        cipher_id: &str,
        cipher_key: &[u8],
        table_cache_capacity: usize,
    ) -> DbResult<Arc<Database>> {
        let name = Self::validate_database_name(name)?;
        let data_dir = Self::data_dir_path(data_dir_root, &uuid);
        Self::ensure_data_dir(name, &data_dir, false)?;

        let (encryption_context, decryption_context) =
            Self::resolve_cipher_contexts(cipher_id, cipher_key)?;

        let metadata = MetadataFile::open(&data_dir.join(METADATA_FILE_NAME), name)?;

        let database = Arc::new(Database {
            name: name.to_owned(),
            uuid,
            data_dir,
            cipher_id: cipher_id.to_owned(),
            encryption_context,
            decryption_context,
            metadata,
            use_count: AtomicUsize::new(0),
            state: Mutex::new(CatalogState::new(table_cache_capacity)),
        });

        database.load_system_objects()?;
        database.check_data_consistency()?;
        info!(
            database = database.name.as_str(),
            uuid = %database.uuid,
            "opened database"
        );
        Ok(database)
    }

    // ---- identity & accessors ----

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn display_name(&self) -> String {
        format!("'{}'", self.name)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn cipher_id(&self) -> &str {
        &self.cipher_id
    }

    pub fn super_user_id(&self) -> u32 {
        self.metadata.super_user_id()
    }

    pub fn last_transaction_id(&self) -> u64 {
        self.metadata.last_transaction_id()
    }

    /// Next database-wide transaction id, drawn from the mapped metadata.
    pub fn generate_next_transaction_id(&self) -> u64 {
        self.metadata.generate_next_transaction_id()
    }

    /// UUID derived from MD5 over the database name and its creation time
    /// as eight little-endian bytes.
    pub fn compute_uuid(name: &str, create_timestamp: u64) -> Uuid {
        let mut hasher = Md5::new();
        hasher.update(name.as_bytes());
        hasher.update(create_timestamp.to_le_bytes());
        Uuid::from_bytes(hasher.finalize().into())
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, CatalogState> {
        self.state.lock()
    }

    fn validate_database_name(name: &str) -> DbResult<&str> {
        if is_valid_object_name(name) {
            Ok(name)
        } else {
            Err(DbError::InvalidDatabaseName(name.to_owned()))
        }
    }

    fn data_dir_path(root: &Path, uuid: &Uuid) -> PathBuf {
        root.join(format!("{DATABASE_DIR_PREFIX}{uuid}"))
    }

    fn resolve_cipher_contexts(
        cipher_id: &str,
        cipher_key: &[u8],
    ) -> DbResult<(Option<Arc<dyn CipherContext>>, Option<Arc<dyn CipherContext>>)> {
        match get_cipher(cipher_id)? {
            None => Ok((None, None)),
            Some(cipher) => Ok((
                Some(cipher.create_encryption_context(cipher_key)?),
                Some(cipher.create_decryption_context(cipher_key)?),
            )),
        }
    }

    // ---- use count ----

    /// Registers a caller-held handle. Paired with [`Database::release`].
    pub fn acquire(&self) {
        self.use_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Releases a caller-held handle. Releasing a database nobody holds is
    /// a programmer error and is reported, never silently accepted.
    pub fn release(&self) -> DbResult<()> {
        let mut current = self.use_count.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return Err(DbError::CannotReleaseUnusedDatabase(self.name.clone()));
            }
            match self.use_count.compare_exchange(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    pub fn use_count(&self) -> usize {
        self.use_count.load(Ordering::Acquire)
    }

    // ---- file factory ----

    /// Creates an on-disk object through the factory: plain when the
    /// database has no cipher, transparently encrypted otherwise.
    pub fn create_file(
        &self,
        path: &Path,
        extra_flags: i32,
        create_mode: u32,
        initial_size: u64,
    ) -> DbResult<DbFile> {
        DbFile::create(
            path,
            extra_flags,
            create_mode,
            initial_size,
            self.cipher_contexts(),
        )
    }

    pub fn open_file(&self, path: &Path, extra_flags: i32) -> DbResult<DbFile> {
        DbFile::open(path, extra_flags, self.cipher_contexts())
    }

    fn cipher_contexts(&self) -> Option<(Arc<dyn CipherContext>, Arc<dyn CipherContext>)> {
        match (&self.encryption_context, &self.decryption_context) {
            (Some(enc), Some(dec)) => Some((Arc::clone(enc), Arc::clone(dec))),
            _ => None,
        }
    }

    // ---- tables ----

    /// Shared table handle by name; fails if no such table exists.
    pub fn get_table_checked(self: &Arc<Self>, table_name: &str) -> DbResult<Arc<Table>> {
        let mut state = self.lock_state();
        let id = state
            .registries
            .tables
            .get_by_name(table_name)
            .map(|record| record.id);
        match id {
            Some(id) => self.get_or_load_table_unlocked(&mut state, id),
            None => Err(self.table_does_not_exist(table_name)),
        }
    }

    /// Shared table handle by id; fails if no such table exists.
    pub fn get_table_checked_by_id(self: &Arc<Self>, table_id: u32) -> DbResult<Arc<Table>> {
        let mut state = self.lock_state();
        self.get_or_load_table_unlocked(&mut state, table_id)
    }

    fn table_does_not_exist(&self, table: impl ToString) -> DbError {
        DbError::TableDoesNotExist {
            database: self.name.clone(),
            table: table.to_string(),
        }
    }

    fn get_or_load_table_unlocked(
        self: &Arc<Self>,
        state: &mut CatalogState,
        table_id: u32,
    ) -> DbResult<Arc<Table>> {
        if state.registries.tables.get(table_id).is_none() {
            return Err(self.table_does_not_exist(format!("#{table_id}")));
        }
        if let Some(table) = state.table_cache.get(&table_id) {
            return Ok(table);
        }
        self.load_table_unlocked(state, table_id)
    }

    /// Materializes a table object from its registry rows and caches it.
    fn load_table_unlocked(
        self: &Arc<Self>,
        state: &mut CatalogState,
        table_id: u32,
    ) -> DbResult<Arc<Table>> {
        let (record, column_set) = {
            let record = state
                .registries
                .tables
                .get(table_id)
                .ok_or_else(|| self.table_does_not_exist(format!("#{table_id}")))?
                .clone();
            let column_set = state
                .registries
                .column_sets
                .get(record.current_column_set_id)
                .ok_or(DbError::ColumnSetDoesNotExist {
                    database: self.name.clone(),
                    column_set_id: record.current_column_set_id,
                })?
                .clone();
            (record, column_set)
        };

        let mut columns = Vec::with_capacity(column_set.columns.len());
        for member in &column_set.columns {
            let column_record = state.registries.columns.get(member.column_id).ok_or(
                DbError::ColumnDoesNotExist {
                    database: self.name.clone(),
                    column_id: member.column_id,
                },
            )?;
            columns.push(Arc::new(Column::from_record(column_record)?));
        }

        let table = Table::from_record(Arc::downgrade(self), &record, &column_set, columns)?;
        state.table_cache.emplace(table_id, Arc::clone(&table));
        Ok(table)
    }

    /// Fetch-or-fail for system tables during startup.
    pub(crate) fn load_system_table(self: &Arc<Self>, name: &str) -> DbResult<Arc<Table>> {
        self.get_table_checked(name)
    }

    pub(crate) fn check_table_belongs_to_this_database(
        self: &Arc<Self>,
        table: &Table,
        operation: &'static str,
    ) -> DbResult<()> {
        if table.belongs_to(self) {
            Ok(())
        } else {
            Err(DbError::TableDoesNotBelongToDatabase {
                database: self.name.clone(),
                table: table.name().to_owned(),
                operation,
            })
        }
    }

    /// Loading every registered table enforces a basic consistency check
    /// over the catalog snapshot.
    fn check_data_consistency(self: &Arc<Self>) -> DbResult<()> {
        let ids: Vec<u32> = {
            let state = self.lock_state();
            state.registries.tables.iter().map(|record| record.id).collect()
        };
        for id in ids {
            let table = self.get_table_checked_by_id(id)?;
            debug!(table = %table.display_name(), "table OK");
        }
        Ok(())
    }

    // ---- constraint engine ----

    /// Builds (or reuses) a constraint definition from a live expression.
    /// The returned flag is true when an equal definition already existed.
    pub fn create_constraint_definition(
        self: &Arc<Self>,
        system: bool,
        constraint_type: ConstraintType,
        expression: Expression,
    ) -> DbResult<(Arc<ConstraintDefinition>, bool)> {
        let serialized = expression.serialize();
        self.find_or_create_constraint_definition(system, constraint_type, &serialized)
    }

    /// Content-addressed find-or-create over (kind, serialized expression).
    pub fn find_or_create_constraint_definition(
        self: &Arc<Self>,
        system: bool,
        constraint_type: ConstraintType,
        serialized_expression: &[u8],
    ) -> DbResult<(Arc<ConstraintDefinition>, bool)> {
        let mut state = self.lock_state();
        let (definition, existing) = self.find_or_create_constraint_definition_unlocked(
            &mut state,
            system,
            constraint_type,
            serialized_expression,
        )?;
        if !existing {
            self.save_system_objects_unlocked(&state)?;
        }
        Ok((definition, existing))
    }

    pub(crate) fn find_or_create_constraint_definition_unlocked(
        self: &Arc<Self>,
        state: &mut CatalogState,
        system: bool,
        constraint_type: ConstraintType,
        serialized_expression: &[u8],
    ) -> DbResult<(Arc<ConstraintDefinition>, bool)> {
        let hash = ConstraintDefinitionRecord::compute_hash(constraint_type, serialized_expression);

        // Equal-range by hash, then verify kind, bytes, and id partition:
        // hash collisions are possible and the partitions never mix.
        let existing_id = state
            .registries
            .constraint_definitions
            .equal_range(hash)
            .find(|row| {
                row.constraint_type == constraint_type
                    && row.expression == serialized_expression
                    && is_system_object_id(row.id) == system
            })
            .map(|row| row.id);

        if let Some(id) = existing_id {
            let definition = self.get_or_load_constraint_definition_unlocked(state, id)?;
            return Ok((definition, true));
        }

        let expression = Expression::deserialize(serialized_expression)?;
        let id = self.generate_next_constraint_definition_id_unlocked(state, system);
        let definition = Arc::new(ConstraintDefinition::new(id, constraint_type, expression));
        state
            .registries
            .constraint_definitions
            .insert(definition.to_record())?;
        state
            .constraint_definition_cache
            .emplace(id, Arc::clone(&definition));
        Ok((definition, false))
    }

    /// Shared constraint-definition handle; fails if the id is unknown.
    pub fn get_constraint_definition_checked(
        self: &Arc<Self>,
        constraint_definition_id: u64,
    ) -> DbResult<Arc<ConstraintDefinition>> {
        let mut state = self.lock_state();
        self.get_or_load_constraint_definition_unlocked(&mut state, constraint_definition_id)
    }

    fn get_or_load_constraint_definition_unlocked(
        self: &Arc<Self>,
        state: &mut CatalogState,
        id: u64,
    ) -> DbResult<Arc<ConstraintDefinition>> {
        if let Some(definition) = state.constraint_definition_cache.get(&id) {
            return Ok(definition);
        }
        let definition = {
            let record = state.registries.constraint_definitions.get(id).ok_or(
                DbError::ConstraintDefinitionDoesNotExist {
                    database: self.name.clone(),
                    constraint_definition_id: id,
                },
            )?;
            Arc::new(ConstraintDefinition::from_record(record)?)
        };
        state
            .constraint_definition_cache
            .emplace(id, Arc::clone(&definition));
        Ok(definition)
    }

    /// Builds and registers a typed constraint bound to `column` (or to the
    /// table alone). An empty name requests a deterministic auto-generated
    /// one.
    pub fn create_constraint(
        self: &Arc<Self>,
        table: &Arc<Table>,
        column: Option<&Arc<Column>>,
        name: &str,
        definition: &Arc<ConstraintDefinition>,
    ) -> DbResult<Arc<Constraint>> {
        self.check_table_belongs_to_this_database(table, "create_constraint")?;
        if let Some(column) = column {
            table.check_column_belongs_to_table(column, &self.name)?;
        }
        let mut state = self.lock_state();
        let constraint = self.create_constraint_unlocked(
            &mut state,
            table,
            column.map(|c| c.as_ref()),
            name,
            definition,
        )?;
        self.save_system_objects_unlocked(&state)?;
        Ok(constraint)
    }

    pub(crate) fn create_constraint_unlocked(
        self: &Arc<Self>,
        state: &mut CatalogState,
        table: &Table,
        column: Option<&Column>,
        name: &str,
        definition: &Arc<ConstraintDefinition>,
    ) -> DbResult<Arc<Constraint>> {
        if !name.is_empty() && state.registries.constraints.contains_name(name) {
            return Err(DbError::ConstraintAlreadyExists {
                database: self.name.clone(),
                constraint: name.to_owned(),
            });
        }
        match definition.constraint_type() {
            ConstraintType::NotNull | ConstraintType::DefaultValue => {}
            other => return Err(DbError::ConstraintNotSupported(other as u32)),
        }

        let system = is_system_object_id(table.id() as u64);
        let id = self.generate_next_constraint_id_unlocked(state, system);
        let name = if name.is_empty() {
            Self::generate_constraint_name(table, column, definition.constraint_type(), id)
        } else {
            name.to_owned()
        };
        let constraint = Arc::new(Constraint::new(
            id,
            &name,
            table.id(),
            column.map(|c| c.id()),
            Arc::clone(definition),
        )?);
        state.registries.constraints.insert(constraint.to_record())?;
        Ok(constraint)
    }

    /// Deterministic name for a constraint created without one. The
    /// freshly-allocated constraint id keeps it unique against both user
    /// and earlier auto-generated names.
    fn generate_constraint_name(
        table: &Table,
        column: Option<&Column>,
        constraint_type: ConstraintType,
        constraint_id: u64,
    ) -> String {
        match column {
            Some(column) => format!(
                "{}_{}_{}_{}",
                table.name(),
                column.name(),
                constraint_type.name_token(),
                constraint_id
            ),
            None => format!(
                "{}_{}_{}",
                table.name(),
                constraint_type.name_token(),
                constraint_id
            ),
        }
    }

    pub fn is_constraint_exists(&self, constraint_name: &str) -> bool {
        self.lock_state()
            .registries
            .constraints
            .contains_name(constraint_name)
    }

    /// Verifies a definition carries the expected kind before it is bound.
    pub fn check_constraint_type(
        &self,
        table: &Table,
        column: Option<&Column>,
        constraint_name: &str,
        definition: &ConstraintDefinition,
        expected: ConstraintType,
    ) -> DbResult<()> {
        if definition.constraint_type() == expected {
            return Ok(());
        }
        Err(self.constraint_type_mismatch(
            table,
            column,
            constraint_name,
            definition.constraint_type(),
            expected,
        ))
    }

    /// Record-level variant of [`Database::check_constraint_type`].
    pub fn check_constraint_record_type(
        &self,
        table: &Table,
        column: Option<&Column>,
        constraint_record: &ConstraintRecord,
        expected: ConstraintType,
    ) -> DbResult<()> {
        let actual = {
            let state = self.lock_state();
            state
                .registries
                .constraint_definitions
                .get(constraint_record.constraint_definition_id)
                .ok_or(DbError::ConstraintDefinitionDoesNotExist {
                    database: self.name.clone(),
                    constraint_definition_id: constraint_record.constraint_definition_id,
                })?
                .constraint_type
        };
        if actual == expected {
            return Ok(());
        }
        Err(self.constraint_type_mismatch(table, column, &constraint_record.name, actual, expected))
    }

    fn constraint_type_mismatch(
        &self,
        table: &Table,
        column: Option<&Column>,
        constraint_name: &str,
        actual: ConstraintType,
        expected: ConstraintType,
    ) -> DbError {
        match column {
            Some(column) => DbError::ColumnConstraintTypeMismatch {
                table: table.name().to_owned(),
                column: column.name().to_owned(),
                constraint: constraint_name.to_owned(),
                actual: actual as u32,
                expected: expected as u32,
            },
            None => DbError::TableConstraintTypeMismatch {
                table: table.name().to_owned(),
                constraint: constraint_name.to_owned(),
                actual: actual as u32,
                expected: expected as u32,
            },
        }
    }

    // ---- record getters ----

    pub fn get_table_record(&self, table_id: u32) -> DbResult<TableRecord> {
        let state = self.lock_state();
        state
            .registries
            .tables
            .get(table_id)
            .cloned()
            .ok_or_else(|| self.table_does_not_exist(format!("#{table_id}")))
    }

    pub fn get_column_record(&self, column_id: u64) -> DbResult<ColumnRecord> {
        let state = self.lock_state();
        state
            .registries
            .columns
            .get(column_id)
            .cloned()
            .ok_or(DbError::ColumnDoesNotExist {
                database: self.name.clone(),
                column_id,
            })
    }

    pub fn get_column_set_record(&self, column_set_id: u64) -> DbResult<ColumnSetRecord> {
        let state = self.lock_state();
        state
            .registries
            .column_sets
            .get(column_set_id)
            .cloned()
            .ok_or(DbError::ColumnSetDoesNotExist {
                database: self.name.clone(),
                column_set_id,
            })
    }

    pub fn get_column_definition_record(
        &self,
        column_definition_id: u64,
    ) -> DbResult<ColumnDefinitionRecord> {
        let state = self.lock_state();
        state
            .registries
            .column_definitions
            .get(column_definition_id)
            .cloned()
            .ok_or(DbError::ColumnDefinitionDoesNotExist {
                database: self.name.clone(),
                column_definition_id,
            })
    }

    pub fn get_constraint_record(&self, constraint_id: u64) -> DbResult<ConstraintRecord> {
        let state = self.lock_state();
        state
            .registries
            .constraints
            .get(constraint_id)
            .cloned()
            .ok_or(DbError::ConstraintDoesNotExist {
                database: self.name.clone(),
                constraint_id,
            })
    }

    pub fn get_constraint_definition_record(
        &self,
        constraint_definition_id: u64,
    ) -> DbResult<ConstraintDefinitionRecord> {
        let state = self.lock_state();
        state
            .registries
            .constraint_definitions
            .get(constraint_definition_id)
            .cloned()
            .ok_or(DbError::ConstraintDefinitionDoesNotExist {
                database: self.name.clone(),
                constraint_definition_id,
            })
    }

    pub fn get_index_record(&self, index_id: u64) -> DbResult<IndexRecord> {
        let state = self.lock_state();
        state
            .registries
            .indexes
            .get(index_id)
            .cloned()
            .ok_or(DbError::IndexDoesNotExist {
                database: self.name.clone(),
                index_id,
            })
    }

    /// Greatest column-definition id for a column of a table; fails when
    /// the column has no definitions at all.
    pub fn get_latest_column_definition_id_for_column(
        &self,
        table_id: u32,
        column_id: u64,
    ) -> DbResult<u64> {
        let state = self.lock_state();
        state
            .registries
            .column_definitions
            .latest_for_column(column_id)
            .ok_or(DbError::MissingColumnDefinitionsForColumn {
                table_id,
                column_id,
            })
    }

    // ---- registration (mutex held by the caller through the state ref) ----

    pub(crate) fn register_column_set_unlocked(
        &self,
        state: &mut CatalogState,
        record: ColumnSetRecord,
    ) -> DbResult<()> {
        state.registries.column_sets.insert(record)
    }

    /// Replace-in-place for a table row whose non-id fields changed (a
    /// schema mutation moves its current column set).
    pub(crate) fn update_table_registration_unlocked(
        &self,
        state: &mut CatalogState,
        record: TableRecord,
    ) -> DbResult<()> {
        state.registries.tables.replace(record)
    }

    // ---- indexes ----

    /// Registers an index over existing columns of a table.
    pub fn create_index(
        self: &Arc<Self>,
        table: &Arc<Table>,
        name: &str,
        columns: &[Arc<Column>],
        index_type: IndexType,
    ) -> DbResult<IndexRecord> {
        self.check_table_belongs_to_this_database(table, "create_index")?;
        if !is_valid_object_name(name) {
            return Err(DbError::InvalidIndexName(name.to_owned()));
        }
        for column in columns {
            table.check_column_belongs_to_table(column, &self.name)?;
        }

        let mut state = self.lock_state();
        if state.registries.indexes.contains_name(name) {
            return Err(DbError::IndexAlreadyExists {
                database: self.name.clone(),
                index: name.to_owned(),
            });
        }
        let system = is_system_object_id(table.id() as u64);
        let id = self.generate_next_index_id_unlocked(&mut state, system);
        let mut members: smallvec::SmallVec<[IndexColumnRecord; 4]> = smallvec::SmallVec::new();
        for column in columns {
            members.push(IndexColumnRecord {
                id: self.generate_next_index_column_id_unlocked(&mut state, system),
                column_definition_id: column.current_column_definition_id(),
                descending: false,
            });
        }
        let record = IndexRecord {
            id,
            name: name.to_owned(),
            index_type,
            table_id: table.id(),
            columns: members,
        };
        state.registries.indexes.insert(record.clone())?;
        self.save_system_objects_unlocked(&state)?;
        Ok(record)
    }

    // ---- columns ----

    /// Materializes one column with its definition version, constraints
    /// and column-set membership. `ids_system` selects the id partition;
    /// `system_definitions` forces constraint definitions into the system
    /// partition (the master column's NOT NULL is shared engine-wide).
    pub(crate) fn create_column_unlocked(
        self: &Arc<Self>,
        state: &mut CatalogState,
        table: &Arc<Table>,
        spec: &ColumnSpecification,
        ids_system: bool,
        system_definitions: bool,
    ) -> DbResult<Arc<Column>> {
        let column_id = self.generate_next_column_id_unlocked(state, ids_system);
        let column = Arc::new(Column::new(
            column_id,
            &spec.name,
            spec.data_type,
            table.id(),
        )?);

        let column_definition_id =
            self.generate_next_column_definition_id_unlocked(state, ids_system);

        let mut links: smallvec::SmallVec<[ColumnDefinitionConstraintRecord; 2]> =
            smallvec::SmallVec::new();
        for constraint_spec in &spec.constraints {
            let serialized = constraint_spec.expression.serialize();
            let (definition, _existing) = self.find_or_create_constraint_definition_unlocked(
                state,
                system_definitions,
                constraint_spec.constraint_type,
                &serialized,
            )?;
            let constraint = self.create_constraint_unlocked(
                state,
                table,
                Some(&column),
                &constraint_spec.name,
                &definition,
            )?;
            links.push(ColumnDefinitionConstraintRecord {
                id: self
                    .generate_next_column_definition_constraint_id_unlocked(state, ids_system),
                constraint_id: constraint.id(),
            });
        }

        column.set_current_column_definition_id(column_definition_id);
        state.registries.columns.insert(column.to_record())?;
        state
            .registries
            .column_definitions
            .insert(ColumnDefinitionRecord {
                id: column_definition_id,
                column_id,
                column_set_id: table.current_column_set_id(),
                constraints: links,
            })?;

        table.add_column_to_current_set(ColumnSetColumnRecord {
            id: self.generate_next_column_set_column_id_unlocked(state, ids_system),
            column_id,
            column_definition_id,
        });
        table.add_column_handle(Arc::clone(&column));
        Ok(column)
    }

    /// Appends a column to an existing table: a new open column set is
    /// built over the current columns' definitions, the new column is
    /// materialized into it, the set is closed and the table row moves to
    /// the new schema version.
    pub fn add_column(
        self: &Arc<Self>,
        table: &Arc<Table>,
        spec: &ColumnSpecification,
        current_user_id: u32,
    ) -> DbResult<Arc<Column>> {
        self.check_table_belongs_to_this_database(table, "add_column")?;
        if !is_valid_object_name(&spec.name) {
            return Err(DbError::InvalidColumnName(spec.name.clone()));
        }
        if table.get_column(&spec.name).is_some() {
            return Err(DbError::ColumnAlreadyExists {
                table: table.name().to_owned(),
                column: spec.name.clone(),
            });
        }

        let mut state = self.lock_state();
        for constraint_spec in &spec.constraints {
            match constraint_spec.constraint_type {
                ConstraintType::NotNull | ConstraintType::DefaultValue => {}
                other => return Err(DbError::ConstraintNotSupported(other as u32)),
            }
            if constraint_spec.name.is_empty() {
                continue;
            }
            if !is_valid_object_name(&constraint_spec.name) {
                return Err(DbError::InvalidConstraintName(constraint_spec.name.clone()));
            }
            if state
                .registries
                .constraints
                .contains_name(&constraint_spec.name)
            {
                return Err(DbError::ConstraintAlreadyExists {
                    database: self.name.clone(),
                    constraint: constraint_spec.name.clone(),
                });
            }
        }

        let system = is_system_object_id(table.id() as u64);
        let existing_columns = table.columns();

        let column_set_id = self.generate_next_column_set_id_unlocked(&mut state, system);
        table.open_new_column_set(column_set_id);
        for column in &existing_columns {
            table.add_column_to_current_set(ColumnSetColumnRecord {
                id: self.generate_next_column_set_column_id_unlocked(&mut state, system),
                column_id: column.id(),
                column_definition_id: column.current_column_definition_id(),
            });
        }

        let column = self.create_column_unlocked(&mut state, table, spec, system, false)?;
        self.close_current_column_set_unlocked(&mut state, table)?;
        self.update_table_registration_unlocked(&mut state, table.to_record())?;

        let tp = TransactionParameters {
            user_id: current_user_id,
            transaction_id: self.generate_next_transaction_id(),
        };
        self.record_table_definition_unlocked(&state, table, &tp)?;
        debug!(
            database = self.name.as_str(),
            table = table.name(),
            column = column.name(),
            "added column"
        );
        Ok(column)
    }

    // ---- table creation internals ----

    /// Builds a table with its master column, registers and caches it. The
    /// column set stays open for the caller to add user columns.
    pub(crate) fn create_table_unlocked(
        self: &Arc<Self>,
        state: &mut CatalogState,
        name: &str,
        table_type: TableType,
        first_user_trid: u64,
        system: bool,
    ) -> DbResult<Arc<Table>> {
        if table_type != TableType::Disk {
            return Err(DbError::TableTypeNotSupported(table_type as u32));
        }
        if state.registries.tables.contains_name(name) {
            return Err(DbError::TableAlreadyExists {
                database: self.name.clone(),
                table: name.to_owned(),
            });
        }

        let table_id = self.generate_next_table_id_unlocked(state, system)?;
        let column_set_id = self.generate_next_column_set_id_unlocked(state, system);
        let table = Table::new(
            Arc::downgrade(self),
            table_id,
            name,
            table_type,
            first_user_trid,
            column_set_id,
        )?;

        let master_spec = ColumnSpecification::master_column();
        self.create_column_unlocked(state, &table, &master_spec, system, true)?;

        state.registries.tables.insert(table.to_record())?;
        state.table_cache.emplace(table_id, Arc::clone(&table));
        Ok(table)
    }

    /// Closes the table's current column set and registers its snapshot.
    pub(crate) fn close_current_column_set_unlocked(
        &self,
        state: &mut CatalogState,
        table: &Table,
    ) -> DbResult<()> {
        let record = table.close_current_column_set();
        self.register_column_set_unlocked(state, record)
    }

    pub(crate) fn record_table_definition_unlocked(
        &self,
        state: &CatalogState,
        table: &Table,
        tp: &TransactionParameters,
    ) -> DbResult<()> {
        debug!(
            database = self.name.as_str(),
            table = table.name(),
            transaction_id = tp.transaction_id,
            user_id = tp.user_id,
            "recording table definition"
        );
        self.save_system_objects_unlocked(state)
    }

    // ---- bootstrap & persistence ----

    fn create_system_tables(self: &Arc<Self>) -> DbResult<()> {
        let mut state = self.lock_state();
        for name in system_tables::ALL {
            let table = self.create_table_unlocked(
                &mut state,
                name,
                TableType::Disk,
                FIRST_USER_OBJECT_ID,
                true,
            )?;
            self.close_current_column_set_unlocked(&mut state, &table)?;
            id_gen::install_system_table(&mut state, table);
        }
        self.save_system_objects_unlocked(&state)
    }

    /// Loads the catalog snapshot and re-materializes the system tables,
    /// restoring every TRID sequence past the ids already issued.
    fn load_system_objects(self: &Arc<Self>) -> DbResult<()> {
        let image = self
            .open_file(&self.system_objects_file_path(), 0)?
            .read_all()?;
        let registries = persistence::deserialize(&image)?;

        {
            let mut state = self.lock_state();
            state.registries = registries;
        }

        for name in system_tables::ALL {
            let table = self.load_system_table(name)?;
            let mut state = self.lock_state();
            Self::seed_system_table_trids(&state, &table);
            id_gen::install_system_table(&mut state, table);
        }
        Ok(())
    }

    /// Seeds a system table's TRID pair from the maxima already present in
    /// the registry of the entity kind it owns.
    fn seed_system_table_trids(state: &CatalogState, table: &Table) {
        let regs = &state.registries;
        let ids: Vec<u64> = match table.name() {
            system_tables::SYS_TABLES => regs.tables.iter().map(|r| r.id as u64).collect(),
            system_tables::SYS_COLUMNS => regs.columns.iter().map(|r| r.id).collect(),
            system_tables::SYS_COLUMN_SETS => regs.column_sets.iter().map(|r| r.id).collect(),
            system_tables::SYS_COLUMN_SET_COLUMNS => regs
                .column_sets
                .iter()
                .flat_map(|r| r.columns.iter().map(|c| c.id))
                .collect(),
            system_tables::SYS_COLUMN_DEFS => {
                regs.column_definitions.iter().map(|r| r.id).collect()
            }
            system_tables::SYS_COLUMN_DEF_CONSTRAINTS => regs
                .column_definitions
                .iter()
                .flat_map(|r| r.constraints.iter().map(|c| c.id))
                .collect(),
            system_tables::SYS_CONSTRAINT_DEFS => {
                regs.constraint_definitions.iter().map(|r| r.id).collect()
            }
            system_tables::SYS_CONSTRAINTS => regs.constraints.iter().map(|r| r.id).collect(),
            system_tables::SYS_INDICES => regs.indexes.iter().map(|r| r.id).collect(),
            system_tables::SYS_INDEX_COLUMNS => regs
                .indexes
                .iter()
                .flat_map(|r| r.columns.iter().map(|c| c.id))
                .collect(),
            _ => return,
        };
        let last_system = ids
            .iter()
            .copied()
            .filter(|&id| is_system_object_id(id))
            .max()
            .unwrap_or(0);
        let last_user = ids
            .iter()
            .copied()
            .filter(|&id| !is_system_object_id(id))
            .max()
            .unwrap_or(FIRST_USER_OBJECT_ID - 1);
        table.seed_trids(last_system, last_user);
    }

    pub(crate) fn save_system_objects_unlocked(&self, state: &CatalogState) -> DbResult<()> {
        let image = persistence::serialize(&state.registries);
        let file = self.create_file(
            &self.system_objects_file_path(),
            0,
            DATA_FILE_CREATE_MODE,
            0,
        )?;
        file.write_at(0, &image)?;
        file.sync()?;
        Ok(())
    }

    fn system_objects_file_path(&self) -> PathBuf {
        self.data_dir.join(SYSTEM_OBJECTS_FILE_NAME)
    }

    fn initialization_flag_file_path(&self) -> PathBuf {
        self.data_dir.join(INITIALIZED_FLAG_FILE_NAME)
    }

    /// The flag file is the last step of bootstrap: its presence marks the
    /// data directory as complete.
    fn create_initialization_flag_file(&self) -> DbResult<()> {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        std::fs::write(self.initialization_flag_file_path(), timestamp.to_string())?;
        Ok(())
    }

    fn ensure_data_dir(name: &str, data_dir: &Path, create: bool) -> DbResult<()> {
        let init_flag = data_dir.join(INITIALIZED_FLAG_FILE_NAME);
        let flag_exists = init_flag.exists();
        if create {
            if flag_exists {
                return Err(DbError::DatabaseAlreadyExists(name.to_owned()));
            }
            if data_dir.exists() {
                std::fs::remove_dir_all(data_dir)?;
            }
            std::fs::create_dir_all(data_dir)?;
        } else {
            if !data_dir.exists() {
                return Err(DbError::DatabaseDataFolderMissing {
                    database: name.to_owned(),
                    path: data_dir.display().to_string(),
                });
            }
            if !flag_exists {
                return Err(DbError::DatabaseInitFileMissing {
                    database: name.to_owned(),
                    path: init_flag.display().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Shared system NOT NULL expression used by every master column.
    pub(crate) fn master_column_not_null_expression() -> Expression {
        Expression::constant(Literal::Bool(true))
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("uuid", &self.uuid)
            .field("use_count", &self.use_count())
            .finish_non_exhaustive()
    }
}
