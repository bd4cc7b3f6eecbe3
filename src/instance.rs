//! # Instance
//!
//! The process-wide owner of databases. An [`Instance`] holds the
//! validated options record, the instance data directory, the advisory
//! lock that keeps a second server process from starting over the same
//! directory, the registry of known databases with its LRU cache of open
//! database objects, and the startup flag file the supervisor probes.
//!
//! ## Files
//!
//! ```text
//! <dataDir>/databases       database registry (name, uuid, cipher)
//! <runDir>/meridb.lock      advisory exclusive instance lock
//! <runDir>/iomgr.init       written after successful startup
//! ```
//!
//! ## Handles and use-counts
//!
//! Every database handle an instance hands out increments that database's
//! use-count; callers pair it with `release()`. A database can only be
//! dropped when nobody holds it.

use hashbrown::HashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::{is_valid_object_name, FIRST_USER_OBJECT_ID};
use crate::config::InstanceOptions;
use crate::database::Database;
use crate::encoding::{decode_bytes, decode_string, decode_varint, encode_bytes, encode_varint};
use crate::error::{DbError, DbResult};

/// Advisory lock preventing concurrent instance startup.
pub const INSTANCE_LOCK_FILE: &str = "meridb.lock";

/// Presence indicates the IO manager finished startup.
pub const IOMGR_INIT_FLAG_FILE: &str = "iomgr.init";

/// Database registry file inside the instance data directory.
pub const DATABASE_REGISTRY_FILE: &str = "databases";

const REGISTRY_VERSION: u64 = 1;

/// Instance-level registry row for one database.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseRecord {
    pub id: u32,
    pub name: String,
    pub uuid: Uuid,
    pub cipher_id: String,
    pub cipher_key: Vec<u8>,
    pub create_timestamp: u64,
}

#[derive(Debug)]
struct InstanceState {
    databases: BTreeMap<u32, DatabaseRecord>,
    ids_by_name: HashMap<String, u32>,
    cache: crate::catalog::ObjectCache<u32, Database>,
    last_system_database_id: u32,
    last_user_database_id: u32,
}

impl InstanceState {
    fn new(cache_capacity: usize) -> InstanceState {
        InstanceState {
            databases: BTreeMap::new(),
            ids_by_name: HashMap::new(),
            cache: crate::catalog::ObjectCache::new(cache_capacity),
            last_system_database_id: 0,
            last_user_database_id: (FIRST_USER_OBJECT_ID - 1) as u32,
        }
    }

    fn insert(&mut self, record: DatabaseRecord) {
        self.ids_by_name.insert(record.name.clone(), record.id);
        self.last_system_database_id = self
            .last_system_database_id
            .max(if (record.id as u64) < FIRST_USER_OBJECT_ID {
                record.id
            } else {
                0
            });
        self.last_user_database_id = self.last_user_database_id.max(record.id);
        self.databases.insert(record.id, record);
    }
}

pub struct Instance {
    options: InstanceOptions,
    data_dir: PathBuf,
    run_dir: PathBuf,
    // Held for the process lifetime; dropping it releases the lock.
    _lock_file: std::fs::File,
    state: Mutex<InstanceState>,
}

impl Instance {
    /// Initializes an instance over its data directory: takes the
    /// advisory lock and loads the database registry. `run_dir` holds the
    /// lock and startup flag files; it defaults to the data directory.
    pub fn new(options: InstanceOptions, run_dir: Option<&Path>) -> DbResult<Arc<Instance>> {
        let data_dir = PathBuf::from(&options.general.data_directory);
        std::fs::create_dir_all(&data_dir)?;
        let run_dir = run_dir.map(Path::to_path_buf).unwrap_or_else(|| data_dir.clone());
        std::fs::create_dir_all(&run_dir)?;

        let lock_file = Self::acquire_instance_lock(&run_dir)?;

        // A stale startup flag from a previous run must not satisfy a
        // supervisor probing this startup.
        let init_flag = run_dir.join(IOMGR_INIT_FLAG_FILE);
        if init_flag.exists() {
            if let Err(error) = std::fs::remove_file(&init_flag) {
                warn!(%error, "could not remove stale startup flag");
            }
        }

        let instance = Arc::new(Instance {
            state: Mutex::new(InstanceState::new(
                options.iomgr.database_cache_capacity,
            )),
            options,
            data_dir,
            run_dir,
            _lock_file: lock_file,
        });
        instance.load_database_registry()?;
        info!(
            instance = instance.options.general.instance_name.as_str(),
            data_dir = %instance.data_dir.display(),
            "instance initialized"
        );
        Ok(instance)
    }

    fn acquire_instance_lock(run_dir: &Path) -> DbResult<std::fs::File> {
        let path = run_dir.join(INSTANCE_LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        // Advisory exclusive lock; a second instance over the same run
        // directory must fail to start, not corrupt the first one's data.
        // flock (not lockf) so the exclusion also holds between two
        // instance objects inside one process.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            return Err(DbError::InstanceLockFailed {
                path: path.display().to_string(),
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(file)
    }

    pub fn options(&self) -> &InstanceOptions {
        &self.options
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Marks startup as complete by writing the flag file the process
    /// supervisor probes.
    pub fn finish_startup(&self) -> DbResult<()> {
        std::fs::write(self.run_dir.join(IOMGR_INIT_FLAG_FILE), b"")?;
        info!(
            instance = self.options.general.instance_name.as_str(),
            "startup complete"
        );
        Ok(())
    }

    pub fn database_count(&self) -> usize {
        self.state.lock().databases.len()
    }

    /// Database records ordered by name.
    pub fn database_records_ordered_by_name(&self) -> Vec<DatabaseRecord> {
        let state = self.state.lock();
        let mut records: Vec<DatabaseRecord> = state.databases.values().cloned().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    /// Next database id in the requested partition.
    pub fn generate_next_database_id(&self, system: bool) -> u32 {
        let mut state = self.state.lock();
        if system {
            state.last_system_database_id += 1;
            state.last_system_database_id
        } else {
            state.last_user_database_id += 1;
            state.last_user_database_id
        }
    }

    /// Creates a database stamped with the current wall-clock time.
    pub fn create_database(
        self: &Arc<Self>,
        name: &str,
        cipher_id: &str,
        cipher_key: &[u8],
        current_user_id: u32,
    ) -> DbResult<Arc<Database>> {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.create_database_with_timestamp(name, cipher_id, cipher_key, current_user_id, timestamp)
    }

    /// Creates a database with an explicit creation timestamp (the
    /// timestamp participates in the UUID derivation).
    pub fn create_database_with_timestamp(
        self: &Arc<Self>,
        name: &str,
        cipher_id: &str,
        cipher_key: &[u8],
        current_user_id: u32,
        create_timestamp: u64,
    ) -> DbResult<Arc<Database>> {
        if !is_valid_object_name(name) {
            return Err(DbError::InvalidDatabaseName(name.to_owned()));
        }

        let mut state = self.state.lock();
        if state.ids_by_name.contains_key(name) {
            return Err(DbError::DatabaseAlreadyExists(name.to_owned()));
        }

        let database = Database::create(
            name,
            &self.data_dir,
            cipher_id,
            cipher_key,
            create_timestamp,
            self.options.iomgr.table_cache_capacity,
        )?;

        state.last_user_database_id += 1;
        let id = state.last_user_database_id;
        state.insert(DatabaseRecord {
            id,
            name: name.to_owned(),
            uuid: database.uuid(),
            cipher_id: cipher_id.to_owned(),
            cipher_key: cipher_key.to_vec(),
            create_timestamp,
        });
        state.cache.emplace(id, Arc::clone(&database));
        self.save_database_registry_locked(&state)?;

        info!(
            database = name,
            id,
            user_id = current_user_id,
            "registered database"
        );
        database.acquire();
        Ok(database)
    }

    /// Shared database handle by name; the use-count is incremented and
    /// the caller pairs it with `release()`.
    pub fn get_database_checked(self: &Arc<Self>, name: &str) -> DbResult<Arc<Database>> {
        self.get_database(name)?
            .ok_or_else(|| DbError::DatabaseDoesNotExist(name.to_owned()))
    }

    pub fn get_database(self: &Arc<Self>, name: &str) -> DbResult<Option<Arc<Database>>> {
        let mut state = self.state.lock();
        let Some(&id) = state.ids_by_name.get(name) else {
            return Ok(None);
        };
        if let Some(database) = state.cache.get(&id) {
            database.acquire();
            return Ok(Some(database));
        }
        let record = state
            .databases
            .get(&id)
            .expect("name index points at a registered database") // INVARIANT: indices updated together
            .clone();
        let database = Database::open(
            &record.name,
            record.uuid,
            &self.data_dir,
            &record.cipher_id,
            &record.cipher_key,
            self.options.iomgr.table_cache_capacity,
        )?;
        state.cache.emplace(id, Arc::clone(&database));
        database.acquire();
        Ok(Some(database))
    }

    /// Drops a database: removes its registry row, evicts the cached
    /// object and deletes the data directory. Refused while any handle is
    /// outstanding.
    pub fn drop_database(self: &Arc<Self>, name: &str, database_must_exist: bool) -> DbResult<bool> {
        let mut state = self.state.lock();
        let Some(&id) = state.ids_by_name.get(name) else {
            if database_must_exist {
                return Err(DbError::DatabaseDoesNotExist(name.to_owned()));
            }
            return Ok(false);
        };
        if let Some(database) = state.cache.get(&id) {
            let use_count = database.use_count();
            if use_count > 0 {
                return Err(DbError::DatabaseInUse {
                    database: name.to_owned(),
                    use_count,
                });
            }
        }

        let record = state
            .databases
            .remove(&id)
            .expect("name index points at a registered database"); // INVARIANT: indices updated together
        state.ids_by_name.remove(name);
        state.cache.remove(&id);
        self.save_database_registry_locked(&state)?;
        drop(state);

        let dir = self
            .data_dir
            .join(format!("{}{}", crate::database::DATABASE_DIR_PREFIX, record.uuid));
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        info!(database = name, "dropped database");
        Ok(true)
    }

    // ---- registry persistence ----

    fn registry_file_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_REGISTRY_FILE)
    }

    fn save_database_registry_locked(&self, state: &InstanceState) -> DbResult<()> {
        let mut buf = Vec::with_capacity(256);
        encode_varint(REGISTRY_VERSION, &mut buf);
        encode_varint(state.databases.len() as u64, &mut buf);
        for record in state.databases.values() {
            encode_varint(record.id as u64, &mut buf);
            encode_bytes(record.name.as_bytes(), &mut buf);
            buf.extend_from_slice(record.uuid.as_bytes());
            encode_bytes(record.cipher_id.as_bytes(), &mut buf);
            encode_bytes(&record.cipher_key, &mut buf);
            encode_varint(record.create_timestamp, &mut buf);
        }
        std::fs::write(self.registry_file_path(), buf)?;
        Ok(())
    }

    fn load_database_registry(self: &Arc<Self>) -> DbResult<()> {
        let path = self.registry_file_path();
        if !path.exists() {
            return Ok(());
        }
        let buf = std::fs::read(&path)?;
        let mut pos = 0usize;

        let (version, n) = decode_varint(&buf[pos..])?;
        pos += n;
        if version != REGISTRY_VERSION {
            return Err(DbError::CorruptedCatalog(format!(
                "unsupported database registry version {version}"
            )));
        }
        let (count, n) = decode_varint(&buf[pos..])?;
        pos += n;

        let mut state = self.state.lock();
        for _ in 0..count {
            let (id, n) = decode_varint(&buf[pos..])?;
            pos += n;
            let (name, n) = decode_string(&buf[pos..])?;
            pos += n;
            let uuid_bytes: [u8; 16] = buf
                .get(pos..pos + 16)
                .and_then(|s| s.try_into().ok())
                .ok_or_else(|| {
                    DbError::CorruptedCatalog("truncated database registry record".into())
                })?;
            pos += 16;
            let (cipher_id, n) = decode_string(&buf[pos..])?;
            pos += n;
            let (cipher_key, n) = decode_bytes(&buf[pos..]).map(|(bytes, n)| (bytes.to_vec(), n))?;
            pos += n;
            let (create_timestamp, n) = decode_varint(&buf[pos..])?;
            pos += n;

            state.insert(DatabaseRecord {
                id: u32::try_from(id).map_err(|_| {
                    DbError::CorruptedCatalog("database id out of range".into())
                })?,
                name,
                uuid: Uuid::from_bytes(uuid_bytes),
                cipher_id,
                cipher_key,
                create_timestamp,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("instance", &self.options.general.instance_name)
            .field("data_dir", &self.data_dir)
            .finish_non_exhaustive()
    }
}
