//! Database and instance lifecycle: bootstrap layout, UUID derivation,
//! catalog reload, use-count discipline, encryption, and the instance
//! lock.

use std::sync::Arc;

use md5::{Digest, Md5};
use meridb::catalog::{system_tables, ColumnDataType, TableType, FIRST_USER_OBJECT_ID};
use meridb::config::InstanceOptions;
use meridb::database::{
    Database, DATABASE_DIR_PREFIX, INITIALIZED_FLAG_FILE_NAME, METADATA_FILE_NAME, SUPER_USER_ID,
    SYSTEM_OBJECTS_FILE_NAME,
};
use meridb::instance::{Instance, DATABASE_REGISTRY_FILE, IOMGR_INIT_FLAG_FILE};
use meridb::{ColumnSpecification, DbError};
use tempfile::TempDir;

const SHOP_TIMESTAMP: u64 = 1_700_000_000;

fn int32(name: &str) -> ColumnSpecification {
    ColumnSpecification::new(name, ColumnDataType::Int32)
}

#[test]
fn bootstrap_creates_expected_layout() {
    let dir = TempDir::new().unwrap();
    let db = Database::create("shop", dir.path(), "none", &[], SHOP_TIMESTAMP, 100).unwrap();

    // UUID = MD5(name || creation time as 8 LE bytes).
    let mut hasher = Md5::new();
    hasher.update(b"shop");
    hasher.update(SHOP_TIMESTAMP.to_le_bytes());
    let digest: [u8; 16] = hasher.finalize().into();
    assert_eq!(db.uuid().as_bytes(), &digest);
    assert_eq!(db.uuid(), Database::compute_uuid("shop", SHOP_TIMESTAMP));

    let data_dir = dir.path().join(format!("{DATABASE_DIR_PREFIX}{}", db.uuid()));
    assert_eq!(db.data_dir(), data_dir);
    assert!(data_dir.join(METADATA_FILE_NAME).exists());
    assert!(data_dir.join(INITIALIZED_FLAG_FILE_NAME).exists());
    assert!(data_dir.join(SYSTEM_OBJECTS_FILE_NAME).exists());

    assert_eq!(db.super_user_id(), SUPER_USER_ID);

    // All system tables exist with system-range ids.
    for name in system_tables::ALL {
        let table = db.get_table_checked(name).unwrap();
        assert!((table.id() as u64) < FIRST_USER_OBJECT_ID, "{name}");
        assert_eq!(table.master_column().unwrap().name(), "TRID");
    }
}

#[test]
fn create_over_initialized_database_rejected() {
    let dir = TempDir::new().unwrap();
    Database::create("shop", dir.path(), "none", &[], SHOP_TIMESTAMP, 100).unwrap();
    let err =
        Database::create("shop", dir.path(), "none", &[], SHOP_TIMESTAMP, 100).unwrap_err();
    assert!(matches!(err, DbError::DatabaseAlreadyExists(_)));
}

#[test]
fn partial_bootstrap_is_cleaned_up_on_recreate() {
    let dir = TempDir::new().unwrap();
    let uuid = Database::compute_uuid("shop", SHOP_TIMESTAMP);
    let data_dir = dir.path().join(format!("{DATABASE_DIR_PREFIX}{uuid}"));

    // A crash before the flag file leaves a directory without it.
    std::fs::create_dir_all(&data_dir).unwrap();
    std::fs::write(data_dir.join("stale"), b"leftover").unwrap();

    let db = Database::create("shop", dir.path(), "none", &[], SHOP_TIMESTAMP, 100).unwrap();
    assert!(!db.data_dir().join("stale").exists());
    assert!(db.data_dir().join(INITIALIZED_FLAG_FILE_NAME).exists());
}

#[test]
fn open_requires_directory_and_flag() {
    let dir = TempDir::new().unwrap();
    let uuid = Database::compute_uuid("shop", SHOP_TIMESTAMP);

    let err = Database::open("shop", uuid, dir.path(), "none", &[], 100).unwrap_err();
    assert!(matches!(err, DbError::DatabaseDataFolderMissing { .. }));

    let data_dir = dir.path().join(format!("{DATABASE_DIR_PREFIX}{uuid}"));
    std::fs::create_dir_all(&data_dir).unwrap();
    let err = Database::open("shop", uuid, dir.path(), "none", &[], 100).unwrap_err();
    assert!(matches!(err, DbError::DatabaseInitFileMissing { .. }));
}

#[test]
fn reopen_restores_catalog_and_continues_ids() {
    let dir = TempDir::new().unwrap();
    let (uuid, t1_id, column_ids) = {
        let db = Database::create("shop", dir.path(), "none", &[], SHOP_TIMESTAMP, 100).unwrap();
        let not_null_a = ColumnSpecification::new("a", ColumnDataType::Int32)
            .with_constraint(meridb::ConstraintSpecification::not_null());
        let t1 = db
            .create_user_table("t1", TableType::Disk, &[not_null_a, int32("b")], SUPER_USER_ID)
            .unwrap();
        let ids: Vec<u64> = t1.columns().iter().map(|c| c.id()).collect();
        (db.uuid(), t1.id(), ids)
    };

    let db = Database::open("shop", uuid, dir.path(), "none", &[], 100).unwrap();
    let t1 = db.get_table_checked("t1").unwrap();
    assert_eq!(t1.id(), t1_id);
    let reloaded: Vec<u64> = t1.columns().iter().map(|c| c.id()).collect();
    assert_eq!(reloaded, column_ids);

    // New ids continue strictly past everything already issued.
    let t2 = db
        .create_user_table("t2", TableType::Disk, &[int32("c")], SUPER_USER_ID)
        .unwrap();
    assert!(t2.id() > t1_id);
    let t2_column_min = t2.columns().iter().map(|c| c.id()).min().unwrap();
    assert!(t2_column_min > *column_ids.iter().max().unwrap());

    // Constraint dedup still finds pre-reopen definitions.
    let expr = meridb::expr::Expression::constant(meridb::expr::Literal::Bool(true));
    let (_, existing) = db
        .find_or_create_constraint_definition(
            false,
            meridb::catalog::ConstraintType::NotNull,
            &expr.serialize(),
        )
        .unwrap();
    assert!(existing, "user NOT NULL definition was created before reopen");
}

#[test]
fn transaction_ids_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let uuid = {
        let db = Database::create("shop", dir.path(), "none", &[], SHOP_TIMESTAMP, 100).unwrap();
        db.create_user_table("t1", TableType::Disk, &[int32("a")], SUPER_USER_ID)
            .unwrap();
        assert!(db.last_transaction_id() > 0);
        db.uuid()
    };

    let db = Database::open("shop", uuid, dir.path(), "none", &[], 100).unwrap();
    let before = db.last_transaction_id();
    assert!(before > 0);
    assert_eq!(db.generate_next_transaction_id(), before + 1);
}

#[test]
fn encrypted_database_round_trips_and_hides_catalog() {
    let dir = TempDir::new().unwrap();
    let key = [0x42u8; 16];
    let uuid = {
        let db =
            Database::create("vault", dir.path(), "aes128", &key, SHOP_TIMESTAMP, 100).unwrap();
        db.create_user_table("secrets", TableType::Disk, &[int32("a")], SUPER_USER_ID)
            .unwrap();
        db.uuid()
    };

    // The snapshot on disk must not leak table names.
    let snapshot = std::fs::read(
        dir.path()
            .join(format!("{DATABASE_DIR_PREFIX}{uuid}"))
            .join(SYSTEM_OBJECTS_FILE_NAME),
    )
    .unwrap();
    assert!(!snapshot.windows(7).any(|w| w == b"secrets"));
    assert!(!snapshot.windows(10).any(|w| w == b"SYS_TABLES"));

    let db = Database::open("vault", uuid, dir.path(), "aes128", &key, 100).unwrap();
    assert!(db.get_table_checked("secrets").is_ok());

    // The wrong key cannot read the catalog back.
    let wrong_key = [0x43u8; 16];
    assert!(Database::open("vault", uuid, dir.path(), "aes128", &wrong_key, 100).is_err());
}

#[test]
fn unknown_cipher_and_bad_key_rejected() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(
        Database::create("x1", dir.path(), "rot13", &[], SHOP_TIMESTAMP, 100),
        Err(DbError::CipherUnknown(_))
    ));
    assert!(matches!(
        Database::create("x2", dir.path(), "aes128", &[0u8; 3], SHOP_TIMESTAMP, 100),
        Err(DbError::InvalidCipherKey(_))
    ));
}

#[test]
fn invalid_database_name_rejected() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(
        Database::create("1shop", dir.path(), "none", &[], SHOP_TIMESTAMP, 100),
        Err(DbError::InvalidDatabaseName(_))
    ));
}

#[test]
fn release_on_zero_use_count_is_an_error() {
    let dir = TempDir::new().unwrap();
    let db = Database::create("shop", dir.path(), "none", &[], SHOP_TIMESTAMP, 100).unwrap();

    assert_eq!(db.use_count(), 0);
    assert!(matches!(
        db.release(),
        Err(DbError::CannotReleaseUnusedDatabase(_))
    ));

    db.acquire();
    assert_eq!(db.use_count(), 1);
    db.release().unwrap();
    assert_eq!(db.use_count(), 0);
}

#[test]
fn concurrent_acquire_release_balances_use_count() {
    let dir = TempDir::new().unwrap();
    let db = Database::create("shop", dir.path(), "none", &[], SHOP_TIMESTAMP, 100).unwrap();

    const THREADS: usize = 8;
    const TAKES_PER_THREAD: usize = 1000;
    const KEPT_PER_THREAD: usize = 3;

    let mut handles = Vec::new();
    for _ in 0..THREADS {
        let db = Arc::clone(&db);
        handles.push(std::thread::spawn(move || {
            for _ in 0..TAKES_PER_THREAD {
                db.acquire();
            }
            for _ in 0..TAKES_PER_THREAD - KEPT_PER_THREAD {
                db.release().unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    // takes - releases handles remain.
    assert_eq!(db.use_count(), THREADS * KEPT_PER_THREAD);
    for _ in 0..THREADS * KEPT_PER_THREAD {
        db.release().unwrap();
    }
    assert!(db.release().is_err());
}

// ---- instance level ----

const CONFIG_TEMPLATE: &str = "\
log_channels = file
log.file.type = file
log.file.destination = {dest}
client.enable_encryption = no
data_dir = {data}
";

fn instance_options(dir: &TempDir) -> InstanceOptions {
    let text = CONFIG_TEMPLATE
        .replace("{dest}", &dir.path().join("log").display().to_string())
        .replace("{data}", &dir.path().join("data").display().to_string());
    InstanceOptions::load_from_str("test0", &text).unwrap()
}

#[test]
fn instance_creates_and_reopens_databases() {
    let dir = TempDir::new().unwrap();

    {
        let instance = Instance::new(instance_options(&dir), None).unwrap();
        instance.finish_startup().unwrap();
        assert!(instance.run_dir().join(IOMGR_INIT_FLAG_FILE).exists());

        let db = instance
            .create_database_with_timestamp("shop", "none", &[], SUPER_USER_ID, SHOP_TIMESTAMP)
            .unwrap();
        assert_eq!(db.use_count(), 1);
        db.create_user_table("t1", TableType::Disk, &[int32("a")], SUPER_USER_ID)
            .unwrap();
        db.release().unwrap();

        assert!(instance.data_dir().join(DATABASE_REGISTRY_FILE).exists());
        assert_eq!(instance.database_count(), 1);

        let err = instance
            .create_database("shop", "none", &[], SUPER_USER_ID)
            .unwrap_err();
        assert!(matches!(err, DbError::DatabaseAlreadyExists(_)));
    }

    // A fresh instance over the same directory sees the database.
    let instance = Instance::new(instance_options(&dir), None).unwrap();
    let db = instance.get_database_checked("shop").unwrap();
    assert!(db.get_table_checked("t1").is_ok());
    db.release().unwrap();

    assert!(matches!(
        instance.get_database_checked("absent"),
        Err(DbError::DatabaseDoesNotExist(_))
    ));
}

#[test]
fn instance_lock_prevents_second_startup() {
    let dir = TempDir::new().unwrap();
    let first = Instance::new(instance_options(&dir), None).unwrap();
    let err = Instance::new(instance_options(&dir), None).unwrap_err();
    assert!(matches!(err, DbError::InstanceLockFailed { .. }));
    drop(first);

    // Lock released with the first instance.
    Instance::new(instance_options(&dir), None).unwrap();
}

#[test]
fn drop_database_refused_while_held() {
    let dir = TempDir::new().unwrap();
    let instance = Instance::new(instance_options(&dir), None).unwrap();
    let db = instance
        .create_database_with_timestamp("shop", "none", &[], SUPER_USER_ID, SHOP_TIMESTAMP)
        .unwrap();

    let err = instance.drop_database("shop", true).unwrap_err();
    assert!(matches!(err, DbError::DatabaseInUse { .. }));

    db.release().unwrap();
    let data_dir = db.data_dir().to_path_buf();
    drop(db);
    assert!(instance.drop_database("shop", true).unwrap());
    assert!(!data_dir.exists());

    assert!(!instance.drop_database("shop", false).unwrap());
    assert!(matches!(
        instance.drop_database("shop", true),
        Err(DbError::DatabaseDoesNotExist(_))
    ));
}
