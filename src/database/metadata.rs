//! # Database Metadata File
//!
//! A fixed-size record at `<dataDir>/db_<uuid>/metadata`, written once at
//! bootstrap and memory-mapped for the database's lifetime with the
//! mapping populated eagerly. It names the super-user that created the
//! database and carries the database-wide transaction id sequence.
//!
//! The record layout is fixed little-endian regardless of host byte order,
//! so a data directory can be moved between machines.

use memmap2::{MmapMut, MmapOptions};
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::io::Write;
use std::mem::size_of;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use zerocopy::little_endian::{U32, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Ref};

use crate::error::{DbError, DbResult};
use crate::io::DATA_FILE_CREATE_MODE;

const METADATA_VERSION: u32 = 1;

#[repr(C)]
#[derive(Debug, FromZeroes, FromBytes, AsBytes)]
struct DatabaseMetadata {
    version: U32,
    super_user_id: U32,
    last_transaction_id: U64,
    flags: U64,
}

const METADATA_SIZE: usize = size_of::<DatabaseMetadata>();

pub(crate) struct MetadataFile {
    database: String,
    mmap: Mutex<MmapMut>,
}

impl MetadataFile {
    /// Creates the metadata file with its initial record and maps it.
    pub(crate) fn create(path: &Path, database: &str, super_user_id: u32) -> DbResult<Self> {
        let io = |source| DbError::MetadataFileIoError {
            database: database.to_owned(),
            source,
        };

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .mode(DATA_FILE_CREATE_MODE)
            .custom_flags(libc::O_CLOEXEC)
            .open(path)
            .map_err(io)?;

        let mut initial = DatabaseMetadata::new_zeroed();
        initial.version = U32::new(METADATA_VERSION);
        initial.super_user_id = U32::new(super_user_id);
        file.write_all(initial.as_bytes()).map_err(io)?;
        file.flush().map_err(io)?;

        // SAFETY: the file was just created with exclusive write access and
        // sized to the full record; nothing else maps or rewrites it while
        // the database owns the data directory.
        let mmap = unsafe { MmapOptions::new().populate().map_mut(&file).map_err(io)? };

        Ok(Self {
            database: database.to_owned(),
            mmap: Mutex::new(mmap),
        })
    }

    /// Maps an existing metadata file.
    pub(crate) fn open(path: &Path, database: &str) -> DbResult<Self> {
        let io = |source| DbError::MetadataFileIoError {
            database: database.to_owned(),
            source,
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_CLOEXEC)
            .open(path)
            .map_err(io)?;

        let len = file.metadata().map_err(io)?.len();
        if (len as usize) < METADATA_SIZE {
            return Err(io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("metadata file is {len} bytes, expected at least {METADATA_SIZE}"),
            )));
        }

        // SAFETY: opened read-write by this process only; the data
        // directory is owned by a single database object guarded by the
        // instance lock file.
        let mmap = unsafe { MmapOptions::new().populate().map_mut(&file).map_err(io)? };

        let this = Self {
            database: database.to_owned(),
            mmap: Mutex::new(mmap),
        };
        let version = this.version();
        if version != METADATA_VERSION {
            return Err(DbError::MetadataFileIoError {
                database: database.to_owned(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("unsupported metadata version {version}"),
                ),
            });
        }
        Ok(this)
    }

    fn read<T>(&self, f: impl FnOnce(&DatabaseMetadata) -> T) -> T {
        let mmap = self.mmap.lock();
        let record = Ref::<_, DatabaseMetadata>::new_from_prefix(&mmap[..])
            .expect("metadata mapping shorter than the record") // INVARIANT: length checked at open
            .0
            .into_ref();
        f(record)
    }

    pub(crate) fn version(&self) -> u32 {
        self.read(|m| m.version.get())
    }

    pub(crate) fn super_user_id(&self) -> u32 {
        self.read(|m| m.super_user_id.get())
    }

    pub(crate) fn last_transaction_id(&self) -> u64 {
        self.read(|m| m.last_transaction_id.get())
    }

    /// Issues the next transaction id and persists it through the mapping.
    pub(crate) fn generate_next_transaction_id(&self) -> u64 {
        let mut mmap = self.mmap.lock();
        let record = Ref::<_, DatabaseMetadata>::new_from_prefix(&mut mmap[..])
            .expect("metadata mapping shorter than the record") // INVARIANT: length checked at open
            .0
            .into_mut();
        let next = record.last_transaction_id.get() + 1;
        record.last_transaction_id = U64::new(next);
        next
    }

    pub(crate) fn sync(&self) -> DbResult<()> {
        self.mmap
            .lock()
            .flush()
            .map_err(|source| DbError::MetadataFileIoError {
                database: self.database.clone(),
                source,
            })
    }
}

impl std::fmt::Debug for MetadataFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataFile")
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_then_reopen_preserves_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metadata");

        let meta = MetadataFile::create(&path, "shop", 1).unwrap();
        assert_eq!(meta.version(), METADATA_VERSION);
        assert_eq!(meta.super_user_id(), 1);
        assert_eq!(meta.last_transaction_id(), 0);
        assert_eq!(meta.generate_next_transaction_id(), 1);
        assert_eq!(meta.generate_next_transaction_id(), 2);
        meta.sync().unwrap();
        drop(meta);

        let meta = MetadataFile::open(&path, "shop").unwrap();
        assert_eq!(meta.super_user_id(), 1);
        assert_eq!(meta.last_transaction_id(), 2);
        assert_eq!(meta.generate_next_transaction_id(), 3);
    }

    #[test]
    fn test_open_missing_file_is_metadata_error() {
        let dir = tempdir().unwrap();
        let err = MetadataFile::open(&dir.path().join("absent"), "shop").unwrap_err();
        assert!(matches!(err, DbError::MetadataFileIoError { .. }));
    }

    #[test]
    fn test_open_truncated_file_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metadata");
        std::fs::write(&path, [0u8; 4]).unwrap();
        assert!(MetadataFile::open(&path, "shop").is_err());
    }
}
