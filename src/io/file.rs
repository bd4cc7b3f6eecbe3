//! # Plain Files and the Factory Output Type
//!
//! [`PlainFile`] is a thin positional-I/O wrapper over `std::fs::File`.
//! [`DbFile`] is what the database's file factory hands out: plain or
//! encrypted, with one shared surface — `read_at`, `write_at`, `len`,
//! `sync`. OS errors pass through untranslated so the errno survives.
//!
//! Files are opened close-on-exec. Every handle is scoped: dropping a
//! `DbFile` closes the descriptor on every exit path, including errors.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::Path;
use std::sync::Arc;

use crate::crypto::CipherContext;
use crate::error::DbResult;
use crate::io::EncryptedFile;

/// Mode bits for newly created data files.
pub const DATA_FILE_CREATE_MODE: u32 = 0o660;

#[derive(Debug)]
pub struct PlainFile {
    file: File,
}

impl PlainFile {
    pub fn create(path: &Path, extra_flags: i32, create_mode: u32, initial_size: u64) -> DbResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .mode(create_mode)
            .custom_flags(extra_flags | libc::O_CLOEXEC)
            .open(path)?;
        if initial_size > 0 {
            file.set_len(initial_size)?;
        }
        Ok(Self { file })
    }

    pub fn open(path: &Path, extra_flags: i32) -> DbResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(extra_flags | libc::O_CLOEXEC)
            .open(path)?;
        Ok(Self { file })
    }

    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> DbResult<()> {
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    pub fn write_at(&self, offset: u64, data: &[u8]) -> DbResult<()> {
        self.file.write_all_at(data, offset)?;
        Ok(())
    }

    pub fn len(&self) -> DbResult<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn sync(&self) -> DbResult<()> {
        self.file.sync_data()?;
        Ok(())
    }
}

/// A file handle produced by the database's file factory.
pub enum DbFile {
    Plain(PlainFile),
    Encrypted(EncryptedFile),
}

impl DbFile {
    /// Creates a file, plain or encrypted depending on whether cipher
    /// contexts are supplied.
    pub fn create(
        path: &Path,
        extra_flags: i32,
        create_mode: u32,
        initial_size: u64,
        contexts: Option<(Arc<dyn CipherContext>, Arc<dyn CipherContext>)>,
    ) -> DbResult<DbFile> {
        match contexts {
            None => Ok(DbFile::Plain(PlainFile::create(
                path,
                extra_flags,
                create_mode,
                initial_size,
            )?)),
            Some((enc, dec)) => Ok(DbFile::Encrypted(EncryptedFile::create(
                path,
                extra_flags,
                create_mode,
                initial_size,
                enc,
                dec,
            )?)),
        }
    }

    pub fn open(
        path: &Path,
        extra_flags: i32,
        contexts: Option<(Arc<dyn CipherContext>, Arc<dyn CipherContext>)>,
    ) -> DbResult<DbFile> {
        match contexts {
            None => Ok(DbFile::Plain(PlainFile::open(path, extra_flags)?)),
            Some((enc, dec)) => Ok(DbFile::Encrypted(EncryptedFile::open(
                path,
                extra_flags,
                enc,
                dec,
            )?)),
        }
    }

    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> DbResult<()> {
        match self {
            DbFile::Plain(file) => file.read_at(offset, buf),
            DbFile::Encrypted(file) => file.read_at(offset, buf),
        }
    }

    pub fn write_at(&self, offset: u64, data: &[u8]) -> DbResult<()> {
        match self {
            DbFile::Plain(file) => file.write_at(offset, data),
            DbFile::Encrypted(file) => file.write_at(offset, data),
        }
    }

    /// On-disk length. For encrypted files this is the ciphertext length,
    /// which includes block padding past the logical payload.
    pub fn len(&self) -> DbResult<u64> {
        match self {
            DbFile::Plain(file) => file.len(),
            DbFile::Encrypted(file) => file.len(),
        }
    }

    pub fn is_empty(&self) -> DbResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn sync(&self) -> DbResult<()> {
        match self {
            DbFile::Plain(file) => file.sync(),
            DbFile::Encrypted(file) => file.sync(),
        }
    }

    /// Reads the whole file into memory.
    pub fn read_all(&self) -> DbResult<Vec<u8>> {
        let len = self.len()? as usize;
        let mut buf = vec![0u8; len];
        if len > 0 {
            self.read_at(0, &mut buf)?;
        }
        Ok(buf)
    }
}
