//! # Encrypted Files
//!
//! A file whose on-disk bytes are ciphertext, translated block-by-block on
//! every transfer. The translation is transparent: callers use the same
//! positional read/write surface as a plain file and never see ciphertext.
//!
//! ## Block alignment
//!
//! Offsets must land on a cipher-block boundary; lengths are rounded up to
//! whole blocks internally. A write whose tail does not fill a block pads
//! the final block with zeros before encrypting, so the ciphertext length
//! is always a block multiple. Readers that need the exact logical length
//! store it themselves (the catalog snapshot keeps it in its header).
//!
//! Reading back the padded tail is legal; reading past the ciphertext end
//! is an OS-level unexpected-EOF error, exactly as with a plain file.

use std::io;
use std::path::Path;
use std::sync::Arc;

use crate::crypto::{CipherContext, BLOCK_SIZE};
use crate::error::DbResult;
use crate::io::file::PlainFile;

pub struct EncryptedFile {
    file: PlainFile,
    encryption: Arc<dyn CipherContext>,
    decryption: Arc<dyn CipherContext>,
}

impl EncryptedFile {
    pub fn create(
        path: &Path,
        extra_flags: i32,
        create_mode: u32,
        initial_size: u64,
        encryption: Arc<dyn CipherContext>,
        decryption: Arc<dyn CipherContext>,
    ) -> DbResult<Self> {
        let initial_size = round_up(initial_size);
        let file = PlainFile::create(path, extra_flags, create_mode, initial_size)?;
        Ok(Self {
            file,
            encryption,
            decryption,
        })
    }

    pub fn open(
        path: &Path,
        extra_flags: i32,
        encryption: Arc<dyn CipherContext>,
        decryption: Arc<dyn CipherContext>,
    ) -> DbResult<Self> {
        let file = PlainFile::open(path, extra_flags)?;
        Ok(Self {
            file,
            encryption,
            decryption,
        })
    }

    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> DbResult<()> {
        check_alignment(offset)?;
        if buf.is_empty() {
            return Ok(());
        }
        let padded = round_up(buf.len() as u64) as usize;
        let mut ciphertext = vec![0u8; padded];
        self.file.read_at(offset, &mut ciphertext)?;
        for chunk in ciphertext.chunks_exact_mut(BLOCK_SIZE) {
            let block: &mut [u8; BLOCK_SIZE] = chunk.try_into().expect("exact chunk");
            self.decryption.transform_block(block);
        }
        buf.copy_from_slice(&ciphertext[..buf.len()]);
        Ok(())
    }

    pub fn write_at(&self, offset: u64, data: &[u8]) -> DbResult<()> {
        check_alignment(offset)?;
        if data.is_empty() {
            return Ok(());
        }
        let padded = round_up(data.len() as u64) as usize;
        let mut ciphertext = vec![0u8; padded];
        ciphertext[..data.len()].copy_from_slice(data);
        for chunk in ciphertext.chunks_exact_mut(BLOCK_SIZE) {
            let block: &mut [u8; BLOCK_SIZE] = chunk.try_into().expect("exact chunk");
            self.encryption.transform_block(block);
        }
        self.file.write_at(offset, &ciphertext)?;
        Ok(())
    }

    pub fn len(&self) -> DbResult<u64> {
        self.file.len()
    }

    pub fn sync(&self) -> DbResult<()> {
        self.file.sync()
    }
}

fn round_up(len: u64) -> u64 {
    len.div_ceil(BLOCK_SIZE as u64) * BLOCK_SIZE as u64
}

fn check_alignment(offset: u64) -> DbResult<()> {
    if offset % BLOCK_SIZE as u64 != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("offset {offset} is not aligned to the cipher block size"),
        )
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::get_cipher;
    use crate::io::file::DATA_FILE_CREATE_MODE;
    use tempfile::tempdir;

    fn contexts() -> (Arc<dyn CipherContext>, Arc<dyn CipherContext>) {
        let cipher = get_cipher("aes128").unwrap().unwrap();
        let key = [3u8; 16];
        (
            cipher.create_encryption_context(&key).unwrap(),
            cipher.create_decryption_context(&key).unwrap(),
        )
    }

    #[test]
    fn test_write_read_round_trip_with_partial_block() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("enc");
        let (enc, dec) = contexts();
        let file = EncryptedFile::create(&path, 0, DATA_FILE_CREATE_MODE, 0, enc, dec).unwrap();

        let data = b"twenty-one byte paylo";
        assert_eq!(data.len(), 21);
        file.write_at(0, data).unwrap();

        let mut back = [0u8; 21];
        file.read_at(0, &mut back).unwrap();
        assert_eq!(&back, data);

        // Ciphertext length is rounded to whole blocks.
        assert_eq!(file.len().unwrap(), 32);
    }

    #[test]
    fn test_on_disk_bytes_are_not_plaintext() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("enc");
        let (enc, dec) = contexts();
        let file = EncryptedFile::create(&path, 0, DATA_FILE_CREATE_MODE, 0, enc, dec).unwrap();
        file.write_at(0, b"secret catalog bytes here!").unwrap();
        drop(file);

        let raw = std::fs::read(&path).unwrap();
        assert!(!raw.windows(6).any(|w| w == b"secret"));
    }

    #[test]
    fn test_reopen_with_same_key_reads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("enc");
        {
            let (enc, dec) = contexts();
            let file =
                EncryptedFile::create(&path, 0, DATA_FILE_CREATE_MODE, 0, enc, dec).unwrap();
            file.write_at(0, b"persistent").unwrap();
        }
        let (enc, dec) = contexts();
        let file = EncryptedFile::open(&path, 0, enc, dec).unwrap();
        let mut back = [0u8; 10];
        file.read_at(0, &mut back).unwrap();
        assert_eq!(&back, b"persistent");
    }

    #[test]
    fn test_unaligned_offset_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("enc");
        let (enc, dec) = contexts();
        let file = EncryptedFile::create(&path, 0, DATA_FILE_CREATE_MODE, 0, enc, dec).unwrap();
        assert!(file.write_at(7, b"x").is_err());
        let mut buf = [0u8; 1];
        assert!(file.read_at(3, &mut buf).is_err());
    }
}
