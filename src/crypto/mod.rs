//! # Database Ciphers
//!
//! Block ciphers behind the file factory's transparent encryption. A
//! database either has no cipher (its files are plain) or a cipher id plus
//! key material resolved here into a pair of contexts — one encrypting, one
//! decrypting — that translate whole cipher blocks in place.
//!
//! The registry is static: `aes128` and `aes256` are built in, and the
//! reserved id `none` means "no encryption". Key lengths are validated when
//! a context is created, never later.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Aes256};
use std::sync::Arc;

use crate::error::{DbError, DbResult};

/// Cipher id meaning "store plaintext".
pub const NO_CIPHER_ID: &str = "none";

/// Cipher used when the configuration does not name one.
pub const DEFAULT_CIPHER_ID: &str = "aes128";

/// Width of a cipher block in bytes. Both built-in ciphers share it, and
/// the encrypted-file layer rounds every transfer to this boundary.
pub const BLOCK_SIZE: usize = 16;

/// A cipher algorithm: identity, key validation, context construction.
pub trait Cipher: Send + Sync {
    /// Identifier used in configuration files and database records.
    fn cipher_id(&self) -> &'static str;

    /// Required key length in bytes.
    fn key_size(&self) -> usize;

    fn create_encryption_context(&self, key: &[u8]) -> DbResult<Arc<dyn CipherContext>>;

    fn create_decryption_context(&self, key: &[u8]) -> DbResult<Arc<dyn CipherContext>>;

    /// Key length check shared by both context constructors.
    fn validate_key(&self, key: &[u8]) -> DbResult<()> {
        if key.len() == self.key_size() {
            Ok(())
        } else {
            Err(DbError::InvalidCipherKey(self.cipher_id().to_owned()))
        }
    }
}

/// A keyed transformation over exactly one [`BLOCK_SIZE`] block.
pub trait CipherContext: Send + Sync {
    fn transform_block(&self, block: &mut [u8; BLOCK_SIZE]);
}

/// Resolves a cipher id. `none` resolves to `None`; an id that is neither
/// built in nor `none` fails with `CipherUnknown`.
pub fn get_cipher(cipher_id: &str) -> DbResult<Option<Arc<dyn Cipher>>> {
    match cipher_id {
        NO_CIPHER_ID => Ok(None),
        "aes128" => Ok(Some(Arc::new(Aes128Cipher))),
        "aes256" => Ok(Some(Arc::new(Aes256Cipher))),
        other => Err(DbError::CipherUnknown(other.to_owned())),
    }
}

struct Aes128Cipher;

impl Cipher for Aes128Cipher {
    fn cipher_id(&self) -> &'static str {
        "aes128"
    }

    fn key_size(&self) -> usize {
        16
    }

    fn create_encryption_context(&self, key: &[u8]) -> DbResult<Arc<dyn CipherContext>> {
        self.validate_key(key)?;
        Ok(Arc::new(Aes128Encrypt(Aes128::new(
            GenericArray::from_slice(key),
        ))))
    }

    fn create_decryption_context(&self, key: &[u8]) -> DbResult<Arc<dyn CipherContext>> {
        self.validate_key(key)?;
        Ok(Arc::new(Aes128Decrypt(Aes128::new(
            GenericArray::from_slice(key),
        ))))
    }
}

struct Aes256Cipher;

impl Cipher for Aes256Cipher {
    fn cipher_id(&self) -> &'static str {
        "aes256"
    }

    fn key_size(&self) -> usize {
        32
    }

    fn create_encryption_context(&self, key: &[u8]) -> DbResult<Arc<dyn CipherContext>> {
        self.validate_key(key)?;
        Ok(Arc::new(Aes256Encrypt(Aes256::new(
            GenericArray::from_slice(key),
        ))))
    }

    fn create_decryption_context(&self, key: &[u8]) -> DbResult<Arc<dyn CipherContext>> {
        self.validate_key(key)?;
        Ok(Arc::new(Aes256Decrypt(Aes256::new(
            GenericArray::from_slice(key),
        ))))
    }
}

struct Aes128Encrypt(Aes128);

impl CipherContext for Aes128Encrypt {
    fn transform_block(&self, block: &mut [u8; BLOCK_SIZE]) {
        self.0.encrypt_block(GenericArray::from_mut_slice(block));
    }
}

struct Aes128Decrypt(Aes128);

impl CipherContext for Aes128Decrypt {
    fn transform_block(&self, block: &mut [u8; BLOCK_SIZE]) {
        self.0.decrypt_block(GenericArray::from_mut_slice(block));
    }
}

struct Aes256Encrypt(Aes256);

impl CipherContext for Aes256Encrypt {
    fn transform_block(&self, block: &mut [u8; BLOCK_SIZE]) {
        self.0.encrypt_block(GenericArray::from_mut_slice(block));
    }
}

struct Aes256Decrypt(Aes256);

impl CipherContext for Aes256Decrypt {
    fn transform_block(&self, block: &mut [u8; BLOCK_SIZE]) {
        self.0.decrypt_block(GenericArray::from_mut_slice(block));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_resolves_to_no_cipher() {
        assert!(get_cipher("none").unwrap().is_none());
    }

    #[test]
    fn test_unknown_cipher_id_fails() {
        assert!(matches!(
            get_cipher("rot13"),
            Err(DbError::CipherUnknown(_))
        ));
    }

    #[test]
    fn test_key_length_is_validated() {
        let cipher = get_cipher("aes128").unwrap().unwrap();
        assert!(cipher.create_encryption_context(&[0u8; 15]).is_err());
        assert!(cipher.create_encryption_context(&[0u8; 16]).is_ok());

        let cipher = get_cipher("aes256").unwrap().unwrap();
        assert!(cipher.create_decryption_context(&[0u8; 16]).is_err());
        assert!(cipher.create_decryption_context(&[0u8; 32]).is_ok());
    }

    #[test]
    fn test_encrypt_then_decrypt_restores_block() {
        let cipher = get_cipher("aes128").unwrap().unwrap();
        let key = [7u8; 16];
        let enc = cipher.create_encryption_context(&key).unwrap();
        let dec = cipher.create_decryption_context(&key).unwrap();

        let original = *b"catalog snapshot";
        let mut block = original;
        enc.transform_block(&mut block);
        assert_ne!(block, original);
        dec.transform_block(&mut block);
        assert_eq!(block, original);
    }
}
