//! # File Layer
//!
//! The file handles the database's file factory produces. A [`DbFile`] is
//! either a direct wrapper over the OS file or an encrypted file whose
//! ciphertext blocks are translated transparently on every read and write.
//! Callers receive a `DbFile` and never branch on cipher presence.

mod encrypted;
mod file;

pub use encrypted::EncryptedFile;
pub use file::{DbFile, PlainFile, DATA_FILE_CREATE_MODE};
