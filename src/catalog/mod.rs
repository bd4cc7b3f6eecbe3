//! # Catalog Core
//!
//! In-memory catalog state for one database: the value-typed registry rows
//! for every entity kind, the multi-index registries holding them, the LRU
//! object cache in front of the registries, and the snapshot persistence
//! that keeps the registries coherent with the `system_objects` file.
//!
//! ## Id space partition
//!
//! Every registry's id space is split at [`FIRST_USER_OBJECT_ID`]: ids below
//! the threshold belong to engine-managed objects, ids at or above it to
//! user-created ones. System TRID sequences start at 1; user TRID sequences
//! start at the threshold. The partition is what lets content-deduplicated
//! constraint definitions keep system and user rows apart even when their
//! expressions collide byte-for-byte.
//!
//! ## Object names
//!
//! Database, table, column, constraint and index names all share one
//! grammar: an ASCII letter or underscore followed by ASCII letters, digits
//! and underscores, at most [`MAX_OBJECT_NAME_LENGTH`] bytes. Names are
//! case-sensitive.

pub mod cache;
pub mod persistence;
pub mod records;
pub mod registry;
pub mod system_tables;

pub use cache::ObjectCache;
pub use records::{
    ColumnDataType, ColumnDefinitionConstraintRecord, ColumnDefinitionRecord, ColumnRecord,
    ColumnSetColumnRecord, ColumnSetRecord, ConstraintDefinitionRecord, ConstraintRecord,
    ConstraintType, IndexColumnRecord, IndexRecord, IndexType, TableRecord, TableType,
};
pub use registry::{
    CatalogRegistries, ColumnDefinitionRegistry, ColumnRegistry, ColumnSetRegistry,
    ConstraintDefinitionRegistry, ConstraintRegistry, IndexRegistry, TableRegistry,
};

/// First id available to user-created objects; everything below is reserved
/// for engine-managed rows. Applies uniformly to every entity kind.
pub const FIRST_USER_OBJECT_ID: u64 = 0x1000;

/// Maximum length of a database object name in bytes.
pub const MAX_OBJECT_NAME_LENGTH: usize = 255;

/// Whether `id` falls in the engine-managed partition.
pub fn is_system_object_id(id: u64) -> bool {
    id < FIRST_USER_OBJECT_ID
}

/// Validates a database object name against the shared grammar.
pub fn is_valid_object_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_OBJECT_NAME_LENGTH {
        return false;
    }
    let bytes = name.as_bytes();
    if !(bytes[0].is_ascii_alphabetic() || bytes[0] == b'_') {
        return false;
    }
    bytes[1..]
        .iter()
        .all(|&c| c.is_ascii_alphanumeric() || c == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_object_names() {
        assert!(is_valid_object_name("a"));
        assert!(is_valid_object_name("_hidden"));
        assert!(is_valid_object_name("SYS_TABLES"));
        assert!(is_valid_object_name("order_2024"));
    }

    #[test]
    fn test_invalid_object_names() {
        assert!(!is_valid_object_name(""));
        assert!(!is_valid_object_name("1abc"));
        assert!(!is_valid_object_name("has space"));
        assert!(!is_valid_object_name("tab-le"));
        assert!(!is_valid_object_name("naïve"));
        assert!(!is_valid_object_name(&"x".repeat(MAX_OBJECT_NAME_LENGTH + 1)));
    }

    #[test]
    fn test_id_partition() {
        assert!(is_system_object_id(1));
        assert!(is_system_object_id(FIRST_USER_OBJECT_ID - 1));
        assert!(!is_system_object_id(FIRST_USER_OBJECT_ID));
    }
}
