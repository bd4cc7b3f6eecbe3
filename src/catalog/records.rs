//! # Registry Records
//!
//! Value-typed snapshots of catalog entities. Records are what registries
//! store and what `get_*_record` accessors return; runtime objects (tables,
//! columns, constraints) are materialized from records on cache misses and
//! converted back into records when registered.
//!
//! Record identity is the `id` field. A record's other indexed fields
//! (name, content hash, composite column key) may change across a
//! `replace`, but the id never does.

use smallvec::SmallVec;
use xxhash_rust::xxh3::xxh3_64_with_seed;

/// Seed for the constraint-definition content hash. Fixed forever: hashes
/// are persisted in the catalog snapshot.
const CONTENT_HASH_SEED: u64 = 0x6d65_7269_6462_0001;

/// Storage engine backing a table. Only disk-backed tables exist in v1;
/// the other value is recognized so requests for it fail cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TableType {
    Disk = 0,
    Memory = 1,
}

impl TableType {
    pub fn from_u32(raw: u32) -> Option<TableType> {
        match raw {
            0 => Some(TableType::Disk),
            1 => Some(TableType::Memory),
            _ => None,
        }
    }
}

/// Column value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ColumnDataType {
    Bool = 0,
    Int8 = 1,
    Int16 = 2,
    Int32 = 3,
    Int64 = 4,
    UInt8 = 5,
    UInt16 = 6,
    UInt32 = 7,
    UInt64 = 8,
    Float = 9,
    Double = 10,
    Text = 11,
    Binary = 12,
    Timestamp = 13,
}

impl ColumnDataType {
    pub fn from_u32(raw: u32) -> Option<ColumnDataType> {
        use ColumnDataType::*;
        Some(match raw {
            0 => Bool,
            1 => Int8,
            2 => Int16,
            3 => Int32,
            4 => Int64,
            5 => UInt8,
            6 => UInt16,
            7 => UInt32,
            8 => UInt64,
            9 => Float,
            10 => Double,
            11 => Text,
            12 => Binary,
            13 => Timestamp,
            _ => return None,
        })
    }
}

/// Kind of a constraint definition. NotNull and DefaultValue are the
/// implemented set; the rest are recognized on the wire so that a catalog
/// written by a newer engine fails with "not supported" instead of
/// "corrupted".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ConstraintType {
    NotNull = 1,
    DefaultValue = 2,
    Unique = 3,
    Check = 4,
}

impl ConstraintType {
    pub fn from_u32(raw: u32) -> Option<ConstraintType> {
        match raw {
            1 => Some(ConstraintType::NotNull),
            2 => Some(ConstraintType::DefaultValue),
            3 => Some(ConstraintType::Unique),
            4 => Some(ConstraintType::Check),
            _ => None,
        }
    }

    /// Short token used in auto-generated constraint names.
    pub fn name_token(self) -> &'static str {
        match self {
            ConstraintType::NotNull => "NN",
            ConstraintType::DefaultValue => "DEF",
            ConstraintType::Unique => "UQ",
            ConstraintType::Check => "CK",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum IndexType {
    BTree = 0,
}

impl IndexType {
    pub fn from_u32(raw: u32) -> Option<IndexType> {
        match raw {
            0 => Some(IndexType::BTree),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableRecord {
    pub id: u32,
    pub name: String,
    pub table_type: TableType,
    pub first_user_trid: u64,
    pub current_column_set_id: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRecord {
    pub id: u64,
    pub name: String,
    pub data_type: ColumnDataType,
    pub table_id: u32,
    pub current_column_definition_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSetColumnRecord {
    pub id: u64,
    pub column_id: u64,
    pub column_definition_id: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSetRecord {
    pub id: u64,
    pub table_id: u32,
    pub columns: SmallVec<[ColumnSetColumnRecord; 8]>,
}

/// Link row binding a column-definition version to one of its constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDefinitionConstraintRecord {
    pub id: u64,
    pub constraint_id: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinitionRecord {
    pub id: u64,
    pub column_id: u64,
    pub column_set_id: u64,
    /// Constraint link rows, in creation order.
    pub constraints: SmallVec<[ColumnDefinitionConstraintRecord; 2]>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintRecord {
    pub id: u64,
    pub name: String,
    pub table_id: u32,
    /// Bound column; table-level constraints carry no column.
    pub column_id: Option<u64>,
    pub constraint_definition_id: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintDefinitionRecord {
    pub id: u64,
    pub constraint_type: ConstraintType,
    /// Serialized constraint expression; opaque except for equality.
    pub expression: Vec<u8>,
    pub hash: u64,
}

impl ConstraintDefinitionRecord {
    pub fn new(id: u64, constraint_type: ConstraintType, expression: Vec<u8>) -> Self {
        let hash = Self::compute_hash(constraint_type, &expression);
        Self {
            id,
            constraint_type,
            expression,
            hash,
        }
    }

    /// Content hash over (kind, serialized expression). Two rows may share
    /// a hash; only byte equality of the expression plus kind equality
    /// identifies a duplicate.
    pub fn compute_hash(constraint_type: ConstraintType, expression: &[u8]) -> u64 {
        let mut head = [0u8; 8];
        head[..4].copy_from_slice(&(constraint_type as u32).to_le_bytes());
        head[4..].copy_from_slice(&(expression.len() as u32).to_le_bytes());
        let seeded = xxh3_64_with_seed(&head, CONTENT_HASH_SEED);
        if expression.is_empty() {
            seeded
        } else {
            xxh3_64_with_seed(expression, seeded)
        }
    }

    /// Kind and byte-for-byte expression equality; ignores id and hash.
    pub fn is_equal_definition(&self, other: &ConstraintDefinitionRecord) -> bool {
        self.constraint_type == other.constraint_type && self.expression == other.expression
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexColumnRecord {
    pub id: u64,
    pub column_definition_id: u64,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexRecord {
    pub id: u64,
    pub name: String,
    pub index_type: IndexType,
    pub table_id: u32,
    pub columns: SmallVec<[IndexColumnRecord; 4]>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_depends_on_kind() {
        let expr = vec![1, 2, 3];
        let a = ConstraintDefinitionRecord::compute_hash(ConstraintType::NotNull, &expr);
        let b = ConstraintDefinitionRecord::compute_hash(ConstraintType::DefaultValue, &expr);
        assert_ne!(a, b);
    }

    #[test]
    fn test_content_hash_depends_on_expression() {
        let a = ConstraintDefinitionRecord::compute_hash(ConstraintType::NotNull, &[1]);
        let b = ConstraintDefinitionRecord::compute_hash(ConstraintType::NotNull, &[2]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_content_hash_stable_for_empty_expression() {
        let a = ConstraintDefinitionRecord::compute_hash(ConstraintType::NotNull, &[]);
        let b = ConstraintDefinitionRecord::compute_hash(ConstraintType::NotNull, &[]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_equal_definition_ignores_id() {
        let a = ConstraintDefinitionRecord::new(1, ConstraintType::NotNull, vec![9]);
        let b = ConstraintDefinitionRecord::new(2, ConstraintType::NotNull, vec![9]);
        assert!(a.is_equal_definition(&b));
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn test_enum_round_trips() {
        assert_eq!(TableType::from_u32(0), Some(TableType::Disk));
        assert_eq!(TableType::from_u32(7), None);
        assert_eq!(
            ConstraintType::from_u32(ConstraintType::DefaultValue as u32),
            Some(ConstraintType::DefaultValue)
        );
        assert_eq!(ColumnDataType::from_u32(3), Some(ColumnDataType::Int32));
        assert_eq!(ColumnDataType::from_u32(99), None);
    }
}
