//! # Expression Layer
//!
//! The catalog consumes expressions through a deliberately narrow surface:
//! an expression knows its serialized size, can serialize itself into a
//! buffer, can be deserialized from bytes, and can be cloned. The catalog
//! treats the byte form as opaque — constraint-definition deduplication
//! compares serialized expressions byte-for-byte and never inspects their
//! structure.
//!
//! ## Wire format
//!
//! ```text
//! expression := kind_tag literal
//! literal    := type_tag payload
//! ```
//!
//! Integers are varint-encoded, doubles are the IEEE-754 bit pattern as a
//! fixed-width little-endian u64, strings and binaries are length-prefixed.
//! The format has no framing beyond this; the caller supplies exact slices.
//!
//! Only constant expressions exist in this layer. Operators live in the SQL
//! front-end, which hands the catalog pre-evaluated constants (a DEFAULT
//! clause stores the defaulted value, a NOT NULL clause stores the boolean).

use crate::encoding::{decode_bytes, decode_string, decode_varint, encode_bytes, encode_varint, varint_len};
use crate::error::{DbError, DbResult};

const KIND_CONSTANT: u8 = 1;

const TYPE_NULL: u8 = 0;
const TYPE_BOOL_FALSE: u8 = 1;
const TYPE_BOOL_TRUE: u8 = 2;
const TYPE_INT: u8 = 3;
const TYPE_UINT: u8 = 4;
const TYPE_DOUBLE: u8 = 5;
const TYPE_STRING: u8 = 6;
const TYPE_BINARY: u8 = 7;

/// A constant value carried by an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Double(f64),
    String(String),
    Binary(Vec<u8>),
}

impl Literal {
    pub fn is_null(&self) -> bool {
        matches!(self, Literal::Null)
    }

    fn serialized_size(&self) -> usize {
        match self {
            Literal::Null | Literal::Bool(_) => 1,
            Literal::Int(v) => 1 + varint_len(zigzag(*v)),
            Literal::UInt(v) => 1 + varint_len(*v),
            Literal::Double(_) => 1 + 8,
            Literal::String(s) => 1 + varint_len(s.len() as u64) + s.len(),
            Literal::Binary(b) => 1 + varint_len(b.len() as u64) + b.len(),
        }
    }

    fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            Literal::Null => buf.push(TYPE_NULL),
            Literal::Bool(false) => buf.push(TYPE_BOOL_FALSE),
            Literal::Bool(true) => buf.push(TYPE_BOOL_TRUE),
            Literal::Int(v) => {
                buf.push(TYPE_INT);
                encode_varint(zigzag(*v), buf);
            }
            Literal::UInt(v) => {
                buf.push(TYPE_UINT);
                encode_varint(*v, buf);
            }
            Literal::Double(v) => {
                buf.push(TYPE_DOUBLE);
                buf.extend_from_slice(&v.to_bits().to_le_bytes());
            }
            Literal::String(s) => {
                buf.push(TYPE_STRING);
                encode_bytes(s.as_bytes(), buf);
            }
            Literal::Binary(b) => {
                buf.push(TYPE_BINARY);
                encode_bytes(b, buf);
            }
        }
    }

    fn deserialize(buf: &[u8]) -> DbResult<(Literal, usize)> {
        let (&tag, rest) = buf
            .split_first()
            .ok_or_else(|| DbError::CorruptedCatalog("empty literal".into()))?;
        match tag {
            TYPE_NULL => Ok((Literal::Null, 1)),
            TYPE_BOOL_FALSE => Ok((Literal::Bool(false), 1)),
            TYPE_BOOL_TRUE => Ok((Literal::Bool(true), 1)),
            TYPE_INT => {
                let (raw, n) = decode_varint(rest)?;
                Ok((Literal::Int(unzigzag(raw)), 1 + n))
            }
            TYPE_UINT => {
                let (raw, n) = decode_varint(rest)?;
                Ok((Literal::UInt(raw), 1 + n))
            }
            TYPE_DOUBLE => {
                let bytes: [u8; 8] = rest
                    .get(..8)
                    .and_then(|s| s.try_into().ok())
                    .ok_or_else(|| DbError::CorruptedCatalog("truncated double".into()))?;
                Ok((Literal::Double(f64::from_bits(u64::from_le_bytes(bytes))), 9))
            }
            TYPE_STRING => {
                let (text, n) = decode_string(rest)?;
                Ok((Literal::String(text), 1 + n))
            }
            TYPE_BINARY => {
                let (bytes, n) = decode_bytes(rest)?;
                Ok((Literal::Binary(bytes.to_vec()), 1 + n))
            }
            other => Err(DbError::CorruptedCatalog(format!(
                "unknown literal type tag {other}"
            ))),
        }
    }
}

fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn unzigzag(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

/// A serializable expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Constant(Literal),
}

impl Expression {
    pub fn constant(value: Literal) -> Expression {
        Expression::Constant(value)
    }

    /// Exact number of bytes [`Expression::serialize_into`] will write.
    pub fn serialized_size(&self) -> usize {
        match self {
            Expression::Constant(lit) => 1 + lit.serialized_size(),
        }
    }

    /// Serializes the expression; infallible given the buffer grows.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            Expression::Constant(lit) => {
                buf.push(KIND_CONSTANT);
                lit.serialize_into(buf);
            }
        }
    }

    /// Convenience form of [`Expression::serialize_into`].
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.serialized_size());
        self.serialize_into(&mut buf);
        buf
    }

    /// Deserializes an expression occupying the entire input slice.
    pub fn deserialize(buf: &[u8]) -> DbResult<Expression> {
        let (&tag, rest) = buf
            .split_first()
            .ok_or_else(|| DbError::CorruptedCatalog("empty expression".into()))?;
        if tag != KIND_CONSTANT {
            return Err(DbError::CorruptedCatalog(format!(
                "unknown expression kind tag {tag}"
            )));
        }
        let (literal, consumed) = Literal::deserialize(rest)?;
        if 1 + consumed != buf.len() {
            return Err(DbError::CorruptedCatalog(
                "trailing bytes after expression".into(),
            ));
        }
        Ok(Expression::Constant(literal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(expr: Expression) {
        let bytes = expr.serialize();
        assert_eq!(bytes.len(), expr.serialized_size());
        let back = Expression::deserialize(&bytes).unwrap();
        assert_eq!(back, expr);
    }

    #[test]
    fn test_constant_round_trips() {
        round_trip(Expression::constant(Literal::Null));
        round_trip(Expression::constant(Literal::Bool(true)));
        round_trip(Expression::constant(Literal::Bool(false)));
        round_trip(Expression::constant(Literal::Int(-42)));
        round_trip(Expression::constant(Literal::Int(i64::MIN)));
        round_trip(Expression::constant(Literal::UInt(u64::MAX)));
        round_trip(Expression::constant(Literal::Double(0.5)));
        round_trip(Expression::constant(Literal::String("now()".into())));
        round_trip(Expression::constant(Literal::Binary(vec![0, 1, 2, 255])));
    }

    #[test]
    fn test_equal_values_serialize_identically() {
        let a = Expression::constant(Literal::Int(0)).serialize();
        let b = Expression::constant(Literal::Int(0)).serialize();
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_types_serialize_differently() {
        let int = Expression::constant(Literal::Int(0)).serialize();
        let uint = Expression::constant(Literal::UInt(0)).serialize();
        assert_ne!(int, uint);
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = Expression::constant(Literal::Null).serialize();
        bytes.push(0);
        assert!(Expression::deserialize(&bytes).is_err());
    }

    #[test]
    fn test_zigzag_preserves_ordering_of_magnitude() {
        assert_eq!(unzigzag(zigzag(0)), 0);
        assert_eq!(unzigzag(zigzag(-1)), -1);
        assert_eq!(unzigzag(zigzag(i64::MAX)), i64::MAX);
        assert_eq!(unzigzag(zigzag(i64::MIN)), i64::MIN);
    }
}
