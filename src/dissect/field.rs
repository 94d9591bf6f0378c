//! Field value types for decoded units.
//!
//! Values are zero-copy where possible: `Str` and `Bytes` reference the
//! captured unit directly, while `OwnedString`/`OwnedBytes` are used when a
//! value must be constructed (summaries, reassembled payloads). The
//! lifetime parameter `'data` ties borrowed variants to the unit buffer.

use compact_str::CompactString;

/// Possible field value types.
#[derive(Debug, Clone)]
pub enum FieldValue<'data> {
    /// Unsigned 8-bit integer
    UInt8(u8),
    /// Unsigned 16-bit integer
    UInt16(u16),
    /// Unsigned 32-bit integer
    UInt32(u32),
    /// Unsigned 64-bit integer
    UInt64(u64),
    /// Boolean value
    Bool(bool),

    /// Zero-copy string reference into the unit.
    Str(&'data str),
    /// Zero-copy byte slice reference into the unit.
    Bytes(&'data [u8]),

    /// Owned string for constructed values.
    /// Uses CompactString for small-string optimization.
    OwnedString(CompactString),
    /// Owned bytes for constructed/reassembled data.
    OwnedBytes(Vec<u8>),

    /// List of values (for multi-valued fields like sub-document specs).
    /// All elements should be of the same type.
    List(Vec<FieldValue<'data>>),

    /// Null/missing value
    Null,
}

/// Type alias for FieldValue that owns all its data.
pub type OwnedFieldValue = FieldValue<'static>;

impl<'data> FieldValue<'data> {
    /// Check if this is a null value.
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Try to get as u64.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            FieldValue::UInt8(v) => Some(u64::from(*v)),
            FieldValue::UInt16(v) => Some(u64::from(*v)),
            FieldValue::UInt32(v) => Some(u64::from(*v)),
            FieldValue::UInt64(v) => Some(*v),
            _ => None,
        }
    }

    /// Try to get as str reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            FieldValue::OwnedString(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Try to get as bytes reference.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            FieldValue::Bytes(b) => Some(b),
            FieldValue::OwnedBytes(b) => Some(b.as_slice()),
            _ => None,
        }
    }

    /// Try to get as list reference.
    pub fn as_list(&self) -> Option<&[FieldValue<'data>]> {
        match self {
            FieldValue::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    /// Convert to an owned version.
    /// Copies borrowed data into owned variants.
    pub fn to_owned(&self) -> FieldValue<'static> {
        match self {
            FieldValue::UInt8(v) => FieldValue::UInt8(*v),
            FieldValue::UInt16(v) => FieldValue::UInt16(*v),
            FieldValue::UInt32(v) => FieldValue::UInt32(*v),
            FieldValue::UInt64(v) => FieldValue::UInt64(*v),
            FieldValue::Bool(v) => FieldValue::Bool(*v),
            FieldValue::Str(s) => FieldValue::OwnedString(CompactString::new(s)),
            FieldValue::Bytes(b) => FieldValue::OwnedBytes(b.to_vec()),
            FieldValue::OwnedString(s) => FieldValue::OwnedString(s.clone()),
            FieldValue::OwnedBytes(b) => FieldValue::OwnedBytes(b.clone()),
            FieldValue::List(items) => {
                FieldValue::List(items.iter().map(|v| v.to_owned()).collect())
            }
            FieldValue::Null => FieldValue::Null,
        }
    }
}

impl std::fmt::Display for FieldValue<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::UInt8(v) => write!(f, "{v}"),
            FieldValue::UInt16(v) => write!(f, "{v}"),
            FieldValue::UInt32(v) => write!(f, "{v}"),
            FieldValue::UInt64(v) => write!(f, "{v}"),
            FieldValue::Bool(v) => write!(f, "{v}"),
            FieldValue::Str(s) => write!(f, "{s}"),
            FieldValue::OwnedString(s) => write!(f, "{s}"),
            FieldValue::Bytes(b) => write!(f, "[{} bytes]", b.len()),
            FieldValue::OwnedBytes(b) => write!(f, "[{} bytes]", b.len()),
            FieldValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            FieldValue::Null => write!(f, "NULL"),
        }
    }
}

// Implement PartialEq manually to handle borrowed vs owned comparison
impl<'b> PartialEq<FieldValue<'b>> for FieldValue<'_> {
    fn eq(&self, other: &FieldValue<'b>) -> bool {
        match (self, other) {
            (FieldValue::UInt8(a), FieldValue::UInt8(b)) => a == b,
            (FieldValue::UInt16(a), FieldValue::UInt16(b)) => a == b,
            (FieldValue::UInt32(a), FieldValue::UInt32(b)) => a == b,
            (FieldValue::UInt64(a), FieldValue::UInt64(b)) => a == b,
            (FieldValue::Bool(a), FieldValue::Bool(b)) => a == b,
            (FieldValue::Str(a), FieldValue::Str(b)) => a == b,
            (FieldValue::Str(a), FieldValue::OwnedString(b)) => *a == b.as_str(),
            (FieldValue::OwnedString(a), FieldValue::Str(b)) => a.as_str() == *b,
            (FieldValue::OwnedString(a), FieldValue::OwnedString(b)) => a == b,
            (FieldValue::Bytes(a), FieldValue::Bytes(b)) => a == b,
            (FieldValue::Bytes(a), FieldValue::OwnedBytes(b)) => *a == b.as_slice(),
            (FieldValue::OwnedBytes(a), FieldValue::Bytes(b)) => a.as_slice() == *b,
            (FieldValue::OwnedBytes(a), FieldValue::OwnedBytes(b)) => a == b,
            (FieldValue::List(a), FieldValue::List(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x == y)
            }
            (FieldValue::Null, FieldValue::Null) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_copy_bytes() {
        let unit = [0x10u8, 0x14, 0xde, 0xad, 0xbe, 0xef];
        let payload = &unit[2..];
        let value = FieldValue::Bytes(payload);

        match value {
            FieldValue::Bytes(b) => {
                assert_eq!(b, &[0xde, 0xad, 0xbe, 0xef]);
                assert!(std::ptr::eq(b.as_ptr(), unit[2..].as_ptr()));
            }
            _ => panic!("Expected Bytes variant"),
        }
    }

    #[test]
    fn test_cross_equality() {
        let borrowed = FieldValue::Str("stats");
        let owned = FieldValue::OwnedString(CompactString::new("stats"));
        assert_eq!(borrowed, owned);
        assert_eq!(owned, borrowed);

        let b = FieldValue::Bytes(&[1, 2, 3]);
        let ob = FieldValue::OwnedBytes(vec![1, 2, 3]);
        assert_eq!(b, ob);
    }

    #[test]
    fn test_to_owned() {
        let unit = b"path.to.field";
        let borrowed = FieldValue::Str(std::str::from_utf8(unit).unwrap());
        let owned = borrowed.to_owned();

        assert_eq!(borrowed, owned);
        assert!(matches!(owned, FieldValue::OwnedString(_)));
    }

    #[test]
    fn test_as_u64() {
        assert_eq!(FieldValue::UInt8(3).as_u64(), Some(3));
        assert_eq!(FieldValue::UInt64(u64::MAX).as_u64(), Some(u64::MAX));
        assert_eq!(FieldValue::Str("3").as_u64(), None);
    }

    #[test]
    fn test_list_display() {
        let list = FieldValue::List(vec![FieldValue::UInt16(10), FieldValue::UInt16(20)]);
        assert_eq!(format!("{list}"), "[10, 20]");
    }
}
