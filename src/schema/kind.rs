//! Field data type and display format definitions.

/// Data types a decoded field can carry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataKind {
    /// Boolean (true/false)
    Bool,

    /// Unsigned 8-bit integer
    UInt8,

    /// Unsigned 16-bit integer
    UInt16,

    /// Unsigned 32-bit integer
    UInt32,

    /// Unsigned 64-bit integer
    UInt64,

    /// UTF-8 string
    String,

    /// Variable-length binary data
    Binary,

    /// Fixed-size binary data
    FixedBinary(usize),

    /// Variable-length list of elements of the same type
    List(Box<DataKind>),
}

impl DataKind {
    /// Human-readable type name for display.
    pub fn type_name(&self) -> &'static str {
        match self {
            DataKind::Bool => "bool",
            DataKind::UInt8 => "u8",
            DataKind::UInt16 => "u16",
            DataKind::UInt32 => "u32",
            DataKind::UInt64 => "u64",
            DataKind::String => "string",
            DataKind::Binary => "binary",
            DataKind::FixedBinary(_) => "fixed_binary",
            DataKind::List(_) => "list",
        }
    }

    /// Size in bytes for fixed-width types, None for variable-width.
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            DataKind::Bool | DataKind::UInt8 => Some(1),
            DataKind::UInt16 => Some(2),
            DataKind::UInt32 => Some(4),
            DataKind::UInt64 => Some(8),
            DataKind::FixedBinary(n) => Some(*n),
            DataKind::String | DataKind::Binary | DataKind::List(_) => None,
        }
    }
}

/// How a field's value renders in the detail tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DisplayFormat {
    /// Plain decimal
    #[default]
    Decimal,
    /// Zero-padded hexadecimal
    Hex,
    /// Name from the field's enumeration table, falling back to `Unknown (0xNN)`
    Enum,
    /// Bit-flag set rendered in hex
    Flags,
    /// Verbatim text
    Text,
    /// Byte count placeholder, e.g. `[12 bytes]`
    Bytes,
}
