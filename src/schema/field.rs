//! Field descriptor for dissector schemas.

use super::{DataKind, DisplayFormat};

/// Static value-to-name enumeration table.
///
/// Tables are protocol-defined constants; lookup is linear, which is fine
/// for the table sizes real protocols carry.
pub type EnumTable = &'static [(u64, &'static str)];

/// One named field of a dissector's schema: type, display format and
/// optional enumeration table.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    /// Field name (snake_case, e.g. "total_body_length")
    pub name: &'static str,

    /// Data type
    pub kind: DataKind,

    /// Display format for default rendering
    pub display: DisplayFormat,

    /// Value-to-name table, consulted when `display` is `Enum`
    pub enums: Option<EnumTable>,

    /// Whether the field can be absent
    pub nullable: bool,

    /// Optional description for documentation
    pub description: Option<&'static str>,
}

impl FieldDescriptor {
    /// Create a new non-nullable field with default (decimal) display.
    pub const fn new(name: &'static str, kind: DataKind) -> Self {
        Self {
            name,
            kind,
            display: DisplayFormat::Decimal,
            enums: None,
            nullable: false,
            description: None,
        }
    }

    /// Create a new nullable field.
    pub const fn nullable(name: &'static str, kind: DataKind) -> Self {
        Self {
            name,
            kind,
            display: DisplayFormat::Decimal,
            enums: None,
            nullable: true,
            description: None,
        }
    }

    /// Builder: set display format.
    pub const fn with_display(mut self, display: DisplayFormat) -> Self {
        self.display = display;
        self
    }

    /// Builder: attach an enumeration table and switch display to `Enum`.
    pub const fn with_enums(mut self, enums: EnumTable) -> Self {
        self.enums = Some(enums);
        self.display = DisplayFormat::Enum;
        self
    }

    /// Builder: add a description.
    pub const fn with_description(mut self, desc: &'static str) -> Self {
        self.description = Some(desc);
        self
    }

    /// Look up a value's name in this field's enumeration table.
    pub fn enum_name(&self, value: u64) -> Option<&'static str> {
        self.enums?
            .iter()
            .find(|(v, _)| *v == value)
            .map(|(_, name)| *name)
    }
}

/// Common field shapes shared by several dissectors.
impl FieldDescriptor {
    /// Frame number cross-reference field.
    pub const fn frame_number() -> Self {
        Self::new("frame_number", DataKind::UInt64).with_description("Capture frame counter")
    }

    /// Opaque payload field.
    pub const fn payload() -> Self {
        Self::nullable("payload", DataKind::Binary).with_display(DisplayFormat::Bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static FRAME_TYPES: EnumTable = &[(0, "Single Frame"), (1, "First Frame")];

    #[test]
    fn test_builder() {
        let f = FieldDescriptor::new("frame_type", DataKind::UInt8).with_enums(FRAME_TYPES);
        assert_eq!(f.display, DisplayFormat::Enum);
        assert_eq!(f.enum_name(1), Some("First Frame"));
        assert_eq!(f.enum_name(9), None);
        assert!(!f.nullable);
    }

    #[test]
    fn test_enum_name_without_table() {
        let f = FieldDescriptor::new("opaque", DataKind::UInt32);
        assert_eq!(f.enum_name(0), None);
    }
}
