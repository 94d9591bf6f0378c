//! Startup-built, read-only field catalog.

use std::collections::HashMap;

use compact_str::{format_compact, CompactString};

use crate::dissect::FieldValue;

use super::{DisplayFormat, FieldDescriptor};

/// Read-only catalog mapping field names to their descriptors.
///
/// Built once from [`DissectorRegistry::combined_schema`]
/// (crate::dissect::DissectorRegistry::combined_schema) and never mutated
/// afterwards. Rendering falls back to the value's own `Display` when a
/// field is not cataloged.
pub struct FieldCatalog {
    fields: HashMap<&'static str, FieldDescriptor>,
}

impl FieldCatalog {
    /// Build a catalog from a flat list of descriptors.
    ///
    /// Later entries win on duplicate names; dissectors that share a field
    /// name (e.g. `payload`) declare identical descriptors, so overwrite is
    /// harmless.
    pub fn new(descriptors: Vec<FieldDescriptor>) -> Self {
        let mut fields = HashMap::with_capacity(descriptors.len());
        for desc in descriptors {
            fields.insert(desc.name, desc);
        }
        Self { fields }
    }

    /// Look up a field's descriptor by name.
    pub fn get(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.get(name)
    }

    /// Number of cataloged fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True if the catalog holds no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Default-render a field value per its descriptor.
    pub fn render(&self, name: &str, value: &FieldValue<'_>) -> CompactString {
        let Some(desc) = self.fields.get(name) else {
            return format_compact!("{value}");
        };
        match (desc.display, value.as_u64()) {
            (DisplayFormat::Hex | DisplayFormat::Flags, Some(v)) => match desc.kind.fixed_size() {
                Some(1) => format_compact!("0x{v:02x}"),
                Some(2) => format_compact!("0x{v:04x}"),
                Some(4) => format_compact!("0x{v:08x}"),
                _ => format_compact!("0x{v:x}"),
            },
            (DisplayFormat::Enum, Some(v)) => match desc.enum_name(v) {
                Some(label) => format_compact!("{label} ({v})"),
                None => format_compact!("Unknown (0x{v:x})"),
            },
            _ => format_compact!("{value}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DataKind, EnumTable};

    static MAGICS: EnumTable = &[(0x80, "Request"), (0x81, "Response")];

    fn catalog() -> FieldCatalog {
        FieldCatalog::new(vec![
            FieldDescriptor::new("magic", DataKind::UInt8).with_enums(MAGICS),
            FieldDescriptor::new("opaque", DataKind::UInt32).with_display(DisplayFormat::Hex),
            FieldDescriptor::new("key_length", DataKind::UInt16),
        ])
    }

    #[test]
    fn test_lookup() {
        let cat = catalog();
        assert_eq!(cat.len(), 3);
        assert!(cat.get("magic").is_some());
        assert!(cat.get("missing").is_none());
    }

    #[test]
    fn test_render_enum() {
        let cat = catalog();
        assert_eq!(cat.render("magic", &FieldValue::UInt8(0x80)), "Request (128)");
        assert_eq!(cat.render("magic", &FieldValue::UInt8(0x7f)), "Unknown (0x7f)");
    }

    #[test]
    fn test_render_hex_and_decimal() {
        let cat = catalog();
        assert_eq!(cat.render("opaque", &FieldValue::UInt32(0xdead)), "0x0000dead");
        assert_eq!(cat.render("key_length", &FieldValue::UInt16(5)), "5");
        // Uncataloged name falls back to Display
        assert_eq!(cat.render("unlisted", &FieldValue::UInt8(7)), "7");
    }
}
