//! Field catalog types.
//!
//! Each dissector declares its fields once, as a static list of
//! [`FieldDescriptor`] entries naming the field's type, display format and
//! (where one exists) value-name enumeration table. The catalog is built
//! once at startup from the registry and consulted read-only afterwards.
//!
//! # Example
//!
//! ```rust
//! use dissect_core::schema::{DataKind, DisplayFormat, FieldDescriptor};
//!
//! let fields = vec![
//!     FieldDescriptor::new("opcode", DataKind::UInt8).with_display(DisplayFormat::Hex),
//!     FieldDescriptor::nullable("value", DataKind::Binary),
//! ];
//! ```

mod catalog;
mod field;
mod kind;

pub use catalog::FieldCatalog;
pub use field::{EnumTable, FieldDescriptor};
pub use kind::{DataKind, DisplayFormat};

/// A dissector's complete field schema.
pub type DissectorSchema = Vec<FieldDescriptor>;
