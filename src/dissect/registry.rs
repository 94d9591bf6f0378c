//! Dissector registry with priority-based selection.

use crate::error::Result;
use crate::schema::FieldDescriptor;

use super::{DecodedUnit, IpduDissector, IsotpDissector, KvDissector, UnitContext};

/// Core trait all top-level dissectors implement.
///
/// `dissect` is the stateless single-unit pass: pure computation over the
/// already-fully-available buffer, no blocking, no shared state. Dissectors
/// that carry state across units (segmented transports) additionally expose
/// an engine-aware entry point invoked by the
/// [`Session`](crate::session::Session).
pub trait Dissector: Send + Sync {
    /// Unique identifier for this dissector (e.g. "kv", "isotp").
    fn name(&self) -> &'static str;

    /// Human-readable display name.
    fn display_name(&self) -> &'static str {
        self.name()
    }

    /// Check if this dissector can handle the given unit context.
    /// Returns a priority score (higher = more specific match).
    /// Returns `None` if this dissector cannot handle the context.
    fn can_dissect(&self, ctx: &UnitContext) -> Option<u32>;

    /// Decode one unit into structured fields.
    ///
    /// Errors only when the unit is too short for the mandatory fixed
    /// header; every other irregularity is an anomaly on the returned unit.
    fn dissect<'a>(&self, data: &'a [u8], ctx: &UnitContext) -> Result<DecodedUnit<'a>>;

    /// Return the field schema this dissector produces.
    fn schema_fields(&self) -> Vec<FieldDescriptor>;
}

/// Enum of all built-in dissectors.
///
/// Static dispatch, no vtable: the compiler can inline match arms, and the
/// registry stays a plain `Vec`.
#[derive(Debug, Clone)]
pub enum BuiltinDissector {
    Kv(KvDissector),
    Isotp(IsotpDissector),
    Ipdu(IpduDissector),
}

/// Delegate Dissector trait methods to inner types.
macro_rules! delegate_dissector {
    ($self:expr, $method:ident $(, $arg:expr)*) => {
        match $self {
            BuiltinDissector::Kv(d) => d.$method($($arg),*),
            BuiltinDissector::Isotp(d) => d.$method($($arg),*),
            BuiltinDissector::Ipdu(d) => d.$method($($arg),*),
        }
    };
}

impl Dissector for BuiltinDissector {
    #[inline]
    fn name(&self) -> &'static str {
        delegate_dissector!(self, name)
    }

    #[inline]
    fn display_name(&self) -> &'static str {
        delegate_dissector!(self, display_name)
    }

    #[inline]
    fn can_dissect(&self, ctx: &UnitContext) -> Option<u32> {
        delegate_dissector!(self, can_dissect, ctx)
    }

    #[inline]
    fn dissect<'a>(&self, data: &'a [u8], ctx: &UnitContext) -> Result<DecodedUnit<'a>> {
        delegate_dissector!(self, dissect, data, ctx)
    }

    #[inline]
    fn schema_fields(&self) -> Vec<FieldDescriptor> {
        delegate_dissector!(self, schema_fields)
    }
}

impl From<KvDissector> for BuiltinDissector {
    fn from(d: KvDissector) -> Self {
        BuiltinDissector::Kv(d)
    }
}

impl From<IsotpDissector> for BuiltinDissector {
    fn from(d: IsotpDissector) -> Self {
        BuiltinDissector::Isotp(d)
    }
}

impl From<IpduDissector> for BuiltinDissector {
    fn from(d: IpduDissector) -> Self {
        BuiltinDissector::Ipdu(d)
    }
}

/// Registry of built-in dissectors with priority-based selection.
#[derive(Debug, Clone, Default)]
pub struct DissectorRegistry {
    dissectors: Vec<BuiltinDissector>,
}

impl DissectorRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dissector.
    pub fn register<D: Into<BuiltinDissector>>(&mut self, dissector: D) {
        self.dissectors.push(dissector.into());
    }

    /// Find the best dissector for the given unit context.
    #[inline]
    pub fn find_dissector(&self, ctx: &UnitContext) -> Option<&BuiltinDissector> {
        self.dissectors
            .iter()
            .filter_map(|d| d.can_dissect(ctx).map(|priority| (d, priority)))
            .max_by_key(|(_, priority)| *priority)
            .map(|(dissector, _)| dissector)
    }

    /// Get a dissector by name.
    pub fn get_dissector(&self, name: &str) -> Option<&BuiltinDissector> {
        self.dissectors.iter().find(|d| d.name() == name)
    }

    /// All registered dissectors.
    pub fn all_dissectors(&self) -> impl Iterator<Item = &BuiltinDissector> {
        self.dissectors.iter()
    }

    /// Build the combined field schema from all dissectors, prefixed with
    /// the host-level frame counter every unit carries.
    /// Feeds the startup-built [`FieldCatalog`](crate::schema::FieldCatalog).
    pub fn combined_schema(&self) -> Vec<FieldDescriptor> {
        let mut fields = vec![FieldDescriptor::frame_number()];
        for dissector in &self.dissectors {
            fields.extend(dissector.schema_fields());
        }
        fields
    }

    /// Number of registered dissectors.
    pub fn len(&self) -> usize {
        self.dissectors.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.dissectors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dissect::{default_registry, Medium};

    #[test]
    fn test_find_by_medium() {
        let registry = default_registry();

        let ctx = UnitContext::new(Medium::Stream, 1, 1);
        assert_eq!(registry.find_dissector(&ctx).unwrap().name(), "kv");

        let ctx = UnitContext::new(Medium::Can, 0x7e0, 1);
        assert_eq!(registry.find_dissector(&ctx).unwrap().name(), "isotp");

        let ctx = UnitContext::new(Medium::PduTransport, 5, 1);
        assert_eq!(registry.find_dissector(&ctx).unwrap().name(), "ipdu");
    }

    #[test]
    fn test_get_by_name() {
        let registry = default_registry();
        assert!(registry.get_dissector("kv").is_some());
        assert!(registry.get_dissector("isotp").is_some());
        assert!(registry.get_dissector("nope").is_none());
    }

    #[test]
    fn test_combined_schema_is_nonempty() {
        let registry = default_registry();
        let schema = registry.combined_schema();
        assert!(schema.iter().any(|f| f.name == "opcode"));
        assert!(schema.iter().any(|f| f.name == "frame_type"));
    }
}
