//! Downstream dissector dispatch.
//!
//! A pure lookup table mapping a decoded identifier (PDU id, opcode,
//! content-type OID) to a registered handler. A missing entry is not an
//! error: the caller renders the payload as opaque bytes, the fallback
//! every dissector uses for unregistered downstream content.

use std::collections::HashMap;

use compact_str::CompactString;
use tracing::trace;

use crate::dissect::{DecodedUnit, UnitContext};

/// Namespace a dispatch key lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeySpace {
    /// Multiplexed / transported PDU identifiers.
    PduId,
    /// Key/value protocol opcodes.
    KvOpcode,
    /// Textual content-type object identifiers.
    ContentType,
}

/// A dispatch key: numeric for PDU/opcode spaces, textual for OID strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DispatchKey {
    Numeric(u32),
    Named(CompactString),
}

impl From<u32> for DispatchKey {
    fn from(v: u32) -> Self {
        DispatchKey::Numeric(v)
    }
}

impl From<&str> for DispatchKey {
    fn from(v: &str) -> Self {
        DispatchKey::Named(CompactString::new(v))
    }
}

/// A downstream decoder invoked with an already-extracted payload.
pub trait Subdissector: Send + Sync {
    /// Unique identifier for this subdissector.
    fn name(&self) -> &'static str;

    /// Decode the extracted/reassembled payload.
    fn dissect<'a>(&self, payload: &'a [u8], ctx: &UnitContext) -> DecodedUnit<'a>;
}

/// Registration surface for downstream decoders.
///
/// No decoding logic of its own; lookup only.
#[derive(Default)]
pub struct SubdissectorTable {
    handlers: HashMap<(KeySpace, DispatchKey), Box<dyn Subdissector>>,
}

impl SubdissectorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `(key_space, key)`. A later registration
    /// for the same key replaces the earlier one.
    pub fn register(
        &mut self,
        key_space: KeySpace,
        key: impl Into<DispatchKey>,
        handler: Box<dyn Subdissector>,
    ) {
        self.handlers.insert((key_space, key.into()), handler);
    }

    /// Look up and invoke the handler for `(key_space, key)`.
    ///
    /// `None` means "render as opaque bytes", not an error.
    pub fn dispatch<'a>(
        &self,
        key_space: KeySpace,
        key: impl Into<DispatchKey>,
        payload: &'a [u8],
        ctx: &UnitContext,
    ) -> Option<DecodedUnit<'a>> {
        let key = key.into();
        let handler = self.handlers.get(&(key_space, key.clone()))?;
        trace!(?key_space, ?key, handler = handler.name(), "dispatching payload");
        Some(handler.dissect(payload, ctx))
    }

    /// True if a handler is registered for `(key_space, key)`.
    pub fn contains(&self, key_space: KeySpace, key: impl Into<DispatchKey>) -> bool {
        self.handlers.contains_key(&(key_space, key.into()))
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True if no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dissect::{FieldValue, Medium};

    struct EchoDissector;

    impl Subdissector for EchoDissector {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn dissect<'a>(&self, payload: &'a [u8], _ctx: &UnitContext) -> DecodedUnit<'a> {
            let mut unit = DecodedUnit::new("echo");
            unit.push_field("length", FieldValue::UInt32(payload.len() as u32));
            unit.payload = crate::dissect::Payload::Slice(payload);
            unit
        }
    }

    fn ctx() -> UnitContext {
        UnitContext::new(Medium::PduTransport, 9, 1)
    }

    #[test]
    fn test_numeric_dispatch() {
        let mut table = SubdissectorTable::new();
        table.register(KeySpace::PduId, 42u32, Box::new(EchoDissector));

        let unit = table.dispatch(KeySpace::PduId, 42u32, &[1, 2, 3], &ctx()).unwrap();
        assert_eq!(unit.get("length"), Some(&FieldValue::UInt32(3)));
    }

    #[test]
    fn test_not_found_is_none() {
        let table = SubdissectorTable::new();
        assert!(table.dispatch(KeySpace::PduId, 42u32, &[1], &ctx()).is_none());
    }

    #[test]
    fn test_key_spaces_are_disjoint() {
        let mut table = SubdissectorTable::new();
        table.register(KeySpace::PduId, 7u32, Box::new(EchoDissector));

        assert!(table.contains(KeySpace::PduId, 7u32));
        assert!(!table.contains(KeySpace::KvOpcode, 7u32));
    }

    #[test]
    fn test_named_keys() {
        let mut table = SubdissectorTable::new();
        table.register(KeySpace::ContentType, "2.6.1", Box::new(EchoDissector));

        assert!(table.dispatch(KeySpace::ContentType, "2.6.1", &[0], &ctx()).is_some());
        assert!(table.dispatch(KeySpace::ContentType, "2.6.2", &[0], &ctx()).is_none());
    }
}
