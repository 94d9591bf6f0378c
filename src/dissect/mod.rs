//! Protocol dissection.
//!
//! A [`Dissector`] turns one captured unit into a [`DecodedUnit`]: typed
//! fields, a residual payload and any anomalies collected along the way.
//! Dissection never fails on malformed field content; only a unit too
//! short for its fixed header is a hard error. Concrete dissectors are
//! wrapped in [`BuiltinDissector`] and looked up per unit through the
//! [`DissectorRegistry`].

pub mod context;
pub mod field;
pub mod ipdu;
pub mod isotp;
pub mod kv;
pub mod registry;

pub use context::{
    Anomaly, AnomalyKind, DecodedUnit, FieldEntry, HintEntry, Medium, Payload, UnitContext,
};
pub use field::{FieldValue, OwnedFieldValue};
pub use ipdu::{IpduConfig, IpduDissector, IpduMapping, SubPdu};
pub use isotp::{AddressWidth, FlowStatus, FrameType, IsotpDissector, IsotpFrame};
pub use kv::{KvDissector, KvHeader, KvMagic, KvOpcode};
pub use registry::{BuiltinDissector, Dissector, DissectorRegistry};

/// Registry with every built-in dissector registered.
pub fn default_registry() -> DissectorRegistry {
    let mut registry = DissectorRegistry::new();
    registry.register(KvDissector);
    registry.register(IsotpDissector::default());
    registry.register(IpduDissector::default());
    registry
}
