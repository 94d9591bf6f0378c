//! Convenience re-exports for host applications.

pub use crate::cursor::ByteCursor;
pub use crate::dispatch::{DispatchKey, KeySpace, Subdissector, SubdissectorTable};
pub use crate::dissect::{
    default_registry, AddressWidth, Anomaly, AnomalyKind, BuiltinDissector, DecodedUnit,
    Dissector, DissectorRegistry, FieldValue, IpduConfig, IpduDissector, IpduMapping,
    IsotpDissector, KvDissector, Medium, Payload, UnitContext,
};
pub use crate::error::{Error, OutOfBounds, Result};
pub use crate::reassembly::{FlowKey, FragmentOutcome, ReassembledMessage, ReassemblyEngine};
pub use crate::schema::{DataKind, DisplayFormat, FieldCatalog, FieldDescriptor};
pub use crate::session::{Session, SessionConfig, SessionStats};
