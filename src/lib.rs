//! # dissect-core
//!
//! Host-agnostic binary protocol decoding library.
//!
//! This crate turns captured protocol units (frames, datagrams, stream
//! chunks) into typed field trees, without any capture-source or UI
//! dependencies. It can be used standalone for protocol analysis or as
//! the decode engine behind a capture viewer.
//!
//! ## Features
//!
//! - **Bounds-checked reading**: every field access goes through
//!   [`ByteCursor`](cursor::ByteCursor); truncated input degrades to
//!   anomalies, never panics
//! - **Anomaly collection**: malformed field content is recorded on the
//!   decoded unit and decoding continues
//! - **Fragment reassembly**: generic out-of-order reassembly with a
//!   bounded reorder window, driven by the segmented transport dissector
//! - **Payload dispatch**: completed payloads route to registered
//!   sub-dissectors by PDU id, opcode or content type
//!
//! ## Quick Start
//!
//! ```rust
//! use dissect_core::prelude::*;
//!
//! let mut session = Session::default();
//!
//! // A single-frame segmented-transport unit on CAN id 0x7e0
//! let ctx = UnitContext::new(Medium::Can, 0x7e0, 1);
//! let units = session.process_unit(&ctx, &[0x02, 0x10, 0x03]).unwrap();
//!
//! assert_eq!(units[0].protocol, "isotp");
//! assert_eq!(units[0].payload.bytes(), Some(&[0x10, 0x03][..]));
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------+
//! |                        dissect-core                           |
//! +---------------------------------------------------------------+
//! |  cursor      - bounds-checked reads over one captured unit    |
//! |  schema/     - FieldDescriptor, DataKind, value rendering     |
//! |  dissect/    - Dissector trait, kv / isotp / ipdu decoders    |
//! |  reassembly/ - flow-keyed fragment buffers, reorder window    |
//! |  dispatch    - sub-dissector routing by payload identity      |
//! |  session     - stateful orchestration over unit streams       |
//! |  error       - hard failure types                             |
//! +---------------------------------------------------------------+
//! ```

pub mod cursor;
pub mod dispatch;
pub mod dissect;
pub mod error;
pub mod prelude;
pub mod reassembly;
pub mod schema;
pub mod session;

// Re-export commonly used types at crate root for convenience
pub use cursor::ByteCursor;
pub use dispatch::{DispatchKey, KeySpace, Subdissector, SubdissectorTable};
pub use dissect::{
    default_registry, AddressWidth, Anomaly, AnomalyKind, BuiltinDissector, DecodedUnit,
    Dissector, DissectorRegistry, FieldValue, FlowStatus, FrameType, IpduConfig, IpduDissector,
    IpduMapping, IsotpDissector, IsotpFrame, KvDissector, KvHeader, KvMagic, KvOpcode, Medium,
    OwnedFieldValue, Payload, SubPdu, UnitContext,
};
pub use error::{Error, OutOfBounds, Result};
pub use reassembly::{
    FlowKey, FragmentOutcome, ReassembledMessage, ReassemblyEngine, ReassemblyStats,
};
pub use schema::{DataKind, DisplayFormat, DissectorSchema, FieldCatalog, FieldDescriptor};
pub use session::{Session, SessionConfig, SessionStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
