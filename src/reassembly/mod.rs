//! Multi-fragment message reassembly.
//!
//! This module tracks partial segmented messages keyed by flow identity and
//! emits each fully reassembled buffer exactly once, when the terminal
//! fragment arrives.
//!
//! ## Components
//!
//! - [`FlowKey`] - Identity under which reassembly is tracked
//! - [`ReassemblyEngine`] - Per-session fragment accumulator
//! - [`ReassembledMessage`] - An emitted, owned reassembly result
//!
//! The engine is owned by a [`Session`](crate::session::Session); there is
//! no process-wide state and tests construct isolated engines per case.

mod engine;

pub use engine::{
    FlowKey, FragmentOutcome, ReassembledMessage, ReassemblyEngine, ReassemblyStats,
};
