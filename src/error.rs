//! Error types for dissect-core.
//!
//! Only hard decode failures live here. Recoverable irregularities
//! (clipped lengths, policy violations, unknown enum values) are collected
//! as [`Anomaly`](crate::dissect::Anomaly) records on the decoded unit and
//! never unwind past the current unit.

use thiserror::Error;

/// A read that would exceed the bounds of the captured unit.
///
/// Offsets are absolute within the original captured buffer, so the host
/// can attach the failure to the exact byte range.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("read of {requested} bytes at offset {offset} exceeds available {available}")]
pub struct OutOfBounds {
    /// Absolute offset where the read started.
    pub offset: usize,
    /// Number of bytes the read needed.
    pub requested: usize,
    /// Bytes actually available from that offset.
    pub available: usize,
}

/// Main error type for dissect-core operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Unit too short for even the mandatory fixed header.
    /// The host renders such units as raw bytes only.
    #[error("{protocol}: unit too short for fixed header (need {needed} bytes, have {have})")]
    HeaderTooShort {
        protocol: &'static str,
        needed: usize,
        have: usize,
    },

    /// A bounds violation that no decoder downgraded to an anomaly.
    #[error("out of bounds: {0}")]
    OutOfBounds(#[from] OutOfBounds),

    /// No registered dissector claimed the unit.
    #[error("no dissector for medium {medium:?}")]
    NoDissector { medium: crate::dissect::Medium },
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
