//! Unit context, decoded-unit and anomaly types.

use std::ops::Range;

use compact_str::CompactString;
use smallvec::SmallVec;

use super::FieldValue;

/// Field entry for decoded units: (field_name, value).
/// Field names are always static strings (dissector-defined).
pub type FieldEntry<'data> = (&'static str, FieldValue<'data>);

/// Hint entry supplied by an upstream dissector: (hint_name, value).
pub type HintEntry = (&'static str, u64);

/// Bus or medium a unit arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Medium {
    /// Classic CAN (8-byte payloads).
    Can,
    /// CAN FD (up to 64-byte payloads, escape length forms).
    CanFd,
    /// LIN bus.
    Lin,
    /// FlexRay channel.
    FlexRay,
    /// Generic PDU transport carrying multiplexed sub-PDUs.
    PduTransport,
    /// Stream-delivered binary protocol unit (already framed by the host's
    /// desegmentation primitive).
    Stream,
}

/// Out-of-band metadata the host supplies with every captured unit.
#[derive(Debug, Clone)]
pub struct UnitContext {
    /// Medium the unit arrived on.
    pub medium: Medium,

    /// Arbitration / channel / connection identifier on that medium.
    pub flow_id: u32,

    /// Optional sub-address (extended addressing byte, FlexRay cycle, ...).
    pub subaddress: Option<u8>,

    /// Monotonically increasing per-session frame counter. Used only for
    /// diagnostic cross-referencing ("reassembled in frame #N").
    pub frame_number: u64,

    /// Hints parsed by an upstream dissector (e.g. a PDU id selected by a
    /// multiplexer entry). Linear-searched; N stays small.
    pub hints: SmallVec<[HintEntry; 4]>,
}

impl UnitContext {
    /// Context for a unit with no upstream hints.
    pub fn new(medium: Medium, flow_id: u32, frame_number: u64) -> Self {
        Self {
            medium,
            flow_id,
            subaddress: None,
            frame_number,
            hints: SmallVec::new(),
        }
    }

    /// Builder: set the sub-address.
    pub fn with_subaddress(mut self, subaddress: u8) -> Self {
        self.subaddress = Some(subaddress);
        self
    }

    /// Get a hint value by key.
    #[inline]
    pub fn hint(&self, key: &str) -> Option<u64> {
        self.hints.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
    }

    /// Set a hint value (updates existing or appends).
    #[inline]
    pub fn set_hint(&mut self, key: &'static str, value: u64) {
        if let Some(entry) = self.hints.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.hints.push((key, value));
        }
    }
}

/// Classification of a non-fatal decode irregularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnomalyKind {
    /// A read would have exceeded the declared unit length.
    OutOfBounds,
    /// Declared sub-lengths disagree with each other or with the capture.
    LengthInconsistency,
    /// An opcode's body has a section it must not have, or lacks a required one.
    PresencePolicyViolation,
    /// Magic byte, opcode or type tag outside the known value set.
    UnknownEnumValue,
    /// Consecutive fragment outside the acceptable window for its flow.
    ReassemblySequenceError,
}

/// A reportable decode irregularity attached to a byte range.
///
/// Anomalies are advisory: the surrounding decode continues and the host
/// renders them as highlighted notes on the offending bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anomaly {
    /// What kind of irregularity this is.
    pub kind: AnomalyKind,
    /// Field the irregularity was detected in.
    pub field: &'static str,
    /// Absolute byte range within the captured unit that triggered it.
    pub range: Range<usize>,
    /// Human-readable detail.
    pub message: CompactString,
}

impl Anomaly {
    pub fn new(
        kind: AnomalyKind,
        field: &'static str,
        range: Range<usize>,
        message: impl Into<CompactString>,
    ) -> Self {
        Self {
            kind,
            field,
            range,
            message: message.into(),
        }
    }
}

/// Payload carried out of a decode pass.
///
/// Borrowed except for cross-unit reassembly, where an owned buffer is
/// unavoidable and intentional.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Payload<'data> {
    /// No payload (control-plane units, incomplete reassembly).
    #[default]
    None,
    /// Payload borrowed from the captured unit.
    Slice(&'data [u8]),
    /// Payload reassembled across units, with the frame numbers of the
    /// contributing fragments for cross-referencing.
    Reassembled {
        data: Vec<u8>,
        fragment_frames: Vec<u64>,
    },
}

impl Payload<'_> {
    /// The payload bytes, regardless of ownership.
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Payload::None => None,
            Payload::Slice(b) => Some(b),
            Payload::Reassembled { data, .. } => Some(data.as_slice()),
        }
    }
}

/// The externally visible result of one decode pass.
///
/// Created fresh per input unit; handed to the host's tree rendering and
/// to [`SubdissectorTable`](crate::dispatch::SubdissectorTable), then
/// dropped. Most dissectors emit <16 fields, so the field list stays
/// inline.
#[derive(Debug, Clone)]
pub struct DecodedUnit<'data> {
    /// Name of the dissector that produced this unit.
    pub protocol: &'static str,

    /// Extracted field values, in decode order.
    pub fields: SmallVec<[FieldEntry<'data>; 16]>,

    /// Body payload (direct slice or reassembled buffer).
    pub payload: Payload<'data>,

    /// Irregularities tolerated during decode.
    pub anomalies: SmallVec<[Anomaly; 4]>,

    /// One-line summary for the host's packet list.
    pub summary: CompactString,
}

impl<'data> DecodedUnit<'data> {
    /// Create an empty decoded unit for the given dissector.
    pub fn new(protocol: &'static str) -> Self {
        Self {
            protocol,
            fields: SmallVec::new(),
            payload: Payload::None,
            anomalies: SmallVec::new(),
            summary: CompactString::default(),
        }
    }

    /// Append a field.
    #[inline]
    pub fn push_field(&mut self, name: &'static str, value: FieldValue<'data>) {
        self.fields.push((name, value));
    }

    /// Record an anomaly.
    #[inline]
    pub fn push_anomaly(&mut self, anomaly: Anomaly) {
        self.anomalies.push(anomaly);
    }

    /// Get a field value by name (linear search, but N is small).
    pub fn get(&self, name: &str) -> Option<&FieldValue<'data>> {
        self.fields.iter().find(|(k, _)| *k == name).map(|(_, v)| v)
    }

    /// True if decode produced no anomalies.
    pub fn is_clean(&self) -> bool {
        self.anomalies.is_empty()
    }

    /// Anomalies of a given kind.
    pub fn anomalies_of(&self, kind: AnomalyKind) -> impl Iterator<Item = &Anomaly> {
        self.anomalies.iter().filter(move |a| a.kind == kind)
    }

    /// Detach the unit from its backing buffer.
    ///
    /// Needed when a unit was decoded from a reassembled buffer that does
    /// not outlive the decode call: borrowed fields are copied, a borrowed
    /// payload becomes an owned buffer with no fragment provenance. The
    /// output lifetime is free because every produced field is owned.
    pub fn into_owned<'out>(self) -> DecodedUnit<'out> {
        DecodedUnit {
            protocol: self.protocol,
            fields: self
                .fields
                .into_iter()
                .map(|(name, value)| (name, value.to_owned()))
                .collect(),
            payload: match self.payload {
                Payload::None => Payload::None,
                Payload::Slice(b) => Payload::Reassembled {
                    data: b.to_vec(),
                    fragment_frames: Vec::new(),
                },
                Payload::Reassembled { data, fragment_frames } => {
                    Payload::Reassembled { data, fragment_frames }
                }
            },
            anomalies: self.anomalies,
            summary: self.summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_hints() {
        let mut ctx = UnitContext::new(Medium::Can, 0x7e0, 1);
        ctx.set_hint("pdu_id", 42);
        ctx.set_hint("pdu_id", 43); // update, not duplicate

        assert_eq!(ctx.hint("pdu_id"), Some(43));
        assert_eq!(ctx.hints.len(), 1);
        assert_eq!(ctx.hint("missing"), None);
    }

    #[test]
    fn test_decoded_unit_fields() {
        let mut unit = DecodedUnit::new("kv");
        unit.push_field("opcode", FieldValue::UInt8(0x01));
        unit.push_field("key_length", FieldValue::UInt16(5));

        assert_eq!(unit.get("opcode"), Some(&FieldValue::UInt8(0x01)));
        assert_eq!(unit.get("value"), None);
        assert!(unit.is_clean());
    }

    #[test]
    fn test_anomaly_filter() {
        let mut unit = DecodedUnit::new("kv");
        unit.push_anomaly(Anomaly::new(
            AnomalyKind::LengthInconsistency,
            "total_body_length",
            20..24,
            "extras+key exceed body",
        ));
        unit.push_anomaly(Anomaly::new(
            AnomalyKind::UnknownEnumValue,
            "opcode",
            1..2,
            "opcode 0xff",
        ));

        assert!(!unit.is_clean());
        assert_eq!(unit.anomalies_of(AnomalyKind::LengthInconsistency).count(), 1);
        assert_eq!(unit.anomalies_of(AnomalyKind::OutOfBounds).count(), 0);
    }

    #[test]
    fn test_into_owned_outlives_source() {
        let detached: DecodedUnit<'_>;
        {
            let buf = vec![0xaau8, 0xbb, 0xcc];
            let mut unit = DecodedUnit::new("kv");
            unit.push_field("value", FieldValue::Bytes(&buf));
            unit.payload = Payload::Slice(&buf);
            detached = unit.into_owned();
        }
        // The detached unit carries no borrows from the dropped buffer
        assert_eq!(
            detached.get("value"),
            Some(&FieldValue::OwnedBytes(vec![0xaa, 0xbb, 0xcc]))
        );
        assert_eq!(detached.payload.bytes(), Some(&[0xaau8, 0xbb, 0xcc][..]));
    }

    #[test]
    fn test_payload_bytes() {
        assert_eq!(Payload::None.bytes(), None);
        assert_eq!(Payload::Slice(&[1, 2]).bytes(), Some(&[1u8, 2][..]));
        let p = Payload::Reassembled {
            data: vec![3, 4],
            fragment_frames: vec![10, 11],
        };
        assert_eq!(p.bytes(), Some(&[3u8, 4][..]));
    }
}
