//! Binary key/value protocol dissector (memcache/couchbase style).
//!
//! Fixed 24-byte header followed by a variable body laid out as
//! extras, key, value, in that order. Declared lengths are validated
//! against each other and against the capture; disagreement clips and
//! flags, it never aborts. Sub-document multi-path opcodes decode a list
//! of per-path specs from the value envelope, each spec bounds-checked
//! independently.

use compact_str::format_compact;
use smallvec::SmallVec;

use crate::cursor::ByteCursor;
use crate::error::{Error, Result};
use crate::schema::{DataKind, DisplayFormat, EnumTable, FieldDescriptor};

use super::{Anomaly, AnomalyKind, DecodedUnit, Dissector, FieldValue, Medium, Payload, UnitContext};

/// Fixed header length.
pub const HEADER_LEN: usize = 24;

/// Request magic byte.
pub const MAGIC_REQUEST: u8 = 0x80;
/// Response magic byte.
pub const MAGIC_RESPONSE: u8 = 0x81;

static MAGIC_NAMES: EnumTable = &[
    (MAGIC_REQUEST as u64, "Request"),
    (MAGIC_RESPONSE as u64, "Response"),
];

/// Message direction derived from the magic byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvMagic {
    Request,
    Response,
    /// Value outside the known set; carried so it stays visible.
    Unknown(u8),
}

impl KvMagic {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            MAGIC_REQUEST => KvMagic::Request,
            MAGIC_RESPONSE => KvMagic::Response,
            other => KvMagic::Unknown(other),
        }
    }

    pub fn raw(self) -> u8 {
        match self {
            KvMagic::Request => MAGIC_REQUEST,
            KvMagic::Response => MAGIC_RESPONSE,
            KvMagic::Unknown(raw) => raw,
        }
    }

    /// Best-guess interpretation for unknown magics: the high bit set
    /// means response. Decoding proceeds under this assumption.
    pub fn is_response(self) -> bool {
        match self {
            KvMagic::Request => false,
            KvMagic::Response => true,
            KvMagic::Unknown(raw) => raw & 0x80 != 0,
        }
    }
}

/// Protocol opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvOpcode {
    Get,
    Set,
    Add,
    Replace,
    Delete,
    Increment,
    Decrement,
    Quit,
    Flush,
    Noop,
    Version,
    Append,
    Prepend,
    Stat,
    SubdocGet,
    SubdocExists,
    SubdocMultiLookup,
    SubdocMultiMutation,
    /// Numerically valid but undefined opcode. Header fields still decode.
    Unknown(u8),
}

impl KvOpcode {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0x00 => KvOpcode::Get,
            0x01 => KvOpcode::Set,
            0x02 => KvOpcode::Add,
            0x03 => KvOpcode::Replace,
            0x04 => KvOpcode::Delete,
            0x05 => KvOpcode::Increment,
            0x06 => KvOpcode::Decrement,
            0x07 => KvOpcode::Quit,
            0x08 => KvOpcode::Flush,
            0x0a => KvOpcode::Noop,
            0x0b => KvOpcode::Version,
            0x0e => KvOpcode::Append,
            0x0f => KvOpcode::Prepend,
            0x10 => KvOpcode::Stat,
            0xc5 => KvOpcode::SubdocGet,
            0xc6 => KvOpcode::SubdocExists,
            0xd0 => KvOpcode::SubdocMultiLookup,
            0xd1 => KvOpcode::SubdocMultiMutation,
            other => KvOpcode::Unknown(other),
        }
    }

    pub fn raw(self) -> u8 {
        match self {
            KvOpcode::Get => 0x00,
            KvOpcode::Set => 0x01,
            KvOpcode::Add => 0x02,
            KvOpcode::Replace => 0x03,
            KvOpcode::Delete => 0x04,
            KvOpcode::Increment => 0x05,
            KvOpcode::Decrement => 0x06,
            KvOpcode::Quit => 0x07,
            KvOpcode::Flush => 0x08,
            KvOpcode::Noop => 0x0a,
            KvOpcode::Version => 0x0b,
            KvOpcode::Append => 0x0e,
            KvOpcode::Prepend => 0x0f,
            KvOpcode::Stat => 0x10,
            KvOpcode::SubdocGet => 0xc5,
            KvOpcode::SubdocExists => 0xc6,
            KvOpcode::SubdocMultiLookup => 0xd0,
            KvOpcode::SubdocMultiMutation => 0xd1,
            KvOpcode::Unknown(raw) => raw,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            KvOpcode::Get => "GET",
            KvOpcode::Set => "SET",
            KvOpcode::Add => "ADD",
            KvOpcode::Replace => "REPLACE",
            KvOpcode::Delete => "DELETE",
            KvOpcode::Increment => "INCREMENT",
            KvOpcode::Decrement => "DECREMENT",
            KvOpcode::Quit => "QUIT",
            KvOpcode::Flush => "FLUSH",
            KvOpcode::Noop => "NOOP",
            KvOpcode::Version => "VERSION",
            KvOpcode::Append => "APPEND",
            KvOpcode::Prepend => "PREPEND",
            KvOpcode::Stat => "STAT",
            KvOpcode::SubdocGet => "SUBDOC_GET",
            KvOpcode::SubdocExists => "SUBDOC_EXISTS",
            KvOpcode::SubdocMultiLookup => "SUBDOC_MULTI_LOOKUP",
            KvOpcode::SubdocMultiMutation => "SUBDOC_MULTI_MUTATION",
            KvOpcode::Unknown(_) => "UNKNOWN",
        }
    }

    /// Opcodes whose value section is a list of sub-document path specs.
    fn is_subdoc_multi(self) -> bool {
        matches!(self, KvOpcode::SubdocMultiLookup | KvOpcode::SubdocMultiMutation)
    }

    /// Single-path sub-document opcodes (path length lives in extras).
    fn is_subdoc_single(self) -> bool {
        matches!(self, KvOpcode::SubdocGet | KvOpcode::SubdocExists)
    }
}

static OPCODE_NAMES: EnumTable = &[
    (0x00, "GET"),
    (0x01, "SET"),
    (0x02, "ADD"),
    (0x03, "REPLACE"),
    (0x04, "DELETE"),
    (0x05, "INCREMENT"),
    (0x06, "DECREMENT"),
    (0x07, "QUIT"),
    (0x08, "FLUSH"),
    (0x0a, "NOOP"),
    (0x0b, "VERSION"),
    (0x0e, "APPEND"),
    (0x0f, "PREPEND"),
    (0x10, "STAT"),
    (0xc5, "SUBDOC_GET"),
    (0xc6, "SUBDOC_EXISTS"),
    (0xd0, "SUBDOC_MULTI_LOOKUP"),
    (0xd1, "SUBDOC_MULTI_MUTATION"),
];

/// Decoded fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KvHeader {
    pub magic: KvMagic,
    pub opcode: KvOpcode,
    pub key_length: u16,
    pub extras_length: u8,
    pub data_type: u8,
    /// vbucket id on requests, status code on responses.
    pub vbucket_or_status: u16,
    pub total_body_length: u32,
    /// Little-endian on the wire.
    pub opaque: u32,
    pub cas: u64,
}

/// Decode the fixed header, collecting anomalies for tolerated
/// irregularities. Fails hard only when fewer than 24 bytes are captured.
pub fn decode_header(
    cur: &ByteCursor<'_>,
    anomalies: &mut SmallVec<[Anomaly; 4]>,
) -> Result<KvHeader> {
    if cur.len() < HEADER_LEN {
        return Err(Error::HeaderTooShort {
            protocol: "kv",
            needed: HEADER_LEN,
            have: cur.len(),
        });
    }

    let raw_magic = cur.read_u8(0)?;
    let magic = KvMagic::from_raw(raw_magic);
    if matches!(magic, KvMagic::Unknown(_)) {
        anomalies.push(Anomaly::new(
            AnomalyKind::UnknownEnumValue,
            "magic",
            cur.abs_range(0, 1),
            format_compact!(
                "unknown magic 0x{raw_magic:02x}, assuming {}",
                if magic.is_response() { "response" } else { "request" }
            ),
        ));
    }

    let raw_opcode = cur.read_u8(1)?;
    let opcode = KvOpcode::from_raw(raw_opcode);
    if matches!(opcode, KvOpcode::Unknown(_)) {
        anomalies.push(Anomaly::new(
            AnomalyKind::UnknownEnumValue,
            "opcode",
            cur.abs_range(1, 1),
            format_compact!("unknown opcode 0x{raw_opcode:02x}"),
        ));
    }

    Ok(KvHeader {
        magic,
        opcode,
        key_length: cur.read_u16(2)?,
        extras_length: cur.read_u8(4)?,
        data_type: cur.read_u8(5)?,
        vbucket_or_status: cur.read_u16(6)?,
        total_body_length: cur.read_u32(8)?,
        opaque: cur.read_u32_le(12)?,
        cas: cur.read_u64(16)?,
    })
}

/// Presence policy for one body section of one opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Required,
    Forbidden,
    Optional,
}

impl Presence {
    /// Check actual presence against the policy; `None` means conforming.
    fn violation(self, present: bool) -> Option<&'static str> {
        match (self, present) {
            (Presence::Required, false) => Some("required but absent"),
            (Presence::Forbidden, true) => Some("forbidden but present"),
            _ => None,
        }
    }
}

/// What an opcode's body must, may, and must not carry.
#[derive(Debug, Clone, Copy)]
pub struct BodyPolicy {
    pub extras: Presence,
    pub key: Presence,
    pub value: Presence,
}

const fn policy(extras: Presence, key: Presence, value: Presence) -> BodyPolicy {
    BodyPolicy { extras, key, value }
}

/// Per-opcode body policy. `None` for unknown opcodes, which are decoded
/// without presence checking.
pub fn body_policy(opcode: KvOpcode, is_response: bool) -> Option<BodyPolicy> {
    use Presence::{Forbidden as F, Optional as O, Required as R};
    let p = if is_response {
        match opcode {
            KvOpcode::Get => policy(R, O, O),
            KvOpcode::Set | KvOpcode::Add | KvOpcode::Replace => policy(F, F, F),
            KvOpcode::Delete => policy(F, F, F),
            KvOpcode::Increment | KvOpcode::Decrement => policy(F, F, R),
            KvOpcode::Quit | KvOpcode::Flush | KvOpcode::Noop => policy(F, F, F),
            KvOpcode::Version => policy(F, F, R),
            KvOpcode::Append | KvOpcode::Prepend => policy(F, F, F),
            KvOpcode::Stat => policy(F, O, O),
            KvOpcode::SubdocGet => policy(F, F, O),
            KvOpcode::SubdocExists => policy(F, F, F),
            KvOpcode::SubdocMultiLookup => policy(F, F, R),
            KvOpcode::SubdocMultiMutation => policy(F, F, O),
            KvOpcode::Unknown(_) => return None,
        }
    } else {
        match opcode {
            KvOpcode::Get => policy(F, R, F),
            KvOpcode::Set | KvOpcode::Add | KvOpcode::Replace => policy(R, R, O),
            KvOpcode::Delete => policy(F, R, F),
            KvOpcode::Increment | KvOpcode::Decrement => policy(R, R, F),
            KvOpcode::Quit | KvOpcode::Noop | KvOpcode::Version => policy(F, F, F),
            KvOpcode::Flush => policy(O, F, F),
            KvOpcode::Append | KvOpcode::Prepend => policy(F, R, R),
            KvOpcode::Stat => policy(F, O, F),
            KvOpcode::SubdocGet | KvOpcode::SubdocExists => policy(R, R, R),
            KvOpcode::SubdocMultiLookup => policy(O, R, R),
            KvOpcode::SubdocMultiMutation => policy(O, R, R),
            KvOpcode::Unknown(_) => return None,
        }
    };
    Some(p)
}

/// Decoded body sections: views into the unit, never copies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyFields<'data> {
    pub extras: &'data [u8],
    pub key: &'data [u8],
    pub value: &'data [u8],
    /// Declared path length for single-path sub-document opcodes
    /// (first two extras bytes).
    pub path_length: Option<u16>,
}

/// Split the body into extras/key/value per the header's declared lengths.
///
/// Inconsistent declarations clip to what is actually available, flagging
/// each disagreement once.
pub fn decode_body<'data>(
    header: &KvHeader,
    unit: &ByteCursor<'data>,
    anomalies: &mut SmallVec<[Anomaly; 4]>,
) -> BodyFields<'data> {
    let available = unit.len().saturating_sub(HEADER_LEN);
    let declared = header.total_body_length as usize;

    let mut body_len = declared;
    if declared > available {
        anomalies.push(Anomaly::new(
            AnomalyKind::LengthInconsistency,
            "total_body_length",
            unit.abs_range(8, 4),
            format_compact!("declared body {declared} exceeds captured {available}, clipping"),
        ));
        body_len = available;
    }
    // Bounded by body_len from here on: no read can pass the declared
    // (or clipped) body end. Both bounds are clamped to the capture, so
    // the subrange cannot fail.
    let body_start = HEADER_LEN.min(unit.len());
    let body = unit.subrange(body_start, body_len).unwrap();

    let extras_declared = header.extras_length as usize;
    let key_declared = header.key_length as usize;
    if extras_declared + key_declared > declared {
        anomalies.push(Anomaly::new(
            AnomalyKind::LengthInconsistency,
            "total_body_length",
            unit.abs_range(2, 3),
            format_compact!(
                "extras {extras_declared} + key {key_declared} exceed declared body {declared}"
            ),
        ));
    }

    let extras_len = extras_declared.min(body_len);
    let key_len = key_declared.min(body_len - extras_len);
    let value_len = body_len - extras_len - key_len;

    let extras = body.slice(0, extras_len).unwrap_or(&[]);
    let key = body.slice(extras_len, key_len).unwrap_or(&[]);
    let value = body.slice(extras_len + key_len, value_len).unwrap_or(&[]);

    let path_length = if header.opcode.is_subdoc_single() && extras.len() >= 2 {
        Some(u16::from_be_bytes([extras[0], extras[1]]))
    } else {
        None
    };

    BodyFields {
        extras,
        key,
        value,
        path_length,
    }
}

/// Decode the sub-document multi-path spec list from the value envelope.
///
/// Each spec is bounds-checked independently: one malformed spec flags an
/// anomaly and stops the loop, it cannot cause reads past the envelope.
fn decode_subdoc_specs<'data>(
    header: &KvHeader,
    value: ByteCursor<'data>,
    unit: &mut DecodedUnit<'data>,
) {
    let is_mutation = header.opcode == KvOpcode::SubdocMultiMutation;
    let is_response = header.magic.is_response();
    let mut specs = Vec::new();
    let mut offset = 0usize;

    while offset < value.len() {
        let spec = if is_response && !is_mutation {
            // Lookup response spec: status(2) value_len(4) value
            decode_lookup_result(&value, &mut offset)
        } else {
            // Request spec: opcode(1) flags(1) path_len(2) [value_len(4)] path [value]
            decode_path_spec(&value, &mut offset, is_mutation)
        };
        match spec {
            Ok(entry) => specs.push(entry),
            Err(oob) => {
                unit.push_anomaly(Anomaly::new(
                    AnomalyKind::OutOfBounds,
                    "subdoc_specs",
                    oob.offset..oob.offset + oob.requested.max(1),
                    format_compact!("truncated sub-document spec: {oob}"),
                ));
                break;
            }
        }
    }

    unit.push_field("subdoc_spec_count", FieldValue::UInt32(specs.len() as u32));
    unit.push_field("subdoc_specs", FieldValue::List(specs));
}

fn decode_path_spec<'data>(
    value: &ByteCursor<'data>,
    offset: &mut usize,
    is_mutation: bool,
) -> std::result::Result<FieldValue<'data>, crate::error::OutOfBounds> {
    let opcode = value.read_u8(*offset)?;
    let flags = value.read_u8(*offset + 1)?;
    let path_len = value.read_u16(*offset + 2)? as usize;
    let mut cursor = *offset + 4;

    let value_len = if is_mutation {
        let len = value.read_u32(cursor)? as usize;
        cursor += 4;
        len
    } else {
        0
    };

    let path = value.slice(cursor, path_len)?;
    cursor += path_len;
    let spec_value = value.slice(cursor, value_len)?;
    cursor += value_len;
    *offset = cursor;

    let mut entry = vec![
        FieldValue::UInt8(opcode),
        FieldValue::UInt8(flags),
        FieldValue::UInt16(path_len as u16),
        match std::str::from_utf8(path) {
            Ok(s) => FieldValue::Str(s),
            Err(_) => FieldValue::Bytes(path),
        },
    ];
    if is_mutation {
        entry.push(FieldValue::Bytes(spec_value));
    }
    Ok(FieldValue::List(entry))
}

fn decode_lookup_result<'data>(
    value: &ByteCursor<'data>,
    offset: &mut usize,
) -> std::result::Result<FieldValue<'data>, crate::error::OutOfBounds> {
    let status = value.read_u16(*offset)?;
    let value_len = value.read_u32(*offset + 2)? as usize;
    let result = value.slice(*offset + 6, value_len)?;
    *offset += 6 + value_len;

    Ok(FieldValue::List(vec![
        FieldValue::UInt16(status),
        FieldValue::UInt32(value_len as u32),
        FieldValue::Bytes(result),
    ]))
}

/// Binary key/value protocol dissector.
#[derive(Debug, Clone, Copy, Default)]
pub struct KvDissector;

impl KvDissector {
    fn check_policy(header: &KvHeader, body: &BodyFields<'_>, unit: &mut DecodedUnit<'_>) {
        let Some(policy) = body_policy(header.opcode, header.magic.is_response()) else {
            return;
        };
        let checks = [
            ("extras", policy.extras, !body.extras.is_empty(), 4usize, 1usize),
            ("key", policy.key, !body.key.is_empty(), 2, 2),
            ("value", policy.value, !body.value.is_empty(), 8, 4),
        ];
        for (section, presence, present, field_off, field_len) in checks {
            if let Some(reason) = presence.violation(present) {
                unit.push_anomaly(Anomaly::new(
                    AnomalyKind::PresencePolicyViolation,
                    section,
                    field_off..field_off + field_len,
                    format_compact!(
                        "{} {}: {section} {reason}",
                        header.opcode.label(),
                        if header.magic.is_response() { "response" } else { "request" },
                    ),
                ));
            }
        }
    }
}

impl Dissector for KvDissector {
    fn name(&self) -> &'static str {
        "kv"
    }

    fn display_name(&self) -> &'static str {
        "Key/Value Binary Protocol"
    }

    fn can_dissect(&self, ctx: &UnitContext) -> Option<u32> {
        (ctx.medium == Medium::Stream).then_some(100)
    }

    fn dissect<'a>(&self, data: &'a [u8], _ctx: &UnitContext) -> Result<DecodedUnit<'a>> {
        let cur = ByteCursor::new(data);
        let mut unit = DecodedUnit::new(self.name());

        let header = decode_header(&cur, &mut unit.anomalies)?;

        unit.push_field("magic", FieldValue::UInt8(header.magic.raw()));
        unit.push_field("opcode", FieldValue::UInt8(header.opcode.raw()));
        unit.push_field("key_length", FieldValue::UInt16(header.key_length));
        unit.push_field("extras_length", FieldValue::UInt8(header.extras_length));
        unit.push_field("data_type", FieldValue::UInt8(header.data_type));
        if header.magic.is_response() {
            unit.push_field("status", FieldValue::UInt16(header.vbucket_or_status));
        } else {
            unit.push_field("vbucket", FieldValue::UInt16(header.vbucket_or_status));
        }
        unit.push_field("total_body_length", FieldValue::UInt32(header.total_body_length));
        unit.push_field("opaque", FieldValue::UInt32(header.opaque));
        unit.push_field("cas", FieldValue::UInt64(header.cas));

        let body = decode_body(&header, &cur, &mut unit.anomalies);
        Self::check_policy(&header, &body, &mut unit);

        if !body.extras.is_empty() {
            unit.push_field("extras", FieldValue::Bytes(body.extras));
        }
        if !body.key.is_empty() {
            match std::str::from_utf8(body.key) {
                Ok(s) => unit.push_field("key", FieldValue::Str(s)),
                Err(_) => unit.push_field("key", FieldValue::Bytes(body.key)),
            }
        }
        if let Some(path_length) = body.path_length {
            unit.push_field("path_length", FieldValue::UInt16(path_length));
        }

        // Mutation responses have no defined spec layout, so their value
        // stays opaque.
        let spec_list = header.opcode.is_subdoc_multi()
            && !(header.magic.is_response() && header.opcode == KvOpcode::SubdocMultiMutation);
        if spec_list && !body.value.is_empty() {
            // Envelope cursor keeps absolute offsets for per-path anomalies.
            let value_off = HEADER_LEN + body.extras.len() + body.key.len();
            if let Ok(envelope) = cur.subrange(value_off, body.value.len()) {
                decode_subdoc_specs(&header, envelope, &mut unit);
            }
        } else if !body.value.is_empty() {
            unit.push_field("value", FieldValue::Bytes(body.value));
        }
        unit.payload = Payload::Slice(body.value);

        unit.summary = format_compact!(
            "{} {}, key {} bytes, body {} bytes",
            header.opcode.label(),
            if header.magic.is_response() { "response" } else { "request" },
            body.key.len(),
            header.total_body_length,
        );
        Ok(unit)
    }

    fn schema_fields(&self) -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::new("magic", DataKind::UInt8).with_enums(MAGIC_NAMES),
            FieldDescriptor::new("opcode", DataKind::UInt8).with_enums(OPCODE_NAMES),
            FieldDescriptor::new("key_length", DataKind::UInt16),
            FieldDescriptor::new("extras_length", DataKind::UInt8),
            FieldDescriptor::new("data_type", DataKind::UInt8).with_display(DisplayFormat::Hex),
            FieldDescriptor::nullable("vbucket", DataKind::UInt16),
            FieldDescriptor::nullable("status", DataKind::UInt16).with_display(DisplayFormat::Hex),
            FieldDescriptor::new("total_body_length", DataKind::UInt32),
            FieldDescriptor::new("opaque", DataKind::UInt32).with_display(DisplayFormat::Hex),
            FieldDescriptor::new("cas", DataKind::UInt64).with_display(DisplayFormat::Hex),
            FieldDescriptor::nullable("extras", DataKind::Binary).with_display(DisplayFormat::Bytes),
            FieldDescriptor::nullable("key", DataKind::String).with_display(DisplayFormat::Text),
            FieldDescriptor::nullable("value", DataKind::Binary).with_display(DisplayFormat::Bytes),
            FieldDescriptor::nullable("path_length", DataKind::UInt16),
            FieldDescriptor::nullable("subdoc_spec_count", DataKind::UInt32),
            FieldDescriptor::nullable("subdoc_specs", DataKind::List(Box::new(DataKind::Binary))),
            FieldDescriptor::payload(),
        ]
    }
}
