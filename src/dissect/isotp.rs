//! Segmented transport-layer dissector (ISO 15765 style).
//!
//! Each unit carries a 4-bit type tag in its first post-address byte:
//! single frame, first frame, consecutive frame or flow control. Single
//! frames are terminal. First frames open a reassembly flow; consecutive
//! frames feed it; flow-control frames carry window/timing parameters and
//! never payload. Field offsets are parameterized by the medium's
//! addressing width, never hard-coded.
//!
//! The dissector itself is stateless; cross-unit state lives in the
//! [`ReassemblyEngine`](crate::reassembly::ReassemblyEngine) owned by the
//! session, which routes units through [`IsotpDissector::dissect_with_engine`].

use compact_str::format_compact;

use crate::cursor::ByteCursor;
use crate::error::{Error, Result};
use crate::reassembly::{FlowKey, FragmentOutcome, ReassemblyEngine};
use crate::schema::{DataKind, DisplayFormat, EnumTable, FieldDescriptor};

use super::{Anomaly, AnomalyKind, DecodedUnit, Dissector, FieldValue, Medium, Payload, UnitContext};

/// Number of address prefix bytes preceding the protocol control byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressWidth {
    /// No in-payload addressing (classic point-to-point CAN).
    #[default]
    None,
    /// One extended-address byte.
    Single,
    /// Two address bytes (network variant).
    Double,
}

impl AddressWidth {
    pub fn bytes(self) -> usize {
        match self {
            AddressWidth::None => 0,
            AddressWidth::Single => 1,
            AddressWidth::Double => 2,
        }
    }
}

/// Frame classification from the 4-bit type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Single,
    First,
    Consecutive,
    FlowControl,
}

impl FrameType {
    /// Tags 4..=15 are numerically valid bit patterns with no defined
    /// meaning; there is no safe fallback layout for them.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(FrameType::Single),
            1 => Some(FrameType::First),
            2 => Some(FrameType::Consecutive),
            3 => Some(FrameType::FlowControl),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FrameType::Single => "Single Frame",
            FrameType::First => "First Frame",
            FrameType::Consecutive => "Consecutive Frame",
            FrameType::FlowControl => "Flow Control",
        }
    }
}

static FRAME_TYPE_NAMES: EnumTable = &[
    (0, "Single Frame"),
    (1, "First Frame"),
    (2, "Consecutive Frame"),
    (3, "Flow Control"),
];

/// Flow-control status nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    ContinueToSend,
    Wait,
    Overflow,
    Unknown(u8),
}

impl FlowStatus {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => FlowStatus::ContinueToSend,
            1 => FlowStatus::Wait,
            2 => FlowStatus::Overflow,
            other => FlowStatus::Unknown(other),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FlowStatus::ContinueToSend => "Continue To Send",
            FlowStatus::Wait => "Wait",
            FlowStatus::Overflow => "Overflow",
            FlowStatus::Unknown(_) => "Unknown",
        }
    }
}

static FLOW_STATUS_NAMES: EnumTable =
    &[(0, "Continue To Send"), (1, "Wait"), (2, "Overflow")];

/// One classified unit, fields laid out per its type.
#[derive(Debug, Clone, PartialEq)]
pub enum IsotpFrame<'data> {
    Single {
        declared_len: usize,
        payload: &'data [u8],
    },
    First {
        total_len: usize,
        payload: &'data [u8],
    },
    Consecutive {
        seq: u8,
        payload: &'data [u8],
    },
    FlowControl {
        status: FlowStatus,
        block_size: u8,
        st_min: u8,
    },
}

/// Map a 4-bit wrapping sequence number to an absolute sequence relative
/// to the flow's next expected value. Deltas above 8 map backward only
/// when the result lands on a fragment that was already accepted (a
/// redelivery); otherwise they expand forward so the engine can reject
/// the jump as a sequence error.
fn expand_sequence(expected: u64, seq4: u8) -> u64 {
    let forward = u64::from(seq4.wrapping_sub((expected & 0xf) as u8) & 0xf);
    let candidate = expected + forward;
    if forward > 8 && candidate > 16 {
        candidate - 16
    } else {
        candidate
    }
}

/// Segmented transport dissector.
#[derive(Debug, Clone, Copy, Default)]
pub struct IsotpDissector {
    pub address_width: AddressWidth,
}

impl IsotpDissector {
    pub fn new(address_width: AddressWidth) -> Self {
        Self { address_width }
    }

    fn flow_key(&self, ctx: &UnitContext) -> FlowKey {
        FlowKey {
            medium: ctx.medium,
            flow_id: ctx.flow_id,
            subaddress: ctx.subaddress,
        }
    }

    /// Classify one unit and extract its per-type fields.
    ///
    /// Pure function of the bytes and the configured addressing width.
    /// Fails hard only when the unit cannot hold the address prefix and
    /// the protocol control byte.
    pub fn classify<'a>(
        &self,
        data: &'a [u8],
        unit: &mut DecodedUnit<'a>,
    ) -> Result<Option<IsotpFrame<'a>>> {
        let addr = self.address_width.bytes();
        if data.len() < addr + 1 {
            return Err(Error::HeaderTooShort {
                protocol: "isotp",
                needed: addr + 1,
                have: data.len(),
            });
        }
        let cur = ByteCursor::new(data);

        match self.address_width {
            AddressWidth::None => {}
            AddressWidth::Single => {
                unit.push_field("address", FieldValue::UInt8(cur.read_u8(0)?));
            }
            AddressWidth::Double => {
                unit.push_field("address", FieldValue::UInt16(cur.read_u16(0)?));
            }
        }

        let pci = cur.read_u8(addr)?;
        let tag = pci >> 4;
        let Some(frame_type) = FrameType::from_tag(tag) else {
            // No defined field layout for this tag: fatal for this unit,
            // the flow's other units are unaffected.
            unit.push_anomaly(Anomaly::new(
                AnomalyKind::UnknownEnumValue,
                "frame_type",
                addr..addr + 1,
                format_compact!("undefined frame type tag 0x{tag:x}"),
            ));
            unit.summary = format_compact!("Undecodable frame (type tag 0x{tag:x})");
            return Ok(None);
        };
        unit.push_field("frame_type", FieldValue::UInt8(tag));

        let frame = match frame_type {
            FrameType::Single => {
                let nibble = (pci & 0x0f) as usize;
                // Escape form: zero nibble puts the length in the next byte.
                let (declared_len, data_off) = if nibble == 0 {
                    (self.read_escape_u8(&cur, addr + 1, unit)? as usize, addr + 2)
                } else {
                    (nibble, addr + 1)
                };
                let payload = self.clipped_payload(&cur, data_off, declared_len, unit);
                unit.push_field("sf_length", FieldValue::UInt16(declared_len as u16));
                IsotpFrame::Single { declared_len, payload }
            }
            FrameType::First => {
                let low = cur.read_u8(addr + 1).map_err(Error::from)?;
                let len12 = (usize::from(pci & 0x0f) << 8) | usize::from(low);
                // Escape form: a zero 12-bit length means a 32-bit length follows.
                let (total_len, data_off) = if len12 == 0 {
                    (cur.read_u32(addr + 2).map_err(Error::from)? as usize, addr + 6)
                } else {
                    (len12, addr + 2)
                };
                let payload = cur.slice(data_off, cur.len() - data_off).unwrap_or(&[]);
                unit.push_field("ff_total_length", FieldValue::UInt32(total_len as u32));
                IsotpFrame::First { total_len, payload }
            }
            FrameType::Consecutive => {
                let seq = pci & 0x0f;
                let payload = cur.slice(addr + 1, cur.len() - addr - 1).unwrap_or(&[]);
                unit.push_field("cf_sequence", FieldValue::UInt8(seq));
                IsotpFrame::Consecutive { seq, payload }
            }
            FrameType::FlowControl => {
                let status = FlowStatus::from_raw(pci & 0x0f);
                if let FlowStatus::Unknown(raw) = status {
                    unit.push_anomaly(Anomaly::new(
                        AnomalyKind::UnknownEnumValue,
                        "fc_flow_status",
                        addr..addr + 1,
                        format_compact!("unknown flow status 0x{raw:x}"),
                    ));
                }
                let block_size = self.optional_byte(&cur, addr + 1, "fc_block_size", unit);
                let st_min = self.optional_byte(&cur, addr + 2, "fc_st_min", unit);
                unit.push_field("fc_flow_status", FieldValue::UInt8(pci & 0x0f));
                unit.push_field("fc_block_size", FieldValue::UInt8(block_size));
                unit.push_field("fc_st_min", FieldValue::UInt8(st_min));
                IsotpFrame::FlowControl { status, block_size, st_min }
            }
        };
        Ok(Some(frame))
    }

    fn read_escape_u8(
        &self,
        cur: &ByteCursor<'_>,
        offset: usize,
        unit: &mut DecodedUnit<'_>,
    ) -> Result<u8> {
        cur.read_u8(offset).map_err(|oob| {
            unit.push_anomaly(Anomaly::new(
                AnomalyKind::OutOfBounds,
                "sf_length",
                offset..offset + 1,
                format_compact!("escape length byte missing: {oob}"),
            ));
            Error::from(oob)
        })
    }

    /// Slice the declared payload, clipping to the capture with an anomaly
    /// when the declaration overruns it.
    fn clipped_payload<'a>(
        &self,
        cur: &ByteCursor<'a>,
        offset: usize,
        declared: usize,
        unit: &mut DecodedUnit<'a>,
    ) -> &'a [u8] {
        let available = cur.len().saturating_sub(offset);
        if declared > available {
            unit.push_anomaly(Anomaly::new(
                AnomalyKind::LengthInconsistency,
                "sf_length",
                offset..cur.len(),
                format_compact!("declared length {declared} exceeds captured {available}, clipping"),
            ));
        }
        cur.slice(offset, declared.min(available)).unwrap_or(&[])
    }

    fn optional_byte(
        &self,
        cur: &ByteCursor<'_>,
        offset: usize,
        field: &'static str,
        unit: &mut DecodedUnit<'_>,
    ) -> u8 {
        match cur.read_u8(offset) {
            Ok(b) => b,
            Err(oob) => {
                unit.push_anomaly(Anomaly::new(
                    AnomalyKind::OutOfBounds,
                    field,
                    offset..offset + 1,
                    format_compact!("{oob}"),
                ));
                0
            }
        }
    }

    /// Full per-unit pass: classify, then drive the reassembly engine.
    ///
    /// Single frames deliver their payload directly. First frames open the
    /// flow's engine entry; consecutive frames feed it and, on the terminal
    /// fragment, carry the reassembled message out. Flow control frames are
    /// control-plane only.
    pub fn dissect_with_engine<'a>(
        &self,
        data: &'a [u8],
        ctx: &UnitContext,
        engine: &mut ReassemblyEngine,
    ) -> Result<DecodedUnit<'a>> {
        let mut unit = DecodedUnit::new(self.name());
        let Some(frame) = self.classify(data, &mut unit)? else {
            return Ok(unit);
        };
        let key = self.flow_key(ctx);

        match frame {
            IsotpFrame::Single { declared_len, payload } => {
                unit.payload = Payload::Slice(payload);
                unit.summary = format_compact!("Single Frame, len={declared_len}");
            }
            IsotpFrame::First { total_len, payload } => {
                match engine.start(key, total_len, payload, ctx.frame_number) {
                    FragmentOutcome::Completed(msg) => {
                        unit.summary =
                            format_compact!("First Frame (message complete, {} bytes)", msg.data.len());
                        unit.payload = Payload::Reassembled {
                            data: msg.data,
                            fragment_frames: msg.fragment_frames,
                        };
                    }
                    _ => {
                        unit.summary = format_compact!(
                            "First Frame, total {total_len} bytes, {} in this frame",
                            payload.len()
                        );
                    }
                }
            }
            IsotpFrame::Consecutive { seq, payload } => {
                unit.summary = format_compact!("Consecutive Frame, seq={seq}");
                match engine.next_expected(&key) {
                    None => {
                        unit.push_anomaly(Anomaly::new(
                            AnomalyKind::ReassemblySequenceError,
                            "cf_sequence",
                            self.address_width.bytes()..self.address_width.bytes() + 1,
                            "consecutive frame without a first frame",
                        ));
                    }
                    Some(expected) => {
                        let abs_seq = expand_sequence(expected, seq);
                        match engine.add_fragment(key, abs_seq, payload, ctx.frame_number) {
                            FragmentOutcome::Completed(msg) => {
                                unit.summary = format_compact!(
                                    "Consecutive Frame, seq={seq} (message reassembled, {} bytes)",
                                    msg.data.len()
                                );
                                unit.payload = Payload::Reassembled {
                                    data: msg.data,
                                    fragment_frames: msg.fragment_frames,
                                };
                            }
                            FragmentOutcome::SequenceError { expected, got } => {
                                unit.push_anomaly(Anomaly::new(
                                    AnomalyKind::ReassemblySequenceError,
                                    "cf_sequence",
                                    self.address_width.bytes()..self.address_width.bytes() + 1,
                                    format_compact!(
                                        "sequence {got} outside reorder window (expected {expected}); flow abandoned"
                                    ),
                                ));
                            }
                            FragmentOutcome::Discarded => {
                                unit.push_anomaly(Anomaly::new(
                                    AnomalyKind::ReassemblySequenceError,
                                    "cf_sequence",
                                    self.address_width.bytes()..self.address_width.bytes() + 1,
                                    "fragment for an abandoned flow",
                                ));
                            }
                            FragmentOutcome::Accepted | FragmentOutcome::NoFlow => {}
                        }
                    }
                }
            }
            IsotpFrame::FlowControl { status, block_size, st_min } => {
                unit.summary = format_compact!(
                    "Flow Control ({}), bs={block_size}, stmin=0x{st_min:02x}",
                    status.label()
                );
            }
        }
        Ok(unit)
    }
}

impl Dissector for IsotpDissector {
    fn name(&self) -> &'static str {
        "isotp"
    }

    fn display_name(&self) -> &'static str {
        "ISO 15765 Transport"
    }

    fn can_dissect(&self, ctx: &UnitContext) -> Option<u32> {
        matches!(
            ctx.medium,
            Medium::Can | Medium::CanFd | Medium::Lin | Medium::FlexRay
        )
        .then_some(100)
    }

    /// Stateless single-unit pass: per-type fields only, no reassembly.
    fn dissect<'a>(&self, data: &'a [u8], _ctx: &UnitContext) -> Result<DecodedUnit<'a>> {
        let mut unit = DecodedUnit::new(self.name());
        if let Some(frame) = self.classify(data, &mut unit)? {
            match frame {
                IsotpFrame::Single { declared_len, payload } => {
                    unit.payload = Payload::Slice(payload);
                    unit.summary = format_compact!("Single Frame, len={declared_len}");
                }
                IsotpFrame::First { total_len, .. } => {
                    unit.summary = format_compact!("First Frame, total {total_len} bytes");
                }
                IsotpFrame::Consecutive { seq, .. } => {
                    unit.summary = format_compact!("Consecutive Frame, seq={seq}");
                }
                IsotpFrame::FlowControl { status, block_size, st_min } => {
                    unit.summary = format_compact!(
                        "Flow Control ({}), bs={block_size}, stmin=0x{st_min:02x}",
                        status.label()
                    );
                }
            }
        }
        Ok(unit)
    }

    fn schema_fields(&self) -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::nullable("address", DataKind::UInt16).with_display(DisplayFormat::Hex),
            FieldDescriptor::new("frame_type", DataKind::UInt8).with_enums(FRAME_TYPE_NAMES),
            FieldDescriptor::nullable("sf_length", DataKind::UInt16),
            FieldDescriptor::nullable("ff_total_length", DataKind::UInt32),
            FieldDescriptor::nullable("cf_sequence", DataKind::UInt8),
            FieldDescriptor::nullable("fc_flow_status", DataKind::UInt8)
                .with_enums(FLOW_STATUS_NAMES),
            FieldDescriptor::nullable("fc_block_size", DataKind::UInt8),
            FieldDescriptor::nullable("fc_st_min", DataKind::UInt8).with_display(DisplayFormat::Hex),
            FieldDescriptor::payload(),
        ]
    }
}
