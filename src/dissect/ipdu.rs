//! Multiplexed-PDU dissector.
//!
//! A container unit carries several sub-PDUs at configured bit positions.
//! The slicing table is external configuration: an immutable snapshot
//! constructed whole and handed to the session. Reconfiguration means
//! constructing a new snapshot, never mutating one mid-decode. The table
//! is treated as already-validated input; entries that do not fit the
//! captured payload are clipped/skipped with an anomaly, never read out
//! of bounds.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use compact_str::format_compact;

use crate::error::Result;
use crate::schema::{DataKind, FieldDescriptor};

use super::{Anomaly, AnomalyKind, DecodedUnit, Dissector, FieldValue, Medium, UnitContext};

/// One slicing entry: where a sub-PDU lives within the container payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpduMapping {
    /// Bit position of the sub-PDU within the container payload.
    pub bit_offset: u32,
    /// Sub-PDU length in bits.
    pub bit_length: u32,
    /// Downstream PDU identifier the slice is dispatched under.
    pub pdu_id: u32,
    /// Optional update-bit position: when clear, the slice holds stale
    /// data and the entry is skipped silently.
    pub update_bit: Option<u32>,
}

impl IpduMapping {
    pub fn new(bit_offset: u32, bit_length: u32, pdu_id: u32) -> Self {
        Self {
            bit_offset,
            bit_length,
            pdu_id,
            update_bit: None,
        }
    }

    /// Builder: guard the entry behind an update bit.
    pub fn with_update_bit(mut self, bit: u32) -> Self {
        self.update_bit = Some(bit);
        self
    }
}

/// Immutable slicing configuration: message id to mapping list.
#[derive(Debug, Clone, Default)]
pub struct IpduConfig {
    entries: HashMap<u32, Vec<IpduMapping>>,
}

impl IpduConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: add a mapping for a container message id.
    pub fn with_mapping(mut self, message_id: u32, mapping: IpduMapping) -> Self {
        self.entries.entry(message_id).or_default().push(mapping);
        self
    }

    /// Mappings configured for a container message id.
    pub fn mappings_for(&self, message_id: u32) -> &[IpduMapping] {
        self.entries.get(&message_id).map_or(&[], Vec::as_slice)
    }

    /// Number of configured container message ids.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One extracted sub-PDU, ready for downstream dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubPdu<'data> {
    pub pdu_id: u32,
    pub data: &'data [u8],
    /// Byte range the slice covers within the container unit.
    pub range: Range<usize>,
}

fn bit_set(payload: &[u8], bit: u32) -> Option<bool> {
    let byte = (bit / 8) as usize;
    payload
        .get(byte)
        .map(|b| b & (0x80 >> (bit % 8)) != 0)
}

/// Multiplexed-PDU dissector.
#[derive(Debug, Clone, Default)]
pub struct IpduDissector {
    config: Arc<IpduConfig>,
}

impl IpduDissector {
    pub fn new(config: Arc<IpduConfig>) -> Self {
        Self { config }
    }

    /// Slice the container payload per the configured mappings.
    ///
    /// Returns the decoded container unit plus the extracted sub-PDUs. An
    /// entry whose declared bit range exceeds the captured payload is
    /// skipped with an anomaly; all other entries still decode.
    pub fn extract<'a>(
        &self,
        data: &'a [u8],
        ctx: &UnitContext,
    ) -> (DecodedUnit<'a>, Vec<SubPdu<'a>>) {
        let mut unit = DecodedUnit::new(self.name());
        let message_id = ctx.flow_id;
        unit.push_field("message_id", FieldValue::UInt32(message_id));

        let mappings = self.config.mappings_for(message_id);
        let mut pdus = Vec::with_capacity(mappings.len());

        for mapping in mappings {
            if let Some(update_bit) = mapping.update_bit {
                match bit_set(data, update_bit) {
                    // Update bit clear: slice holds stale data, skip silently.
                    Some(false) => continue,
                    Some(true) => {}
                    None => {
                        unit.push_anomaly(Anomaly::new(
                            AnomalyKind::LengthInconsistency,
                            "update_bit",
                            0..data.len(),
                            format_compact!(
                                "update bit {update_bit} of PDU {} beyond captured payload",
                                mapping.pdu_id
                            ),
                        ));
                        continue;
                    }
                }
            }

            let start = (mapping.bit_offset / 8) as usize;
            let len = mapping.bit_length.div_ceil(8) as usize;
            let Some(slice) = data.get(start..start + len) else {
                unit.push_anomaly(Anomaly::new(
                    AnomalyKind::LengthInconsistency,
                    "pdu_mapping",
                    start.min(data.len())..data.len(),
                    format_compact!(
                        "PDU {} declared at bits {}..{} exceeds captured {} bytes, skipping",
                        mapping.pdu_id,
                        mapping.bit_offset,
                        mapping.bit_offset + mapping.bit_length,
                        data.len()
                    ),
                ));
                continue;
            };

            pdus.push(SubPdu {
                pdu_id: mapping.pdu_id,
                data: slice,
                range: start..start + len,
            });
        }

        unit.push_field("pdu_count", FieldValue::UInt32(pdus.len() as u32));
        unit.push_field(
            "pdu_ids",
            FieldValue::List(pdus.iter().map(|p| FieldValue::UInt32(p.pdu_id)).collect()),
        );
        unit.summary = format_compact!(
            "I-PDU container 0x{message_id:x}, {} of {} sub-PDUs",
            pdus.len(),
            mappings.len()
        );
        (unit, pdus)
    }
}

impl Dissector for IpduDissector {
    fn name(&self) -> &'static str {
        "ipdu"
    }

    fn display_name(&self) -> &'static str {
        "Multiplexed I-PDU"
    }

    fn can_dissect(&self, ctx: &UnitContext) -> Option<u32> {
        (ctx.medium == Medium::PduTransport).then_some(100)
    }

    fn dissect<'a>(&self, data: &'a [u8], ctx: &UnitContext) -> Result<DecodedUnit<'a>> {
        let (unit, _) = self.extract(data, ctx);
        Ok(unit)
    }

    fn schema_fields(&self) -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::new("message_id", DataKind::UInt32)
                .with_display(crate::schema::DisplayFormat::Hex),
            FieldDescriptor::new("pdu_count", DataKind::UInt32),
            FieldDescriptor::new("pdu_ids", DataKind::List(Box::new(DataKind::UInt32))),
            FieldDescriptor::payload(),
        ]
    }
}
