//! Session orchestration.
//!
//! A [`Session`] owns everything with cross-unit lifetime: the dissector
//! registry, the reassembly engine, the sub-dissector table and the
//! container mapping configuration. The host feeds captured units in
//! arrival order through [`Session::process_unit`] and gets back the
//! decoded top-level unit plus any child units produced by payload
//! dispatch.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::dispatch::{KeySpace, Subdissector, SubdissectorTable};
use crate::dissect::{
    AddressWidth, BuiltinDissector, DecodedUnit, Dissector, DissectorRegistry, FieldValue,
    IpduConfig, IpduDissector, IsotpDissector, Medium, Payload, UnitContext,
};
use crate::error::{Error, Result};
use crate::reassembly::{ReassemblyEngine, ReassemblyStats};
use crate::schema::{FieldCatalog, FieldDescriptor};

/// Per-session knobs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How far ahead of the next expected fragment a sequence number may
    /// land before the flow is abandoned.
    pub reorder_window: u64,
    /// Address prefix width for segmented transports on CAN media.
    pub can_address_width: AddressWidth,
    /// Address prefix width for segmented transports on LIN.
    pub lin_address_width: AddressWidth,
    /// Address prefix width for segmented transports on FlexRay.
    pub flexray_address_width: AddressWidth,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reorder_window: ReassemblyEngine::DEFAULT_WINDOW,
            can_address_width: AddressWidth::None,
            lin_address_width: AddressWidth::Single,
            flexray_address_width: AddressWidth::Single,
        }
    }
}

/// Per-session counters, cheap enough to keep unconditionally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub units_processed: u64,
    pub units_failed: u64,
    pub children_dispatched: u64,
}

/// Stateful decode session.
pub struct Session {
    registry: DissectorRegistry,
    engine: ReassemblyEngine,
    subdissectors: SubdissectorTable,
    ipdu: IpduDissector,
    config: SessionConfig,
    stats: SessionStats,
}

impl Session {
    pub fn new(config: SessionConfig, ipdu_config: Arc<IpduConfig>) -> Self {
        Self {
            registry: crate::dissect::default_registry(),
            engine: ReassemblyEngine::new(config.reorder_window),
            subdissectors: SubdissectorTable::new(),
            ipdu: IpduDissector::new(ipdu_config),
            config,
            stats: SessionStats::default(),
        }
    }

    /// Swap in a new container mapping snapshot. Units decoded after this
    /// call see the new mappings; a decode already in flight never
    /// observes a partial update.
    pub fn set_ipdu_config(&mut self, config: Arc<IpduConfig>) {
        self.ipdu = IpduDissector::new(config);
    }

    /// Register a payload handler under `(key_space, key)`.
    pub fn register_subdissector(
        &mut self,
        key_space: KeySpace,
        key: impl Into<crate::dispatch::DispatchKey>,
        handler: Box<dyn Subdissector>,
    ) {
        self.subdissectors.register(key_space, key, handler);
    }

    /// Decode one captured unit.
    ///
    /// The first element of the returned vector is always the top-level
    /// unit; child units from payload dispatch follow in extraction order.
    /// A payload with no registered handler is left on its parent as
    /// opaque bytes, which is not an error.
    pub fn process_unit<'a>(
        &mut self,
        ctx: &UnitContext,
        data: &'a [u8],
    ) -> Result<Vec<DecodedUnit<'a>>> {
        self.stats.units_processed += 1;
        trace!(medium = ?ctx.medium, flow = ctx.flow_id, frame = ctx.frame_number, len = data.len(), "processing unit");

        let Some(dissector) = self.registry.find_dissector(ctx).cloned() else {
            self.stats.units_failed += 1;
            return Err(Error::NoDissector { medium: ctx.medium });
        };

        let result = match dissector {
            BuiltinDissector::Isotp(_) => self.process_segmented(ctx, data),
            BuiltinDissector::Ipdu(_) => Ok(self.process_container(ctx, data)),
            BuiltinDissector::Kv(d) => d.dissect(data, ctx).map(|unit| {
                let mut units = Vec::with_capacity(2);
                self.dispatch_kv_body(&unit, ctx, &mut units);
                units.insert(0, unit);
                units
            }),
        };
        if result.is_err() {
            self.stats.units_failed += 1;
        }
        result
    }

    /// Segmented-transport path: drive the reassembly engine, then hand a
    /// completed message (or a single-frame payload) to dispatch.
    fn process_segmented<'a>(
        &mut self,
        ctx: &UnitContext,
        data: &'a [u8],
    ) -> Result<Vec<DecodedUnit<'a>>> {
        let dissector = IsotpDissector::new(self.address_width(ctx.medium));
        let unit = dissector.dissect_with_engine(data, ctx, &mut self.engine)?;

        // An upstream hint can name the logical PDU id when it differs
        // from the bus-level flow id.
        let dispatch_id = ctx.hint("pdu_id").map_or(ctx.flow_id, |v| v as u32);

        let mut units = Vec::with_capacity(2);
        match &unit.payload {
            &Payload::Slice(payload) => {
                if let Some(child) =
                    self.subdissectors
                        .dispatch(KeySpace::PduId, dispatch_id, payload, ctx)
                {
                    self.stats.children_dispatched += 1;
                    units.push(child);
                }
            }
            Payload::Reassembled { data, .. } => {
                // The reassembled buffer lives inside the parent unit, so
                // the child must not borrow from it.
                if let Some(child) =
                    self.subdissectors
                        .dispatch(KeySpace::PduId, dispatch_id, data, ctx)
                {
                    self.stats.children_dispatched += 1;
                    units.push(child.into_owned());
                }
            }
            Payload::None => {}
        }
        units.insert(0, unit);
        Ok(units)
    }

    /// Container path: slice out sub-PDUs and dispatch each by its identifier.
    fn process_container<'a>(&mut self, ctx: &UnitContext, data: &'a [u8]) -> Vec<DecodedUnit<'a>> {
        let (unit, sub_pdus) = self.ipdu.extract(data, ctx);
        let mut units = Vec::with_capacity(1 + sub_pdus.len());
        units.push(unit);
        for sub in sub_pdus {
            match self
                .subdissectors
                .dispatch(KeySpace::PduId, sub.pdu_id, sub.data, ctx)
            {
                Some(child) => {
                    self.stats.children_dispatched += 1;
                    units.push(child);
                }
                None => {
                    debug!(pdu_id = sub.pdu_id, len = sub.data.len(), "sub-PDU left opaque");
                }
            }
        }
        units
    }

    /// Dispatch a key/value unit's value bytes by opcode.
    fn dispatch_kv_body<'a>(
        &mut self,
        unit: &DecodedUnit<'a>,
        ctx: &UnitContext,
        units: &mut Vec<DecodedUnit<'a>>,
    ) {
        let &Payload::Slice(payload) = &unit.payload else {
            return;
        };
        let Some(&FieldValue::UInt8(opcode)) = unit.get("opcode") else {
            return;
        };
        if let Some(child) =
            self.subdissectors
                .dispatch(KeySpace::KvOpcode, u32::from(opcode), payload, ctx)
        {
            self.stats.children_dispatched += 1;
            units.push(child);
        }
    }

    fn address_width(&self, medium: Medium) -> AddressWidth {
        match medium {
            Medium::Can | Medium::CanFd => self.config.can_address_width,
            Medium::Lin => self.config.lin_address_width,
            Medium::FlexRay => self.config.flexray_address_width,
            Medium::PduTransport | Medium::Stream => AddressWidth::None,
        }
    }

    /// Drop all in-flight reassembly state, keeping configuration and
    /// registered handlers.
    pub fn reset(&mut self) {
        debug!(flows = self.engine.flow_count(), "resetting session");
        self.engine.clear();
    }

    /// Field catalog built from every registered dissector's schema.
    pub fn field_catalog(&self) -> FieldCatalog {
        FieldCatalog::new(self.registry.combined_schema())
    }

    /// Combined schema of all registered dissectors.
    pub fn combined_schema(&self) -> Vec<FieldDescriptor> {
        self.registry.combined_schema()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn reassembly_stats(&self) -> ReassemblyStats {
        self.engine.stats()
    }

    /// Number of flows currently mid-reassembly.
    pub fn open_flows(&self) -> usize {
        self.engine.flow_count()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(SessionConfig::default(), Arc::new(IpduConfig::new()))
    }
}
