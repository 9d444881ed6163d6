//! Search engines behind the match-action tables.
//!
//! Every table is implemented by one of three engines. The engine decides
//! how rules are serialized and where they land in the component space;
//! the [`crate::table::Table`] above it only decides which rules exist.
//!
//! - [`tcam`]: ternary rows, priority by row address
//! - [`cuckoo`]: exact match placed by multi-table cuckoo hashing
//! - [`bstlpm`]: longest prefix match as sorted boundary records
//!
//! [`standard`] holds the action and key serialization they share and
//! [`prefix_set`] the prefix tree the LPM engine is built on.

pub mod bstlpm;
pub mod cuckoo;
pub mod prefix_set;
pub mod standard;
pub mod tcam;

pub use bstlpm::{LpmComponent, LpmEngine};
pub use cuckoo::{CuckooEngine, CuckooTable};
pub use prefix_set::{PrefixDump, PrefixSet};
pub use tcam::TcamEngine;

use crate::description::{DeviceConfig, TableDescription};
use p4dev_hw::{Mi32, P4DevResult, PollPolicy, RegisterAccess};
use p4dev_types::{EngineKind, Rule};

/// Everything an engine needs to talk to its table.
pub struct EngineContext<'a, R: RegisterAccess + ?Sized> {
    pub hw: &'a mut R,
    pub table: &'a TableDescription,
    pub poll: PollPolicy,
}

impl<'a, R: RegisterAccess + ?Sized> EngineContext<'a, R> {
    pub fn new(hw: &'a mut R, table: &'a TableDescription, poll: PollPolicy) -> Self {
        Self { hw, table, poll }
    }

    /// MI32 endpoint at the table offset.
    pub fn mi32(&mut self) -> Mi32<'_, R> {
        Mi32::new(&mut *self.hw, self.table.offset, self.poll)
    }
}

/// Engine of one table, selected once from the description.
#[derive(Debug)]
pub enum Engine {
    Tcam(TcamEngine),
    Cuckoo(CuckooEngine),
    Lpm(LpmEngine),
}

impl Engine {
    /// Creates the engine `table` asks for.
    ///
    /// The LPM engine reads its component geometry from `hw`; the others
    /// do not touch the hardware.
    pub fn new<R: RegisterAccess + ?Sized>(
        table: &TableDescription,
        hw: &mut R,
        config: &DeviceConfig,
    ) -> P4DevResult<Self> {
        Ok(match table.engine {
            EngineKind::Tcam => Engine::Tcam(TcamEngine::new()),
            EngineKind::Cuckoo => Engine::Cuckoo(CuckooEngine::new(table, config.cuckoo_tables)?),
            EngineKind::Lpm => Engine::Lpm(LpmEngine::probe(table, hw)?),
        })
    }

    pub fn kind(&self) -> EngineKind {
        match self {
            Engine::Tcam(_) => EngineKind::Tcam,
            Engine::Cuckoo(_) => EngineKind::Cuckoo,
            Engine::Lpm(_) => EngineKind::Lpm,
        }
    }

    /// Uploads the complete rule set of a table.
    ///
    /// `rules` are the ordinary rules in slot order, `default` the rule
    /// matched when nothing else does.
    pub fn write_rules<R: RegisterAccess + ?Sized>(
        &mut self,
        ctx: &mut EngineContext<'_, R>,
        rules: &[&Rule],
        default: Option<&Rule>,
    ) -> P4DevResult<()> {
        match self {
            Engine::Tcam(engine) => engine.insert_rules(ctx, rules, default),
            Engine::Cuckoo(engine) => engine.insert_rules(ctx, rules, default),
            Engine::Lpm(engine) => engine.insert_rules(ctx, rules, default),
        }
    }

    /// Resets the table in hardware.
    pub fn initialize<R: RegisterAccess + ?Sized>(&mut self, ctx: &mut EngineContext<'_, R>) -> P4DevResult<()> {
        match self {
            Engine::Tcam(engine) => engine.initialize(ctx),
            Engine::Cuckoo(engine) => engine.initialize(ctx),
            Engine::Lpm(engine) => engine.initialize(ctx),
        }
    }

    pub fn enable<R: RegisterAccess + ?Sized>(&self, ctx: &mut EngineContext<'_, R>) -> P4DevResult<()> {
        match self {
            Engine::Lpm(engine) => {
                engine.component().enable(&mut *ctx.hw);
                Ok(())
            }
            _ => ctx.mi32().enable(),
        }
    }

    pub fn disable<R: RegisterAccess + ?Sized>(&self, ctx: &mut EngineContext<'_, R>) -> P4DevResult<()> {
        match self {
            Engine::Lpm(engine) => {
                engine.component().disable(&mut *ctx.hw);
                Ok(())
            }
            _ => ctx.mi32().disable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::DeviceDescription;
    use crate::HardwareDescription;
    use p4dev_hw::SimulatedRegisters;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_engine_selection() {
        let desc = DeviceDescription::sample();
        let config = DeviceConfig::default();
        let mut hw = SimulatedRegisters::new();
        hw.attach_lpm(0x0, 32, 8, 4);

        for (name, kind) in [
            ("ipv4_lpm", EngineKind::Lpm),
            ("send_frame", EngineKind::Cuckoo),
            ("forward", EngineKind::Tcam),
        ] {
            let engine = Engine::new(desc.table(name).unwrap(), &mut hw, &config).unwrap();
            assert_eq!(engine.kind(), kind);
        }
    }

    #[test]
    fn test_enable_disable() {
        let desc = DeviceDescription::sample();
        let config = DeviceConfig::default();
        let mut hw = SimulatedRegisters::new();
        hw.attach_lpm(0x0, 32, 8, 4);
        hw.attach_mi32(0x200);

        let lpm = desc.table("ipv4_lpm").unwrap();
        let engine = Engine::new(lpm, &mut hw, &config).unwrap();
        let mut ctx = EngineContext::new(&mut hw, lpm, config.poll_policy());
        engine.enable(&mut ctx).unwrap();
        assert!(hw.lpm_enabled(0x0));

        let tcam = desc.table("forward").unwrap();
        let engine = Engine::new(tcam, &mut hw, &config).unwrap();
        let mut ctx = EngineContext::new(&mut hw, tcam, config.poll_policy());
        engine.enable(&mut ctx).unwrap();
        engine.disable(&mut ctx).unwrap();
        assert!(!hw.mi32_enabled(0x200));
    }
}
