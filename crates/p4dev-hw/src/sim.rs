//! In-memory register space that emulates the P4 table components.
//!
//! [`SimulatedRegisters`] behaves like plain memory except in windows where
//! a component has been attached:
//!
//! - an MI32 window latches address, key, mask and record writes and
//!   commits a row when [`CMD_WRITE_RECORD`] is set;
//! - an LPM window exposes its geometry register, takes record bursts and
//!   serves readback requests.
//!
//! Every write is recorded in a journal so tests can check what reached the
//! bus. [`SimulatedRegisters::set_stalled`] freezes the command registers to
//! exercise timeout handling.

use crate::access::RegisterAccess;
use crate::lpm::{LpmGeometry, LPM_READ_FLAG, LPM_VALID_FLAG};
use crate::mi32::{
    ADDRESS_REG_OFFSET, CMD_BUSY_FLAG, CMD_ENABLE_TABLE, CMD_INVALIDATE_ROW, CMD_REG_OFFSET,
    CMD_WRITE_RECORD, KEY_REG_OFFSET, MASK_REG_OFFSET, RECORD_REG_OFFSET,
};
use log::debug;
use std::collections::BTreeMap;

const MI32_WINDOW: u32 = RECORD_REG_OFFSET + 4;

/// A committed MI32 row. Words are least significant first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mi32Row {
    pub key: Vec<u32>,
    pub mask: Vec<u32>,
    pub record: Vec<u32>,
}

#[derive(Debug, Default)]
struct Mi32Component {
    command: u32,
    address: u32,
    key: Vec<u32>,
    mask: Vec<u32>,
    record: Vec<u32>,
    rows: BTreeMap<u32, Mi32Row>,
}

impl Mi32Component {
    fn commit(&mut self, command: u32) {
        let address = self.address;
        if command & CMD_INVALIDATE_ROW != 0 {
            debug!("sim: invalidate row {}", address);
            self.rows.remove(&address);
        } else {
            let row = Mi32Row {
                key: self.key.iter().rev().copied().collect(),
                mask: self.mask.iter().rev().copied().collect(),
                record: self.record.iter().rev().copied().collect(),
            };
            debug!("sim: commit row {}", address);
            self.rows.insert(address, row);
        }
        self.key.clear();
        self.mask.clear();
        self.record.clear();
        self.command = command & !(CMD_WRITE_RECORD | CMD_INVALIDATE_ROW);
    }
}

#[derive(Debug)]
struct LpmComponent {
    geometry: u32,
    item_words: usize,
    enabled: bool,
    window: Vec<u32>,
    records: BTreeMap<u32, Vec<u32>>,
}

impl LpmComponent {
    fn new(geometry: LpmGeometry) -> Self {
        let item_words = geometry.item_words();
        Self {
            geometry: geometry.to_register(),
            item_words,
            enabled: false,
            window: vec![0; item_words],
            records: BTreeMap::new(),
        }
    }

    fn control(&mut self, value: u32) {
        let addr = value & !(LPM_VALID_FLAG | LPM_READ_FLAG);
        if value & LPM_READ_FLAG != 0 {
            match self.records.get(&addr) {
                Some(record) => {
                    self.window[..record.len()].copy_from_slice(record);
                    self.window[self.item_words - 1] = addr | LPM_VALID_FLAG;
                }
                None => self.window.iter_mut().for_each(|w| *w = 0),
            }
        } else if value & LPM_VALID_FLAG != 0 {
            let record = self.window[..self.item_words - 1].to_vec();
            self.records.insert(addr, record);
        } else {
            self.records.remove(&addr);
        }
    }
}

/// Simulated component space.
#[derive(Debug, Default)]
pub struct SimulatedRegisters {
    memory: BTreeMap<u32, u32>,
    journal: Vec<(u32, u32)>,
    mi32: BTreeMap<u32, Mi32Component>,
    lpm: BTreeMap<u32, LpmComponent>,
    stalled: bool,
}

impl SimulatedRegisters {
    /// Creates an empty register space.
    pub fn new() -> Self {
        Self::default()
    }

    /// Emulates an MI32 table at `base`.
    pub fn attach_mi32(&mut self, base: u32) -> &mut Self {
        self.mi32.insert(base, Mi32Component::default());
        self
    }

    /// Emulates a BST-LPM component at `base` with the given geometry.
    pub fn attach_lpm(&mut self, base: u32, key_width: u32, data_width: u32, stages: u32) -> &mut Self {
        let geometry = LpmGeometry {
            key_width,
            data_width,
            stages,
        };
        self.lpm.insert(base, LpmComponent::new(geometry));
        self
    }

    /// While stalled, command registers never clear and report busy.
    pub fn set_stalled(&mut self, stalled: bool) {
        self.stalled = stalled;
    }

    /// Stores a value in plain memory without going through the journal.
    pub fn poke(&mut self, offset: u32, value: u32) {
        self.memory.insert(offset, value);
    }

    /// Reads plain memory without side effects.
    pub fn peek(&self, offset: u32) -> u32 {
        self.memory.get(&offset).copied().unwrap_or(0)
    }

    /// All writes seen so far as `(offset, value)` pairs.
    pub fn journal(&self) -> &[(u32, u32)] {
        &self.journal
    }

    pub fn clear_journal(&mut self) {
        self.journal.clear();
    }

    /// Committed row of the MI32 table at `base`.
    pub fn mi32_row(&self, base: u32, address: u32) -> Option<&Mi32Row> {
        self.mi32.get(&base).and_then(|c| c.rows.get(&address))
    }

    /// Addresses of all committed rows of the MI32 table at `base`.
    pub fn mi32_addresses(&self, base: u32) -> Vec<u32> {
        self.mi32
            .get(&base)
            .map(|c| c.rows.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn mi32_enabled(&self, base: u32) -> bool {
        self.mi32
            .get(&base)
            .is_some_and(|c| c.command & CMD_ENABLE_TABLE != 0)
    }

    /// Valid record at `address` of the LPM component at `base`, without
    /// its address word.
    pub fn lpm_record(&self, base: u32, address: u32) -> Option<&[u32]> {
        self.lpm
            .get(&base)
            .and_then(|c| c.records.get(&address))
            .map(Vec::as_slice)
    }

    /// Number of valid records of the LPM component at `base`.
    pub fn lpm_record_count(&self, base: u32) -> usize {
        self.lpm.get(&base).map_or(0, |c| c.records.len())
    }

    pub fn lpm_enabled(&self, base: u32) -> bool {
        self.lpm.get(&base).is_some_and(|c| c.enabled)
    }

    fn mi32_at(&mut self, offset: u32) -> Option<(u32, &mut Mi32Component)> {
        self.mi32
            .range_mut(..=offset)
            .next_back()
            .filter(|(base, _)| offset - **base < MI32_WINDOW)
            .map(|(base, c)| (offset - *base, c))
    }

    fn lpm_at(&mut self, offset: u32) -> Option<(usize, &mut LpmComponent)> {
        self.lpm
            .range_mut(..=offset)
            .next_back()
            .filter(|(base, c)| (offset - **base) % 4 == 0 && ((offset - **base) / 4) as usize <= c.item_words)
            .map(|(base, c)| (((offset - *base) / 4) as usize, c))
    }
}

impl RegisterAccess for SimulatedRegisters {
    fn read_word(&mut self, offset: u32) -> u32 {
        let stalled = self.stalled;
        if let Some((reg, component)) = self.mi32_at(offset) {
            return match reg {
                CMD_REG_OFFSET if stalled => component.command | CMD_BUSY_FLAG,
                CMD_REG_OFFSET => component.command,
                ADDRESS_REG_OFFSET => component.address,
                _ => 0,
            };
        }
        if let Some((index, component)) = self.lpm_at(offset) {
            return match index {
                0 => component.geometry,
                n => component.window[n - 1],
            };
        }
        self.peek(offset)
    }

    fn write_word(&mut self, offset: u32, value: u32) {
        self.journal.push((offset, value));
        let stalled = self.stalled;

        if let Some((reg, component)) = self.mi32_at(offset) {
            match reg {
                CMD_REG_OFFSET if value & CMD_WRITE_RECORD != 0 && !stalled => {
                    component.commit(value)
                }
                CMD_REG_OFFSET => component.command = value,
                ADDRESS_REG_OFFSET => component.address = value,
                KEY_REG_OFFSET => component.key.push(value),
                MASK_REG_OFFSET => component.mask.push(value),
                RECORD_REG_OFFSET => component.record.push(value),
                _ => {}
            }
            return;
        }

        if let Some((index, component)) = self.lpm_at(offset) {
            match index {
                0 => component.enabled = value & CMD_ENABLE_TABLE != 0,
                n if n == component.item_words => {
                    component.window[n - 1] = value;
                    component.control(value);
                }
                n => component.window[n - 1] = value,
            }
            return;
        }

        self.memory.insert(offset, value);
    }
}
