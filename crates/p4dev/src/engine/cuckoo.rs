//! Exact match engine placed by cuckoo hashing.
//!
//! The component holds `tables` hash tables of `2^addr_bits` rows each. A
//! key may live in exactly one row per table; the row is the CRC-16 of the
//! key rotated by the table index. Placement is computed in software
//! before anything is uploaded, and only the action record is written to
//! the chosen address.

use super::standard::{prepare_action, prepare_exact_key};
use super::EngineContext;
use crate::description::TableDescription;
use p4dev_hw::transaction::{word_count, words_to_bytes};
use p4dev_hw::{P4DevError, P4DevResult, RegisterAccess, WORD_BITS};
use p4dev_types::Rule;
use std::collections::BTreeMap;
use tracing::{debug, instrument, warn};

const CRC16_POLY: u16 = 0x8408;

const fn crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u16;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ CRC16_POLY } else { crc >> 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC16_TABLE: [u16; 256] = crc16_table();

/// Reflected CRC-16 over the low `bits` bits of `words`.
///
/// Words are consumed as little-endian bytes. A trailing partial byte only
/// contributes its low bits.
pub fn crc16(words: &[u32], bits: u32) -> u16 {
    let bytes = words_to_bytes(words);
    let mut input = bytes.iter().copied().chain(std::iter::repeat(0));
    let mut next = move || input.next().unwrap_or(0);

    let mut crc: u16 = 0;
    let mut remaining = bits;
    while remaining > 8 {
        let index = (crc ^ u16::from(next())) & 0xff;
        crc = CRC16_TABLE[usize::from(index)] ^ (crc >> 8);
        remaining -= 8;
    }
    if remaining == 0 {
        return crc;
    }

    let index = ((u32::from(crc) ^ u32::from(next())) << (8 - remaining)) & 0xff;
    CRC16_TABLE[index as usize] ^ (crc >> remaining)
}

/// Rotates the low `bits` bits of `key` left by `shift`.
pub fn permute(key: &[u32], shift: u32, bits: u32) -> Vec<u32> {
    let mut out = vec![0u32; word_count(bits)];
    if bits == 0 {
        return out;
    }
    let shift = shift % bits;
    for bit in 0..bits {
        let word = key.get((bit / WORD_BITS) as usize).copied().unwrap_or(0);
        if (word >> (bit % WORD_BITS)) & 1 == 1 {
            let to = (bit + shift) % bits;
            out[(to / WORD_BITS) as usize] |= 1 << (to % WORD_BITS);
        }
    }
    out
}

/// Software image of the cuckoo tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CuckooTable {
    tables: u32,
    addr_bits: u32,
    key_bits: u32,
    slots: Vec<Option<Vec<u32>>>,
}

impl CuckooTable {
    /// Creates `tables` empty tables holding at least `capacity` keys
    /// between them.
    pub fn new(tables: u32, capacity: u32, key_bits: u32) -> P4DevResult<Self> {
        if tables == 0 {
            return Err(P4DevError::AllocationError {
                message: "cuckoo engine needs at least one hash table".to_string(),
            });
        }

        let mut addr_bits = 0;
        while (u64::from(tables) << addr_bits) < u64::from(capacity) {
            addr_bits += 1;
        }

        Ok(Self {
            tables,
            addr_bits,
            key_bits,
            slots: vec![None; (tables as usize) << addr_bits],
        })
    }

    /// Number of hash tables.
    pub fn tables(&self) -> u32 {
        self.tables
    }

    /// Row address bits of one table.
    pub fn addr_bits(&self) -> u32 {
        self.addr_bits
    }

    /// Total number of addresses across all tables.
    pub fn slot_count(&self) -> u32 {
        self.tables << self.addr_bits
    }

    /// Number of placed keys.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Cuts `key` to the key width and clears the bits above it.
    pub fn mask_key(&self, key: &[u32]) -> Vec<u32> {
        let mut out = key.to_vec();
        out.resize(word_count(self.key_bits), 0);
        let tail = self.key_bits % WORD_BITS;
        if tail != 0 {
            if let Some(last) = out.last_mut() {
                *last &= (1u32 << tail) - 1;
            }
        }
        out
    }

    /// Address of `key` in hash table `table`.
    pub fn hash(&self, key: &[u32], table: u32) -> u32 {
        let rotated = permute(key, table, self.key_bits);
        let row = u32::from(crc16(&rotated, self.key_bits)) & ((1u32 << self.addr_bits) - 1);
        (table << self.addr_bits) | row
    }

    /// Places `key`, displacing earlier keys if needed.
    ///
    /// Every candidate address of the held key is tried before each
    /// displacement and once more after the last one. After as many
    /// displacements as there are addresses the attempt is abandoned and
    /// every displacement is undone, so a failed add leaves the tables
    /// exactly as they were. The rejected key is returned.
    pub fn add(&mut self, key: &[u32]) -> Result<(), Vec<u32>> {
        let mut key = self.mask_key(key);
        if self.find(&key).is_some() {
            return Ok(());
        }

        let budget = self.slot_count();
        let mut history = Vec::new();
        for step in 0..=budget {
            for table in 0..self.tables {
                let address = self.hash(&key, table) as usize;
                if self.slots[address].is_none() {
                    self.slots[address] = Some(key);
                    return Ok(());
                }
            }
            if step == budget {
                break;
            }

            let victim = self.hash(&key, step % self.tables) as usize;
            if let Some(occupant) = self.slots[victim].as_mut() {
                std::mem::swap(occupant, &mut key);
                history.push(victim);
            }
        }

        for address in history.into_iter().rev() {
            if let Some(occupant) = self.slots[address].as_mut() {
                std::mem::swap(occupant, &mut key);
            }
        }
        Err(key)
    }

    /// Probes the candidate addresses of `key`.
    pub fn find(&self, key: &[u32]) -> Option<u32> {
        let key = self.mask_key(key);
        (0..self.tables)
            .map(|table| self.hash(&key, table))
            .find(|address| self.slots[*address as usize].as_ref() == Some(&key))
    }

    /// Removes `key` and returns the address it occupied.
    pub fn remove(&mut self, key: &[u32]) -> Option<u32> {
        let address = self.find(key)?;
        self.slots[address as usize] = None;
        Some(address)
    }

    /// Keeps only the keys for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&[u32]) -> bool) {
        for slot in &mut self.slots {
            if slot.as_deref().is_some_and(|key| !keep(key)) {
                *slot = None;
            }
        }
    }

    /// Placed keys with their addresses, in address order.
    pub fn entries(&self) -> impl Iterator<Item = (u32, &[u32])> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(address, slot)| slot.as_deref().map(|key| (address as u32, key)))
    }
}

/// Upload state of one cuckoo table.
///
/// The placement and the records of the last upload are kept, so a new
/// upload only moves the keys it has to and only rewrites changed rows.
#[derive(Debug, Clone)]
pub struct CuckooEngine {
    placement: CuckooTable,
    uploaded: BTreeMap<u32, Vec<u32>>,
}

impl CuckooEngine {
    pub fn new(table: &TableDescription, tables: u32) -> P4DevResult<Self> {
        Ok(Self {
            placement: CuckooTable::new(tables, table.capacity, table.key_bit_width())?,
            uploaded: BTreeMap::new(),
        })
    }

    /// Current key placement.
    pub fn placement(&self) -> &CuckooTable {
        &self.placement
    }

    /// Places `rules` and writes the records whose address changed.
    ///
    /// The default rule has no row in the component and stays in software.
    #[instrument(level = "debug", skip_all, fields(table = %ctx.table.name, rules = rules.len()))]
    pub fn insert_rules<R: RegisterAccess + ?Sized>(
        &mut self,
        ctx: &mut EngineContext<'_, R>,
        rules: &[&Rule],
        default: Option<&Rule>,
    ) -> P4DevResult<()> {
        let table = ctx.table;
        if default.is_some() {
            debug!("Table {}: default rule is kept in software only", table.name);
        }

        let mut keys = Vec::with_capacity(rules.len());
        let mut records = Vec::with_capacity(rules.len());
        for rule in rules {
            let key = prepare_exact_key(table, &rule.key)?;
            keys.push(self.placement.mask_key(key.words()));
            records.push(prepare_action(table, rule)?.into_words());
        }

        let mut placement = self.placement.clone();
        placement.retain(|key| keys.iter().any(|k| k.as_slice() == key));
        for key in &keys {
            if placement.add(key).is_err() {
                warn!(
                    "Table {}: no free address for key {:x?} after {} displacements",
                    table.name,
                    key,
                    placement.slot_count()
                );
                return Err(P4DevError::UnableToInsert {
                    table: table.name.clone(),
                });
            }
        }

        let mut image = BTreeMap::new();
        for (key, record) in keys.iter().zip(records) {
            let address = placement.find(key).ok_or_else(|| P4DevError::UnableToInsert {
                table: table.name.clone(),
            })?;
            image.insert(address, record);
        }

        let mut written = 0;
        let mut mi32 = ctx.mi32();
        for (address, record) in &image {
            if self.uploaded.get(address) != Some(record) {
                mi32.write_row(*address, None, record)?;
                written += 1;
            }
        }
        let vacated: Vec<u32> = self
            .uploaded
            .keys()
            .filter(|address| !image.contains_key(address))
            .copied()
            .collect();
        for address in &vacated {
            mi32.invalidate_row(*address)?;
        }

        debug!(
            "Table {}: {} records placed, {} written, {} vacated",
            table.name,
            image.len(),
            written,
            vacated.len()
        );
        self.placement = placement;
        self.uploaded = image;
        Ok(())
    }

    /// Invalidates every address of every hash table.
    pub fn initialize<R: RegisterAccess + ?Sized>(&mut self, ctx: &mut EngineContext<'_, R>) -> P4DevResult<()> {
        let slots = self.placement.slot_count();
        let mut mi32 = ctx.mi32();
        for address in 0..slots {
            mi32.invalidate_row(address)?;
        }
        self.placement.retain(|_| false);
        self.uploaded.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::{DeviceConfig, DeviceDescription};
    use crate::HardwareDescription;
    use p4dev_hw::transaction::bytes_to_words;
    use p4dev_hw::SimulatedRegisters;
    use p4dev_types::{EngineKind, KeyElement, Param};
    use pretty_assertions::assert_eq;

    fn rule(dst: u32, port: u8) -> Rule {
        Rule::new("send_frame", EngineKind::Cuckoo, "forward")
            .with_key(KeyElement::exact("dst_addr", dst.to_le_bytes().to_vec()))
            .with_param(Param::new("port", vec![port]))
    }

    #[test]
    fn test_crc16() {
        assert_eq!(CRC16_TABLE[1], 0x1189);
        assert_eq!(CRC16_TABLE[0xff], 0x0f78);
        assert_eq!(crc16(&bytes_to_words(b"123456789"), 72), 0x2189);
        assert_eq!(crc16(&[0xffff_ffff], 0), 0);
        // bits above the length do not contribute
        assert_eq!(crc16(&[0x0000_0005], 4), crc16(&[0xffff_fff5], 4));
    }

    #[test]
    fn test_permute() {
        assert_eq!(permute(&[0b1001], 1, 4), vec![0b0011]);
        assert_eq!(permute(&[0x8000_0000, 0x1], 1, 33), vec![0x1, 0x1]);
        assert_eq!(permute(&[0xabcd], 16, 16), vec![0xabcd]);
    }

    #[test]
    fn test_geometry() {
        let table = CuckooTable::new(3, 16, 32).unwrap();
        assert_eq!(table.addr_bits(), 3);
        assert_eq!(table.slot_count(), 24);

        let table = CuckooTable::new(3, 3, 32).unwrap();
        assert_eq!(table.addr_bits(), 0);
        assert_eq!(table.hash(&[0x1234], 2), 2);

        assert!(matches!(
            CuckooTable::new(0, 16, 32),
            Err(P4DevError::AllocationError { .. })
        ));
    }

    #[test]
    fn test_hash_stays_in_its_table() {
        let table = CuckooTable::new(3, 16, 32).unwrap();
        for key in 0..64u32 {
            for t in 0..3 {
                assert_eq!(table.hash(&[key], t) >> table.addr_bits(), t);
            }
        }
    }

    #[test]
    fn test_add_find_remove() {
        let mut table = CuckooTable::new(3, 16, 32).unwrap();
        for key in [0x0102_0304u32, 0x0a00_0001, 0xdead_beef] {
            table.add(&[key]).unwrap();
        }
        assert_eq!(table.len(), 3);

        let address = table.find(&[0x0a00_0001]).unwrap();
        assert!(address < table.slot_count());
        assert_eq!(table.find(&[0x0a00_0002]), None);

        // adding a present key is a no-op
        table.add(&[0x0a00_0001]).unwrap();
        assert_eq!(table.len(), 3);

        assert_eq!(table.remove(&[0x0a00_0001]), Some(address));
        assert_eq!(table.find(&[0x0a00_0001]), None);
        assert_eq!(table.remove(&[0x0a00_0001]), None);
    }

    #[test]
    fn test_keys_are_masked_to_width() {
        let mut table = CuckooTable::new(3, 16, 12).unwrap();
        table.add(&[0xf123, 0x77]).unwrap();
        assert!(table.find(&[0x0123]).is_some());
        assert_eq!(table.entries().next().map(|(_, k)| k.to_vec()), Some(vec![0x123]));
    }

    #[test]
    fn test_failed_add_rolls_back() {
        let mut table = CuckooTable::new(3, 16, 32).unwrap();
        let mut placed = Vec::new();

        let mut failed = false;
        for i in 0..=table.slot_count() {
            let key = i.wrapping_mul(0x9e37_79b9);
            let before = table.clone();
            match table.add(&[key]) {
                Ok(()) => placed.push(key),
                Err(rejected) => {
                    assert_eq!(rejected, vec![key]);
                    assert_eq!(table, before);
                    failed = true;
                    break;
                }
            }
        }

        assert!(failed);
        assert!(placed.len() >= 3);
        for key in placed {
            let address = table.find(&[key]).unwrap();
            assert!(table
                .entries()
                .any(|(a, k)| a == address && k == [key].as_slice()));
        }
    }

    /// Straight insertion loop over a plain slot image: probe all tables,
    /// stop once the displacement counter passes the last address, else
    /// kick the occupant of table `step % tables` and go on with it.
    fn reference_add(table: &CuckooTable, slots: &mut [Option<Vec<u32>>], key: u32) -> bool {
        let mut key = vec![key];
        if (0..table.tables()).any(|t| slots[table.hash(&key, t) as usize].as_ref() == Some(&key)) {
            return true;
        }
        let last = table.slot_count() - 1;
        let mut history = Vec::new();
        let mut step = 0;
        loop {
            for t in 0..table.tables() {
                let address = table.hash(&key, t) as usize;
                if slots[address].is_none() {
                    slots[address] = Some(key);
                    return true;
                }
            }
            if step > last {
                break;
            }
            let victim = table.hash(&key, step % table.tables()) as usize;
            if let Some(occupant) = slots[victim].replace(key.clone()) {
                key = occupant;
            }
            history.push(victim);
            step += 1;
        }
        for address in history.into_iter().rev() {
            if let Some(occupant) = slots[address].replace(key.clone()) {
                key = occupant;
            }
        }
        false
    }

    #[test]
    fn test_add_matches_reference_placement() {
        for (tables, capacity, step) in [(2, 4, 0x85eb_ca6b), (3, 6, 0x9e37_79b9), (2, 8, 0x0100_0193)] {
            let mut table = CuckooTable::new(tables, capacity, 32).unwrap();
            let mut slots = vec![None; table.slot_count() as usize];

            let mut rejected = 0;
            for i in 1..=table.slot_count() + 4 {
                let key = i.wrapping_mul(step);
                let expected = reference_add(&table, &mut slots, key);
                assert_eq!(table.add(&[key]).is_ok(), expected, "key {:#x}", key);
                if !expected {
                    rejected += 1;
                }

                let image: Vec<(u32, Vec<u32>)> = slots
                    .iter()
                    .enumerate()
                    .filter_map(|(a, k)| k.clone().map(|k| (a as u32, k)))
                    .collect();
                let placed: Vec<(u32, Vec<u32>)> = table.entries().map(|(a, k)| (a, k.to_vec())).collect();
                assert_eq!(placed, image);
            }
            // more keys than addresses
            assert!(rejected >= 4);
        }
    }

    #[test]
    fn test_upload_writes_only_changes() {
        let desc = DeviceDescription::sample();
        let table = desc.table("send_frame").unwrap();
        let mut hw = SimulatedRegisters::new();
        hw.attach_mi32(table.offset);
        let poll = DeviceConfig::default().poll_policy();

        let rules = [rule(0x0102_0304, 3), rule(0x0a00_0001, 4), rule(0x0a00_0002, 5)];
        let mut engine = CuckooEngine::new(table, 3).unwrap();
        let mut ctx = EngineContext::new(&mut hw, table, poll);
        engine
            .insert_rules(&mut ctx, &rules.iter().collect::<Vec<_>>(), None)
            .unwrap();

        let address = engine.placement().find(&[0x0102_0304]).unwrap();
        assert_eq!(hw.mi32_row(table.offset, address).unwrap().record, vec![0x0300]);
        assert!(hw.mi32_row(table.offset, address).unwrap().key.is_empty());
        assert_eq!(hw.mi32_addresses(table.offset).len(), 3);

        // an identical upload touches nothing
        hw.clear_journal();
        let mut ctx = EngineContext::new(&mut hw, table, poll);
        engine
            .insert_rules(&mut ctx, &rules.iter().collect::<Vec<_>>(), None)
            .unwrap();
        assert!(hw.journal().is_empty());

        // dropping a rule vacates exactly its address
        let gone = engine.placement().find(&[0x0a00_0001]).unwrap();
        let mut ctx = EngineContext::new(&mut hw, table, poll);
        engine
            .insert_rules(&mut ctx, &[&rules[0], &rules[2]], None)
            .unwrap();
        assert_eq!(hw.mi32_addresses(table.offset).len(), 2);
        assert!(hw.mi32_row(table.offset, gone).is_none());
        assert_eq!(engine.placement().find(&[0x0a00_0001]), None);
    }

    #[test]
    fn test_initialize_clears_placement() {
        let desc = DeviceDescription::sample();
        let table = desc.table("send_frame").unwrap();
        let mut hw = SimulatedRegisters::new();
        hw.attach_mi32(table.offset);

        let mut engine = CuckooEngine::new(table, 3).unwrap();
        let mut ctx = EngineContext::new(&mut hw, table, DeviceConfig::default().poll_policy());
        engine.insert_rules(&mut ctx, &[&rule(7, 1)], None).unwrap();
        engine.initialize(&mut ctx).unwrap();
        drop(ctx);

        assert!(engine.placement().is_empty());
        assert!(hw.mi32_addresses(table.offset).is_empty());
    }
}
