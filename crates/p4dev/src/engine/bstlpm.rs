//! Longest prefix match engine on the BST-LPM component.
//!
//! The rule set is rebuilt as a [`PrefixSet`] on every upload, flattened to
//! boundary records and streamed into the component. The component reports
//! its own geometry, so key and data widths come from the hardware rather
//! than from the table description.

use super::prefix_set::{PrefixDump, PrefixSet};
use super::standard::{find_element, prepare_action, prepare_exact_key};
use super::EngineContext;
use crate::description::TableDescription;
use p4dev_hw::lpm::{LPM_READ_FLAG, LPM_VALID_FLAG};
use p4dev_hw::mi32::{CMD_DISABLE_TABLE, CMD_ENABLE_TABLE};
use p4dev_hw::transaction::words_to_bytes;
use p4dev_hw::{LpmGeometry, P4DevError, P4DevResult, RegisterAccess};
use p4dev_types::{KeyElement, Rule};
use tracing::{debug, info, instrument};

/// One BST-LPM component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LpmComponent {
    table: String,
    offset: u32,
    geometry: LpmGeometry,
}

impl LpmComponent {
    /// Reads the geometry register at `offset`.
    pub fn probe<R: RegisterAccess + ?Sized>(hw: &mut R, offset: u32, table: &str) -> P4DevResult<Self> {
        let geometry = LpmGeometry::from_register(hw.read_word(offset))?;
        debug!(
            "Table {}: BST-LPM component with {} bit keys, {} bit data, {} stages",
            table, geometry.key_width, geometry.data_width, geometry.stages
        );
        Ok(Self {
            table: table.to_string(),
            offset,
            geometry,
        })
    }

    pub fn geometry(&self) -> LpmGeometry {
        self.geometry
    }

    /// Number of boundary records the component holds.
    pub fn capacity(&self) -> u32 {
        self.geometry.capacity()
    }

    fn control_offset(&self) -> u32 {
        self.offset + 4 * self.geometry.item_words() as u32
    }

    pub fn enable<R: RegisterAccess + ?Sized>(&self, hw: &mut R) {
        hw.write_word(self.offset, CMD_ENABLE_TABLE);
    }

    pub fn disable<R: RegisterAccess + ?Sized>(&self, hw: &mut R) {
        hw.write_word(self.offset, CMD_DISABLE_TABLE);
    }

    /// Streams `dump` into the component and returns the free record count.
    ///
    /// Records past the dump are invalidated only where the search tree
    /// can reach them.
    ///
    /// # Errors
    ///
    /// Returns [`P4DevError::CapacityExceeded`] without touching the
    /// hardware when the dump has more records than the tree.
    pub fn configure<R: RegisterAccess + ?Sized>(&self, hw: &mut R, dump: &PrefixDump) -> P4DevResult<u32> {
        if dump.key_width() != self.geometry.key_width || dump.data_width() != self.geometry.data_width {
            return Err(P4DevError::device_tree(format!(
                "table {}: dump of {}/{} bits does not fit component of {}/{} bits",
                self.table,
                dump.key_width(),
                dump.data_width(),
                self.geometry.key_width,
                self.geometry.data_width
            )));
        }

        let records = dump.len() as u32;
        let capacity = self.capacity();
        if records > capacity {
            return Err(P4DevError::CapacityExceeded {
                table: self.table.clone(),
                required: records,
                capacity,
            });
        }

        self.disable(hw);
        for index in 0..dump.len() {
            if let Some(words) = dump.encode_record(index) {
                hw.write_words(self.offset + 4, &words);
            }
        }

        let control = self.control_offset();
        let mut address = records.saturating_sub(1);
        for stage in 0..self.geometry.stages.min(31) {
            let bit = 1u32 << stage;
            if address & bit != 0 {
                address -= bit;
            } else {
                hw.write_word(control, address | bit);
            }
        }
        self.enable(hw);

        Ok(capacity - records)
    }

    /// Reads the valid records back from the component.
    pub fn read_configuration<R: RegisterAccess + ?Sized>(&self, hw: &mut R) -> PrefixDump {
        let item_words = self.geometry.item_words();
        let control = self.control_offset();

        let mut words = Vec::new();
        let mut item = vec![0u32; item_words];
        for index in 0..self.capacity() {
            hw.write_word(control, index | LPM_READ_FLAG);
            hw.read_words(self.offset + 4, &mut item);
            if index > 0 && item[item_words - 1] & LPM_VALID_FLAG == 0 {
                break;
            }
            words.extend_from_slice(&item);
        }

        PrefixDump::from_words(self.geometry.key_width, self.geometry.data_width, &words)
    }
}

/// Prefix bytes and length of an LPM key.
///
/// Fields without a prefix length take part with their full width.
pub fn key_prefix(table: &TableDescription, key: &[KeyElement]) -> P4DevResult<(Vec<u8>, u32)> {
    let bytes = words_to_bytes(prepare_exact_key(table, key)?.words());
    let mut len = 0;
    for field in &table.match_fields {
        let element = find_element(key, &field.name)?;
        len += element.prefix_len().unwrap_or(field.width).min(field.width);
    }
    Ok((bytes, len))
}

/// Upload state of one LPM table.
#[derive(Debug, Clone)]
pub struct LpmEngine {
    component: LpmComponent,
    uploaded: PrefixSet,
}

impl LpmEngine {
    /// Reads the component geometry of `table`.
    pub fn probe<R: RegisterAccess + ?Sized>(table: &TableDescription, hw: &mut R) -> P4DevResult<Self> {
        let component = LpmComponent::probe(hw, table.offset, &table.name)?;
        let geometry = component.geometry();
        Ok(Self {
            component,
            uploaded: PrefixSet::new(geometry.key_width, geometry.data_width),
        })
    }

    pub fn component(&self) -> &LpmComponent {
        &self.component
    }

    /// The set written by the last upload.
    pub fn prefix_set(&self) -> &PrefixSet {
        &self.uploaded
    }

    fn rule_data(&self, table: &TableDescription, rule: &Rule) -> P4DevResult<Vec<u8>> {
        let action = prepare_action(table, rule)?;
        let width = self.component.geometry().data_width;
        if action.bit_len() > width {
            return Err(P4DevError::device_tree(format!(
                "table {}: action {} needs {} bits, component data is {} bits",
                table.name,
                rule.action,
                action.bit_len(),
                width
            )));
        }
        Ok(words_to_bytes(action.words()))
    }

    /// Builds the prefix set of `rules` and configures the component.
    ///
    /// The default rule becomes the data of the `/0` prefix.
    #[instrument(level = "debug", skip_all, fields(table = %ctx.table.name, rules = rules.len()))]
    pub fn insert_rules<R: RegisterAccess + ?Sized>(
        &mut self,
        ctx: &mut EngineContext<'_, R>,
        rules: &[&Rule],
        default: Option<&Rule>,
    ) -> P4DevResult<()> {
        let table = ctx.table;
        let geometry = self.component.geometry();

        let mut set = PrefixSet::new(geometry.key_width, geometry.data_width);
        if let Some(rule) = default {
            set.set_default_data(&self.rule_data(table, rule)?);
        }
        for rule in rules {
            let (key, len) = key_prefix(table, &rule.key)?;
            set.add(&key, len, &self.rule_data(table, rule)?)?;
        }

        let dump = set.dump();
        let remaining = self.component.configure(&mut *ctx.hw, &dump)?;
        info!(
            "Table {}: {} prefixes in {} records, {} records free",
            table.name,
            set.size(),
            dump.len(),
            remaining
        );
        self.uploaded = set;
        Ok(())
    }

    /// Configures an empty set with all-zero default data.
    pub fn initialize<R: RegisterAccess + ?Sized>(&mut self, ctx: &mut EngineContext<'_, R>) -> P4DevResult<()> {
        let geometry = self.component.geometry();
        let set = PrefixSet::new(geometry.key_width, geometry.data_width);
        self.component.configure(&mut *ctx.hw, &set.dump())?;
        self.uploaded = set;
        Ok(())
    }

    /// Rebuilds the prefix set from what the component holds.
    pub fn read_back<R: RegisterAccess + ?Sized>(&self, hw: &mut R) -> P4DevResult<PrefixSet> {
        PrefixSet::restore(&self.component.read_configuration(hw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::{DeviceConfig, DeviceDescription};
    use crate::HardwareDescription;
    use p4dev_hw::SimulatedRegisters;
    use p4dev_types::{EngineKind, Param};
    use pretty_assertions::assert_eq;

    fn route(addr: [u8; 4], len: u32, port: u8) -> Rule {
        Rule::new("ipv4_lpm", EngineKind::Lpm, "set_port")
            .with_key(KeyElement::prefix("dst_addr", addr.to_vec(), len))
            .with_param(Param::new("port", vec![port]))
    }

    fn setup(stages: u32) -> (DeviceDescription, SimulatedRegisters) {
        let desc = DeviceDescription::sample();
        let mut hw = SimulatedRegisters::new();
        hw.attach_lpm(0x0, 32, 16, stages);
        (desc, hw)
    }

    #[test]
    fn test_probe_rejects_missing_component() {
        let desc = DeviceDescription::sample();
        let mut hw = SimulatedRegisters::new();
        let err = LpmEngine::probe(desc.table("ipv4_lpm").unwrap(), &mut hw).unwrap_err();
        assert!(matches!(err, P4DevError::DeviceTreeError { .. }));
    }

    #[test]
    fn test_key_prefix() {
        let desc = DeviceDescription::sample();
        let table = desc.table("ipv4_lpm").unwrap();
        assert_eq!(
            key_prefix(table, &route([10, 1, 0, 0], 16, 1).key).unwrap(),
            (vec![10, 1, 0, 0], 16)
        );

        let exact = [KeyElement::exact("dst_addr", vec![10, 1, 2, 3])];
        assert_eq!(key_prefix(table, &exact).unwrap().1, 32);
    }

    #[test]
    fn test_insert_rules_configures_component() {
        let (desc, mut hw) = setup(4);
        let table = desc.table("ipv4_lpm").unwrap();
        let default = table.builtin_default_rule().unwrap();

        let mut engine = LpmEngine::probe(table, &mut hw).unwrap();
        let rules = [route([10, 0, 0, 0], 8, 1), route([10, 1, 0, 0], 16, 2)];
        let mut ctx = EngineContext::new(&mut hw, table, DeviceConfig::default().poll_policy());
        engine
            .insert_rules(&mut ctx, &rules.iter().collect::<Vec<_>>(), Some(&default))
            .unwrap();

        // drop everywhere, port 1 in 10/8, port 2 in 10.1/16
        assert_eq!(engine.prefix_set().size(), 3);
        assert_eq!(hw.lpm_record(0x0, 0), Some(&[0x0, 0x01][..]));
        assert_eq!(hw.lpm_record(0x0, 1), Some(&[0x0a, 0x0100][..]));
        assert_eq!(hw.lpm_record(0x0, 2), Some(&[0x010a, 0x0200][..]));
        assert_eq!(hw.lpm_record(0x0, 3), Some(&[0x020a, 0x0100][..]));
        assert_eq!(hw.lpm_record(0x0, 4), Some(&[0x0b, 0x01][..]));
        assert!(hw.lpm_enabled(0x0));

        let restored = engine.read_back(&mut hw).unwrap();
        for probe in [[10, 1, 7, 7], [10, 2, 0, 0], [11, 0, 0, 0], [9, 255, 255, 255]] {
            assert_eq!(restored.lookup(&probe), engine.prefix_set().lookup(&probe));
        }
        assert_eq!(restored.lookup(&[10, 1, 7, 7]), &[0x00, 0x02, 0, 0]);
    }

    #[test]
    fn test_capacity_exceeded() {
        let (desc, mut hw) = setup(1);
        let table = desc.table("ipv4_lpm").unwrap();

        let mut engine = LpmEngine::probe(table, &mut hw).unwrap();
        hw.clear_journal();
        let rules = [route([10, 0, 0, 0], 8, 1)];
        let mut ctx = EngineContext::new(&mut hw, table, DeviceConfig::default().poll_policy());
        let err = engine
            .insert_rules(&mut ctx, &rules.iter().collect::<Vec<_>>(), None)
            .unwrap_err();
        assert_eq!(
            err,
            P4DevError::CapacityExceeded {
                table: "ipv4_lpm".to_string(),
                required: 3,
                capacity: 2
            }
        );
        assert!(hw.journal().is_empty());
    }

    #[test]
    fn test_action_wider_than_data() {
        let desc = DeviceDescription::sample();
        let table = desc.table("ipv4_lpm").unwrap();
        let mut hw = SimulatedRegisters::new();
        hw.attach_lpm(0x0, 32, 8, 4);

        let mut engine = LpmEngine::probe(table, &mut hw).unwrap();
        let rules = [route([10, 0, 0, 0], 8, 1)];
        let mut ctx = EngineContext::new(&mut hw, table, DeviceConfig::default().poll_policy());
        assert!(matches!(
            engine.insert_rules(&mut ctx, &rules.iter().collect::<Vec<_>>(), None),
            Err(P4DevError::DeviceTreeError { .. })
        ));
    }

    #[test]
    fn test_shrinking_upload_reads_back() {
        let (desc, mut hw) = setup(3);
        let table = desc.table("ipv4_lpm").unwrap();
        let poll = DeviceConfig::default().poll_policy();

        let mut engine = LpmEngine::probe(table, &mut hw).unwrap();
        let rules = [route([10, 0, 0, 0], 8, 1), route([192, 168, 0, 0], 16, 2)];
        let mut ctx = EngineContext::new(&mut hw, table, poll);
        engine
            .insert_rules(&mut ctx, &rules.iter().collect::<Vec<_>>(), None)
            .unwrap();
        assert_eq!(engine.component().read_configuration(&mut hw).len(), 5);

        let mut ctx = EngineContext::new(&mut hw, table, poll);
        engine.insert_rules(&mut ctx, &[&rules[1]], None).unwrap();
        let dump = engine.component().read_configuration(&mut hw);
        assert_eq!(dump.len(), 3);
        assert_eq!(dump, engine.prefix_set().dump());

        let mut ctx = EngineContext::new(&mut hw, table, poll);
        engine.initialize(&mut ctx).unwrap();
        assert_eq!(engine.read_back(&mut hw).unwrap().size(), 1);
        assert_eq!(engine.read_back(&mut hw).unwrap().default_data(), &[0, 0, 0, 0]);
    }
}
