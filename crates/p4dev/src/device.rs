//! A P4 device: its tables and register arrays over one register space.

use crate::description::{DeviceConfig, HardwareDescription};
use crate::engine::Engine;
use crate::registers::{RegisterArray, RegisterHandle};
use crate::table::{Table, TableHandle};
use p4dev_hw::{P4DevError, P4DevResult, RegisterAccess};
use p4dev_types::Rule;
use tracing::{debug, info};

/// One device with the tables and register arrays its description declares.
///
/// The device owns its register space. Tables are created empty; nothing
/// is written to the hardware until the first rule arrives, apart from the
/// geometry reads of the LPM components.
#[derive(Debug)]
pub struct Device<R: RegisterAccess> {
    name: String,
    config: DeviceConfig,
    hw: R,
    tables: Vec<Table>,
    registers: Vec<RegisterArray>,
}

impl<R: RegisterAccess> Device<R> {
    /// Builds the device from `description`.
    ///
    /// # Errors
    ///
    /// Fails if an engine cannot be set up, e.g. when an LPM component
    /// reports an invalid geometry.
    pub fn initialize<D: HardwareDescription + ?Sized>(
        description: &D,
        mut hw: R,
        config: DeviceConfig,
    ) -> P4DevResult<Self> {
        let mut tables = Vec::new();
        for name in description.table_names() {
            let table = description.table(name)?.clone();
            let engine = Engine::new(&table, &mut hw, &config)?;
            debug!(
                "Device {}: table {} ({}, capacity {}) at 0x{:x}",
                description.name(),
                table.name,
                table.engine,
                table.capacity,
                table.offset
            );
            tables.push(Table::new(table, engine));
        }

        let registers = description
            .register_arrays()
            .iter()
            .cloned()
            .map(RegisterArray::new)
            .collect::<Vec<_>>();

        info!(
            "Device {}: {} tables, {} register arrays",
            description.name(),
            tables.len(),
            registers.len()
        );
        Ok(Self {
            name: description.name().to_string(),
            config,
            hw,
            tables,
            registers,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn hw(&self) -> &R {
        &self.hw
    }

    /// Direct access to the register space, bypassing the tables.
    pub fn hw_mut(&mut self) -> &mut R {
        &mut self.hw
    }

    pub fn into_hw(self) -> R {
        self.hw
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(Table::name).collect()
    }

    /// Read-only view of a table.
    pub fn table(&self, name: &str) -> P4DevResult<&Table> {
        self.tables
            .iter()
            .find(|t| t.name() == name)
            .ok_or_else(|| P4DevError::table_name(name))
    }

    /// Handle for changing the rules of a table.
    pub fn get_table(&mut self, name: &str) -> P4DevResult<TableHandle<'_, R>> {
        let poll = self.config.poll_policy();
        let table = self
            .tables
            .iter_mut()
            .find(|t| t.name() == name)
            .ok_or_else(|| P4DevError::table_name(name))?;
        Ok(TableHandle::new(table, &mut self.hw, poll))
    }

    /// Inserts `rule` into the table it names.
    pub fn insert_rule(&mut self, rule: Rule, overwrite: bool) -> P4DevResult<usize> {
        let name = rule.table_name.clone();
        self.get_table(&name)?.insert(rule, overwrite)
    }

    pub fn register_names(&self) -> Vec<&str> {
        self.registers.iter().map(RegisterArray::name).collect()
    }

    /// Handle for reading and writing a register array.
    pub fn register(&mut self, name: &str) -> P4DevResult<RegisterHandle<'_, R>> {
        let array = self
            .registers
            .iter()
            .find(|r| r.name() == name)
            .ok_or_else(|| P4DevError::NoRegister {
                name: name.to_string(),
            })?;
        Ok(RegisterHandle::new(array, &mut self.hw))
    }

    /// Zeroes the register arrays directly bound to `table`.
    pub fn initialize_table_registers(&mut self, table: &str) -> P4DevResult<()> {
        self.table(table)?;
        for array in self.registers.iter().filter(|r| r.is_direct_for(table)) {
            array.initialize(&mut self.hw);
        }
        Ok(())
    }

    /// Clears every table and zeroes every register array.
    pub fn reset(&mut self) -> P4DevResult<()> {
        let poll = self.config.poll_policy();
        for table in &mut self.tables {
            TableHandle::new(table, &mut self.hw, poll).clear()?;
        }
        for array in &self.registers {
            array.initialize(&mut self.hw);
        }
        info!("Device {}: reset", self.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::{DeviceDescription, RegisterBinding};
    use p4dev_hw::SimulatedRegisters;
    use p4dev_types::{EngineKind, KeyElement, Param};
    use pretty_assertions::assert_eq;

    fn sample_hw() -> SimulatedRegisters {
        let mut hw = SimulatedRegisters::new();
        hw.attach_lpm(0x0, 32, 16, 4);
        hw.attach_mi32(0x100);
        hw.attach_mi32(0x200);
        hw
    }

    fn sample_device() -> Device<SimulatedRegisters> {
        Device::initialize(&DeviceDescription::sample(), sample_hw(), DeviceConfig::default()).unwrap()
    }

    #[test]
    fn test_initialize_writes_nothing() {
        let device = sample_device();
        assert_eq!(device.name(), "dummy");
        assert_eq!(device.table_names(), vec!["ipv4_lpm", "send_frame", "forward"]);
        assert_eq!(device.register_names(), vec!["reg1", "reg2", "reg3"]);
        assert_eq!(device.table("forward").unwrap().engine_kind(), EngineKind::Tcam);
        assert!(device.hw().journal().is_empty());
    }

    #[test]
    fn test_initialize_fails_without_lpm_component() {
        let mut hw = SimulatedRegisters::new();
        hw.attach_mi32(0x100);
        hw.attach_mi32(0x200);
        let result = Device::initialize(&DeviceDescription::sample(), hw, DeviceConfig::default());
        assert!(matches!(result, Err(P4DevError::DeviceTreeError { .. })));
    }

    #[test]
    fn test_unknown_names() {
        let mut device = sample_device();
        assert_eq!(
            device.get_table("acl").err(),
            Some(P4DevError::TableNameError {
                name: "acl".to_string()
            })
        );
        assert!(matches!(
            device.register("counters"),
            Err(P4DevError::NoRegister { .. })
        ));
        assert!(matches!(
            device.initialize_table_registers("acl"),
            Err(P4DevError::TableNameError { .. })
        ));
    }

    #[test]
    fn test_insert_rule_routes_by_table() {
        let mut device = sample_device();
        let rule = Rule::new("send_frame", EngineKind::Cuckoo, "forward")
            .with_key(KeyElement::exact("dst_addr", vec![4, 3, 2, 1]))
            .with_param(Param::new("port", vec![3]));

        assert_eq!(device.insert_rule(rule, false).unwrap(), 0);
        assert_eq!(device.table("send_frame").unwrap().size(), 1);
        assert_eq!(device.hw().mi32_addresses(0x100).len(), 1);

        let orphan = Rule::new("acl", EngineKind::Tcam, "drop");
        assert!(matches!(
            device.insert_rule(orphan, false),
            Err(P4DevError::TableNameError { .. })
        ));
    }

    #[test]
    fn test_reset_clears_tables_and_registers() {
        let mut device = sample_device();
        let rule = Rule::new("forward", EngineKind::Tcam, "drop")
            .with_key(KeyElement::exact("dst_addr", vec![10, 0, 0, 1]))
            .with_key(KeyElement::exact("proto", vec![17]));
        device.insert_rule(rule, false).unwrap();
        device.register("reg3").unwrap().write(3, &[0xff; 4]).unwrap();
        assert_eq!(device.hw().peek(0x32c), 0xffff_ffff);

        device.reset().unwrap();
        assert!(device.table("forward").unwrap().is_empty());
        assert!(device.hw().mi32_addresses(0x200).is_empty());
        assert_eq!(device.hw().peek(0x32c), 0);
    }

    #[test]
    fn test_direct_registers_follow_table() {
        let mut description = DeviceDescription::sample();
        description.registers[1].binding = RegisterBinding::Direct("forward".to_string());
        let mut device = Device::initialize(&description, sample_hw(), DeviceConfig::default()).unwrap();

        device.register("reg1").unwrap().write(0, &[1, 0, 0, 0]).unwrap();
        device.register("reg2").unwrap().write(1, &[2, 0, 0, 0]).unwrap();
        device.initialize_table_registers("forward").unwrap();

        let mut buf = [0u8; 4];
        device.register("reg1").unwrap().read(0, &mut buf).unwrap();
        assert_eq!(buf, [1, 0, 0, 0]);
        device.register("reg2").unwrap().read(1, &mut buf).unwrap();
        assert_eq!(buf, [0, 0, 0, 0]);
    }
}
