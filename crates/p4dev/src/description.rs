//! Hardware description of a P4 device.
//!
//! The control plane never hard-codes table geometry. Capacities, key and
//! parameter widths, action opcodes and register offsets all come from a
//! [`HardwareDescription`]. [`DeviceDescription`] is the serde-backed
//! implementation that loads the description from YAML or JSON.

use p4dev_hw::{P4DevError, P4DevResult, PollPolicy};
use p4dev_types::{EngineKind, Param, Rule};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Name and bit width of a match field or action parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub width: u32,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, width: u32) -> Self {
        Self {
            name: name.into(),
            width,
        }
    }
}

/// An action a table can execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDescription {
    /// Action name.
    pub name: String,
    /// Opcode serialized in front of the parameters.
    pub opcode: u8,
    /// Parameters in serialization order.
    #[serde(default)]
    pub params: Vec<FieldSpec>,
}

/// The action a table falls back to when no default rule is installed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultActionDescription {
    pub action: String,
    #[serde(default)]
    pub params: Vec<Param>,
}

/// One match-action table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescription {
    /// Table name.
    pub name: String,
    /// Search engine implementing the table.
    pub engine: EngineKind,
    /// Number of ordinary rules the table holds.
    pub capacity: u32,
    /// Byte offset of the table's register window.
    pub offset: u32,
    /// Match fields in serialization order.
    #[serde(default)]
    pub match_fields: Vec<FieldSpec>,
    /// Width of the action opcode in bits.
    #[serde(default = "default_opcode_width")]
    pub opcode_width: u32,
    /// Actions the table can execute.
    #[serde(default)]
    pub actions: Vec<ActionDescription>,
    /// Built-in default action.
    #[serde(default)]
    pub default_action: Option<DefaultActionDescription>,
}

fn default_opcode_width() -> u32 {
    8
}

impl TableDescription {
    /// Sum of the match field widths.
    pub fn key_bit_width(&self) -> u32 {
        self.match_fields.iter().map(|f| f.width).sum()
    }

    /// Looks up an action by name.
    pub fn action(&self, name: &str) -> P4DevResult<&ActionDescription> {
        self.actions
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| P4DevError::action_name(name))
    }

    /// Builds the rule installed by the built-in default action.
    pub fn builtin_default_rule(&self) -> Option<Rule> {
        self.default_action.as_ref().map(|default| {
            let mut rule = Rule::default_rule(&self.name, self.engine, &default.action);
            rule.params = default.params.clone();
            rule
        })
    }
}

/// How a P4 register array is bound to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterBinding {
    /// One cell per entry of the named table.
    Direct(String),
    /// Used by the actions of the named table.
    Static(String),
    /// Not bound to any table.
    #[default]
    Global,
}

/// A P4 register array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterArrayDescription {
    /// Register array name.
    pub name: String,
    /// Width of one cell in bits.
    pub width: u32,
    /// Byte offset of cell 0.
    pub offset: u32,
    /// Number of cells.
    pub count: u32,
    #[serde(default)]
    pub binding: RegisterBinding,
}

/// Discovery interface for per-table metadata.
///
/// Only the three lookups are required; the per-table getters derive from
/// [`HardwareDescription::table`].
pub trait HardwareDescription {
    /// Device name.
    fn name(&self) -> &str;

    /// Looks up a table by name.
    fn table(&self, name: &str) -> P4DevResult<&TableDescription>;

    /// Names of all tables.
    fn table_names(&self) -> Vec<&str>;

    /// All register arrays.
    fn register_arrays(&self) -> &[RegisterArrayDescription];

    fn capacity(&self, table: &str) -> P4DevResult<u32> {
        Ok(self.table(table)?.capacity)
    }

    fn key_bit_width(&self, table: &str) -> P4DevResult<u32> {
        Ok(self.table(table)?.key_bit_width())
    }

    fn match_fields(&self, table: &str) -> P4DevResult<&[FieldSpec]> {
        Ok(&self.table(table)?.match_fields)
    }

    fn opcode_width(&self, table: &str) -> P4DevResult<u32> {
        Ok(self.table(table)?.opcode_width)
    }

    fn action_opcode(&self, table: &str, action: &str) -> P4DevResult<u8> {
        Ok(self.table(table)?.action(action)?.opcode)
    }

    fn action_params(&self, table: &str, action: &str) -> P4DevResult<&[FieldSpec]> {
        Ok(&self.table(table)?.action(action)?.params)
    }

    fn table_offset(&self, table: &str) -> P4DevResult<u32> {
        Ok(self.table(table)?.offset)
    }

    fn engine_kind(&self, table: &str) -> P4DevResult<EngineKind> {
        Ok(self.table(table)?.engine)
    }

    fn default_action(&self, table: &str) -> P4DevResult<Option<&DefaultActionDescription>> {
        Ok(self.table(table)?.default_action.as_ref())
    }
}

/// Description of one device, loaded from YAML or JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescription {
    /// Device name.
    pub name: String,
    /// Match-action tables.
    #[serde(default)]
    pub tables: Vec<TableDescription>,
    /// P4 register arrays.
    #[serde(default)]
    pub registers: Vec<RegisterArrayDescription>,
}

impl DeviceDescription {
    /// Parses and validates a YAML description.
    pub fn from_yaml_str(content: &str) -> P4DevResult<Self> {
        let description: Self = serde_yaml::from_str(content)
            .map_err(|e| P4DevError::config(format!("Failed to parse YAML description: {}", e)))?;
        description.validate()?;
        Ok(description)
    }

    /// Parses and validates a JSON description.
    pub fn from_json_str(content: &str) -> P4DevResult<Self> {
        let description: Self = serde_json::from_str(content)
            .map_err(|e| P4DevError::config(format!("Failed to parse JSON description: {}", e)))?;
        description.validate()?;
        Ok(description)
    }

    /// Loads a description file, picking the format from its extension.
    pub fn from_path(path: impl AsRef<Path>) -> P4DevResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            P4DevError::config(format!("Failed to read description {}: {}", path.display(), e))
        })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            Some("json") => Self::from_json_str(&content),
            _ => Err(P4DevError::config(format!(
                "Unknown description format: {}",
                path.display()
            ))),
        }
    }

    /// Serializes the description as YAML.
    pub fn to_yaml(&self) -> P4DevResult<String> {
        serde_yaml::to_string(self)
            .map_err(|e| P4DevError::config(format!("Failed to serialize description: {}", e)))
    }

    /// Validate description
    pub fn validate(&self) -> P4DevResult<()> {
        let mut names = HashSet::new();
        for table in &self.tables {
            if !names.insert(table.name.as_str()) {
                return Err(P4DevError::config(format!("Duplicate table {}", table.name)));
            }
            if table.capacity == 0 {
                return Err(P4DevError::config(format!(
                    "Table {} has zero capacity",
                    table.name
                )));
            }
            if table.opcode_width == 0 || table.opcode_width > 8 {
                return Err(P4DevError::config(format!(
                    "Table {}: opcode width must be between 1 and 8 bits",
                    table.name
                )));
            }
            if let Some(field) = table.match_fields.iter().find(|f| f.width == 0) {
                return Err(P4DevError::config(format!(
                    "Table {}: match field {} has zero width",
                    table.name, field.name
                )));
            }

            let mut actions = HashSet::new();
            for action in &table.actions {
                if !actions.insert(action.name.as_str()) {
                    return Err(P4DevError::config(format!(
                        "Table {}: duplicate action {}",
                        table.name, action.name
                    )));
                }
                if u32::from(action.opcode) >> table.opcode_width != 0 {
                    return Err(P4DevError::config(format!(
                        "Table {}: opcode {} of action {} does not fit {} bits",
                        table.name, action.opcode, action.name, table.opcode_width
                    )));
                }
                if let Some(param) = action.params.iter().find(|p| p.width == 0) {
                    return Err(P4DevError::config(format!(
                        "Table {}: parameter {} of action {} has zero width",
                        table.name, param.name, action.name
                    )));
                }
            }

            if let Some(default) = &table.default_action {
                if !actions.contains(default.action.as_str()) {
                    return Err(P4DevError::config(format!(
                        "Table {}: unknown default action {}",
                        table.name, default.action
                    )));
                }
            }
        }

        let mut registers = HashSet::new();
        for register in &self.registers {
            if !registers.insert(register.name.as_str()) {
                return Err(P4DevError::config(format!(
                    "Duplicate register array {}",
                    register.name
                )));
            }
            if register.width == 0 || register.count == 0 {
                return Err(P4DevError::config(format!(
                    "Register array {} must have non-zero width and count",
                    register.name
                )));
            }
            match &register.binding {
                RegisterBinding::Direct(table) | RegisterBinding::Static(table)
                    if !names.contains(table.as_str()) =>
                {
                    return Err(P4DevError::config(format!(
                        "Register array {} is bound to unknown table {}",
                        register.name, table
                    )));
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// The reference dummy device.
    ///
    /// Three tables share one component space: `ipv4_lpm` at `0x0`,
    /// `send_frame` at `0x100` and `forward` at `0x200`. Register arrays
    /// follow from `0x300`.
    pub fn sample() -> Self {
        let set_port = |opcode| ActionDescription {
            name: "set_port".to_string(),
            opcode,
            params: vec![FieldSpec::new("port", 8)],
        };
        let drop_action = |opcode| ActionDescription {
            name: "drop".to_string(),
            opcode,
            params: Vec::new(),
        };
        let drop_default = Some(DefaultActionDescription {
            action: "drop".to_string(),
            params: Vec::new(),
        });

        Self {
            name: "dummy".to_string(),
            tables: vec![
                TableDescription {
                    name: "ipv4_lpm".to_string(),
                    engine: EngineKind::Lpm,
                    capacity: 2,
                    offset: 0x0,
                    match_fields: vec![FieldSpec::new("dst_addr", 32)],
                    opcode_width: 8,
                    actions: vec![set_port(0), drop_action(1)],
                    default_action: drop_default.clone(),
                },
                TableDescription {
                    name: "send_frame".to_string(),
                    engine: EngineKind::Cuckoo,
                    capacity: 16,
                    offset: 0x100,
                    match_fields: vec![FieldSpec::new("dst_addr", 32)],
                    opcode_width: 8,
                    actions: vec![
                        ActionDescription {
                            name: "forward".to_string(),
                            opcode: 0,
                            params: vec![FieldSpec::new("port", 8)],
                        },
                        drop_action(1),
                    ],
                    default_action: None,
                },
                TableDescription {
                    name: "forward".to_string(),
                    engine: EngineKind::Tcam,
                    capacity: 128,
                    offset: 0x200,
                    match_fields: vec![FieldSpec::new("dst_addr", 32), FieldSpec::new("proto", 8)],
                    opcode_width: 8,
                    actions: vec![set_port(0), drop_action(1)],
                    default_action: drop_default,
                },
            ],
            registers: vec![
                RegisterArrayDescription {
                    name: "reg1".to_string(),
                    width: 32,
                    offset: 0x300,
                    count: 1,
                    binding: RegisterBinding::Global,
                },
                RegisterArrayDescription {
                    name: "reg2".to_string(),
                    width: 32,
                    offset: 0x310,
                    count: 2,
                    binding: RegisterBinding::Global,
                },
                RegisterArrayDescription {
                    name: "reg3".to_string(),
                    width: 32,
                    offset: 0x320,
                    count: 4,
                    binding: RegisterBinding::Global,
                },
            ],
        }
    }
}

impl HardwareDescription for DeviceDescription {
    fn name(&self) -> &str {
        &self.name
    }

    fn table(&self, name: &str) -> P4DevResult<&TableDescription> {
        self.tables
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| P4DevError::table_name(name))
    }

    fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    fn register_arrays(&self) -> &[RegisterArrayDescription] {
        &self.registers
    }
}

/// Runtime knobs of the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Command register polls before a hardware operation times out.
    #[serde(default = "default_poll_limit")]
    pub poll_limit: u32,

    /// Number of hash tables of every cuckoo engine.
    #[serde(default = "default_cuckoo_tables")]
    pub cuckoo_tables: u32,
}

fn default_poll_limit() -> u32 {
    PollPolicy::DEFAULT_MAX_POLLS
}

fn default_cuckoo_tables() -> u32 {
    3
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            poll_limit: default_poll_limit(),
            cuckoo_tables: default_cuckoo_tables(),
        }
    }
}

impl DeviceConfig {
    /// Polling policy for hardware handshakes.
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy::new(self.poll_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const YAML: &str = r#"
name: edge
tables:
  - name: acl
    engine: mtcam
    capacity: 8
    offset: 0x40
    match_fields:
      - { name: src, width: 32 }
      - { name: dport, width: 16 }
    actions:
      - name: permit
        opcode: 0
      - name: mark
        opcode: 1
        params:
          - { name: dscp, width: 6 }
    default_action:
      action: permit
registers:
  - name: hits
    width: 64
    offset: 0x1000
    count: 8
    binding: !direct acl
"#;

    #[test]
    fn test_sample_lookups() {
        let desc = DeviceDescription::sample();
        desc.validate().unwrap();

        assert_eq!(desc.table_names(), vec!["ipv4_lpm", "send_frame", "forward"]);
        assert_eq!(desc.capacity("forward").unwrap(), 128);
        assert_eq!(desc.key_bit_width("forward").unwrap(), 40);
        assert_eq!(desc.engine_kind("ipv4_lpm").unwrap(), EngineKind::Lpm);
        assert_eq!(desc.table_offset("send_frame").unwrap(), 0x100);
        assert_eq!(desc.action_opcode("forward", "drop").unwrap(), 1);
        assert_eq!(
            desc.action_params("send_frame", "forward").unwrap(),
            &[FieldSpec::new("port", 8)]
        );
        assert_eq!(
            desc.default_action("forward").unwrap().map(|d| d.action.as_str()),
            Some("drop")
        );
        assert_eq!(desc.register_arrays().len(), 3);
    }

    #[test]
    fn test_lookup_errors() {
        let desc = DeviceDescription::sample();
        assert_eq!(
            desc.capacity("missing").unwrap_err(),
            P4DevError::TableNameError {
                name: "missing".to_string()
            }
        );
        assert_eq!(
            desc.action_opcode("forward", "flood").unwrap_err(),
            P4DevError::ActionNameError {
                name: "flood".to_string()
            }
        );
    }

    #[test]
    fn test_parse_yaml() {
        let desc = DeviceDescription::from_yaml_str(YAML).unwrap();
        let acl = desc.table("acl").unwrap();
        assert_eq!(acl.engine, EngineKind::Tcam);
        assert_eq!(acl.offset, 0x40);
        assert_eq!(acl.opcode_width, 8);
        assert_eq!(acl.key_bit_width(), 48);
        assert_eq!(
            desc.registers[0].binding,
            RegisterBinding::Direct("acl".to_string())
        );

        let default = acl.builtin_default_rule().unwrap();
        assert!(default.is_default);
        assert_eq!(default.action, "permit");
    }

    #[test]
    fn test_yaml_json_agree() {
        let from_yaml = DeviceDescription::from_yaml_str(YAML).unwrap();
        let json = serde_json::to_string(&from_yaml).unwrap();
        assert_eq!(DeviceDescription::from_json_str(&json).unwrap(), from_yaml);
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device.yaml");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(DeviceDescription::sample().to_yaml().unwrap().as_bytes())
            .unwrap();

        assert_eq!(
            DeviceDescription::from_path(&path).unwrap(),
            DeviceDescription::sample()
        );

        let unknown = dir.path().join("device.ini");
        fs::write(&unknown, "name = x").unwrap();
        assert!(matches!(
            DeviceDescription::from_path(&unknown),
            Err(P4DevError::Config { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_descriptions() {
        let mut desc = DeviceDescription::sample();
        desc.tables[1].capacity = 0;
        assert!(desc.validate().is_err());

        let mut desc = DeviceDescription::sample();
        desc.tables[2].opcode_width = 1;
        // drop uses opcode 1, set_port opcode 0: still fits one bit
        desc.validate().unwrap();
        desc.tables[2].actions[1].opcode = 2;
        assert!(desc.validate().is_err());

        let mut desc = DeviceDescription::sample();
        desc.tables.push(desc.tables[0].clone());
        assert!(desc.validate().is_err());

        let mut desc = DeviceDescription::sample();
        desc.registers[0].binding = RegisterBinding::Static("nowhere".to_string());
        assert!(desc.validate().is_err());
    }

    #[test]
    fn test_config_defaults() {
        let config: DeviceConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, DeviceConfig::default());
        assert_eq!(config.poll_limit, 100_000);
        assert_eq!(config.cuckoo_tables, 3);
        assert_eq!(config.poll_policy(), PollPolicy::new(100_000));
    }
}
