//! Control plane for P4 match-action tables on FPGA targets.
//!
//! The crate turns rules into register writes. A [`Device`] is built from a
//! [`HardwareDescription`] and owns one table per declared match-action
//! table; each [`Table`] keeps its rules in software and re-uploads them
//! through the search engine the description selects.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`description`]: Hardware description and runtime configuration
//! - [`engine`]: TCAM, cuckoo and BST-LPM search engines
//! - [`table`]: Rule lifecycle of one table
//! - [`registers`]: P4 register arrays
//! - [`device`]: Tables and registers of one device
//! - [`registry`]: Device reservation by id
//!
//! # Example
//!
//! ```
//! use p4dev::{Device, DeviceConfig, DeviceDescription, EngineKind, KeyElement, Param, Rule};
//! use p4dev_hw::SimulatedRegisters;
//!
//! let mut hw = SimulatedRegisters::new();
//! hw.attach_lpm(0x0, 32, 16, 4);
//! hw.attach_mi32(0x100);
//! hw.attach_mi32(0x200);
//!
//! let mut device = Device::initialize(&DeviceDescription::sample(), hw, DeviceConfig::default()).unwrap();
//! let rule = Rule::new("send_frame", EngineKind::Cuckoo, "forward")
//!     .with_key(KeyElement::exact("dst_addr", vec![0x04, 0x03, 0x02, 0x01]))
//!     .with_param(Param::new("port", vec![3]));
//!
//! let mut table = device.get_table("send_frame").unwrap();
//! let index = table.insert(rule, false).unwrap();
//! assert_eq!(table.find(&[KeyElement::exact("dst_addr", vec![0x04, 0x03, 0x02, 0x01])]).unwrap(), index);
//! ```

pub mod description;
pub mod device;
pub mod engine;
pub mod registers;
pub mod registry;
pub mod table;

// Re-export commonly used types
pub use description::{
    ActionDescription, DefaultActionDescription, DeviceConfig, DeviceDescription, FieldSpec,
    HardwareDescription, RegisterArrayDescription, RegisterBinding, TableDescription,
};
pub use device::Device;
pub use engine::{Engine, PrefixDump, PrefixSet};
pub use p4dev_hw::{P4DevError, P4DevResult, P4DevStatus};
pub use p4dev_types::{EngineKind, KeyElement, KeyExtra, Param, Rule};
pub use registers::{RegisterArray, RegisterHandle};
pub use registry::{DeviceHandle, DeviceRegistry};
pub use table::{Table, TableHandle};
