//! P4 device error types and status handling.
//!
//! This module provides the error type shared by every layer of the device
//! library, together with the numeric return codes the RPC layer reports
//! back to controllers.

use std::fmt;
use thiserror::Error;

/// Return codes of the P4 device library.
///
/// These values are what a northbound layer sends back on the wire, so
/// their numbering must stay stable.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum P4DevStatus {
    Ok = 0x0,
    UnableToAttach = 0x1,
    UnknownErr = 0x2,
    NotImplemented = 0x3,
    UnableToMapDeviceSpace = 0x4,
    DeviceTreeNotValid = 0x5,
    DeviceNotAttached = 0x6,
    KeyNameError = 0x7,
    ActionNameError = 0x8,
    TableNameError = 0x9,
    ByteArrayLengthError = 0xA,
    RuleAddressError = 0xB,
    NoDeviceTree = 0xC,
    NoDev = 0xD,
    DeviceTreeError = 0xE,
    Error = 0xF,
    ParameterNameError = 0x10,
    DeviceTreeReadingError = 0x11,
    NoCallback = 0x12,
    UnableToInsert = 0x13,
    AllocateError = 0x14,
    NoReg = 0x15,
    SmallBuffer = 0x16,
    RegIndexError = 0x17,
    HardwareTimeout = 0x18,
}

impl P4DevStatus {
    /// Creates a status from a raw return code.
    pub fn from_raw(status: u32) -> Self {
        match status {
            0x0 => P4DevStatus::Ok,
            0x1 => P4DevStatus::UnableToAttach,
            0x2 => P4DevStatus::UnknownErr,
            0x3 => P4DevStatus::NotImplemented,
            0x4 => P4DevStatus::UnableToMapDeviceSpace,
            0x5 => P4DevStatus::DeviceTreeNotValid,
            0x6 => P4DevStatus::DeviceNotAttached,
            0x7 => P4DevStatus::KeyNameError,
            0x8 => P4DevStatus::ActionNameError,
            0x9 => P4DevStatus::TableNameError,
            0xA => P4DevStatus::ByteArrayLengthError,
            0xB => P4DevStatus::RuleAddressError,
            0xC => P4DevStatus::NoDeviceTree,
            0xD => P4DevStatus::NoDev,
            0xE => P4DevStatus::DeviceTreeError,
            0xF => P4DevStatus::Error,
            0x10 => P4DevStatus::ParameterNameError,
            0x11 => P4DevStatus::DeviceTreeReadingError,
            0x12 => P4DevStatus::NoCallback,
            0x13 => P4DevStatus::UnableToInsert,
            0x14 => P4DevStatus::AllocateError,
            0x15 => P4DevStatus::NoReg,
            0x16 => P4DevStatus::SmallBuffer,
            0x17 => P4DevStatus::RegIndexError,
            0x18 => P4DevStatus::HardwareTimeout,
            _ => P4DevStatus::UnknownErr,
        }
    }

    /// Returns the raw return code.
    pub const fn as_raw(&self) -> u32 {
        *self as u32
    }

    /// Returns true if the status indicates success.
    pub fn is_ok(&self) -> bool {
        *self == P4DevStatus::Ok
    }

    /// Converts to a Result, returning Ok(()) for success.
    pub fn into_result(self) -> P4DevResult<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(P4DevError::Status { status: self })
        }
    }
}

impl fmt::Display for P4DevStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            P4DevStatus::Ok => "P4DEV_OK",
            P4DevStatus::UnableToAttach => "P4DEV_UNABLE_TO_ATTACH",
            P4DevStatus::UnknownErr => "P4DEV_UNKNOWN_ERR",
            P4DevStatus::NotImplemented => "P4DEV_NOT_IMPLEMENTED",
            P4DevStatus::UnableToMapDeviceSpace => "P4DEV_UNABLE_TO_MAP_DEVICE_SPACE",
            P4DevStatus::DeviceTreeNotValid => "P4DEV_DEVICE_TREE_NOT_VALID",
            P4DevStatus::DeviceNotAttached => "P4DEV_DEVICE_NOT_ATTACHED",
            P4DevStatus::KeyNameError => "P4DEV_KEY_NAME_ERROR",
            P4DevStatus::ActionNameError => "P4DEV_ACTION_NAME_ERROR",
            P4DevStatus::TableNameError => "P4DEV_TABLE_NAME_ERROR",
            P4DevStatus::ByteArrayLengthError => "P4DEV_BYTE_ARRAY_LENGTH_ERROR",
            P4DevStatus::RuleAddressError => "P4DEV_RULE_ADDRESS_ERROR",
            P4DevStatus::NoDeviceTree => "P4DEV_NO_DEVICE_TREE",
            P4DevStatus::NoDev => "P4DEV_NO_DEV",
            P4DevStatus::DeviceTreeError => "P4DEV_DEVICE_TREE_ERROR",
            P4DevStatus::Error => "P4DEV_ERROR",
            P4DevStatus::ParameterNameError => "P4DEV_PARAMETER_NAME_ERROR",
            P4DevStatus::DeviceTreeReadingError => "P4DEV_DEVICE_TREE_READING_ERROR",
            P4DevStatus::NoCallback => "P4DEV_NO_CALLBACK",
            P4DevStatus::UnableToInsert => "P4DEV_UNABLE_TO_INSERT",
            P4DevStatus::AllocateError => "P4DEV_ALLOCATE_ERROR",
            P4DevStatus::NoReg => "P4DEV_NO_REG",
            P4DevStatus::SmallBuffer => "P4DEV_SMALL_BUFFER",
            P4DevStatus::RegIndexError => "P4DEV_REG_INDEX_ERROR",
            P4DevStatus::HardwareTimeout => "P4DEV_HARDWARE_TIMEOUT",
        };
        write!(f, "{}", s)
    }
}

/// Error type for P4 device operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum P4DevError {
    /// A raw return code reported by a lower layer.
    #[error("P4 device operation failed: {status}")]
    Status { status: P4DevStatus },

    /// No free slot is left for a non-default rule.
    #[error("Table full: {table}")]
    TableFull { table: String },

    /// A rule with an equal key (or a default rule) is already installed.
    #[error("Rule already exists in table {table}")]
    RuleExists { table: String },

    /// No installed rule matches the given key.
    #[error("Rule not found in table {table}")]
    RuleNotFound { table: String },

    /// The table has no default rule to reset.
    #[error("Table {table} has no default rule")]
    NoDefaultRule { table: String },

    /// A logical rule index beyond the occupied slots.
    #[error("Rule index {index} out of range (table holds {size} rules)")]
    IndexOutOfRange { index: usize, size: usize },

    /// A match field declared by the table is missing from the rule key.
    #[error("Key element not found: {name}")]
    KeyNameError { name: String },

    /// The rule's action is not declared by the table.
    #[error("Unknown action: {name}")]
    ActionNameError { name: String },

    /// A parameter declared by the action is missing from the rule.
    #[error("Action parameter not found: {name}")]
    ParameterNameError { name: String },

    /// The table is not part of the device.
    #[error("Unknown table: {name}")]
    TableNameError { name: String },

    /// A value is shorter than the bit width it has to fill.
    #[error("Byte array of {bytes} bytes is too short for {width} bits")]
    ByteArrayTooShort { bytes: usize, width: u32 },

    /// A hardware row address beyond the table capacity.
    #[error("Rule address {address} exceeds table capacity {capacity}")]
    RuleAddressError { address: u32, capacity: u32 },

    /// A buffer or placement structure could not be built.
    #[error("Allocation failed: {message}")]
    AllocationError { message: String },

    /// Cuckoo displacement budget exhausted.
    #[error("Unable to insert key into table {table}")]
    UnableToInsert { table: String },

    /// The hardware description is inconsistent or incomplete.
    #[error("Device tree error: {message}")]
    DeviceTreeError { message: String },

    /// The operation is reserved but has no defined behavior.
    #[error("Operation not implemented: {operation}")]
    NotImplemented { operation: String },

    /// A command register never cleared its pending/busy bit.
    #[error("Hardware timeout at offset 0x{offset:x} after {polls} polls")]
    HardwareTimeout { offset: u32, polls: u32 },

    /// The LPM record stream does not fit the search tree.
    #[error("Table {table} needs {required} records but only {capacity} fit")]
    CapacityExceeded {
        table: String,
        required: u32,
        capacity: u32,
    },

    /// The rule does not fit the table it was passed to.
    #[error("Invalid rule: {message}")]
    InvalidRule { message: String },

    /// The register array is not part of the device.
    #[error("Unknown register array: {name}")]
    NoRegister { name: String },

    /// A register index beyond the array size.
    #[error("Register index {index} out of range for {name} ({count} cells)")]
    RegisterIndexError {
        name: String,
        index: u32,
        count: u32,
    },

    /// The output buffer cannot hold a register cell.
    #[error("Buffer of {given} bytes is too small, {needed} needed")]
    SmallBuffer { needed: usize, given: usize },

    /// A device id beyond the registry size.
    #[error("Device {device} out of range ({count} devices)")]
    DeviceIndexError { device: usize, count: usize },

    /// The device slot is already reserved.
    #[error("Device {device} is already reserved")]
    DeviceReserved { device: usize },

    /// The device slot is reserved but holds no device.
    #[error("Device {device} is not attached")]
    DeviceNotAttached { device: usize },

    /// The handle was issued by another registry.
    #[error("Handle for device {device} belongs to another registry")]
    ForeignHandle { device: usize },

    /// The hardware description could not be loaded.
    #[error("Invalid configuration: {message}")]
    Config { message: String },
}

impl P4DevError {
    /// Creates a table full error.
    pub fn table_full(table: impl Into<String>) -> Self {
        P4DevError::TableFull {
            table: table.into(),
        }
    }

    /// Creates a rule exists error.
    pub fn rule_exists(table: impl Into<String>) -> Self {
        P4DevError::RuleExists {
            table: table.into(),
        }
    }

    /// Creates a rule not found error.
    pub fn rule_not_found(table: impl Into<String>) -> Self {
        P4DevError::RuleNotFound {
            table: table.into(),
        }
    }

    /// Creates a key name error.
    pub fn key_name(name: impl Into<String>) -> Self {
        P4DevError::KeyNameError { name: name.into() }
    }

    /// Creates an action name error.
    pub fn action_name(name: impl Into<String>) -> Self {
        P4DevError::ActionNameError { name: name.into() }
    }

    /// Creates a parameter name error.
    pub fn parameter_name(name: impl Into<String>) -> Self {
        P4DevError::ParameterNameError { name: name.into() }
    }

    /// Creates a table name error.
    pub fn table_name(name: impl Into<String>) -> Self {
        P4DevError::TableNameError { name: name.into() }
    }

    /// Creates a device tree error.
    pub fn device_tree(message: impl Into<String>) -> Self {
        P4DevError::DeviceTreeError {
            message: message.into(),
        }
    }

    /// Creates a not implemented error.
    pub fn not_implemented(operation: impl Into<String>) -> Self {
        P4DevError::NotImplemented {
            operation: operation.into(),
        }
    }

    /// Creates an invalid rule error.
    pub fn invalid_rule(message: impl Into<String>) -> Self {
        P4DevError::InvalidRule {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        P4DevError::Config {
            message: message.into(),
        }
    }

    /// Returns the return code reported for this error.
    pub fn status(&self) -> P4DevStatus {
        match self {
            P4DevError::Status { status } => *status,
            P4DevError::KeyNameError { .. } => P4DevStatus::KeyNameError,
            P4DevError::ActionNameError { .. } => P4DevStatus::ActionNameError,
            P4DevError::ParameterNameError { .. } => P4DevStatus::ParameterNameError,
            P4DevError::TableNameError { .. } => P4DevStatus::TableNameError,
            P4DevError::ByteArrayTooShort { .. } => P4DevStatus::ByteArrayLengthError,
            P4DevError::RuleAddressError { .. } => P4DevStatus::RuleAddressError,
            P4DevError::AllocationError { .. } => P4DevStatus::AllocateError,
            P4DevError::UnableToInsert { .. } => P4DevStatus::UnableToInsert,
            P4DevError::DeviceTreeError { .. } => P4DevStatus::DeviceTreeError,
            P4DevError::NotImplemented { .. } => P4DevStatus::NotImplemented,
            P4DevError::HardwareTimeout { .. } => P4DevStatus::HardwareTimeout,
            P4DevError::NoRegister { .. } => P4DevStatus::NoReg,
            P4DevError::RegisterIndexError { .. } => P4DevStatus::RegIndexError,
            P4DevError::SmallBuffer { .. } => P4DevStatus::SmallBuffer,
            P4DevError::DeviceIndexError { .. } => P4DevStatus::NoDev,
            P4DevError::DeviceReserved { .. } => P4DevStatus::UnableToAttach,
            P4DevError::DeviceNotAttached { .. } => P4DevStatus::DeviceNotAttached,
            P4DevError::ForeignHandle { .. } => P4DevStatus::NoDev,
            P4DevError::Config { .. } => P4DevStatus::DeviceTreeNotValid,
            P4DevError::TableFull { .. }
            | P4DevError::RuleExists { .. }
            | P4DevError::RuleNotFound { .. }
            | P4DevError::NoDefaultRule { .. }
            | P4DevError::IndexOutOfRange { .. }
            | P4DevError::CapacityExceeded { .. }
            | P4DevError::InvalidRule { .. } => P4DevStatus::Error,
        }
    }

    /// Returns true if the failure left hardware in an unknown state.
    ///
    /// Callers must `clear()` the affected table before using it again.
    pub fn is_fatal(&self) -> bool {
        matches!(self, P4DevError::HardwareTimeout { .. })
    }
}

/// Result type for P4 device operations.
pub type P4DevResult<T> = Result<T, P4DevError>;

/// Extension trait for converting raw return codes.
pub trait P4DevStatusExt {
    /// Converts a raw return code to a Result.
    fn to_result(self) -> P4DevResult<()>;
}

impl P4DevStatusExt for u32 {
    fn to_result(self) -> P4DevResult<()> {
        P4DevStatus::from_raw(self).into_result()
    }
}
