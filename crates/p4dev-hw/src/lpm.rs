//! Register layout of the BST-LPM component.
//!
//! The component window starts with a geometry register (read) that doubles
//! as the enable register (write). One record window follows: key words,
//! data words and a final control word carrying the record address and
//! its flags. Writing the control word commits, removes or reads back the
//! addressed record.

use crate::error::{P4DevError, P4DevResult};
use crate::transaction::word_count;

/// Control word flag marking a valid record.
pub const LPM_VALID_FLAG: u32 = 0x8000_0000;
/// Control word flag requesting a record readback.
pub const LPM_READ_FLAG: u32 = 0x4000_0000;

/// Shape of one BST-LPM component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LpmGeometry {
    /// Key width in bits.
    pub key_width: u32,
    /// Data width in bits.
    pub data_width: u32,
    /// Depth of the search tree.
    pub stages: u32,
}

impl LpmGeometry {
    /// Decodes the geometry register.
    ///
    /// # Errors
    ///
    /// Returns [`P4DevError::DeviceTreeError`] if any field reads as zero.
    pub fn from_register(value: u32) -> P4DevResult<Self> {
        let geometry = Self {
            key_width: value >> 16,
            data_width: (value >> 8) & 0xff,
            stages: value & 0xff,
        };
        if geometry.key_width == 0 || geometry.data_width == 0 || geometry.stages == 0 {
            return Err(P4DevError::device_tree(format!(
                "invalid BST-LPM geometry register 0x{:08x}",
                value
            )));
        }
        Ok(geometry)
    }

    /// Encodes the geometry register.
    pub fn to_register(&self) -> u32 {
        (self.key_width << 16) | ((self.data_width & 0xff) << 8) | (self.stages & 0xff)
    }

    /// Words per record, control word included.
    pub fn item_words(&self) -> usize {
        word_count(self.key_width) + word_count(self.data_width) + 1
    }

    /// Number of records the tree can hold.
    pub fn capacity(&self) -> u32 {
        1u32.checked_shl(self.stages).unwrap_or(u32::MAX)
    }
}
