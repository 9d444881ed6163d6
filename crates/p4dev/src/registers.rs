//! P4 register arrays.
//!
//! A register array is a run of `count` cells starting at its offset. Each
//! cell is `width` bits wide and occupies `ceil(width / 32)` consecutive
//! words, least significant word first. Values are exchanged as
//! little-endian byte strings, the same layout the rule fields use.

use crate::description::{RegisterArrayDescription, RegisterBinding};
use p4dev_hw::transaction::{deserialize, word_count};
use p4dev_hw::{P4DevError, P4DevResult, RegisterAccess, Transaction};
use std::ops::Deref;
use tracing::debug;

/// One register array of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterArray {
    description: RegisterArrayDescription,
}

impl RegisterArray {
    pub fn new(description: RegisterArrayDescription) -> Self {
        Self { description }
    }

    pub fn name(&self) -> &str {
        &self.description.name
    }

    /// Cell width in bits.
    pub fn width(&self) -> u32 {
        self.description.width
    }

    /// Number of cells.
    pub fn count(&self) -> u32 {
        self.description.count
    }

    pub fn binding(&self) -> &RegisterBinding {
        &self.description.binding
    }

    /// True if the array keeps one cell per entry of `table`.
    pub fn is_direct_for(&self, table: &str) -> bool {
        matches!(&self.description.binding, RegisterBinding::Direct(t) if t == table)
    }

    /// Bytes needed to hold one cell.
    pub fn cell_bytes(&self) -> usize {
        self.description.width.div_ceil(8) as usize
    }

    fn stride(&self) -> usize {
        word_count(self.description.width)
    }

    fn cell_offset(&self, index: u32) -> P4DevResult<u32> {
        if index >= self.description.count {
            return Err(P4DevError::RegisterIndexError {
                name: self.description.name.clone(),
                index,
                count: self.description.count,
            });
        }
        Ok(self.description.offset + index * self.stride() as u32 * 4)
    }

    /// Reads cell `index` into `buf` and returns the number of bytes written.
    pub fn read<R: RegisterAccess + ?Sized>(&self, hw: &mut R, index: u32, buf: &mut [u8]) -> P4DevResult<usize> {
        let offset = self.cell_offset(index)?;
        let needed = self.cell_bytes();
        if buf.len() < needed {
            return Err(P4DevError::SmallBuffer {
                needed,
                given: buf.len(),
            });
        }

        let mut words = vec![0u32; self.stride()];
        hw.read_words(offset, &mut words);
        buf[..needed].copy_from_slice(&deserialize(&words, 0, self.description.width));
        Ok(needed)
    }

    /// Writes the low `width` bits of `value` to cell `index`.
    pub fn write<R: RegisterAccess + ?Sized>(&self, hw: &mut R, index: u32, value: &[u8]) -> P4DevResult<()> {
        let offset = self.cell_offset(index)?;
        let mut cell = Transaction::new();
        cell.push(value, self.description.width)?;
        hw.write_words(offset, &cell.padded(self.stride()));
        Ok(())
    }

    /// Zeroes every cell.
    pub fn initialize<R: RegisterAccess + ?Sized>(&self, hw: &mut R) {
        let words = vec![0u32; self.stride() * self.description.count as usize];
        hw.write_words(self.description.offset, &words);
        debug!("Register {}: {} cells cleared", self.name(), self.count());
    }
}

/// A register array together with the register space it lives in.
pub struct RegisterHandle<'a, R: RegisterAccess + ?Sized> {
    array: &'a RegisterArray,
    hw: &'a mut R,
}

impl<'a, R: RegisterAccess + ?Sized> Deref for RegisterHandle<'a, R> {
    type Target = RegisterArray;

    fn deref(&self) -> &RegisterArray {
        self.array
    }
}

impl<'a, R: RegisterAccess + ?Sized> RegisterHandle<'a, R> {
    pub fn new(array: &'a RegisterArray, hw: &'a mut R) -> Self {
        Self { array, hw }
    }

    pub fn read(&mut self, index: u32, buf: &mut [u8]) -> P4DevResult<usize> {
        self.array.read(&mut *self.hw, index, buf)
    }

    pub fn write(&mut self, index: u32, value: &[u8]) -> P4DevResult<()> {
        self.array.write(&mut *self.hw, index, value)
    }

    pub fn initialize(&mut self) {
        self.array.initialize(&mut *self.hw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p4dev_hw::SimulatedRegisters;
    use pretty_assertions::assert_eq;

    fn array(width: u32, count: u32) -> RegisterArray {
        RegisterArray::new(RegisterArrayDescription {
            name: "hits".to_string(),
            width,
            offset: 0x1000,
            count,
            binding: RegisterBinding::Direct("acl".to_string()),
        })
    }

    #[test]
    fn test_read_write_cell() {
        let mut hw = SimulatedRegisters::new();
        let reg = array(32, 4);

        reg.write(&mut hw, 2, &[0x04, 0x03, 0x02, 0x01]).unwrap();
        assert_eq!(hw.peek(0x1008), 0x0102_0304);

        let mut buf = [0u8; 8];
        assert_eq!(reg.read(&mut hw, 2, &mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(reg.read(&mut hw, 1, &mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_wide_cells_use_word_stride() {
        let mut hw = SimulatedRegisters::new();
        let reg = array(40, 2);

        reg.write(&mut hw, 1, &[1, 2, 3, 4, 0xff]).unwrap();
        assert_eq!(hw.peek(0x1008), 0x0403_0201);
        assert_eq!(hw.peek(0x100c), 0xff);

        let mut buf = [0u8; 5];
        assert_eq!(reg.read(&mut hw, 1, &mut buf).unwrap(), 5);
        assert_eq!(buf, [1, 2, 3, 4, 0xff]);
    }

    #[test]
    fn test_narrow_cell_drops_high_bits() {
        let mut hw = SimulatedRegisters::new();
        let reg = array(12, 1);

        reg.write(&mut hw, 0, &[0xff, 0xff]).unwrap();
        let mut buf = [0u8; 2];
        reg.read(&mut hw, 0, &mut buf).unwrap();
        assert_eq!(buf, [0xff, 0x0f]);
    }

    #[test]
    fn test_register_errors() {
        let mut hw = SimulatedRegisters::new();
        let reg = array(32, 2);
        let mut buf = [0u8; 4];

        assert_eq!(
            reg.read(&mut hw, 2, &mut buf).unwrap_err(),
            P4DevError::RegisterIndexError {
                name: "hits".to_string(),
                index: 2,
                count: 2
            }
        );
        assert_eq!(
            reg.read(&mut hw, 0, &mut buf[..3]).unwrap_err(),
            P4DevError::SmallBuffer { needed: 4, given: 3 }
        );
        assert_eq!(
            reg.write(&mut hw, 0, &[1, 2]).unwrap_err(),
            P4DevError::ByteArrayTooShort { bytes: 2, width: 32 }
        );
        assert!(hw.journal().is_empty());
    }

    #[test]
    fn test_initialize_and_binding() {
        let mut hw = SimulatedRegisters::new();
        let reg = array(32, 3);
        for index in 0..3 {
            reg.write(&mut hw, index, &[0xaa; 4]).unwrap();
        }

        let mut handle = RegisterHandle::new(&reg, &mut hw);
        handle.initialize();
        let mut buf = [0xffu8; 4];
        handle.read(2, &mut buf).unwrap();
        assert_eq!(buf, [0, 0, 0, 0]);

        assert!(reg.is_direct_for("acl"));
        assert!(!reg.is_direct_for("forward"));
    }
}
