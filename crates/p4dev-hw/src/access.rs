//! Primitive access to the device's 32-bit register space.

/// Word access to a memory-mapped component space.
///
/// Offsets are byte offsets from the start of the P4 component. Reads take
/// `&mut self` because hardware reads may have side effects (command
/// registers clear themselves).
pub trait RegisterAccess {
    /// Reads one 32-bit register.
    fn read_word(&mut self, offset: u32) -> u32;

    /// Writes one 32-bit register.
    fn write_word(&mut self, offset: u32, value: u32);

    /// Writes consecutive registers starting at `offset`.
    fn write_words(&mut self, offset: u32, values: &[u32]) {
        for (i, value) in values.iter().enumerate() {
            self.write_word(offset + 4 * i as u32, *value);
        }
    }

    /// Reads consecutive registers starting at `offset`.
    fn read_words(&mut self, offset: u32, out: &mut [u32]) {
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.read_word(offset + 4 * i as u32);
        }
    }
}

impl<R: RegisterAccess + ?Sized> RegisterAccess for &mut R {
    fn read_word(&mut self, offset: u32) -> u32 {
        (**self).read_word(offset)
    }

    fn write_word(&mut self, offset: u32, value: u32) {
        (**self).write_word(offset, value)
    }

    fn write_words(&mut self, offset: u32, values: &[u32]) {
        (**self).write_words(offset, values)
    }

    fn read_words(&mut self, offset: u32, out: &mut [u32]) {
        (**self).read_words(offset, out)
    }
}

impl<R: RegisterAccess + ?Sized> RegisterAccess for Box<R> {
    fn read_word(&mut self, offset: u32) -> u32 {
        (**self).read_word(offset)
    }

    fn write_word(&mut self, offset: u32, value: u32) {
        (**self).write_word(offset, value)
    }

    fn write_words(&mut self, offset: u32, values: &[u32]) {
        (**self).write_words(offset, values)
    }

    fn read_words(&mut self, offset: u32, out: &mut [u32]) {
        (**self).read_words(offset, out)
    }
}
