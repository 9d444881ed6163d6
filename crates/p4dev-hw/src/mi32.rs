//! MI32 row-write handshake shared by the TCAM and cuckoo engines.
//!
//! Each table sits behind a small register window at its offset:
//!
//! | offset | register |
//! |--------|----------|
//! | `0x0`  | command / status |
//! | `0x4`  | row address |
//! | `0x8`  | key data (one word per write, most significant first) |
//! | `0xC`  | mask data (one word per write, most significant first) |
//! | `0x10` | record data (one word per write, most significant first) |
//!
//! A row is committed by setting [`CMD_WRITE_RECORD`] in the command
//! register; the hardware clears the bit once the row is stored.

use crate::access::RegisterAccess;
use crate::error::{P4DevError, P4DevResult};
use log::{trace, warn};

/// Command register.
pub const CMD_REG_OFFSET: u32 = 0x0;
/// Command value that stops the table.
pub const CMD_DISABLE_TABLE: u32 = 0x0;
/// Command value that starts the table.
pub const CMD_ENABLE_TABLE: u32 = 0x1;
/// Status bit set while the table is still processing.
pub const CMD_BUSY_FLAG: u32 = 0x4;
/// Commits the latched row; cleared by hardware when done.
pub const CMD_WRITE_RECORD: u32 = 0x2;
/// Marks the addressed row invalid on the next commit.
pub const CMD_INVALIDATE_ROW: u32 = 0x8;

/// Row address register.
pub const ADDRESS_REG_OFFSET: u32 = 0x4;
/// Key data register.
pub const KEY_REG_OFFSET: u32 = 0x8;
/// Mask data register.
pub const MASK_REG_OFFSET: u32 = 0xC;
/// Record data register.
pub const RECORD_REG_OFFSET: u32 = 0x10;

/// Bound on command register polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Reads of the command register before giving up.
    pub max_polls: u32,
}

impl PollPolicy {
    /// Default number of polls.
    pub const DEFAULT_MAX_POLLS: u32 = 100_000;

    /// Creates a policy with the given poll budget.
    pub const fn new(max_polls: u32) -> Self {
        Self { max_polls }
    }

    /// Polls `offset` until every bit in `mask` reads as zero.
    ///
    /// Returns the number of reads it took.
    ///
    /// # Errors
    ///
    /// Returns [`P4DevError::HardwareTimeout`] when the bits are still set
    /// after `max_polls` reads.
    pub fn wait_clear<R: RegisterAccess + ?Sized>(
        &self,
        hw: &mut R,
        offset: u32,
        mask: u32,
    ) -> P4DevResult<u32> {
        for poll in 1..=self.max_polls.max(1) {
            if hw.read_word(offset) & mask == 0 {
                return Ok(poll);
            }
        }
        warn!(
            "MI32: register 0x{:x} still has 0x{:x} set after {} polls",
            offset, mask, self.max_polls
        );
        Err(P4DevError::HardwareTimeout {
            offset,
            polls: self.max_polls,
        })
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_POLLS)
    }
}

/// MI32 endpoint of one table.
pub struct Mi32<'a, R: RegisterAccess + ?Sized> {
    hw: &'a mut R,
    base: u32,
    poll: PollPolicy,
}

impl<'a, R: RegisterAccess + ?Sized> Mi32<'a, R> {
    /// Creates an endpoint for the table at `base`.
    pub fn new(hw: &'a mut R, base: u32, poll: PollPolicy) -> Self {
        Self { hw, base, poll }
    }

    /// Returns the table offset.
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Writes one row and waits until hardware has stored it.
    ///
    /// `key` carries the key and mask words (least significant first, equal
    /// length); engines without a key in the row pass `None`. `record` holds
    /// the action words, least significant first.
    pub fn write_row(
        &mut self,
        address: u32,
        key: Option<(&[u32], &[u32])>,
        record: &[u32],
    ) -> P4DevResult<()> {
        trace!("MI32 0x{:x}: write row {}", self.base, address);
        self.hw
            .write_word(self.base + ADDRESS_REG_OFFSET, address);

        if let Some((key, mask)) = key {
            for (k, m) in key.iter().rev().zip(mask.iter().rev()) {
                self.hw.write_word(self.base + KEY_REG_OFFSET, *k);
                self.hw.write_word(self.base + MASK_REG_OFFSET, *m);
            }
        }

        for word in record.iter().rev() {
            self.hw.write_word(self.base + RECORD_REG_OFFSET, *word);
        }

        self.commit(CMD_WRITE_RECORD)
    }

    /// Invalidates one row.
    pub fn invalidate_row(&mut self, address: u32) -> P4DevResult<()> {
        trace!("MI32 0x{:x}: invalidate row {}", self.base, address);
        self.hw
            .write_word(self.base + ADDRESS_REG_OFFSET, address);

        let cmd = self.hw.read_word(self.base + CMD_REG_OFFSET);
        self.hw
            .write_word(self.base + CMD_REG_OFFSET, cmd | CMD_INVALIDATE_ROW);

        self.commit(CMD_WRITE_RECORD)
    }

    /// Starts the table.
    pub fn enable(&mut self) -> P4DevResult<()> {
        self.hw
            .write_word(self.base + CMD_REG_OFFSET, CMD_ENABLE_TABLE);
        Ok(())
    }

    /// Stops the table and waits until it is idle.
    pub fn disable(&mut self) -> P4DevResult<()> {
        self.hw
            .write_word(self.base + CMD_REG_OFFSET, CMD_DISABLE_TABLE);
        self.poll
            .wait_clear(self.hw, self.base + CMD_REG_OFFSET, CMD_BUSY_FLAG)?;
        Ok(())
    }

    fn commit(&mut self, bits: u32) -> P4DevResult<()> {
        let cmd = self.hw.read_word(self.base + CMD_REG_OFFSET);
        self.hw.write_word(self.base + CMD_REG_OFFSET, cmd | bits);
        self.poll
            .wait_clear(self.hw, self.base + CMD_REG_OFFSET, bits)?;
        Ok(())
    }
}
