//! Hardware access layer for P4 match-action tables on FPGA targets.
//!
//! This crate holds everything below the rule model: how fields are packed
//! into 32-bit transactions, how those transactions reach the component
//! space, and which status codes the layer reports.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`access`]: The [`RegisterAccess`] trait every backend implements
//! - [`error`]: Error types and status codes
//! - [`transaction`]: Bit serialization of fields into word arrays
//! - [`mi32`]: Row-write handshake used by TCAM and cuckoo tables
//! - [`lpm`]: Register layout of the BST-LPM component
//! - [`sim`]: In-memory backend emulating the table components
//!
//! # Example
//!
//! ```
//! use p4dev_hw::{Mi32, PollPolicy, SimulatedRegisters, Transaction};
//!
//! let mut hw = SimulatedRegisters::new();
//! hw.attach_mi32(0x0);
//!
//! let mut record = Transaction::new();
//! record.push(&[0x3], 8).unwrap();
//!
//! Mi32::new(&mut hw, 0x0, PollPolicy::default())
//!     .write_row(1, None, record.words())
//!     .unwrap();
//! assert_eq!(hw.mi32_row(0x0, 1).unwrap().record, vec![0x3]);
//! ```

pub mod access;
pub mod error;
pub mod lpm;
pub mod mi32;
pub mod sim;
pub mod transaction;

// Re-export commonly used types
pub use access::RegisterAccess;
pub use error::{P4DevError, P4DevResult, P4DevStatus, P4DevStatusExt};
pub use lpm::LpmGeometry;
pub use mi32::{Mi32, PollPolicy};
pub use sim::{Mi32Row, SimulatedRegisters};
pub use transaction::{Transaction, WORD_BITS};
