//! Match-action rule model for P4 FPGA targets.
//!
//! This crate provides the in-memory representation of the rules a control
//! plane programs into a P4 device:
//!
//! - [`EngineKind`]: The hardware search engine behind a table
//! - [`KeyElement`] / [`KeyExtra`]: One match field of a rule key
//! - [`Param`]: One action parameter
//! - [`Rule`]: A complete match-action rule

mod engine;
mod key;
mod rule;

pub use engine::EngineKind;
pub use key::{KeyElement, KeyExtra};
pub use rule::{Param, Rule};

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid search engine: {0}")]
    InvalidEngine(String),
}
