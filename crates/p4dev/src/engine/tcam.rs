//! Ternary engine with positional priority.
//!
//! Row 0 holds the default rule, ordinary rules follow from row 1 in table
//! order. The lowest matching row wins, so the row order is the priority.

use super::standard::{find_element, prepare_action};
use super::EngineContext;
use crate::description::TableDescription;
use p4dev_hw::transaction::word_count;
use p4dev_hw::{P4DevError, P4DevResult, RegisterAccess, Transaction};
use p4dev_types::{KeyElement, KeyExtra, Rule};
use tracing::{debug, instrument};

/// Row address of the default rule.
pub const DEFAULT_RULE_ADDRESS: u32 = 0;
/// Row address of the first ordinary rule.
pub const FIRST_RULE_ADDRESS: u32 = 1;

/// Bit-aligned key and mask of one TCAM row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcamKey {
    pub key: Vec<u32>,
    pub mask: Vec<u32>,
    pub bits: u32,
}

impl TcamKey {
    /// True if both rows match the same lookups: equal masks and equal
    /// key bits under the mask.
    pub fn same_entry(&self, other: &TcamKey) -> bool {
        self.bits == other.bits
            && self.mask == other.mask
            && self
                .key
                .iter()
                .zip(&other.key)
                .zip(&self.mask)
                .all(|((a, b), m)| a & m == b & m)
    }
}

/// Serializes the key and mask of a rule key.
///
/// Both streams start with a valid bit, followed by every declared match
/// field. Elements without a mask are compared on all bits.
pub fn prepare_key(table: &TableDescription, elements: &[KeyElement]) -> P4DevResult<TcamKey> {
    let mut key = Transaction::new();
    let mut mask = Transaction::new();
    key.push(&[0x1], 1)?;
    mask.push(&[0x1], 1)?;

    for field in &table.match_fields {
        let element = find_element(elements, &field.name)?;
        key.push(&element.value, field.width)?;
        match &element.extra {
            KeyExtra::Mask(bits) => mask.push(bits, field.width)?,
            KeyExtra::None => mask.push(&vec![0xff; field.width.div_ceil(8) as usize], field.width)?,
            KeyExtra::PrefixLen(_) => {
                return Err(P4DevError::invalid_rule(format!(
                    "match field {} of ternary table {} carries a prefix length",
                    field.name, table.name
                )))
            }
        }
    }

    Ok(TcamKey {
        bits: key.bit_len(),
        key: key.into_words(),
        mask: mask.into_words(),
    })
}

/// Key of the default row: valid, every field ignored.
fn default_key(table: &TableDescription) -> TcamKey {
    let bits = 1 + table.key_bit_width();
    let mut key = vec![0u32; word_count(bits)];
    key[0] = 0x1;
    TcamKey {
        mask: key.clone(),
        key,
        bits,
    }
}

/// Upload state of one TCAM table.
#[derive(Debug, Default)]
pub struct TcamEngine {
    rows: u32,
    default_row: bool,
}

impl TcamEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `rules` to rows `1..` and `default` to row 0.
    ///
    /// The table is disabled while the rows are rewritten. Rows left over
    /// from a longer upload are invalidated.
    #[instrument(level = "debug", skip_all, fields(table = %ctx.table.name, rules = rules.len()))]
    pub fn insert_rules<R: RegisterAccess + ?Sized>(
        &mut self,
        ctx: &mut EngineContext<'_, R>,
        rules: &[&Rule],
        default: Option<&Rule>,
    ) -> P4DevResult<()> {
        let table = ctx.table;

        let mut rows = Vec::with_capacity(rules.len() + 1);
        if let Some(rule) = default {
            rows.push((DEFAULT_RULE_ADDRESS, default_key(table), prepare_action(table, rule)?));
        }
        for (address, rule) in (FIRST_RULE_ADDRESS..).zip(rules.iter()) {
            if address > table.capacity {
                return Err(P4DevError::RuleAddressError {
                    address,
                    capacity: table.capacity,
                });
            }
            rows.push((address, prepare_key(table, &rule.key)?, prepare_action(table, rule)?));
        }

        let used = rules.len() as u32;
        let mut mi32 = ctx.mi32();
        mi32.disable()?;
        for (address, key, record) in &rows {
            mi32.write_row(*address, Some((key.key.as_slice(), key.mask.as_slice())), record.words())?;
        }
        for address in used + FIRST_RULE_ADDRESS..=self.rows {
            mi32.invalidate_row(address)?;
        }
        if default.is_none() && self.default_row {
            mi32.invalidate_row(DEFAULT_RULE_ADDRESS)?;
        }
        mi32.enable()?;

        debug!(
            "Table {}: uploaded {} rules (stale rows cleared up to {})",
            table.name, used, self.rows
        );
        self.rows = used;
        self.default_row = default.is_some();
        Ok(())
    }

    /// Invalidates rows `0..=capacity`.
    pub fn initialize<R: RegisterAccess + ?Sized>(&mut self, ctx: &mut EngineContext<'_, R>) -> P4DevResult<()> {
        let capacity = ctx.table.capacity;
        let mut mi32 = ctx.mi32();
        for address in DEFAULT_RULE_ADDRESS..=capacity {
            mi32.invalidate_row(address)?;
        }
        self.rows = 0;
        self.default_row = false;
        Ok(())
    }
}
