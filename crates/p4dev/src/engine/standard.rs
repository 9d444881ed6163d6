//! Serialization shared by all engines.

use crate::description::TableDescription;
use p4dev_hw::{P4DevError, P4DevResult, Transaction};
use p4dev_types::{KeyElement, Rule};

/// Serializes the action record of `rule`: opcode first, then every
/// declared parameter in declaration order.
pub fn prepare_action(table: &TableDescription, rule: &Rule) -> P4DevResult<Transaction> {
    let action = table.action(&rule.action)?;

    let mut record = Transaction::new();
    record.push(&[action.opcode], table.opcode_width)?;
    for spec in &action.params {
        let param = rule
            .param(&spec.name)
            .ok_or_else(|| P4DevError::parameter_name(&spec.name))?;
        record.push(&param.value, spec.width)?;
    }
    Ok(record)
}

/// Serializes the key values of every declared match field, without masks.
pub fn prepare_exact_key(table: &TableDescription, key: &[KeyElement]) -> P4DevResult<Transaction> {
    let mut out = Transaction::new();
    for field in &table.match_fields {
        let element = find_element(key, &field.name)?;
        out.push(&element.value, field.width)?;
    }
    Ok(out)
}

pub(crate) fn find_element<'a>(key: &'a [KeyElement], name: &str) -> P4DevResult<&'a KeyElement> {
    key.iter()
        .find(|e| e.name == name)
        .ok_or_else(|| P4DevError::key_name(name))
}
