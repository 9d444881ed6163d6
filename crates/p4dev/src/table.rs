//! Rule lifecycle of one match-action table.
//!
//! A [`Table`] owns `capacity + 1` slots. Slot 0 holds the default rule,
//! slots `1..=size` the ordinary rules in logical order; there are never
//! holes between them. Every change is applied to the slots first, then the
//! complete rule set is handed to the engine. If the upload fails the slots
//! are restored, so a failed operation leaves the software state as it was.
//!
//! Mutating operations need the register space and go through a
//! [`TableHandle`], obtained from [`crate::Device::get_table`].

use crate::description::TableDescription;
use crate::engine::bstlpm::key_prefix;
use crate::engine::prefix_set::{prefix_matches, PrefixSet};
use crate::engine::standard::prepare_exact_key;
use crate::engine::tcam::prepare_key;
use crate::engine::{Engine, EngineContext};
use p4dev_hw::transaction::words_to_bytes;
use p4dev_hw::{P4DevError, P4DevResult, PollPolicy, RegisterAccess};
use p4dev_types::{EngineKind, KeyElement, Param, Rule};
use std::fmt;
use std::ops::Deref;
use tracing::{debug, info, warn};

/// Slot of the default rule.
const DEFAULT_SLOT: usize = 0;

/// One match-action table and the rules installed in it.
#[derive(Debug)]
pub struct Table {
    description: TableDescription,
    engine: Engine,
    slots: Vec<Option<Rule>>,
    occupied: usize,
}

impl Table {
    pub fn new(description: TableDescription, engine: Engine) -> Self {
        let slots = vec![None; description.capacity as usize + 1];
        Self {
            description,
            engine,
            slots,
            occupied: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.description.name
    }

    pub fn engine_kind(&self) -> EngineKind {
        self.engine.kind()
    }

    pub fn description(&self) -> &TableDescription {
        &self.description
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Number of ordinary rules.
    pub fn size(&self) -> usize {
        self.occupied
    }

    /// Number of ordinary rules the table can hold.
    pub fn capacity(&self) -> usize {
        self.slots.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    /// Rule at logical `index`.
    pub fn get_rule(&self, index: usize) -> Option<&Rule> {
        if index >= self.occupied {
            return None;
        }
        self.slots[index + 1].as_ref()
    }

    /// The installed default rule, if any.
    ///
    /// The built-in default of the description is not reported here.
    pub fn get_default_rule(&self) -> Option<&Rule> {
        self.slots[DEFAULT_SLOT].as_ref()
    }

    /// Ordinary rules in logical order.
    pub fn rules(&self) -> impl Iterator<Item = &Rule> + '_ {
        self.slots[1..=self.occupied].iter().flatten()
    }

    /// Finds the rule matching `key`.
    ///
    /// Keys are compared as serialized, so bits above a field width do
    /// not count. Ternary tables compare values under the mask together
    /// with the masks, exact tables the values only. LPM tables return the
    /// most specific rule whose prefix contains the key.
    pub fn find(&self, key: &[KeyElement]) -> P4DevResult<usize> {
        let found = match self.engine.kind() {
            EngineKind::Lpm => self.longest_prefix(key)?,
            EngineKind::Tcam | EngineKind::Cuckoo => self.position(key)?,
        };
        found.ok_or_else(|| P4DevError::rule_not_found(self.name()))
    }

    fn longest_prefix(&self, key: &[KeyElement]) -> P4DevResult<Option<usize>> {
        let probe = words_to_bytes(prepare_exact_key(&self.description, key)?.words());
        let mut best: Option<(usize, u32)> = None;
        for (index, rule) in self.rules().enumerate() {
            let (prefix, len) = key_prefix(&self.description, &rule.key)?;
            if prefix_matches(&prefix, len, &probe) && best.map_or(true, |(_, l)| len > l) {
                best = Some((index, len));
            }
        }
        Ok(best.map(|(index, _)| index))
    }

    /// Index of the rule whose key equals `key` exactly.
    fn position(&self, key: &[KeyElement]) -> P4DevResult<Option<usize>> {
        match self.engine.kind() {
            EngineKind::Tcam => {
                let wanted = prepare_key(&self.description, key)?;
                for (index, rule) in self.rules().enumerate() {
                    if prepare_key(&self.description, &rule.key)?.same_entry(&wanted) {
                        return Ok(Some(index));
                    }
                }
                Ok(None)
            }
            EngineKind::Cuckoo => {
                let wanted = prepare_exact_key(&self.description, key)?;
                for (index, rule) in self.rules().enumerate() {
                    if prepare_exact_key(&self.description, &rule.key)? == wanted {
                        return Ok(Some(index));
                    }
                }
                Ok(None)
            }
            EngineKind::Lpm => {
                let (wanted, wanted_len) = key_prefix(&self.description, key)?;
                for (index, rule) in self.rules().enumerate() {
                    let (prefix, len) = key_prefix(&self.description, &rule.key)?;
                    if len == wanted_len && prefix_matches(&prefix, len, &wanted) {
                        return Ok(Some(index));
                    }
                }
                Ok(None)
            }
        }
    }

    fn check_rule(&self, rule: &Rule) -> P4DevResult<()> {
        if rule.table_name != self.description.name {
            return Err(P4DevError::invalid_rule(format!(
                "rule for table {} offered to table {}",
                rule.table_name, self.description.name
            )));
        }
        if rule.engine != self.engine.kind() {
            return Err(P4DevError::invalid_rule(format!(
                "{} rule offered to {} table {}",
                rule.engine,
                self.engine.kind(),
                self.description.name
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Table {} ({}, {}/{} rules)",
            self.name(),
            self.engine_kind(),
            self.size(),
            self.capacity()
        )?;
        if let Some(rule) = self.get_default_rule() {
            writeln!(f, "  default: {}", rule)?;
        }
        for (index, rule) in self.rules().enumerate() {
            writeln!(f, "  [{}] {}", index, rule)?;
        }
        Ok(())
    }
}

/// Mutable access to a table together with the register space it lives in.
pub struct TableHandle<'a, R: RegisterAccess + ?Sized> {
    table: &'a mut Table,
    hw: &'a mut R,
    poll: PollPolicy,
}

impl<'a, R: RegisterAccess + ?Sized> Deref for TableHandle<'a, R> {
    type Target = Table;

    fn deref(&self) -> &Table {
        &*self.table
    }
}

impl<'a, R: RegisterAccess + ?Sized> TableHandle<'a, R> {
    pub fn new(table: &'a mut Table, hw: &'a mut R, poll: PollPolicy) -> Self {
        Self { table, hw, poll }
    }

    /// Uploads the current slots.
    ///
    /// An empty default slot falls back to the built-in default action of
    /// the description.
    fn upload(&mut self) -> P4DevResult<()> {
        let Table {
            description,
            engine,
            slots,
            occupied,
        } = &mut *self.table;

        let rules: Vec<&Rule> = slots[1..=*occupied].iter().flatten().collect();
        let builtin = description.builtin_default_rule();
        let default = slots[DEFAULT_SLOT].as_ref().or(builtin.as_ref());

        let mut ctx = EngineContext::new(&mut *self.hw, description, self.poll);
        engine.write_rules(&mut ctx, &rules, default)
    }

    /// Runs `change` on the slots and uploads the result.
    ///
    /// The slots are restored if `change` or the upload fails.
    fn apply<T>(&mut self, change: impl FnOnce(&mut Table) -> P4DevResult<T>) -> P4DevResult<T> {
        let slots = self.table.slots.clone();
        let occupied = self.table.occupied;

        let result = change(&mut *self.table).and_then(|value| self.upload().map(|()| value));
        if let Err(e) = &result {
            warn!("Table {}: {}, restoring previous rules", self.table.name(), e);
            self.table.slots = slots;
            self.table.occupied = occupied;
        }
        result
    }

    /// Installs `rule` and returns its index.
    ///
    /// With `overwrite`, a rule with an equal key is replaced in place;
    /// without it such a rule is an error.
    pub fn insert(&mut self, rule: Rule, overwrite: bool) -> P4DevResult<usize> {
        self.table.check_rule(&rule)?;
        if rule.is_default {
            return Err(P4DevError::invalid_rule(format!(
                "default rule passed to insert on table {}",
                self.table.name()
            )));
        }
        if self.table.occupied >= self.table.capacity() {
            return Err(P4DevError::table_full(self.table.name()));
        }

        let existing = self.table.position(&rule.key)?;
        if existing.is_some() && !overwrite {
            return Err(P4DevError::rule_exists(self.table.name()));
        }

        let index = self.apply(move |table| {
            let index = existing.unwrap_or(table.occupied);
            table.slots[index + 1] = Some(rule);
            if existing.is_none() {
                table.occupied += 1;
            }
            Ok(index)
        })?;
        info!("Table {}: rule installed at index {}", self.table.name(), index);
        Ok(index)
    }

    /// Installs the default rule.
    pub fn insert_default(&mut self, mut rule: Rule) -> P4DevResult<()> {
        self.table.check_rule(&rule)?;
        if self.table.slots[DEFAULT_SLOT].is_some() {
            return Err(P4DevError::rule_exists(self.table.name()));
        }

        rule.is_default = true;
        self.apply(move |table| {
            table.slots[DEFAULT_SLOT] = Some(rule);
            Ok(())
        })?;
        info!("Table {}: default rule installed", self.table.name());
        Ok(())
    }

    /// Replaces action and parameters of the rule at `index`.
    pub fn modify(&mut self, index: usize, action: &str, params: Vec<Param>) -> P4DevResult<()> {
        let size = self.table.occupied;
        if index >= size {
            return Err(P4DevError::IndexOutOfRange { index, size });
        }

        let action = action.to_string();
        self.apply(move |table| {
            if let Some(rule) = table.slots[index + 1].as_mut() {
                rule.action = action;
                rule.params = params;
            }
            Ok(())
        })?;
        debug!("Table {}: rule {} modified", self.table.name(), index);
        Ok(())
    }

    /// Modifies the rule whose key equals `key`.
    ///
    /// Only LPM tables resolve a key to a single rule; the others report
    /// [`P4DevError::NotImplemented`].
    pub fn modify_by_key(&mut self, key: &[KeyElement], action: &str, params: Vec<Param>) -> P4DevResult<()> {
        if self.table.engine_kind() != EngineKind::Lpm {
            return Err(P4DevError::not_implemented(format!(
                "modify by key on {} table {}",
                self.table.engine_kind(),
                self.table.name()
            )));
        }
        let index = self
            .table
            .position(key)?
            .ok_or_else(|| P4DevError::rule_not_found(self.table.name()))?;
        self.modify(index, action, params)
    }

    /// Removes the rule at `index`.
    ///
    /// Ternary tables shift the following rules down to keep their
    /// priority order. The other engines move the last rule into the gap.
    pub fn delete(&mut self, index: usize) -> P4DevResult<()> {
        let size = self.table.occupied;
        if index >= size {
            return Err(P4DevError::IndexOutOfRange { index, size });
        }

        let preserve_order = self.table.engine_kind().preserves_order();
        self.apply(move |table| {
            let last = table.occupied;
            if preserve_order {
                table.slots[index + 1..=last].rotate_left(1);
            } else {
                table.slots.swap(index + 1, last);
            }
            table.slots[last] = None;
            table.occupied -= 1;
            Ok(())
        })?;
        info!("Table {}: rule {} deleted", self.table.name(), index);
        Ok(())
    }

    /// Removes the default rule; the built-in default takes over.
    pub fn reset_default(&mut self) -> P4DevResult<()> {
        if self.table.slots[DEFAULT_SLOT].is_none() {
            return Err(P4DevError::NoDefaultRule {
                table: self.table.name().to_string(),
            });
        }

        self.apply(|table| {
            table.slots[DEFAULT_SLOT] = None;
            Ok(())
        })?;
        info!("Table {}: default rule reset", self.table.name());
        Ok(())
    }

    /// Empties the table in software and hardware, default rule included.
    pub fn clear(&mut self) -> P4DevResult<()> {
        let Table {
            description,
            engine,
            slots,
            occupied,
        } = &mut *self.table;

        slots.iter_mut().for_each(|slot| *slot = None);
        *occupied = 0;
        let mut ctx = EngineContext::new(&mut *self.hw, description, self.poll);
        engine.initialize(&mut ctx)?;
        info!("Table {}: cleared", description.name);
        Ok(())
    }

    /// Rebuilds the prefix set held by the LPM component.
    pub fn read_back(&mut self) -> P4DevResult<PrefixSet> {
        match &self.table.engine {
            Engine::Lpm(engine) => engine.read_back(&mut *self.hw),
            _ => Err(P4DevError::not_implemented(format!(
                "read back of {} table {}",
                self.table.engine_kind(),
                self.table.name()
            ))),
        }
    }
}
