//! Match-action rules and action parameters.

use crate::key::hex;
use crate::{EngineKind, KeyElement};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One action parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Param {
    /// Parameter name, as declared by the action.
    pub name: String,
    /// Parameter value, least significant byte first.
    pub value: Vec<u8>,
}

impl Param {
    /// Creates a new parameter.
    pub fn new(name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=0x{}", self.name, hex(&self.value))
    }
}

/// A match-action rule for one table.
///
/// Key elements and parameters keep the order they were added in; lookups
/// into either sequence are by name, so the order only matters for display.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rule {
    /// Name of the table this rule belongs to.
    pub table_name: String,
    /// Engine of the owning table.
    pub engine: EngineKind,
    /// Match key, empty for default rules.
    #[serde(default)]
    pub key: Vec<KeyElement>,
    /// Name of the action to execute on match.
    pub action: String,
    /// Action parameters.
    #[serde(default)]
    pub params: Vec<Param>,
    /// True if this is the table's default rule.
    #[serde(default)]
    pub is_default: bool,
}

impl Rule {
    /// Creates a rule without key or parameters.
    pub fn new(
        table_name: impl Into<String>,
        engine: EngineKind,
        action: impl Into<String>,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            engine,
            key: Vec::new(),
            action: action.into(),
            params: Vec::new(),
            is_default: false,
        }
    }

    /// Creates a default rule.
    pub fn default_rule(
        table_name: impl Into<String>,
        engine: EngineKind,
        action: impl Into<String>,
    ) -> Self {
        Self {
            is_default: true,
            ..Self::new(table_name, engine, action)
        }
    }

    /// Appends a key element.
    pub fn with_key(mut self, element: KeyElement) -> Self {
        self.key.push(element);
        self
    }

    /// Appends an action parameter.
    pub fn with_param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    /// Finds a key element by name.
    pub fn key_element(&self, name: &str) -> Option<&KeyElement> {
        self.key.iter().find(|e| e.name == name)
    }

    /// Finds an action parameter by name.
    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Sum of the prefix lengths of all key elements.
    pub fn prefix_len(&self) -> u32 {
        self.key.iter().filter_map(KeyElement::prefix_len).sum()
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.table_name)?;
        if self.is_default {
            write!(f, "default")?;
        } else {
            for (i, element) in self.key.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", element)?;
            }
        }
        write!(f, "] -> {}(", self.action)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", param)?;
        }
        write!(f, ")")
    }
}
