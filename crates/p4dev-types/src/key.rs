//! Key elements of a match-action rule.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Engine specific part of a key element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyExtra {
    /// Exact match, nothing beyond the value.
    #[default]
    None,
    /// Ternary mask, a set bit means the value bit is compared.
    Mask(Vec<u8>),
    /// Number of significant leading bits of the value.
    PrefixLen(u32),
}

/// One match field of a rule key.
///
/// `value` is stored in the byte order the serializer consumes: byte 0 is
/// packed first, into the least significant bits of the hardware word.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyElement {
    /// Match field name, as declared by the table.
    pub name: String,
    /// Field value.
    pub value: Vec<u8>,
    /// Width of the value in bits.
    pub width: u32,
    /// Mask or prefix length, depending on the engine.
    #[serde(default)]
    pub extra: KeyExtra,
}

impl KeyElement {
    /// Creates an exact-match element.
    pub fn exact(name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        let value = value.into();
        Self {
            name: name.into(),
            width: bit_len(&value),
            value,
            extra: KeyExtra::None,
        }
    }

    /// Creates a ternary element.
    pub fn ternary(
        name: impl Into<String>,
        value: impl Into<Vec<u8>>,
        mask: impl Into<Vec<u8>>,
    ) -> Self {
        let value = value.into();
        Self {
            name: name.into(),
            width: bit_len(&value),
            value,
            extra: KeyExtra::Mask(mask.into()),
        }
    }

    /// Creates a prefix element.
    pub fn prefix(name: impl Into<String>, value: impl Into<Vec<u8>>, prefix_len: u32) -> Self {
        let value = value.into();
        Self {
            name: name.into(),
            width: bit_len(&value),
            value,
            extra: KeyExtra::PrefixLen(prefix_len),
        }
    }

    /// Overrides the declared bit width.
    pub fn with_width(mut self, width: u32) -> Self {
        self.width = width;
        self
    }

    /// Returns the ternary mask, if any.
    pub fn mask(&self) -> Option<&[u8]> {
        match &self.extra {
            KeyExtra::Mask(mask) => Some(mask),
            _ => None,
        }
    }

    /// Returns the prefix length, if any.
    pub fn prefix_len(&self) -> Option<u32> {
        match self.extra {
            KeyExtra::PrefixLen(len) => Some(len),
            _ => None,
        }
    }
}

impl fmt::Display for KeyElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=0x{}", self.name, hex(&self.value))?;
        match &self.extra {
            KeyExtra::None => Ok(()),
            KeyExtra::Mask(mask) => write!(f, "&&&0x{}", hex(mask)),
            KeyExtra::PrefixLen(len) => write!(f, "/{}", len),
        }
    }
}

fn bit_len(value: &[u8]) -> u32 {
    u32::try_from(value.len() * 8).unwrap_or(u32::MAX)
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
