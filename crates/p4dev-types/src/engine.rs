//! Search engine kinds backing a match-action table.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Hardware search engine of a table.
///
/// The string forms are the names used by the hardware description
/// (`search-engine` property of a table's match node).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineKind {
    /// Ternary matching with positional priority.
    #[serde(rename = "mtcam", alias = "tcam")]
    Tcam,
    /// Longest-prefix match on a binary search tree.
    #[serde(rename = "lpmbst", alias = "lpm")]
    Lpm,
    /// Exact match through multi-table cuckoo hashing.
    #[serde(rename = "cuckoo")]
    Cuckoo,
}

impl EngineKind {
    /// Returns the hardware description name of the engine.
    pub const fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Tcam => "mtcam",
            EngineKind::Lpm => "lpmbst",
            EngineKind::Cuckoo => "cuckoo",
        }
    }

    /// Returns true if the position of a rule encodes its priority.
    ///
    /// Deleting from such a table has to keep the relative order of the
    /// remaining rules; the other engines may fill the hole with the last
    /// rule.
    pub const fn preserves_order(&self) -> bool {
        matches!(self, EngineKind::Tcam)
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mtcam" | "tcam" => Ok(EngineKind::Tcam),
            "lpmbst" | "lpm" => Ok(EngineKind::Lpm),
            "cuckoo" => Ok(EngineKind::Cuckoo),
            _ => Err(ParseError::InvalidEngine(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_engine_from_device_tree_name() {
        assert_eq!("mtcam".parse::<EngineKind>().unwrap(), EngineKind::Tcam);
        assert_eq!("lpmbst".parse::<EngineKind>().unwrap(), EngineKind::Lpm);
        assert_eq!("Cuckoo".parse::<EngineKind>().unwrap(), EngineKind::Cuckoo);
        assert!("hash".parse::<EngineKind>().is_err());
    }

    #[test]
    fn test_engine_display_matches_parse() {
        for kind in [EngineKind::Tcam, EngineKind::Lpm, EngineKind::Cuckoo] {
            assert_eq!(kind.to_string().parse::<EngineKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_only_tcam_preserves_order() {
        assert!(EngineKind::Tcam.preserves_order());
        assert!(!EngineKind::Lpm.preserves_order());
        assert!(!EngineKind::Cuckoo.preserves_order());
    }
}
