//! Closed node classification enums.
//!
//! Parsed from configuration and peer hellos; unknown strings are rejected
//! at construction rather than carried around as free text.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::TypeError;

/// The role a node plays in the network.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    /// Produces and finalizes blocks.
    Validator,
    /// Keeps the full chain and relays.
    Full,
    /// Tracks tips only.
    Light,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validator => "validator",
            Self::Full => "full",
            Self::Light => "light",
        }
    }

    /// Whether this node keeps a chain it can serve to peers during resync.
    pub fn serves_chain(&self) -> bool {
        matches!(self, Self::Validator | Self::Full)
    }
}

impl FromStr for NodeType {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "validator" => Ok(Self::Validator),
            "full" => Ok(Self::Full),
            "light" => Ok(Self::Light),
            other => Err(TypeError::InvalidNodeType(other.to_string())),
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a tracked node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Active,
    Syncing,
    Degraded,
    Offline,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Syncing => "syncing",
            Self::Degraded => "degraded",
            Self::Offline => "offline",
        }
    }

    pub fn is_alive(&self) -> bool {
        !matches!(self, Self::Offline)
    }
}

impl FromStr for NodeState {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "syncing" => Ok(Self::Syncing),
            "degraded" => Ok(Self::Degraded),
            "offline" => Ok(Self::Offline),
            other => Err(TypeError::InvalidNodeState(other.to_string())),
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_type_parses_case_insensitively() {
        assert_eq!("Validator".parse::<NodeType>().unwrap(), NodeType::Validator);
        assert_eq!("light".parse::<NodeType>().unwrap(), NodeType::Light);
    }

    #[test]
    fn unknown_node_type_is_rejected() {
        assert!(matches!(
            "miner".parse::<NodeType>(),
            Err(TypeError::InvalidNodeType(_))
        ));
    }

    #[test]
    fn node_state_roundtrips_through_display() {
        for state in [
            NodeState::Active,
            NodeState::Syncing,
            NodeState::Degraded,
            NodeState::Offline,
        ] {
            assert_eq!(state.to_string().parse::<NodeState>().unwrap(), state);
        }
        assert!(!NodeState::Offline.is_alive());
    }

    #[test]
    fn light_nodes_do_not_serve_chain() {
        assert!(!NodeType::Light.serves_chain());
        assert!(NodeType::Full.serves_chain());
    }
}
