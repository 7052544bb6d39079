//! Network identifier.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::TypeError;

/// Identifies which strand network a node is connected to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkId {
    /// The production network.
    Live,
    /// The public test network.
    Test,
    /// Local development network.
    Dev,
}

impl NetworkId {
    /// Default P2P port for this network.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Live => 7300,
            Self::Test => 17300,
            Self::Dev => 27300,
        }
    }

    /// Human-readable name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Test => "test",
            Self::Dev => "dev",
        }
    }
}

impl FromStr for NetworkId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "live" => Ok(Self::Live),
            "test" => Ok(Self::Test),
            "dev" => Ok(Self::Dev),
            other => Err(TypeError::InvalidNetwork(other.to_string())),
        }
    }
}
