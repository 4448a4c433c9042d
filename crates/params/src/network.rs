use std::{fmt, str::FromStr};

use bitcoin::Network;
use serde::{Deserialize, Serialize};

/// The base-chain network the node indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
    Mainnet,
    Testnet,
    Regtest,
    Signet,
}

impl NetworkKind {
    /// The corresponding rust-bitcoin network, used for address parsing
    /// and script validity.
    pub fn to_bitcoin(self) -> Network {
        match self {
            NetworkKind::Mainnet => Network::Bitcoin,
            NetworkKind::Testnet => Network::Testnet,
            NetworkKind::Regtest => Network::Regtest,
            NetworkKind::Signet => Network::Signet,
        }
    }
}

impl fmt::Display for NetworkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NetworkKind::Mainnet => "mainnet",
            NetworkKind::Testnet => "testnet",
            NetworkKind::Regtest => "regtest",
            NetworkKind::Signet => "signet",
        };
        f.write_str(s)
    }
}

impl FromStr for NetworkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainnet" => Ok(NetworkKind::Mainnet),
            "testnet" => Ok(NetworkKind::Testnet),
            "regtest" => Ok(NetworkKind::Regtest),
            "signet" => Ok(NetworkKind::Signet),
            other => Err(format!("unknown network: {other}")),
        }
    }
}
