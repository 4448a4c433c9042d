use serde::{Deserialize, Serialize};

/// Size limits for gossiped transaction payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkLimits {
    /// Largest raw transaction accepted for broadcast, in bytes.
    pub max_tx_broadcast_size: usize,

    /// Largest PSBT accepted for broadcast, in bytes.
    pub psbt_max_broadcast_size: usize,
}

/// PSBT acceptance parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PsbtParams {
    /// Fee-rate floor in sat per virtual byte.
    pub min_fee_rate_vb_per_sat: u64,
}

/// Per-transaction execution limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionLimits {
    /// Hard gas cap for a mined transaction.
    pub max_gas: u64,

    /// Gas cap for dry-run emulation (API simulations).
    pub emulation_max_gas: u64,

    /// Satoshi to gas conversion ratio.
    pub sat_to_gas_ratio: u64,

    /// Upper bound on a receipt's return data length, in bytes.
    pub max_receipt_len: usize,

    /// Upper bound on a single event's payload length, in bytes.
    pub max_event_len: usize,

    /// Maximum nested deployment depth.
    pub max_deploy_depth: u16,

    /// Maximum nested external-call depth.
    pub max_call_depth: u16,

    /// Gas charged per byte of newly written storage.
    pub storage_cost_per_byte: u64,

    /// Upper bound on calldata length after decompression, in bytes.
    pub max_calldata: usize,

    /// Upper bound on the declared priority fee.
    pub max_priority_fee_sat: u64,
}

/// Epoch window parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochParams {
    /// Number of base-chain blocks per epoch.
    pub blocks_per_epoch: u64,
}

/// Envelope feature flags enabled under a consensus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusFeatures {
    pub access_list: bool,
    pub epoch_submission: bool,
    pub mldsa_link_pubkey: bool,
}

/// One named consensus parameter set, active from `enabled_at_block`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusParams {
    /// Human-readable name of this consensus.
    pub name: String,

    /// First height at which this set applies.
    pub enabled_at_block: u64,

    /// Name of the successor consensus, if one is scheduled.
    pub next_consensus: Option<String>,

    /// Height at which the successor takes over.
    pub next_consensus_block: Option<u64>,

    /// Whether this build knows how to run the successor. Reaching
    /// `next_consensus_block` without this being true locks the node down.
    pub is_ready_for_next: bool,

    pub network: NetworkLimits,
    pub psbt: PsbtParams,
    pub transactions: TransactionLimits,
    pub epoch: EpochParams,
    pub features: ConsensusFeatures,
}

impl ConsensusParams {
    /// Returns true when `height` is the successor's activation height or
    /// beyond, i.e. this set may no longer be used.
    pub fn is_expired_at(&self, height: u64) -> bool {
        matches!(self.next_consensus_block, Some(h) if height >= h)
    }
}
