use crate::{
    consensus::{
        ConsensusFeatures, ConsensusParams, EpochParams, NetworkLimits, PsbtParams,
        TransactionLimits,
    },
    error::ConsensusError,
    network::NetworkKind,
    registry::ConsensusRegistry,
};

/// Built-in parameter table for a network.
///
/// One active consensus ("roswell") enabled from the indexer's first
/// block. Upgrades append entries here; nodes that do not know the
/// successor lock down at its activation height.
pub fn default_registry(
    network: NetworkKind,
    enabled_at_block: u64,
) -> Result<ConsensusRegistry, ConsensusError> {
    let relaxed = matches!(network, NetworkKind::Regtest | NetworkKind::Signet);

    ConsensusRegistry::new(vec![ConsensusParams {
        name: "roswell".to_string(),
        enabled_at_block,
        next_consensus: None,
        next_consensus_block: None,
        is_ready_for_next: false,
        network: NetworkLimits {
            max_tx_broadcast_size: 800_000,
            psbt_max_broadcast_size: 1_000_000,
        },
        psbt: PsbtParams {
            min_fee_rate_vb_per_sat: if relaxed { 1 } else { 2 },
        },
        transactions: TransactionLimits {
            max_gas: 300_000_000_000,
            emulation_max_gas: 15_000_000_000,
            sat_to_gas_ratio: 1_000_000,
            max_receipt_len: 128 * 1024,
            max_event_len: 4096,
            max_deploy_depth: 8,
            max_call_depth: 20,
            storage_cost_per_byte: 300,
            max_calldata: 512 * 1024,
            max_priority_fee_sat: 500_000_000,
        },
        epoch: EpochParams {
            blocks_per_epoch: 10,
        },
        features: ConsensusFeatures {
            access_list: true,
            epoch_submission: true,
            mldsa_link_pubkey: !relaxed,
        },
    }])
}
