use opnet_primitives::{Buf32, OpTxId};
use opnet_txparse::TxPayload;

/// Wire-format classification of an admitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownTransaction {
    BitcoinV1,
    BitcoinV2,
    OpnetInteraction,
    OpnetDeployment,
}

/// One admitted mempool entry.
///
/// Uniquely identified by `(id, is_psbt)`. Dependency edges live in the
/// pool's arena, not here.
#[derive(Debug, Clone)]
pub struct MempoolEntry {
    pub id: Buf32,
    pub is_psbt: bool,
    pub raw: Vec<u8>,
    pub kind: KnownTransaction,
    pub previous_psbt_id: Option<Buf32>,
    pub first_seen: u64,
    pub expires_at_height: Option<u64>,

    /// Consumed outpoints, used for dependency linking and rebase
    /// eviction.
    pub inputs: Vec<(OpTxId, u32)>,
    /// Output values, consulted when children compute resolvable fees.
    pub output_values_sat: Vec<u64>,

    /// Envelope payload for OPNet entries.
    pub opnet: Option<TxPayload>,

    /// Declared priority fee, recomputed at admission.
    pub priority_fee_sat: u64,
    /// Virtual size of the decoded transaction.
    pub vsize: u64,
}

impl MempoolEntry {
    pub fn fee_rate_sat_vb(&self) -> u64 {
        self.priority_fee_sat / self.vsize.max(1)
    }
}
