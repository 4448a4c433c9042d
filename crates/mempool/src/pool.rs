use std::{collections::HashMap, sync::Arc};

use bitcoin::{consensus, Psbt, Transaction};
use opnet_db::{MempoolRow, SledNodeStorage};
use opnet_params::ConsensusRegistry;
use opnet_primitives::{Buf32, OpTxId};
use opnet_txparse::{classify_transaction, TxPayload};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use crate::{
    dag::DependencyDag,
    entry::MempoolEntry,
    errors::MempoolError,
    verify::{TxVerifier, VerifyContext},
};

/// Blocks an entry survives in the pool before rebase evicts it.
const DEFAULT_EXPIRY_BLOCKS: u64 = 144;

const ADMITTED_CHANNEL_CAPACITY: usize = 256;

/// Persistence seam for mempool rows.
pub trait RowStore: Send + Sync {
    fn put(&self, row: &MempoolRow) -> Result<(), String>;
    fn remove(&self, id: &Buf32, is_psbt: bool) -> Result<(), String>;
    fn load_all(&self) -> Result<Vec<MempoolRow>, String>;
}

impl<S: RowStore> RowStore for &S {
    fn put(&self, row: &MempoolRow) -> Result<(), String> {
        (**self).put(row)
    }

    fn remove(&self, id: &Buf32, is_psbt: bool) -> Result<(), String> {
        (**self).remove(id, is_psbt)
    }

    fn load_all(&self) -> Result<Vec<MempoolRow>, String> {
        (**self).load_all()
    }
}

impl RowStore for SledNodeStorage {
    fn put(&self, row: &MempoolRow) -> Result<(), String> {
        self.put_mempool_row(row).map_err(|e| e.to_string())
    }

    fn remove(&self, id: &Buf32, is_psbt: bool) -> Result<(), String> {
        self.remove_mempool_row(id, is_psbt).map_err(|e| e.to_string())
    }

    fn load_all(&self) -> Result<Vec<MempoolRow>, String> {
        self.mempool_rows().map_err(|e| e.to_string())
    }
}

/// Volatile row store for tests and throwaway nodes.
#[derive(Debug, Default)]
pub struct MemoryRowStore {
    rows: Mutex<HashMap<(Buf32, bool), MempoolRow>>,
}

impl RowStore for MemoryRowStore {
    fn put(&self, row: &MempoolRow) -> Result<(), String> {
        self.rows
            .lock()
            .insert((row.id, row.is_psbt), row.clone());
        Ok(())
    }

    fn remove(&self, id: &Buf32, is_psbt: bool) -> Result<(), String> {
        self.rows.lock().remove(&(*id, is_psbt));
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<MempoolRow>, String> {
        Ok(self.rows.lock().values().cloned().collect())
    }
}

/// One pending submission from the API or gossip.
#[derive(Debug, Clone)]
pub struct Submission {
    pub raw: Vec<u8>,
    pub is_psbt: bool,
    pub previous_psbt_id: Option<Buf32>,
}

/// Bounded intake in front of the pool; overflow is a `Congested`
/// rejection the caller can retry.
#[derive(Debug, Clone)]
pub struct AdmissionQueue {
    tx: mpsc::Sender<Submission>,
}

impl AdmissionQueue {
    pub fn new(depth: usize) -> (Self, mpsc::Receiver<Submission>) {
        let (tx, rx) = mpsc::channel(depth);
        (Self { tx }, rx)
    }

    pub fn submit(&self, submission: Submission) -> Result<(), MempoolError> {
        self.tx
            .try_send(submission)
            .map_err(|_| MempoolError::Congested)
    }
}

/// The mempool.
///
/// Owned by the mempool worker; all access is single-threaded within it.
pub struct Mempool<V, S> {
    consensus: Arc<ConsensusRegistry>,
    verifier: V,
    store: S,
    max_entries: usize,

    entries: HashMap<(Buf32, bool), MempoolEntry>,
    /// Consumer index: outpoint → entry key consuming it.
    consumers: HashMap<(OpTxId, u32), (Buf32, bool)>,
    dag: DependencyDag,
    admitted_tx: broadcast::Sender<Buf32>,
}

impl<V, S> std::fmt::Debug for Mempool<V, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mempool")
            .field("entries", &self.entries.len())
            .field("max_entries", &self.max_entries)
            .finish_non_exhaustive()
    }
}

impl<V: TxVerifier, S: RowStore> Mempool<V, S> {
    pub fn new(
        consensus: Arc<ConsensusRegistry>,
        verifier: V,
        store: S,
        max_entries: usize,
    ) -> Self {
        let (admitted_tx, _) = broadcast::channel(ADMITTED_CHANNEL_CAPACITY);
        Self {
            consensus,
            verifier,
            store,
            max_entries,
            entries: HashMap::new(),
            consumers: HashMap::new(),
            dag: DependencyDag::new(),
            admitted_tx,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &Buf32, is_psbt: bool) -> bool {
        self.entries.contains_key(&(*id, is_psbt))
    }

    pub fn entry(&self, id: &Buf32, is_psbt: bool) -> Option<&MempoolEntry> {
        self.entries.get(&(*id, is_psbt))
    }

    pub fn dag(&self) -> &DependencyDag {
        &self.dag
    }

    /// Admitted-entry feed for the gossip worker.
    pub fn subscribe_admitted(&self) -> broadcast::Receiver<Buf32> {
        self.admitted_tx.subscribe()
    }

    /// Runs the admission pipeline for one submission.
    pub fn admit(
        &mut self,
        submission: Submission,
        current_height: u64,
        now: u64,
    ) -> Result<Buf32, MempoolError> {
        if self.entries.len() >= self.max_entries {
            return Err(MempoolError::Congested);
        }

        let consensus = self
            .consensus
            .active_at(current_height)
            .map_err(|e| MempoolError::Store(e.to_string()))?;

        // Size gate before any decoding work.
        let limit = if submission.is_psbt {
            consensus.network.psbt_max_broadcast_size
        } else {
            consensus.network.max_tx_broadcast_size
        };
        if submission.raw.len() > limit {
            return Err(MempoolError::Oversize {
                size: submission.raw.len(),
                limit,
            });
        }

        // Decode: PSBT first when flagged, falling back to raw consensus
        // bytes.
        let tx: Transaction = if submission.is_psbt {
            match Psbt::deserialize(&submission.raw) {
                Ok(psbt) => psbt.unsigned_tx,
                Err(psbt_err) => consensus::deserialize(&submission.raw)
                    .map_err(|_| MempoolError::Decode(psbt_err.to_string()))?,
            }
        } else {
            consensus::deserialize(&submission.raw)
                .map_err(|e| MempoolError::Decode(e.to_string()))?
        };

        let parsed = classify_transaction(&tx, &consensus.transactions)?;
        let id = *parsed.txid.inner();
        let key = (id, submission.is_psbt);
        if self.entries.contains_key(&key) {
            return Err(MempoolError::DuplicatePsbt);
        }

        let kind = self.verifier.verify(&VerifyContext {
            tx: &tx,
            payload: &parsed.payload,
            consensus,
            is_psbt: submission.is_psbt,
        })?;

        // Priority-fee accounting, recomputed from the decoded envelope.
        let priority_fee_sat = parsed.payload.priority_fee_sat();
        let vsize = tx.vsize() as u64;
        if !parsed.payload.is_generic() {
            let rate = priority_fee_sat / vsize.max(1);
            let floor = consensus.psbt.min_fee_rate_vb_per_sat;
            if rate < floor {
                return Err(MempoolError::FeeTooLow {
                    rate_sat_vb: rate,
                    floor_sat_vb: floor,
                });
            }
        }

        // Dependency linking: in-pool producers of consumed outpoints
        // plus the declared predecessor PSBT.
        let inputs: Vec<(OpTxId, u32)> = tx
            .input
            .iter()
            .map(|i| {
                (
                    OpTxId::from(i.previous_output.txid),
                    i.previous_output.vout,
                )
            })
            .collect();

        let mut parents: Vec<Buf32> = inputs
            .iter()
            .filter(|(txid, _)| {
                let parent_id = *txid.inner();
                parent_id != id && self.dag.contains(&parent_id)
            })
            .map(|(txid, _)| *txid.inner())
            .collect();
        parents.sort();
        parents.dedup();
        if let Some(prev) = submission.previous_psbt_id {
            if !parents.contains(&prev) {
                parents.push(prev);
            }
        }

        // The raw and PSBT variants of one identifier share a dag node;
        // their dependency edges are identical by construction.
        let dag_inserted = if self.dag.contains(&id) {
            false
        } else {
            self.dag
                .insert(id, &parents)
                .map_err(|_| MempoolError::Cycle)?;
            true
        };

        let entry = MempoolEntry {
            id,
            is_psbt: submission.is_psbt,
            raw: submission.raw,
            kind,
            previous_psbt_id: submission.previous_psbt_id,
            first_seen: now,
            expires_at_height: Some(current_height + DEFAULT_EXPIRY_BLOCKS),
            inputs: inputs.clone(),
            output_values_sat: tx.output.iter().map(|o| o.value.to_sat()).collect(),
            opnet: match &parsed.payload {
                TxPayload::Generic => None,
                other => Some(other.clone()),
            },
            priority_fee_sat,
            vsize,
        };

        let row = MempoolRow {
            id,
            is_psbt: entry.is_psbt,
            raw: entry.raw.clone(),
            previous_psbt_id: entry.previous_psbt_id,
            first_seen: entry.first_seen,
            expires_at_height: entry.expires_at_height,
        };
        if let Err(message) = self.store.put(&row) {
            if dag_inserted {
                self.dag.remove(&id);
            }
            return Err(MempoolError::Store(message));
        }

        for outpoint in &inputs {
            self.consumers.insert(*outpoint, key);
        }
        self.entries.insert(key, entry);

        debug!(id = %id, kind = ?kind, "mempool entry admitted");
        let _ = self.admitted_tx.send(id);
        Ok(id)
    }

    /// Re-admits persisted rows after a restart.
    ///
    /// Each row goes back through the full admission pipeline; rows that
    /// no longer pass (fee floor changed, expired, dependencies gone) are
    /// dropped from the store rather than resurrected.
    pub fn load_persisted(&mut self, current_height: u64) -> Result<usize, MempoolError> {
        let rows = self
            .store
            .load_all()
            .map_err(MempoolError::Store)?;

        let mut restored = 0;
        for row in rows {
            let submission = Submission {
                raw: row.raw,
                is_psbt: row.is_psbt,
                previous_psbt_id: row.previous_psbt_id,
            };
            match self.admit(submission, current_height, row.first_seen) {
                Ok(_) => restored += 1,
                Err(error) => {
                    debug!(id = %row.id, %error, "dropping stale persisted entry");
                    if let Err(message) = self.store.remove(&row.id, row.is_psbt) {
                        debug!(id = %row.id, %message, "stale row removal failed");
                    }
                }
            }
        }

        info!(%restored, "mempool reloaded from storage");
        Ok(restored)
    }

    /// Rebases the pool onto a freshly committed block: drops mined
    /// entries, entries whose inputs are now spent on-chain, and entries
    /// past their expiry height.
    pub fn rebase(
        &mut self,
        mined: &[Buf32],
        spent_outpoints: &[(OpTxId, u32)],
        new_height: u64,
    ) -> Vec<Buf32> {
        let mut evict: Vec<(Buf32, bool)> = Vec::new();

        for id in mined {
            for is_psbt in [false, true] {
                if self.entries.contains_key(&(*id, is_psbt)) {
                    evict.push((*id, is_psbt));
                }
            }
        }

        for outpoint in spent_outpoints {
            if let Some(key) = self.consumers.get(outpoint) {
                evict.push(*key);
            }
        }

        for (key, entry) in &self.entries {
            if matches!(entry.expires_at_height, Some(h) if h <= new_height) {
                evict.push(*key);
            }
        }

        evict.sort();
        evict.dedup();

        let mut evicted_ids = Vec::with_capacity(evict.len());
        for key in evict {
            self.remove_entry(&key);
            evicted_ids.push(key.0);
        }
        if !evicted_ids.is_empty() {
            info!(
                count = evicted_ids.len(),
                %new_height,
                "mempool rebased"
            );
        }
        evicted_ids
    }

    fn remove_entry(&mut self, key: &(Buf32, bool)) {
        let Some(entry) = self.entries.remove(key) else {
            return;
        };
        for outpoint in &entry.inputs {
            if self.consumers.get(outpoint) == Some(key) {
                self.consumers.remove(outpoint);
            }
        }
        // Keep the dag node while the sibling (raw/PSBT) variant lives.
        if !self.entries.contains_key(&(entry.id, !entry.is_psbt)) {
            self.dag.remove(&entry.id);
        }
        if let Err(message) = self.store.remove(&entry.id, entry.is_psbt) {
            // Persistence divergence self-heals on restart reload.
            debug!(id = %entry.id, %message, "mempool row removal failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::consensus::Encodable;
    use opnet_params::{
        ConsensusFeatures, ConsensusParams, EpochParams, NetworkLimits, PsbtParams,
        TransactionLimits,
    };
    use opnet_txparse::builder::{self, EnvelopeSpec};
    use proptest::prelude::*;

    use super::*;
    use crate::verify::{StandardVerifier, UncheckedMlDsa};

    fn registry() -> Arc<ConsensusRegistry> {
        let params = ConsensusParams {
            name: "base".to_string(),
            enabled_at_block: 0,
            next_consensus: None,
            next_consensus_block: None,
            is_ready_for_next: false,
            network: NetworkLimits {
                max_tx_broadcast_size: 100_000,
                psbt_max_broadcast_size: 200_000,
            },
            psbt: PsbtParams {
                min_fee_rate_vb_per_sat: 1,
            },
            transactions: TransactionLimits {
                max_gas: 300_000_000,
                emulation_max_gas: 100_000_000,
                sat_to_gas_ratio: 1_000_000,
                max_receipt_len: 4096,
                max_event_len: 1024,
                max_deploy_depth: 2,
                max_call_depth: 10,
                storage_cost_per_byte: 100,
                max_calldata: 8192,
                max_priority_fee_sat: 100_000_000,
            },
            epoch: EpochParams {
                blocks_per_epoch: 10,
            },
            features: ConsensusFeatures::default(),
        };
        Arc::new(ConsensusRegistry::new(vec![params]).unwrap())
    }

    fn make_pool(max_entries: usize) -> Mempool<StandardVerifier<UncheckedMlDsa>, MemoryRowStore> {
        Mempool::new(
            registry(),
            StandardVerifier::new(UncheckedMlDsa),
            MemoryRowStore::default(),
            max_entries,
        )
    }

    fn serialize(tx: &Transaction) -> Vec<u8> {
        let mut out = Vec::new();
        tx.consensus_encode(&mut out).unwrap();
        out
    }

    fn raw_submission(raw: Vec<u8>) -> Submission {
        Submission {
            raw,
            is_psbt: false,
            previous_psbt_id: None,
        }
    }

    fn envelope_raw(priority_fee: u64, calldata: Vec<u8>) -> Vec<u8> {
        serialize(&builder::envelope_tx(&EnvelopeSpec::interaction(
            calldata,
            priority_fee,
        )))
    }

    #[test]
    fn test_admit_generic_transaction() {
        let mut pool = make_pool(100);
        let raw = serialize(&builder::plain_transfer_tx());

        let id = pool.admit(raw_submission(raw), 100, 1_700_000_000).unwrap();

        assert_eq!(pool.len(), 1);
        let entry = pool.entry(&id, false).unwrap();
        assert_eq!(entry.kind, crate::KnownTransaction::BitcoinV2);
        assert!(entry.opnet.is_none());
    }

    #[test]
    fn test_admit_interaction_envelope() {
        let mut pool = make_pool(100);
        let raw = envelope_raw(10_000, vec![1, 2, 3, 4, 5]);

        let id = pool.admit(raw_submission(raw), 100, 1_700_000_000).unwrap();

        let entry = pool.entry(&id, false).unwrap();
        assert_eq!(entry.kind, crate::KnownTransaction::OpnetInteraction);
        assert_eq!(entry.priority_fee_sat, 10_000);
        assert!(entry.opnet.is_some());
    }

    #[test]
    fn test_duplicate_rejected_but_psbt_flag_disambiguates() {
        let mut pool = make_pool(100);
        let raw = serialize(&builder::plain_transfer_tx());

        pool.admit(raw_submission(raw.clone()), 100, 0).unwrap();
        let err = pool.admit(raw_submission(raw), 100, 0).unwrap_err();
        assert!(matches!(err, MempoolError::DuplicatePsbt));
    }

    #[test]
    fn test_fee_below_floor_rejected() {
        let mut pool = make_pool(100);
        // An envelope transaction is a few hundred weight units; a 10 sat
        // priority fee lands below 1 sat/vB.
        let raw = envelope_raw(10, vec![1, 2, 3, 4]);

        let err = pool.admit(raw_submission(raw), 100, 0).unwrap_err();
        assert!(matches!(err, MempoolError::FeeTooLow { .. }));
    }

    #[test]
    fn test_undecodable_bytes_rejected() {
        let mut pool = make_pool(100);
        let err = pool
            .admit(raw_submission(vec![0xff; 16]), 100, 0)
            .unwrap_err();
        assert!(matches!(err, MempoolError::Decode(_)));
    }

    #[test]
    fn test_congestion_at_capacity() {
        let mut pool = make_pool(1);
        pool.admit(raw_submission(serialize(&builder::plain_transfer_tx())), 100, 0)
            .unwrap();

        let err = pool
            .admit(raw_submission(envelope_raw(10_000, vec![1, 2, 3, 4])), 100, 0)
            .unwrap_err();
        assert!(matches!(err, MempoolError::Congested));
    }

    #[test]
    fn test_psbt_dependency_cycle_rejected() {
        let mut pool = make_pool(100);

        let raw_a = serialize(&builder::plain_transfer_tx());
        let raw_b = envelope_raw(10_000, vec![1, 2, 3, 4]);
        let id_b_expected = {
            // Decode to learn B's txid without admitting it.
            let tx: Transaction = consensus::deserialize(&raw_b).unwrap();
            *OpTxId::from(tx.compute_txid()).inner()
        };

        // A declares the not-yet-present B as predecessor, then B
        // declares A: the closing edge must be refused.
        let id_a = pool
            .admit(
                Submission {
                    raw: raw_a,
                    is_psbt: false,
                    previous_psbt_id: Some(id_b_expected),
                },
                100,
                0,
            )
            .unwrap();

        let err = pool
            .admit(
                Submission {
                    raw: raw_b,
                    is_psbt: false,
                    previous_psbt_id: Some(id_a),
                },
                100,
                0,
            )
            .unwrap_err();
        assert!(matches!(err, MempoolError::Cycle));
        assert!(pool.dag().is_acyclic());
    }

    #[test]
    fn test_rebase_evicts_mined_and_expired() {
        let mut pool = make_pool(100);
        let id_mined = pool
            .admit(raw_submission(serialize(&builder::plain_transfer_tx())), 100, 0)
            .unwrap();
        let id_kept = pool
            .admit(raw_submission(envelope_raw(10_000, vec![1, 2, 3, 4])), 100, 0)
            .unwrap();

        let evicted = pool.rebase(&[id_mined], &[], 101);
        assert_eq!(evicted, vec![id_mined]);
        assert!(pool.contains(&id_kept, false));

        // Expiry: DEFAULT_EXPIRY_BLOCKS past admission height.
        let evicted = pool.rebase(&[], &[], 100 + DEFAULT_EXPIRY_BLOCKS);
        assert_eq!(evicted, vec![id_kept]);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_rebase_evicts_spent_inputs() {
        let mut pool = make_pool(100);
        let raw = envelope_raw(10_000, vec![1, 2, 3, 4]);
        let tx: Transaction = consensus::deserialize(&raw).unwrap();
        let outpoint = (
            OpTxId::from(tx.input[0].previous_output.txid),
            tx.input[0].previous_output.vout,
        );

        let id = pool.admit(raw_submission(raw), 100, 0).unwrap();
        assert!(pool.contains(&id, false));

        let evicted = pool.rebase(&[], &[outpoint], 101);
        assert_eq!(evicted, vec![id]);
    }

    #[test]
    fn test_reload_restores_entries_from_rows() {
        let store = MemoryRowStore::default();
        let raw_generic = serialize(&builder::plain_transfer_tx());
        let raw_envelope = envelope_raw(10_000, vec![1, 2, 3, 4]);

        // First life: admit two entries against a shared row store.
        {
            let mut pool = Mempool::new(
                registry(),
                StandardVerifier::new(UncheckedMlDsa),
                &store,
                100,
            );
            pool.admit(raw_submission(raw_generic), 100, 7).unwrap();
            pool.admit(raw_submission(raw_envelope), 100, 8).unwrap();
        }

        // Second life: reload from the surviving rows.
        let mut pool = Mempool::new(
            registry(),
            StandardVerifier::new(UncheckedMlDsa),
            &store,
            100,
        );
        assert!(pool.is_empty());
        let restored = pool.load_persisted(100).unwrap();
        assert_eq!(restored, 2);
        assert_eq!(pool.len(), 2);
        assert!(pool.dag().is_acyclic());
    }

    #[test]
    fn test_admission_queue_overflow_is_congested() {
        let (queue, _rx) = AdmissionQueue::new(2);
        let submission = raw_submission(vec![1, 2, 3]);

        queue.submit(submission.clone()).unwrap();
        queue.submit(submission.clone()).unwrap();
        let err = queue.submit(submission).unwrap_err();
        assert!(matches!(err, MempoolError::Congested));
    }

    proptest! {
        // Random predecessor wiring can never leave a cycle behind:
        // admission either rejects or the graph stays acyclic.
        #[test]
        fn prop_admission_preserves_acyclicity(choices in proptest::collection::vec(0usize..8, 1..24)) {
            let mut pool = make_pool(1_000);
            let mut admitted: Vec<Buf32> = Vec::new();

            for (i, choice) in choices.iter().enumerate() {
                // Unique payload so txids differ.
                let calldata = vec![1, 2, 3, 4, i as u8, *choice as u8];
                let raw = envelope_raw(50_000, calldata);
                let previous_psbt_id = if admitted.is_empty() || *choice == 0 {
                    None
                } else {
                    Some(admitted[choice % admitted.len()])
                };

                let result = pool.admit(
                    Submission { raw, is_psbt: false, previous_psbt_id },
                    100,
                    0,
                );
                if let Ok(id) = result {
                    admitted.push(id);
                }
                prop_assert!(pool.dag().is_acyclic());
            }
        }
    }
}
