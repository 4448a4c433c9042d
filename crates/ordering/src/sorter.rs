use std::{
    cmp::Ordering,
    collections::{BinaryHeap, HashMap},
};

use opnet_primitives::{Buf32, L1BlockId, OpTxId};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum SortError {
    /// A dependency edge names a transaction not in the block.
    #[error("unknown parent {parent} for {child}")]
    UnknownParent { parent: OpTxId, child: OpTxId },

    /// The dependency graph has a cycle. Impossible for real blocks;
    /// treated as corruption by the caller.
    #[error("dependency cycle among block transactions")]
    DependencyCycle,
}

/// One block transaction as the sorter sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortableTx {
    pub txid: OpTxId,
    pub priority_fee_sat: u64,
    /// Deterministic tiebreak value; see [`indexing_hash`].
    pub indexing_hash: Buf32,
    /// In-block parents: producers of outputs this transaction consumes
    /// (and referenced partial-transaction ids at admission time).
    pub parents: Vec<OpTxId>,
}

/// The tiebreak hash: `SHA-256(tx_hash ∥ block_hash)`.
///
/// The concatenation order is transaction hash first; this is fixed and
/// consensus-visible.
pub fn indexing_hash(txid: &OpTxId, block: &L1BlockId) -> Buf32 {
    let mut hasher = Sha256::new();
    hasher.update(txid.inner().as_bytes());
    hasher.update(block.inner().as_bytes());
    Buf32::new(hasher.finalize().into())
}

/// Heap entry: bigger effective fee wins, then the lexicographically
/// smaller indexing hash.
#[derive(Debug, PartialEq, Eq)]
struct Ready {
    effective_fee: u64,
    indexing_hash: Buf32,
    node: usize,
}

impl Ord for Ready {
    fn cmp(&self, other: &Self) -> Ordering {
        self.effective_fee
            .cmp(&other.effective_fee)
            .then_with(|| other.indexing_hash.cmp(&self.indexing_hash))
    }
}

impl PartialOrd for Ready {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Produces the canonical execution order for a block's transactions.
///
/// Parents always precede children; among the currently eligible
/// transactions the one with the highest effective fee (its own priority
/// fee or the highest fee anywhere in its descendant set) is emitted
/// first, with the indexing hash as the final tiebreak.
///
/// `O((n + e) log n)`.
pub fn sort_block(txs: &[SortableTx]) -> Result<Vec<OpTxId>, SortError> {
    let n = txs.len();
    if n == 0 {
        return Ok(Vec::new());
    }

    let index_of: HashMap<OpTxId, usize> =
        txs.iter().enumerate().map(|(i, tx)| (tx.txid, i)).collect();

    // children[parent] and in-degrees over in-block edges only.
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut indegree: Vec<usize> = vec![0; n];
    for (child_idx, tx) in txs.iter().enumerate() {
        for parent in &tx.parents {
            let parent_idx = *index_of.get(parent).ok_or(SortError::UnknownParent {
                parent: *parent,
                child: tx.txid,
            })?;
            children[parent_idx].push(child_idx);
            indegree[child_idx] += 1;
        }
    }

    // Topological pass to order nodes parents-first.
    let mut topo = Vec::with_capacity(n);
    let mut queue: Vec<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut degree = indegree.clone();
    while let Some(node) = queue.pop() {
        topo.push(node);
        for &child in &children[node] {
            degree[child] -= 1;
            if degree[child] == 0 {
                queue.push(child);
            }
        }
    }
    if topo.len() != n {
        return Err(SortError::DependencyCycle);
    }

    // Effective fee: own fee or the best fee among descendants, folded in
    // reverse topological order.
    let mut effective: Vec<u64> = txs.iter().map(|tx| tx.priority_fee_sat).collect();
    for &node in topo.iter().rev() {
        for &child in &children[node] {
            effective[node] = effective[node].max(effective[child]);
        }
    }

    // Emission: priority queue over currently eligible nodes.
    let mut heap: BinaryHeap<Ready> = (0..n)
        .filter(|&i| indegree[i] == 0)
        .map(|i| Ready {
            effective_fee: effective[i],
            indexing_hash: txs[i].indexing_hash,
            node: i,
        })
        .collect();

    let mut order = Vec::with_capacity(n);
    while let Some(ready) = heap.pop() {
        order.push(txs[ready.node].txid);
        for &child in &children[ready.node] {
            indegree[child] -= 1;
            if indegree[child] == 0 {
                heap.push(Ready {
                    effective_fee: effective[child],
                    indexing_hash: txs[child].indexing_hash,
                    node: child,
                });
            }
        }
    }

    debug_assert_eq!(order.len(), n, "cycle already ruled out");
    Ok(order)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn txid(seed: u16) -> OpTxId {
        let mut bytes = [0u8; 32];
        bytes[30..].copy_from_slice(&seed.to_be_bytes());
        OpTxId::new(Buf32::new(bytes))
    }

    fn hash_prefix(prefix: u16) -> Buf32 {
        let mut bytes = [0u8; 32];
        bytes[..2].copy_from_slice(&prefix.to_be_bytes());
        Buf32::new(bytes)
    }

    fn tx(seed: u16, fee: u64, hash: u16, parents: &[u16]) -> SortableTx {
        SortableTx {
            txid: txid(seed),
            priority_fee_sat: fee,
            indexing_hash: hash_prefix(hash),
            parents: parents.iter().map(|s| txid(*s)).collect(),
        }
    }

    // Equal-fee determinism scenario: five transactions at 32 sat, one
    // descendant at 100 sat lifting its whole ancestor chain, tiebreaks on
    // the indexing hash.
    #[test]
    fn test_equal_fee_deterministic_order() {
        let txs = vec![
            tx(0x0001, 32, 0xb413, &[]),
            tx(0x0002, 32, 0xfcf0, &[]),
            tx(0x0003, 32, 0x583c, &[]),
            tx(0x0004, 32, 0x4f35, &[]),
            tx(0x0005, 32, 0x9f1a, &[0x0002, 0x0003, 0x0004]),
            tx(0x0006, 100, 0x40d8, &[0x0001, 0x0005]),
        ];

        let order = sort_block(&txs).unwrap();
        let expected: Vec<_> = [0x0004, 0x0003, 0x0001, 0x0002, 0x0005, 0x0006]
            .iter()
            .map(|s| txid(*s))
            .collect();
        assert_eq!(order, expected);
    }

    #[test]
    fn test_parent_before_child_even_with_lower_fee() {
        let txs = vec![
            tx(1, 1, 0x0001, &[]),
            tx(2, 1_000, 0x0002, &[1]),
            tx(3, 500, 0x0003, &[]),
        ];

        let order = sort_block(&txs).unwrap();
        // 1's effective fee is 1000 (via its child), so it beats 3.
        assert_eq!(order, vec![txid(1), txid(2), txid(3)]);
    }

    #[test]
    fn test_unknown_parent_rejected() {
        let txs = vec![tx(1, 1, 0x0001, &[99])];
        assert!(matches!(
            sort_block(&txs),
            Err(SortError::UnknownParent { .. })
        ));
    }

    #[test]
    fn test_cycle_detected() {
        let txs = vec![tx(1, 1, 0x0001, &[2]), tx(2, 1, 0x0002, &[1])];
        assert!(matches!(sort_block(&txs), Err(SortError::DependencyCycle)));
    }

    #[test]
    fn test_empty_block() {
        assert!(sort_block(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_indexing_hash_order_is_tx_then_block() {
        let t = txid(7);
        let block = L1BlockId::new(Buf32::new([9u8; 32]));

        let mut hasher = Sha256::new();
        hasher.update(t.inner().as_bytes());
        hasher.update(block.inner().as_bytes());
        let expected = Buf32::new(hasher.finalize().into());

        assert_eq!(indexing_hash(&t, &block), expected);
        // Swapping the order must change the value.
        let swapped = {
            let mut hasher = Sha256::new();
            hasher.update(block.inner().as_bytes());
            hasher.update(t.inner().as_bytes());
            Buf32::new(hasher.finalize().into())
        };
        assert_ne!(indexing_hash(&t, &block), swapped);
    }

    /// Random DAG: fees plus forward edges (parent index < child index).
    fn arb_dag() -> impl Strategy<Value = Vec<SortableTx>> {
        (1usize..24)
            .prop_flat_map(|n| {
                (
                    proptest::collection::vec(0u64..500, n),
                    proptest::collection::vec((0usize..n, 0usize..n), 0..n * 2),
                    Just(n),
                )
            })
            .prop_map(|(fees, raw_edges, n)| {
                let mut parents: Vec<Vec<u16>> = vec![Vec::new(); n];
                for (a, b) in raw_edges {
                    if a == b {
                        continue;
                    }
                    let (parent, child) = (a.min(b), a.max(b));
                    if !parents[child].contains(&(parent as u16 + 1)) {
                        parents[child].push(parent as u16 + 1);
                    }
                }
                fees.into_iter()
                    .enumerate()
                    .map(|(i, fee)| {
                        tx(
                            i as u16 + 1,
                            fee,
                            // Distinct deterministic hashes.
                            (i as u16).wrapping_mul(2_654_435u32 as u16).wrapping_add(17),
                            &parents[i].clone(),
                        )
                    })
                    .collect()
            })
    }

    proptest! {
        #[test]
        fn prop_output_is_permutation(txs in arb_dag()) {
            let order = sort_block(&txs).unwrap();
            prop_assert_eq!(order.len(), txs.len());
            let mut sorted_in: Vec<_> = txs.iter().map(|t| t.txid).collect();
            let mut sorted_out = order.clone();
            sorted_in.sort();
            sorted_out.sort();
            prop_assert_eq!(sorted_in, sorted_out);
        }

        #[test]
        fn prop_parents_precede_children(txs in arb_dag()) {
            let order = sort_block(&txs).unwrap();
            let position: HashMap<_, _> =
                order.iter().enumerate().map(|(i, id)| (*id, i)).collect();
            for t in &txs {
                for parent in &t.parents {
                    prop_assert!(position[parent] < position[&t.txid]);
                }
            }
        }

        #[test]
        fn prop_stable_under_input_rotation(txs in arb_dag(), rot in 0usize..16) {
            let baseline = sort_block(&txs).unwrap();

            let mut rotated = txs.clone();
            let k = rot % rotated.len().max(1);
            rotated.rotate_left(k);
            prop_assert_eq!(sort_block(&rotated).unwrap(), baseline);
        }

        #[test]
        fn prop_sorting_twice_is_identical(txs in arb_dag()) {
            prop_assert_eq!(sort_block(&txs).unwrap(), sort_block(&txs).unwrap());
        }
    }
}
