use opnet_btcio::L1Client;
use opnet_chainexec::ContractVm;
use opnet_primitives::L1BlockId;
use tracing::{info, warn};

use crate::{
    ctx::ChainWorkerCtx,
    error::{WorkerError, WorkerResult},
};

/// Walks back from the local tip until the local header matches the
/// upstream block hash at that height.
///
/// The search is bounded twice: by the configured reorg depth and by the
/// seed height below which nothing can be rewound. Exhausting either
/// bound is fatal.
pub(crate) async fn find_fork_height<C: L1Client, V>(
    ctx: &ChainWorkerCtx<C, V>,
    tip_height: u64,
) -> WorkerResult<u64> {
    let floor = tip_height.saturating_sub(ctx.settings.max_reorg_depth);
    let seed_height = ctx.settings.enabled_at_block.saturating_sub(1);

    for height in (floor.max(seed_height)..=tip_height).rev() {
        let local = ctx
            .store
            .header_at(height)?
            .ok_or_else(|| {
                opnet_db::DbError::Corruption(format!("no local header at {height}"))
            })?
            .blkid;
        let upstream = L1BlockId::from(ctx.client.block_hash_at(height).await?);

        if local == upstream {
            info!(%height, "found reorg fork point");
            return Ok(height);
        }
        warn!(%height, %local, %upstream, "header mismatch, walking back");
    }

    Err(WorkerError::ReorgTooDeep {
        max_depth: ctx.settings.max_reorg_depth,
        floor: floor.max(seed_height),
    })
}

/// Handles a detected divergence: rewinds storage to the fork point and
/// clears stale prefetches so the pipeline re-advances along the new
/// chain.
pub(crate) async fn handle_reorg<C: L1Client, V: ContractVm>(
    ctx: &ChainWorkerCtx<C, V>,
) -> WorkerResult<u64> {
    let tip = ctx
        .store
        .committed_tip()?
        .ok_or_else(|| opnet_db::DbError::Corruption("reorg with no tip".to_string()))?;

    warn!(%tip, "reorg detected, searching fork point");
    let fork_height = find_fork_height(ctx, tip.height()).await?;

    ctx.store.rewind_to(fork_height)?;
    ctx.fetcher.clear();

    info!(%fork_height, "rewound to fork point");
    Ok(fork_height)
}
