use std::time::Duration;

use opnet_btcio::{L1Client, TipEvent};
use opnet_chainexec::ContractVm;
use opnet_db::HeaderRecord;
use opnet_primitives::{BlockRef, Buf32, L1BlockId};
use opnet_service::ShutdownSignal;
use opnet_status::ChainTipStatus;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::{
    ctx::ChainWorkerCtx,
    error::{WorkerError, WorkerResult},
    exec::{build_header_record, execute_block_into_snapshot},
    reorg::handle_reorg,
};

/// Median-time-past window, matching base-chain convention.
const MEDIAN_TIME_SPAN: usize = 11;

/// One height's drive result.
enum ProcessOutcome {
    Committed(BlockRef),
    /// A divergence was handled; the caller re-reads the tip.
    ReorgedTo(u64),
}

/// The block processor main loop: waits for tip changes and drives the
/// committed tip up to each one. Fatal errors return and take the node
/// down; the caller maps them to the exit code.
pub async fn chain_worker_task<C: L1Client, V: ContractVm>(
    ctx: ChainWorkerCtx<C, V>,
    mut tip_rx: watch::Receiver<Option<TipEvent>>,
    mut shutdown: ShutdownSignal,
) -> anyhow::Result<()> {
    bootstrap(&ctx).await?;

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!("chain worker stopping on shutdown");
                return Ok(());
            }
            changed = tip_rx.changed() => {
                if changed.is_err() {
                    warn!("tip watcher gone, stopping chain worker");
                    return Ok(());
                }
            }
        }

        let Some(event) = *tip_rx.borrow_and_update() else {
            continue;
        };

        match sync_to_tip(&ctx, event).await {
            Ok(()) => {}
            Err(error) if error.is_fatal() => {
                error!(%error, "fatal error in chain worker");
                return Err(error.into());
            }
            Err(error) => {
                // Transient residue after the retry budget; next tip event
                // re-drives.
                warn!(%error, "sync pass failed, awaiting next tip event");
            }
        }
    }
}

/// First-run seeding and reindex handling.
async fn bootstrap<C: L1Client, V: ContractVm>(ctx: &ChainWorkerCtx<C, V>) -> WorkerResult<()> {
    if ctx.store.committed_tip()?.is_none() {
        let seed_height = ctx.settings.enabled_at_block.saturating_sub(1);
        let hash = ctx.client.block_hash_at(seed_height).await?;
        let header = ctx.client.header_by_hash(&hash).await?;
        ctx.store.init_genesis(&seed_header(seed_height, &header))?;
        info!(%seed_height, "seeded genesis tip");
    }

    if let Some(from) = ctx.settings.reindex_from_block {
        let target = from.saturating_sub(1);
        let tip = ctx.store.committed_tip()?.expect("seeded above");
        if tip.height() > target {
            warn!(%from, "reindex requested, rewinding");
            ctx.store.rewind_to(target)?;
            ctx.fetcher.clear();
            if let Some(epoch) = ctx.epochs.layout().epoch_of(from) {
                ctx.epochs
                    .reindex_from(&ctx.store, epoch)
                    .map_err(|e| opnet_db::DbError::Corruption(e.to_string()))?;
            }
        }
    }

    Ok(())
}

/// Drives the committed tip to the reported upstream tip, handling
/// divergence at equal height.
pub async fn sync_to_tip<C: L1Client, V: ContractVm>(
    ctx: &ChainWorkerCtx<C, V>,
    upstream: TipEvent,
) -> WorkerResult<()> {
    ctx.fetcher.set_horizon(upstream.height);

    loop {
        let tip = ctx
            .store
            .committed_tip()?
            .ok_or_else(|| opnet_db::DbError::Corruption("tip vanished".to_string()))?;

        if tip.height() > upstream.height {
            debug!(%tip, upstream = %upstream.height, "ahead of reported tip, waiting");
            return Ok(());
        }
        if tip.height() == upstream.height {
            if *tip.blkid() != upstream.best_block {
                // Same height, different block: upstream switched chains.
                handle_reorg(ctx).await?;
                continue;
            }
            publish_status(ctx, &tip, upstream.height);
            return Ok(());
        }

        match process_height(ctx, tip, tip.height() + 1).await? {
            ProcessOutcome::Committed(new_tip) => {
                publish_status(ctx, &new_tip, upstream.height);
                ctx.status.notify_new_block(new_tip);
            }
            ProcessOutcome::ReorgedTo(fork) => {
                debug!(%fork, "resuming after rewind");
            }
        }
    }
}

/// Processes exactly one height with the retry budget.
async fn process_height<C: L1Client, V: ContractVm>(
    ctx: &ChainWorkerCtx<C, V>,
    tip: BlockRef,
    height: u64,
) -> WorkerResult<ProcessOutcome> {
    // The consensus gate first: past a not-ready upgrade boundary the
    // node refuses work entirely.
    ctx.consensus.check_transition(height)?;

    let mut attempt = 0u32;
    loop {
        match try_process(ctx, &tip, height).await {
            Ok(outcome) => return Ok(outcome),
            Err(error) if error.is_retryable() && attempt < ctx.settings.max_retries => {
                let backoff =
                    Duration::from_millis(ctx.settings.retry_backoff_ms << attempt.min(16));
                warn!(%height, %error, %attempt, "retrying height after backoff");
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(error) if error.is_retryable() => {
                return Err(WorkerError::RetriesExhausted(error.to_string()));
            }
            Err(error) => return Err(error),
        }
    }
}

async fn try_process<C: L1Client, V: ContractVm>(
    ctx: &ChainWorkerCtx<C, V>,
    tip: &BlockRef,
    height: u64,
) -> WorkerResult<ProcessOutcome> {
    let block = ctx.fetcher.get_block(height).await?;

    // Parent linkage check before any work: a mismatch means the chain
    // moved under us.
    if L1BlockId::from(block.header.prev_blockhash) != *tip.blkid() {
        let fork = handle_reorg(ctx).await?;
        return Ok(ProcessOutcome::ReorgedTo(fork));
    }

    let consensus = ctx.consensus.active_at(height)?;
    let median_time = median_time_past(ctx, height)?;
    let difficulty = block.header.difficulty(ctx.settings.network);

    let mut snap = ctx.store.open_snapshot(height)?;
    let outcome = match execute_block_into_snapshot(
        &block,
        height,
        median_time as u64,
        &mut snap,
        consensus,
        ctx.vm.as_ref(),
    ) {
        Ok(outcome) => outcome,
        Err(error) => {
            snap.revert();
            return Err(error);
        }
    };

    // A window that closed at the previous height finalizes atomically
    // with this block.
    let (proposer, proofs) = outcome.epoch_submission.clone().unwrap_or_default();
    match ctx
        .epochs
        .maybe_finalize_closed(&ctx.store, height - 1, proposer, proofs)
    {
        Ok(Some(epoch)) => {
            info!(epoch = %epoch.epoch_number, hash = %epoch.epoch_hash, "epoch finalized");
            snap.put_epoch(epoch);
        }
        Ok(None) => {}
        Err(error) => {
            snap.revert();
            return Err(opnet_db::DbError::Corruption(error.to_string()).into());
        }
    }

    let header = build_header_record(&block, height, median_time, difficulty, &outcome);
    if let Err(error) = snap.put_header(header) {
        snap.revert();
        return Err(error.into());
    }

    // A conflict here (racing rewind) drops the snapshot, which reverts;
    // the retry loop re-drives the height.
    let new_tip = snap.commit()?;

    if ctx.settings.dev_assertions {
        verify_commit_invariants(ctx, &new_tip, tip, outcome.n_contract_txs)?;
    }

    info!(%new_tip, contract_txs = outcome.n_contract_txs, "block committed");
    Ok(ProcessOutcome::Committed(new_tip))
}

/// Post-commit re-checks, enabled by dev mode: header linkage and
/// receipt index contiguity must hold for what was just written.
fn verify_commit_invariants<C, V>(
    ctx: &ChainWorkerCtx<C, V>,
    new_tip: &BlockRef,
    parent: &BlockRef,
    n_contract_txs: u32,
) -> WorkerResult<()> {
    let header = ctx.store.header_at(new_tip.height())?.ok_or_else(|| {
        opnet_db::DbError::Corruption(format!("committed header {new_tip} unreadable"))
    })?;
    if header.prev_blkid != *parent.blkid() {
        return Err(opnet_db::DbError::Corruption(format!(
            "committed header {new_tip} does not link to {parent}"
        ))
        .into());
    }

    for index in 0..n_contract_txs {
        if ctx.store.receipt(new_tip.height(), index)?.is_none() {
            return Err(opnet_db::DbError::Corruption(format!(
                "receipt ({}, {index}) missing after commit",
                new_tip.height()
            ))
            .into());
        }
    }
    if ctx
        .store
        .receipt(new_tip.height(), n_contract_txs)?
        .is_some()
    {
        return Err(opnet_db::DbError::Corruption(format!(
            "receipt index overflow at height {}",
            new_tip.height()
        ))
        .into());
    }
    Ok(())
}

/// Median of the previous (up to) 11 committed header timestamps.
fn median_time_past<C, V>(ctx: &ChainWorkerCtx<C, V>, height: u64) -> WorkerResult<u32> {
    let mut times = Vec::with_capacity(MEDIAN_TIME_SPAN);
    let floor = ctx.settings.enabled_at_block.saturating_sub(1);
    let mut h = height;
    while h > floor && times.len() < MEDIAN_TIME_SPAN {
        h -= 1;
        let Some(header) = ctx.store.header_at(h)? else {
            break;
        };
        times.push(header.time);
    }
    if times.is_empty() {
        return Ok(0);
    }
    times.sort_unstable();
    Ok(times[times.len() / 2])
}

fn publish_status<C, V>(ctx: &ChainWorkerCtx<C, V>, tip: &BlockRef, upstream_height: u64) {
    ctx.status.update_tip(ChainTipStatus {
        tip: Some(*tip),
        upstream_height,
        in_sync: tip.height() >= upstream_height,
    });
}

/// Header row for the pre-genesis seed block. Roots are zero: nothing
/// below the enabled height is ever executed.
fn seed_header(height: u64, header: &bitcoin::block::Header) -> HeaderRecord {
    HeaderRecord {
        blkid: L1BlockId::from(header.block_hash()),
        height,
        prev_blkid: L1BlockId::from(header.prev_blockhash),
        merkle_root: Buf32::new(*bitcoin::hashes::Hash::as_byte_array(&header.merkle_root)),
        time: header.time,
        median_time: header.time,
        n_tx: 0,
        weight: 0,
        bits: header.bits.to_consensus(),
        nonce: header.nonce,
        difficulty: 0,
        version: header.version.to_consensus(),
        receipt_root: Buf32::zero(),
        storage_root: Buf32::zero(),
        checksum_root: Buf32::zero(),
    }
}

#[cfg(test)]
mod tests;
