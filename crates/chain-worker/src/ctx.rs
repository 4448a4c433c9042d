use std::sync::Arc;

use bitcoin::Network;
use opnet_btcio::{BlockFetcher, L1Client};
use opnet_chainexec::ContractVm;
use opnet_db::SledNodeStorage;
use opnet_epochs::EpochManager;
use opnet_params::ConsensusRegistry;
use opnet_status::StatusChannel;

/// Indexer scheduling knobs, lifted out of the boot config.
#[derive(Debug, Clone)]
pub struct IndexerSettings {
    pub network: Network,
    /// First height the indexer processes; the seed tip sits just below.
    pub enabled_at_block: u64,
    pub max_reorg_depth: u64,
    /// When set, wipe derived state above `reindex_from_block - 1` at
    /// startup and re-drive from there.
    pub reindex_from_block: Option<u64>,
    /// Retry budget for transient upstream errors and commit conflicts.
    pub max_retries: u32,
    /// Base backoff doubled per attempt.
    pub retry_backoff_ms: u64,
    /// Re-verify invariants on the hot path after every commit.
    pub dev_assertions: bool,
}

/// Everything the block processor needs, bundled once at boot.
pub struct ChainWorkerCtx<C, V> {
    pub client: Arc<C>,
    pub fetcher: BlockFetcher<C>,
    pub store: Arc<SledNodeStorage>,
    pub consensus: Arc<ConsensusRegistry>,
    pub vm: Arc<V>,
    pub epochs: EpochManager,
    pub status: Arc<StatusChannel>,
    pub settings: IndexerSettings,
}

impl<C, V> std::fmt::Debug for ChainWorkerCtx<C, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainWorkerCtx")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl<C: L1Client, V: ContractVm> ChainWorkerCtx<C, V> {
    #[allow(clippy::too_many_arguments, reason = "boot-time wiring")]
    pub fn new(
        client: Arc<C>,
        fetcher: BlockFetcher<C>,
        store: Arc<SledNodeStorage>,
        consensus: Arc<ConsensusRegistry>,
        vm: Arc<V>,
        epochs: EpochManager,
        status: Arc<StatusChannel>,
        settings: IndexerSettings,
    ) -> Self {
        Self {
            client,
            fetcher,
            store,
            consensus,
            vm,
            epochs,
            status,
            settings,
        }
    }
}
