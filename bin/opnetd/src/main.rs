//! OPNet indexing and execution node.

mod workers;

use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use clap::Parser;
use opnet_btcio::{BlockFetcher, RpcL1Client, TipWatcher};
use opnet_chain_worker::{chain_worker_task, ChainWorkerCtx, IndexerSettings};
use opnet_chainexec::{ContractVm, VmError, VmHost, VmInvocation, VmOutcome};
use opnet_config::NodeConfig;
use opnet_db::SledNodeStorage;
use opnet_epochs::{EpochLayout, EpochManager};
use opnet_mempool::{
    AdmissionQueue, Mempool, RejectingMlDsa, StandardVerifier, UncheckedMlDsa,
};
use opnet_params::{default_registry, NetworkKind};
use opnet_service::{Bus, ShutdownController, WorkerKind};
use opnet_status::StatusChannel;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "opnetd", about = "OPNet indexing and execution node")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, short = 'c')]
    config: PathBuf,

    /// Wipe derived state from this height and re-drive (overrides the
    /// config file's reindex settings).
    #[arg(long)]
    reindex_from: Option<u64>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match NodeConfig::load_from_path(&args.config) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("configuration error: {error}");
            return ExitCode::from(2);
        }
    };

    // Dev mode floors verbosity at debug for the extra assertions to be
    // visible.
    let debug_level = if config.dev_mode {
        config.debug_level.max(3)
    } else {
        config.debug_level
    };
    init_tracing(debug_level);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(error) => {
            eprintln!("runtime init failed: {error}");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(config, args.reindex_from)) {
        Ok(()) => {
            info!("clean shutdown");
            ExitCode::SUCCESS
        }
        Err(error) => {
            error!(%error, "node halted on fatal error");
            ExitCode::from(1)
        }
    }
}

fn init_tracing(debug_level: u8) {
    let level = match debug_level {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Placeholder contract runtime: satisfies the deterministic VM contract
/// by treating every invocation as a trap, so execution surfaces as
/// reverted receipts rather than fabricated results.
// TODO wire the production WASM runtime in through `ContractVm`.
#[derive(Debug, Default)]
struct StubVm;

impl ContractVm for StubVm {
    fn run(
        &self,
        _bytecode: &[u8],
        _invocation: &VmInvocation<'_>,
        _host: &mut dyn VmHost,
    ) -> Result<VmOutcome, VmError> {
        Err(VmError::Trap("no contract runtime linked".to_string()))
    }
}

async fn run(config: NodeConfig, reindex_override: Option<u64>) -> anyhow::Result<()> {
    info!(network = %config.network, "starting opnetd");

    // Storage under <connection_uri>/<name>.
    let db_path = PathBuf::from(&config.database.connection_uri).join(&config.database.name);
    let store = Arc::new(SledNodeStorage::open(&db_path)?);

    let registry = Arc::new(default_registry(
        config.network,
        config.indexer.enabled_at_block,
    )?);

    let client = Arc::new(RpcL1Client::from_config(&config.rpc)?);
    let status = Arc::new(StatusChannel::new());
    let (shutdown, shutdown_signal) = ShutdownController::new();

    // Tip watcher; a notification-socket listener can feed its hint
    // inlet, polling stays the ground truth.
    let watcher = TipWatcher::new(
        client.clone(),
        Duration::from_millis(config.indexer.block_query_interval_ms),
    )
    .spawn();
    let tip_rx = watcher.subscribe();

    // Mempool worker on the bus.
    let mut bus = Bus::new();
    let mempool_inbox = bus.register(WorkerKind::Mempool);
    let bus = Arc::new(bus);

    let consensus_for_pool = registry.clone();
    // Submission intake; the API and p2p services push into this.
    let (_admission_queue, admission_rx) = AdmissionQueue::new(1_024);
    let pool_store = store.clone();
    let pool_status = status.clone();
    let mempool_handle = match config.network {
        NetworkKind::Regtest | NetworkKind::Signet => opnet_service::spawn_worker(
            workers::MempoolWorker::new(
                Mempool::new(
                    consensus_for_pool,
                    StandardVerifier::new(UncheckedMlDsa),
                    workers::SharedRowStore(pool_store.clone()),
                    100_000,
                ),
                admission_rx,
                pool_store,
                pool_status,
            ),
            mempool_inbox,
            shutdown_signal.clone(),
        ),
        _ => opnet_service::spawn_worker(
            workers::MempoolWorker::new(
                Mempool::new(
                    registry.clone(),
                    StandardVerifier::new(RejectingMlDsa),
                    workers::SharedRowStore(store.clone()),
                    100_000,
                ),
                admission_rx,
                store.clone(),
                status.clone(),
            ),
            mempool_inbox,
            shutdown_signal.clone(),
        ),
    };

    // Forward committed blocks from the status fan-out onto the bus.
    let forwarder = tokio::spawn(workers::forward_new_blocks(
        status.clone(),
        bus.clone(),
        shutdown_signal.clone(),
    ));

    // The indexer itself.
    let settings = IndexerSettings {
        network: config.network.to_bitcoin(),
        enabled_at_block: config.indexer.enabled_at_block,
        max_reorg_depth: config.indexer.max_reorg_depth,
        reindex_from_block: reindex_override.or(if config.indexer.reindex {
            config.indexer.reindex_from_block
        } else {
            None
        }),
        max_retries: 5,
        retry_backoff_ms: 500,
        dev_assertions: config.dev_mode,
    };
    let blocks_per_epoch = registry
        .active_at(config.indexer.enabled_at_block)?
        .epoch
        .blocks_per_epoch;
    let ctx = ChainWorkerCtx::new(
        client.clone(),
        BlockFetcher::new(client, config.indexer.max_prefetch_blocks),
        store,
        registry,
        Arc::new(StubVm),
        EpochManager::new(EpochLayout::new(
            config.indexer.enabled_at_block,
            blocks_per_epoch,
        )),
        status,
        settings,
    );
    let mut chain_task = tokio::spawn(chain_worker_task(ctx, tip_rx, shutdown_signal));

    // Run until ctrl-c or a fatal worker error.
    let result = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received");
            shutdown.trigger();
            (&mut chain_task).await?
        }
        joined = &mut chain_task => {
            shutdown.trigger();
            joined?
        }
    };

    watcher.abort();
    let _ = forwarder.await;
    let _ = mempool_handle.await;

    result
}
