//! The block processor: drives fetch → parse → sort → execute → commit
//! per height with at-most-once commit semantics, rewinding through
//! reorgs and halting on consensus lockdown or corruption.

mod ctx;
mod error;
mod exec;
mod reorg;
mod task;

pub use ctx::{ChainWorkerCtx, IndexerSettings};
pub use error::{WorkerError, WorkerResult};
pub use exec::{simulate_call, BlockOutcome};
pub use task::{chain_worker_task, sync_to_tip};
