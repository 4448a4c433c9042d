//! Base-chain I/O for the OPNet node.
//!
//! Narrow [`L1Client`] capability trait over the upstream node RPC, a
//! bounded deduplicating block prefetcher, and the tip watcher task that
//! turns chain-info polling (plus optional external hints) into tip
//! change events.

mod client;
mod error;
mod fetcher;
mod tip;

pub use client::{ChainInfo, L1Client, RpcL1Client};
#[cfg(any(test, feature = "test_utils"))]
pub use client::MockL1Client;
pub use error::{L1Error, L1Result};
pub use fetcher::BlockFetcher;
pub use tip::{TipEvent, TipHint, TipWatcher, TipWatcherHandle};
