//! Epoch windows over the committed chain.
//!
//! Epochs are fixed-length windows of blocks. A window finalizes once
//! every block in it is committed: the epoch hash chains the previous
//! epoch hash with the window's deterministic target hash and the merkle
//! root over its block witnesses. Reindexing deletes epochs from a point
//! and re-derives them; missing inputs are fatal with a diagnostic, never
//! silently skipped.

mod layout;
mod manager;

pub use layout::EpochLayout;
pub use manager::{epoch_target_hash, EpochError, EpochManager};
