//! The inter-worker message bus.
//!
//! Components run in isolated workers (one per [`WorkerKind`]); the only
//! way between them is a typed message over this bus. Every message is a
//! variant of the closed [`BusMessage`] enum; request/response pairs
//! carry their reply slot inline, which makes delivery at-most-once by
//! construction. Per sender-receiver pair, delivery order is send order;
//! nothing is guaranteed across senders.

mod bus;
mod message;
mod shutdown;
mod worker;

pub use bus::{Bus, BusError, DEFAULT_REQUEST_TIMEOUT};
pub use message::{BusMessage, DecodedBlock, Envelope, TxLocation, WorkerKind};
pub use shutdown::{ShutdownController, ShutdownSignal};
pub use worker::{spawn_worker, BusWorker};
