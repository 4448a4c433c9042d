use std::fmt;

use opnet_primitives::{BlockRef, OpTxId};
use tokio::sync::oneshot;

/// The isolated workers a node runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerKind {
    Indexer,
    Api,
    Mempool,
    P2p,
    Plugin,
    Sync,
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerKind::Indexer => "indexer",
            WorkerKind::Api => "api",
            WorkerKind::Mempool => "mempool",
            WorkerKind::P2p => "p2p",
            WorkerKind::Plugin => "plugin",
            WorkerKind::Sync => "sync",
        };
        f.write_str(s)
    }
}

/// Where a committed transaction lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxLocation {
    pub txid: OpTxId,
    pub block_height: u64,
    pub index_in_block: u32,
}

/// Result of deserializing a raw block off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBlock {
    pub blkid: opnet_primitives::L1BlockId,
    pub txids: Vec<OpTxId>,
}

/// Every message that can cross the bus. Requests carry their reply slot;
/// dropping the slot surfaces as `Timeout` at the requester, never as a
/// second delivery.
#[derive(Debug)]
pub enum BusMessage {
    GetCurrentBlock {
        reply: oneshot::Sender<Option<BlockRef>>,
    },
    GetTransaction {
        txid: OpTxId,
        reply: oneshot::Sender<Option<TxLocation>>,
    },
    DeserializeBlock {
        raw: Vec<u8>,
        reply: oneshot::Sender<Result<DecodedBlock, String>>,
    },
    IbdDownloadTransactions {
        txids: Vec<OpTxId>,
    },
    NewBlockNotify {
        block: BlockRef,
    },
    RpcMethod {
        method: String,
        params: serde_json::Value,
        reply: oneshot::Sender<Result<serde_json::Value, String>>,
    },
    PluginRegisterRoutes {
        routes: Vec<String>,
    },
    PluginRegisterOpcodes {
        opcodes: Vec<u8>,
    },
    PluginExecuteRoute {
        route: String,
        body: Vec<u8>,
        reply: oneshot::Sender<Result<Vec<u8>, String>>,
    },
}

impl BusMessage {
    /// Stable discriminant name, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            BusMessage::GetCurrentBlock { .. } => "GET_CURRENT_BLOCK",
            BusMessage::GetTransaction { .. } => "GET_TRANSACTION",
            BusMessage::DeserializeBlock { .. } => "DESERIALIZE_BLOCK",
            BusMessage::IbdDownloadTransactions { .. } => "IBD_DOWNLOAD_TRANSACTIONS",
            BusMessage::NewBlockNotify { .. } => "NEW_BLOCK_NOTIFY",
            BusMessage::RpcMethod { .. } => "RPC_METHOD",
            BusMessage::PluginRegisterRoutes { .. } => "PLUGIN_REGISTER_ROUTES",
            BusMessage::PluginRegisterOpcodes { .. } => "PLUGIN_REGISTER_OPCODES",
            BusMessage::PluginExecuteRoute { .. } => "PLUGIN_EXECUTE_ROUTE",
        }
    }
}

/// A message plus its sender, as delivered to a worker.
#[derive(Debug)]
pub struct Envelope {
    pub from: WorkerKind,
    pub message: BusMessage,
}
