use async_trait::async_trait;
use bitcoin::{block::Header, Block, BlockHash, Transaction, Txid};
use bitcoind_async_client::{traits::Reader, Auth, Client};
use opnet_config::RpcConfig;

use crate::error::{L1Error, L1Result};

/// Upstream chain summary, the ground truth for tip decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainInfo {
    pub blocks: u64,
    pub best_block_hash: BlockHash,
}

/// The subset of the base-chain RPC the core consumes.
///
/// Kept narrow so workers can be tested against a mock without a bitcoind
/// in the loop.
#[cfg_attr(any(test, feature = "test_utils"), mockall::automock)]
#[async_trait]
pub trait L1Client: Send + Sync + 'static {
    async fn block_hash_at(&self, height: u64) -> L1Result<BlockHash>;

    async fn block_at(&self, height: u64) -> L1Result<Block>;

    async fn block_by_hash(&self, hash: &BlockHash) -> L1Result<Block>;

    async fn header_by_hash(&self, hash: &BlockHash) -> L1Result<Header>;

    async fn chain_info(&self) -> L1Result<ChainInfo>;

    async fn raw_transactions(&self, txids: &[Txid]) -> L1Result<Vec<Transaction>>;
}

/// [`L1Client`] over a real `bitcoind` RPC connection.
#[derive(Debug)]
pub struct RpcL1Client {
    inner: Client,
}

impl RpcL1Client {
    /// Builds the RPC client from node configuration.
    pub fn from_config(config: &RpcConfig) -> L1Result<Self> {
        let inner = Client::new(
            config.url(),
            Auth::UserPass(config.user.clone(), config.pass.clone()),
            None,
            None,
            None,
        )
        .map_err(|e| L1Error::Fatal(format!("rpc client construction: {e}")))?;
        Ok(Self { inner })
    }
}

#[async_trait]
impl L1Client for RpcL1Client {
    async fn block_hash_at(&self, height: u64) -> L1Result<BlockHash> {
        self.inner
            .get_block_hash(height)
            .await
            .map_err(|e| L1Error::classify(e.to_string()))
    }

    async fn block_at(&self, height: u64) -> L1Result<Block> {
        self.inner
            .get_block_at(height)
            .await
            .map_err(|e| L1Error::classify(e.to_string()))
    }

    async fn block_by_hash(&self, hash: &BlockHash) -> L1Result<Block> {
        self.inner
            .get_block(hash)
            .await
            .map_err(|e| L1Error::classify(e.to_string()))
    }

    async fn header_by_hash(&self, hash: &BlockHash) -> L1Result<Header> {
        self.inner
            .get_block_header(hash)
            .await
            .map_err(|e| L1Error::classify(e.to_string()))
    }

    async fn chain_info(&self) -> L1Result<ChainInfo> {
        let info = self
            .inner
            .get_blockchain_info()
            .await
            .map_err(|e| L1Error::classify(e.to_string()))?;
        Ok(ChainInfo {
            blocks: info.blocks.into(),
            best_block_hash: info.best_block_hash,
        })
    }

    async fn raw_transactions(&self, txids: &[Txid]) -> L1Result<Vec<Transaction>> {
        let mut out = Vec::with_capacity(txids.len());
        for txid in txids {
            let raw = self
                .inner
                .get_raw_transaction_verbosity_zero(txid)
                .await
                .map_err(|e| L1Error::classify(e.to_string()))?;
            out.push(raw.0);
        }
        Ok(out)
    }
}
