use bitcoin::Transaction;
use opnet_params::ConsensusParams;
use opnet_txparse::TxPayload;
use tracing::debug;

use crate::{entry::KnownTransaction, errors::MempoolError};

/// Hybrid post-quantum link verification, consumed as a capability.
///
/// The primitive itself (ML-DSA) is external; any implementation of this
/// trait can back the mempool. The node ships a rejecting default for
/// builds without the verifier and an unchecked one for test networks.
pub trait MlDsaVerifier: Send + Sync {
    fn verify_link(
        &self,
        classical_pubkey: &[u8; 33],
        hybrid_pubkey: &[u8],
        message: &[u8],
    ) -> Result<(), String>;
}

/// Refuses every hybrid link. The safe default when no ML-DSA backend is
/// wired in: flagged transactions are rejected instead of admitted
/// unverified.
#[derive(Debug, Default)]
pub struct RejectingMlDsa;

impl MlDsaVerifier for RejectingMlDsa {
    fn verify_link(
        &self,
        _classical_pubkey: &[u8; 33],
        _hybrid_pubkey: &[u8],
        _message: &[u8],
    ) -> Result<(), String> {
        Err("no ML-DSA verifier configured".to_string())
    }
}

/// Accepts every hybrid link. Regtest/dev only.
#[derive(Debug, Default)]
pub struct UncheckedMlDsa;

impl MlDsaVerifier for UncheckedMlDsa {
    fn verify_link(
        &self,
        _classical_pubkey: &[u8; 33],
        _hybrid_pubkey: &[u8],
        _message: &[u8],
    ) -> Result<(), String> {
        Ok(())
    }
}

/// What a per-kind verifier sees.
#[derive(Debug)]
pub struct VerifyContext<'a> {
    pub tx: &'a Transaction,
    pub payload: &'a TxPayload,
    pub consensus: &'a ConsensusParams,
    pub is_psbt: bool,
}

/// Per-classification acceptance rules.
pub trait TxVerifier: Send + Sync {
    fn verify(&self, ctx: &VerifyContext<'_>) -> Result<KnownTransaction, MempoolError>;
}

/// The built-in verifier stack.
///
/// Structural key material is already validated by the parser; script
/// execution against the base chain is the upstream node's concern. What
/// is enforced here: version classification, envelope key consistency,
/// and the hybrid link when the envelope declares one.
pub struct StandardVerifier<M> {
    mldsa: M,
}

impl<M: std::fmt::Debug> std::fmt::Debug for StandardVerifier<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StandardVerifier")
            .field("mldsa", &self.mldsa)
            .finish()
    }
}

impl<M: MlDsaVerifier> StandardVerifier<M> {
    pub fn new(mldsa: M) -> Self {
        Self { mldsa }
    }
}

impl<M: MlDsaVerifier> TxVerifier for StandardVerifier<M> {
    fn verify(&self, ctx: &VerifyContext<'_>) -> Result<KnownTransaction, MempoolError> {
        let kind = match ctx.payload {
            TxPayload::Generic => {
                if ctx.tx.version.0 <= 1 {
                    KnownTransaction::BitcoinV1
                } else {
                    KnownTransaction::BitcoinV2
                }
            }
            TxPayload::Interaction(_) => KnownTransaction::OpnetInteraction,
            TxPayload::Deployment(_) => KnownTransaction::OpnetDeployment,
        };

        // The hybrid key material rides in the solution blob; link
        // verification owns its layout.
        let link: Option<(_, &[u8; 33], &[u8])> = match ctx.payload {
            TxPayload::Interaction(i) => {
                Some((i.feature_flags, &i.sender_pubkey, i.solution.as_slice()))
            }
            TxPayload::Deployment(d) => {
                Some((d.feature_flags, &d.sender_pubkey, d.solution.as_slice()))
            }
            TxPayload::Generic => None,
        };

        if let Some((flags, sender, hybrid)) = link {
            if flags.mldsa_link_pubkey() {
                self.mldsa
                    .verify_link(sender, hybrid, ctx.tx.compute_txid().as_ref())
                    .map_err(MempoolError::InvalidSignature)?;
                debug!("hybrid link verified");
            }
        }

        Ok(kind)
    }
}
