use std::io::Read;

use bitcoin::{
    hashes::{hash160, Hash},
    opcodes::all::{OP_CHECKSIGVERIFY, OP_ENDIF, OP_EQUALVERIFY, OP_IF},
    script::Instruction,
    taproot::ControlBlock,
    Script, Transaction,
};
use opnet_params::TransactionLimits;
use opnet_primitives::{Buf32, ContractAddress, OpTxId, StoragePointer};
use tracing::trace;

use crate::{
    envelope::{EnvelopeDiscriminator, FeatureFlags, OpnetHeader, OPNET_MAGIC},
    errors::ParseError,
};

/// Domain tag for contract address derivation.
const CONTRACT_ADDRESS_TAG: &[u8] = b"opnet-contract";

/// An OPNet interaction: a call into an existing contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionData {
    pub sender_pubkey: [u8; 33],
    pub salt_pubkey: [u8; 33],
    pub sender_pubkey_hash160: [u8; 20],
    pub contract_secret_hash160: [u8; 20],
    pub feature_flags: FeatureFlags,
    pub priority_fee_sat: u64,
    /// The contract being called; bound to the witness via
    /// `hash160(target) == contract_secret_hash160`.
    pub target: ContractAddress,
    pub calldata: Vec<u8>,
    /// Declared storage slots, present when the access-list flag is set.
    /// The engine prefetches these before execution.
    pub access_list: Option<Vec<(ContractAddress, StoragePointer)>>,
    /// Miner key material / solution blob trailing the header; carries
    /// the hybrid public key when the link flag is set.
    pub solution: Vec<u8>,
}

impl InteractionData {
    /// First four calldata bytes.
    pub fn selector(&self) -> Option<[u8; 4]> {
        self.calldata.get(..4).map(|s| s.try_into().expect("len 4"))
    }
}

/// An OPNet deployment: publishes new contract bytecode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentData {
    pub sender_pubkey: [u8; 33],
    pub salt_pubkey: [u8; 33],
    pub sender_pubkey_hash160: [u8; 20],
    pub contract_secret_hash160: [u8; 20],
    pub feature_flags: FeatureFlags,
    pub priority_fee_sat: u64,
    pub contract_seed: Buf32,
    pub bytecode: Vec<u8>,
    /// Miner key material / solution blob trailing the header.
    pub solution: Vec<u8>,
}

impl DeploymentData {
    /// The address the deployment will land at.
    pub fn contract_address(&self) -> ContractAddress {
        derive_contract_address(&self.sender_pubkey, &self.contract_seed)
    }
}

/// Parser classification of one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxPayload {
    Generic,
    Interaction(InteractionData),
    Deployment(DeploymentData),
}

impl TxPayload {
    pub fn priority_fee_sat(&self) -> u64 {
        match self {
            TxPayload::Generic => 0,
            TxPayload::Interaction(i) => i.priority_fee_sat,
            TxPayload::Deployment(d) => d.priority_fee_sat,
        }
    }

    pub fn is_generic(&self) -> bool {
        matches!(self, TxPayload::Generic)
    }
}

/// A lifted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTx {
    pub txid: OpTxId,
    pub payload: TxPayload,
}

/// Deterministic contract address from deployer key and seed.
pub fn derive_contract_address(deployer_pubkey: &[u8; 33], seed: &Buf32) -> ContractAddress {
    let mut preimage = Vec::with_capacity(CONTRACT_ADDRESS_TAG.len() + 33 + 32);
    preimage.extend_from_slice(CONTRACT_ADDRESS_TAG);
    preimage.extend_from_slice(deployer_pubkey);
    preimage.extend_from_slice(seed.as_bytes());
    ContractAddress::new(opnet_primitives::sha256(&preimage))
}

/// Classifies a base-chain transaction.
///
/// First match wins: a first-input witness whose tap leaf passes the
/// envelope shape test is parsed fully (any failure there is an error);
/// everything else is `Generic`.
pub fn classify_transaction(
    tx: &Transaction,
    limits: &TransactionLimits,
) -> Result<ParsedTx, ParseError> {
    let txid = OpTxId::from(tx.compute_txid());

    let Some(leaf) = envelope_leaf_script(tx) else {
        return Ok(ParsedTx {
            txid,
            payload: TxPayload::Generic,
        });
    };

    if !envelope_shape_check(leaf) {
        trace!(%txid, "witness present but not envelope-shaped");
        return Ok(ParsedTx {
            txid,
            payload: TxPayload::Generic,
        });
    }

    let payload = parse_envelope(tx, leaf, limits)?;
    Ok(ParsedTx { txid, payload })
}

/// Extracts the tap leaf script of the first input, when the witness has
/// the script-path shape (second-to-last item script, last item control
/// block).
fn envelope_leaf_script(tx: &Transaction) -> Option<&Script> {
    let witness = &tx.input.first()?.witness;
    if witness.len() < 2 {
        return None;
    }
    let script = witness.second_to_last()?;
    Some(Script::from_bytes(script))
}

/// The opcode-pattern test: cheap structural scan plus the magic bytes in
/// their expected position. No payload validation happens here.
fn envelope_shape_check(script: &Script) -> bool {
    let mut instructions = script.instructions();

    // Expected head: push33, CSV, push20, EQV, push20, EQV, magic, header.
    let head_ok = matches!(instructions.next(), Some(Ok(Instruction::PushBytes(p))) if p.len() == 33)
        && matches!(instructions.next(), Some(Ok(Instruction::Op(op))) if op == OP_CHECKSIGVERIFY)
        && matches!(instructions.next(), Some(Ok(Instruction::PushBytes(p))) if p.len() == 20)
        && matches!(instructions.next(), Some(Ok(Instruction::Op(op))) if op == OP_EQUALVERIFY)
        && matches!(instructions.next(), Some(Ok(Instruction::PushBytes(p))) if p.len() == 20)
        && matches!(instructions.next(), Some(Ok(Instruction::Op(op))) if op == OP_EQUALVERIFY)
        && matches!(instructions.next(), Some(Ok(Instruction::PushBytes(p))) if p.as_bytes() == OPNET_MAGIC)
        && matches!(instructions.next(), Some(Ok(Instruction::PushBytes(p))) if !p.is_empty());

    if !head_ok {
        return false;
    }

    // Guarded body: empty push, OP_IF, pushes, OP_ENDIF terminal.
    if !matches!(instructions.next(), Some(Ok(Instruction::PushBytes(p))) if p.is_empty()) {
        return false;
    }
    if !matches!(instructions.next(), Some(Ok(Instruction::Op(op))) if op == OP_IF) {
        return false;
    }

    let mut saw_endif = false;
    for instruction in instructions {
        match instruction {
            Ok(Instruction::PushBytes(_)) if !saw_endif => {}
            Ok(Instruction::Op(op)) if op == OP_ENDIF && !saw_endif => saw_endif = true,
            _ => return false,
        }
    }
    saw_endif
}

fn parse_envelope(
    tx: &Transaction,
    leaf: &Script,
    limits: &TransactionLimits,
) -> Result<TxPayload, ParseError> {
    // The shape check passed, so the control block slot exists; it still
    // has to decode as one.
    let control = tx.input[0]
        .witness
        .last()
        .ok_or_else(|| ParseError::MalformedWitness("missing control block".to_string()))?;
    ControlBlock::decode(control)
        .map_err(|e| ParseError::MalformedWitness(format!("control block: {e}")))?;

    let mut pushes: Vec<&[u8]> = Vec::new();
    for instruction in leaf.instructions() {
        match instruction {
            Ok(Instruction::PushBytes(p)) => pushes.push(p.as_bytes()),
            Ok(Instruction::Op(_)) => {}
            Err(e) => {
                return Err(ParseError::MalformedWitness(format!("script decode: {e}")));
            }
        }
    }

    // Push layout per the shape check: sender, secret-hash, sender-hash,
    // magic, header, empty guard, body chunks...
    let sender_pubkey: [u8; 33] = pushes[0]
        .try_into()
        .map_err(|_| ParseError::MalformedWitness("sender pubkey length".to_string()))?;
    let contract_secret_hash160: [u8; 20] = pushes[1]
        .try_into()
        .map_err(|_| ParseError::MalformedWitness("secret hash length".to_string()))?;
    let sender_pubkey_hash160: [u8; 20] = pushes[2]
        .try_into()
        .map_err(|_| ParseError::MalformedWitness("sender hash length".to_string()))?;

    secp256k1::PublicKey::from_slice(&sender_pubkey)
        .map_err(|e| ParseError::MalformedWitness(format!("sender pubkey: {e}")))?;

    let computed = hash160::Hash::hash(&sender_pubkey).to_byte_array();
    if computed != sender_pubkey_hash160 {
        return Err(ParseError::MalformedWitness(
            "sender pubkey does not match its hash160".to_string(),
        ));
    }

    let header = OpnetHeader::parse(pushes[4])?;
    if header.priority_fee_sat > limits.max_priority_fee_sat {
        return Err(ParseError::ExcessivePriorityFee {
            declared: header.priority_fee_sat,
            max: limits.max_priority_fee_sat,
        });
    }
    secp256k1::PublicKey::from_slice(&header.salt_pubkey())
        .map_err(|e| ParseError::MalformedWitness(format!("salt pubkey: {e}")))?;

    // Body = concatenation of the guarded pushes (pushes[5] is the empty
    // guard).
    let body: Vec<u8> = pushes[6..].concat();
    let (&discriminator_byte, payload) = body
        .split_first()
        .ok_or_else(|| ParseError::BadEnvelope("empty envelope body".to_string()))?;
    let discriminator = EnvelopeDiscriminator::parse(discriminator_byte)?;

    if discriminator.is_deployment {
        let (seed_bytes, bytecode) = split_seed(payload)?;
        let contract_seed = Buf32::new(seed_bytes);
        let bytecode = maybe_decompress(bytecode, discriminator.compressed, limits.max_calldata)?;
        if bytecode.is_empty() {
            return Err(ParseError::BadEnvelope("empty bytecode".to_string()));
        }

        let deployment = DeploymentData {
            sender_pubkey,
            salt_pubkey: header.salt_pubkey(),
            sender_pubkey_hash160,
            contract_secret_hash160,
            feature_flags: header.feature_flags,
            priority_fee_sat: header.priority_fee_sat,
            contract_seed,
            bytecode,
            solution: header.solution.clone(),
        };

        // The witness secret must commit to the address being deployed.
        let address = deployment.contract_address();
        if hash160::Hash::hash(address.as_bytes()).to_byte_array() != contract_secret_hash160 {
            return Err(ParseError::MalformedWitness(
                "contract secret does not match deployment address".to_string(),
            ));
        }

        Ok(TxPayload::Deployment(deployment))
    } else {
        let (target_bytes, calldata) = split_seed(payload)?;
        let target = ContractAddress::from(target_bytes);

        if hash160::Hash::hash(target.as_bytes()).to_byte_array() != contract_secret_hash160 {
            return Err(ParseError::MalformedWitness(
                "contract secret does not match call target".to_string(),
            ));
        }

        let body = maybe_decompress(calldata, discriminator.compressed, limits.max_calldata)?;

        // With the access-list flag set, the declared slots precede the
        // calldata inside the (possibly compressed) body.
        let (access_list, calldata) = if header.feature_flags.access_list() {
            let (list, rest) = split_access_list(&body)?;
            (Some(list), rest.to_vec())
        } else {
            (None, body)
        };

        if calldata.len() < 4 {
            return Err(ParseError::BadEnvelope(
                "calldata shorter than a selector".to_string(),
            ));
        }

        Ok(TxPayload::Interaction(InteractionData {
            sender_pubkey,
            salt_pubkey: header.salt_pubkey(),
            sender_pubkey_hash160,
            contract_secret_hash160,
            feature_flags: header.feature_flags,
            priority_fee_sat: header.priority_fee_sat,
            target,
            calldata,
            access_list,
            solution: header.solution.clone(),
        }))
    }
}

/// Access-list section: `count (u16 BE)` then `count` entries of
/// `contract (32B) ∥ pointer (32B)`.
fn split_access_list(
    body: &[u8],
) -> Result<(Vec<(ContractAddress, StoragePointer)>, &[u8]), ParseError> {
    if body.len() < 2 {
        return Err(ParseError::BadEnvelope("truncated access list".to_string()));
    }
    let count = u16::from_be_bytes([body[0], body[1]]) as usize;
    let entries_len = count * 64;
    let rest_at = 2 + entries_len;
    if body.len() < rest_at {
        return Err(ParseError::BadEnvelope(format!(
            "access list declares {count} entries but only {} bytes follow",
            body.len() - 2
        )));
    }

    let mut list = Vec::with_capacity(count);
    for entry in body[2..rest_at].chunks_exact(64) {
        let contract: [u8; 32] = entry[..32].try_into().expect("chunk size");
        let pointer: [u8; 32] = entry[32..].try_into().expect("chunk size");
        list.push((contract.into(), pointer.into()));
    }
    Ok((list, &body[rest_at..]))
}

/// Splits a 32-byte leading field (seed or target address) off a body.
fn split_seed(payload: &[u8]) -> Result<([u8; 32], &[u8]), ParseError> {
    if payload.len() < 32 {
        return Err(ParseError::BadEnvelope(format!(
            "envelope body of {} bytes",
            payload.len()
        )));
    }
    let head: [u8; 32] = payload[..32].try_into().expect("length checked");
    Ok((head, &payload[32..]))
}

/// Returns the payload, inflating it when the compression bit is set.
/// Inflation is capped at `max_len`; the cap also applies to the plain
/// path.
fn maybe_decompress(
    payload: &[u8],
    compressed: bool,
    max_len: usize,
) -> Result<Vec<u8>, ParseError> {
    if !compressed {
        if payload.len() > max_len {
            return Err(ParseError::BadEnvelope(format!(
                "payload of {} bytes exceeds cap {max_len}",
                payload.len()
            )));
        }
        return Ok(payload.to_vec());
    }

    let mut out = Vec::new();
    let mut decoder = flate2::read::DeflateDecoder::new(payload).take(max_len as u64 + 1);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| ParseError::BadEnvelope(format!("inflate: {e}")))?;
    if out.len() > max_len {
        return Err(ParseError::BadEnvelope(format!(
            "inflated payload exceeds cap {max_len}"
        )));
    }
    Ok(out)
}
