//! Envelope construction helpers for tests.
//!
//! Builds the same leaf-script layout the classifier expects, with
//! override hooks for producing deliberately malformed witnesses.

use std::io::Write;

use bitcoin::{
    absolute::LockTime,
    hashes::{hash160, Hash},
    opcodes::all::{OP_CHECKSIGVERIFY, OP_ENDIF, OP_EQUALVERIFY, OP_IF, OP_PUSHBYTES_0},
    script::{Builder, PushBytesBuf},
    transaction::Version,
    Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness,
};
use opnet_primitives::{Buf32, ContractAddress, StoragePointer};
use secp256k1::{PublicKey, SecretKey, SECP256K1};

use crate::{
    classify::derive_contract_address,
    envelope::{EnvelopeDiscriminator, FeatureFlags, OpnetHeader, OPNET_MAGIC},
};

const PUSH_CHUNK: usize = 500;

/// Payload side of an envelope under construction.
#[derive(Debug, Clone)]
pub enum EnvelopeKind {
    Interaction {
        target: ContractAddress,
        calldata: Vec<u8>,
    },
    Deployment {
        seed: Buf32,
        bytecode: Vec<u8>,
    },
}

/// Everything needed to build an envelope transaction.
#[derive(Debug, Clone)]
pub struct EnvelopeSpec {
    pub sender_pubkey: [u8; 33],
    pub priority_fee_sat: u64,
    pub feature_flags: FeatureFlags,
    pub compress: bool,
    pub kind: EnvelopeKind,

    /// Declared slots; setting this also raises the access-list flag.
    pub access_list: Option<Vec<(ContractAddress, StoragePointer)>>,

    /// Overrides for malformed-witness tests.
    pub sender_pubkey_hash160: Option<[u8; 20]>,
    pub contract_secret_hash160: Option<[u8; 20]>,
}

impl EnvelopeSpec {
    fn base(kind: EnvelopeKind, priority_fee_sat: u64) -> Self {
        Self {
            sender_pubkey: test_pubkey(1),
            priority_fee_sat,
            feature_flags: FeatureFlags::default(),
            compress: false,
            kind,
            access_list: None,
            sender_pubkey_hash160: None,
            contract_secret_hash160: None,
        }
    }

    /// Effective flags: the explicit set plus the access-list bit when a
    /// list is attached.
    fn effective_flags(&self) -> FeatureFlags {
        let mut bits = self.feature_flags.bits();
        if self.access_list.is_some() && matches!(self.kind, EnvelopeKind::Interaction { .. }) {
            bits |= crate::envelope::FLAG_ACCESS_LIST;
        }
        FeatureFlags::from_wire(bits).expect("known bits")
    }

    pub fn interaction(calldata: Vec<u8>, priority_fee_sat: u64) -> Self {
        let target = ContractAddress::new(opnet_primitives::sha256(b"test-target-contract"));
        Self::base(
            EnvelopeKind::Interaction { target, calldata },
            priority_fee_sat,
        )
    }

    pub fn deployment(bytecode: Vec<u8>, priority_fee_sat: u64) -> Self {
        Self::base(
            EnvelopeKind::Deployment {
                seed: Buf32::new([7u8; 32]),
                bytecode,
            },
            priority_fee_sat,
        )
    }

    pub fn interaction_target(&self) -> Option<ContractAddress> {
        match &self.kind {
            EnvelopeKind::Interaction { target, .. } => Some(*target),
            EnvelopeKind::Deployment { .. } => None,
        }
    }

    fn secret_hash(&self) -> [u8; 20] {
        if let Some(overridden) = self.contract_secret_hash160 {
            return overridden;
        }
        let address = match &self.kind {
            EnvelopeKind::Interaction { target, .. } => *target,
            EnvelopeKind::Deployment { seed, .. } => {
                derive_contract_address(&self.sender_pubkey, seed)
            }
        };
        hash160::Hash::hash(address.as_bytes()).to_byte_array()
    }

    fn sender_hash(&self) -> [u8; 20] {
        self.sender_pubkey_hash160
            .unwrap_or_else(|| hash160::Hash::hash(&self.sender_pubkey).to_byte_array())
    }

    fn body(&self) -> Vec<u8> {
        let discriminator = EnvelopeDiscriminator {
            is_deployment: matches!(self.kind, EnvelopeKind::Deployment { .. }),
            compressed: self.compress,
        };

        let (head, payload): (&[u8; 32], &[u8]) = match &self.kind {
            EnvelopeKind::Interaction { target, calldata } => (target.as_bytes(), calldata),
            EnvelopeKind::Deployment { seed, bytecode } => (seed.as_bytes(), bytecode),
        };

        // Access-list section precedes the calldata inside the
        // compressible region.
        let mut inner = Vec::new();
        if let Some(list) = &self.access_list {
            inner.extend_from_slice(&(list.len() as u16).to_be_bytes());
            for (contract, pointer) in list {
                inner.extend_from_slice(contract.as_bytes());
                inner.extend_from_slice(pointer.as_bytes());
            }
        }
        inner.extend_from_slice(payload);

        let compressed = if self.compress {
            deflate(&inner)
        } else {
            inner
        };

        let mut body = vec![discriminator.to_byte()];
        body.extend_from_slice(head);
        body.extend_from_slice(&compressed);
        body
    }
}

/// Deterministic compressed pubkey from a one-byte seed.
pub fn test_pubkey(seed: u8) -> [u8; 33] {
    let secret = SecretKey::from_slice(&[seed.max(1); 32]).expect("valid secret");
    PublicKey::from_secret_key(SECP256K1, &secret).serialize()
}

fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder =
        flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).expect("in-memory write");
    encoder.finish().expect("in-memory finish")
}

/// Builds the envelope leaf script for a spec.
pub fn leaf_script(spec: &EnvelopeSpec) -> ScriptBuf {
    let salt_source = test_pubkey(9);
    let header = OpnetHeader {
        pubkey_prefix: salt_source[0],
        feature_flags: spec.effective_flags(),
        priority_fee_sat: spec.priority_fee_sat,
        salt_material: salt_source[1..].try_into().expect("33 byte key"),
        solution: vec![0xff; 8],
    };

    let mut builder = Builder::new()
        .push_slice(spec.sender_pubkey)
        .push_opcode(OP_CHECKSIGVERIFY)
        .push_slice(spec.secret_hash())
        .push_opcode(OP_EQUALVERIFY)
        .push_slice(spec.sender_hash())
        .push_opcode(OP_EQUALVERIFY)
        .push_slice(OPNET_MAGIC)
        .push_slice(PushBytesBuf::try_from(header.to_wire()).expect("push size"))
        .push_opcode(OP_PUSHBYTES_0)
        .push_opcode(OP_IF);

    for chunk in spec.body().chunks(PUSH_CHUNK) {
        builder = builder.push_slice(PushBytesBuf::try_from(chunk.to_vec()).expect("push size"));
    }

    builder.push_opcode(OP_ENDIF).into_script()
}

/// Wraps a leaf script into a script-path spend transaction.
pub fn envelope_tx(spec: &EnvelopeSpec) -> Transaction {
    let script = leaf_script(spec);

    // Leaf version 0xc0, even parity, internal key = sender's x-only key.
    let mut control = Vec::with_capacity(33);
    control.push(0xc0);
    control.extend_from_slice(&spec.sender_pubkey[1..]);

    let witness = Witness::from_slice(&[
        vec![0xaa; 64],
        script.as_bytes().to_vec(),
        control,
    ]);

    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::null(),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness,
        }],
        output: vec![TxOut {
            value: Amount::from_sat(10_000),
            script_pubkey: ScriptBuf::from_bytes(vec![0x51]),
        }],
    }
}

/// A transaction with no witness at all.
pub fn plain_transfer_tx() -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::null(),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(10_000),
            script_pubkey: ScriptBuf::from_bytes(vec![0x51]),
        }],
    }
}

/// A taproot key-path spend: single witness item, no leaf script.
pub fn key_path_tx() -> Transaction {
    let mut tx = plain_transfer_tx();
    tx.input[0].witness = Witness::from_slice(&[vec![0xbb; 64]]);
    tx
}
