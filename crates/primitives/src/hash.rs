use sha2::{Digest, Sha256};

use crate::buf::Buf32;

/// Plain SHA-256.
pub fn sha256(data: &[u8]) -> Buf32 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    Buf32::new(hasher.finalize().into())
}

/// SHA-256 over the concatenation `a ∥ b`.
pub fn sha256_concat(a: &[u8], b: &[u8]) -> Buf32 {
    let mut hasher = Sha256::new();
    hasher.update(a);
    hasher.update(b);
    Buf32::new(hasher.finalize().into())
}

/// SHA-256 merkle root over the given leaves.
///
/// An odd node at any level is paired with itself (bitcoin style). The
/// empty set hashes to the zero buffer so callers can commit to "nothing"
/// deterministically.
pub fn merkle_root(leaves: &[Buf32]) -> Buf32 {
    if leaves.is_empty() {
        return Buf32::zero();
    }

    let mut level: Vec<Buf32> = leaves.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let right = pair.get(1).unwrap_or(&pair[0]);
            next.push(sha256_concat(pair[0].as_ref(), right.as_ref()));
        }
        level = next;
    }
    level[0]
}
