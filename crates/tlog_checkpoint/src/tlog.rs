// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Merkle tree hashing and consistency verification for transparency logs,
//! following [RFC 6962](https://tools.ietf.org/html/rfc6962#section-2.1)
//! hashing and the [RFC 9162](https://www.rfc-editor.org/rfc/rfc9162)
//! consistency verification algorithm.
//!
//! The verifier side ([`check_tree`]) is the load-bearing part: it decides
//! whether a claimed new tree head extends a previously observed one. The
//! small in-memory proof builders ([`tree_hash`], [`consistency_proof`])
//! exist so tests and tools can construct honest trees to check against.

use base64::prelude::*;
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TlogError {
    #[error("invalid transparency proof")]
    InvalidProof,
    #[error("malformed hash")]
    MalformedHash,
    #[error("unmet input condition: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    InvalidBase64(#[from] base64::DecodeError),
}

/// The size of a [`Hash`] in bytes.
pub const HASH_SIZE: usize = 32;

/// A hash identifying a log record or tree root.
#[derive(Copy, Clone, Default, PartialEq, Eq)]
pub struct Hash(pub [u8; HASH_SIZE]);

/// A verifiable Merkle tree consistency proof.
pub type Proof = Vec<Hash>;

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", BASE64_STANDARD.encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl Hash {
    /// Decodes a hash from its standard base64 encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not base64 or does not decode to
    /// exactly [`HASH_SIZE`] bytes.
    pub fn parse_hash(s: &str) -> Result<Self, TlogError> {
        let data = BASE64_STANDARD.decode(s)?;
        Ok(Hash(data.try_into().map_err(|_| TlogError::MalformedHash)?))
    }
}

/// The hash of the empty tree, per RFC 6962, Section 2.1.
/// It is the SHA-256 hash of the empty string.
pub const EMPTY_HASH: Hash = Hash([
    0xe3, 0xb0, 0xc4, 0x42, 0x98, 0xfc, 0x1c, 0x14, 0x9a, 0xfb, 0xf4, 0xc8, 0x99, 0x6f, 0xb9, 0x24,
    0x27, 0xae, 0x41, 0xe4, 0x64, 0x9b, 0x93, 0x4c, 0xa4, 0x95, 0x99, 0x1b, 0x78, 0x52, 0xb8, 0x55,
]);

/// Returns the content hash for the given record data:
/// `SHA-256(0x00 || data)`.
pub fn record_hash(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([0x00]);
    hasher.update(data);
    Hash(hasher.finalize().into())
}

/// Returns the hash for an interior node with the given left and right
/// children: `SHA-256(0x01 || left || right)`.
pub fn node_hash(left: Hash, right: Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([0x01]);
    hasher.update(left.0);
    hasher.update(right.0);
    Hash(hasher.finalize().into())
}

// Whether the least significant bit of i is set.
fn lsb_set(i: u64) -> bool {
    (i & 1) == 1
}

/// Verifies that `proof` demonstrates the tree of size `old_size` with root
/// `old_hash` is a prefix of the tree of size `new_size` with root
/// `new_hash`, following
/// <https://www.rfc-editor.org/rfc/rfc9162#section-2.1.4.2>.
///
/// Requires `1 <= old_size <= new_size`. Equal sizes are consistent exactly
/// when the hashes are equal and the proof is empty.
///
/// # Errors
///
/// Returns [`TlogError::InvalidProof`] if verification fails.
pub fn check_tree(
    proof: &[Hash],
    new_size: u64,
    new_hash: Hash,
    old_size: u64,
    old_hash: Hash,
) -> Result<(), TlogError> {
    if old_size == 0 || old_size > new_size {
        return Err(TlogError::InvalidInput(
            "`1 <= old_size <= new_size`".into(),
        ));
    }
    if old_size == new_size {
        if old_hash == new_hash && proof.is_empty() {
            return Ok(());
        }
        return Err(TlogError::InvalidProof);
    }

    // 1. If the proof is empty, fail.
    if proof.is_empty() {
        return Err(TlogError::InvalidProof);
    }

    // 2. If old_size is an exact power of 2, the old root itself stands in
    //    for the first proof hash.
    let mut path = proof.iter().copied();
    let (mut f_r, mut s_r) = if old_size.is_power_of_two() {
        (old_hash, old_hash)
    } else {
        let first = path.next().ok_or(TlogError::InvalidProof)?;
        (first, first)
    };

    // 3. Set fn to old_size - 1 and sn to new_size - 1.
    let mut f_n = old_size - 1;
    let mut s_n = new_size - 1;

    // 4. While LSB(fn) is set, right-shift both fn and sn.
    while lsb_set(f_n) {
        f_n >>= 1;
        s_n >>= 1;
    }

    // 6. For each remaining value c in the proof:
    for c in path {
        // a. If sn is 0, the proof is too long.
        if s_n == 0 {
            return Err(TlogError::InvalidProof);
        }
        // b. Siblings on the left extend both reconstructed roots.
        if lsb_set(f_n) || f_n == s_n {
            f_r = node_hash(c, f_r);
            s_r = node_hash(c, s_r);
            while !lsb_set(f_n) && f_n != 0 {
                f_n >>= 1;
                s_n >>= 1;
            }
        } else {
            // c. Siblings on the right only extend the new root.
            s_r = node_hash(s_r, c);
        }
        // d. Right-shift fn and sn once.
        f_n >>= 1;
        s_n >>= 1;
    }

    // 7. Both roots must have been reconstructed and the proof consumed.
    if s_n == 0 && f_r == old_hash && s_r == new_hash {
        Ok(())
    } else {
        Err(TlogError::InvalidProof)
    }
}

/// Computes the RFC 6962 Merkle tree head over the given leaf hashes.
pub fn tree_hash(leaves: &[Hash]) -> Hash {
    match leaves.len() {
        0 => EMPTY_HASH,
        1 => leaves[0],
        n => {
            let k = split_point(n as u64) as usize;
            node_hash(tree_hash(&leaves[..k]), tree_hash(&leaves[k..]))
        }
    }
}

/// Builds the proof that the tree over the first `old_size` of `leaves` is
/// a prefix of the tree over all of them, per RFC 6962 Section 2.1.2.
///
/// # Errors
///
/// Returns an error unless `1 <= old_size <= leaves.len()`.
pub fn consistency_proof(old_size: u64, leaves: &[Hash]) -> Result<Proof, TlogError> {
    let n = leaves.len() as u64;
    if old_size == 0 || old_size > n {
        return Err(TlogError::InvalidInput(
            "`1 <= old_size <= leaves.len()`".into(),
        ));
    }
    if old_size == n {
        return Ok(vec![]);
    }
    Ok(subproof(old_size, leaves, true))
}

// SUBPROOF(m, D[n], known) from RFC 6962 Section 2.1.2.
fn subproof(m: u64, leaves: &[Hash], known: bool) -> Proof {
    let n = leaves.len() as u64;
    if m == n {
        if known {
            return vec![];
        }
        return vec![tree_hash(leaves)];
    }
    let k = split_point(n) as usize;
    let mut proof;
    if m <= k as u64 {
        proof = subproof(m, &leaves[..k], known);
        proof.push(tree_hash(&leaves[k..]));
    } else {
        proof = subproof(m - k as u64, &leaves[k..], false);
        proof.push(tree_hash(&leaves[..k]));
    }
    proof
}

// The largest power of two strictly less than n. Requires n >= 2.
fn split_point(n: u64) -> u64 {
    1 << (n - 1).ilog2()
}
