// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

#![allow(dead_code)]

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use signed_note::{new_encoded_ed25519_verifier_key, Ed25519NoteSigner, KeyName, Note};
use std::sync::Arc;
use tlog_checkpoint::{
    consistency_proof, record_hash, tree_hash, Checkpoint, Clock, CosignatureV1Signer,
    CosignatureV1Verifier, Hash,
};
use witness::{Witness, WitnessDb};

pub const ORIGIN: &str =
    "sigsum.org/v1/tree/4d6d8825a6bb689d459628312889dfbb0bcd41b5211d9e1ce768b0ff0309e562";
pub const WITNESS_NAME: &str = "example.com/witness";
pub const TIMESTAMP: u64 = 1_700_000_000;

pub struct FixedClock;

impl Clock for FixedClock {
    fn unix_secs(&self) -> u64 {
        TIMESTAMP
    }
}

pub struct Harness {
    pub db: Arc<WitnessDb>,
    pub witness: Arc<Witness>,
    pub log_signer: Ed25519NoteSigner,
    pub cosig_verifier: CosignatureV1Verifier,
    pub leaves: Vec<Hash>,
}

impl Harness {
    pub fn new() -> Self {
        let db = Arc::new(WitnessDb::open_in_memory().unwrap());
        db.add_log(ORIGIN).unwrap();
        let log_key = SigningKey::generate(&mut OsRng);
        let log_name = KeyName::new(ORIGIN.into()).unwrap();
        db.add_key(
            ORIGIN,
            &new_encoded_ed25519_verifier_key(&log_name, &log_key.verifying_key()),
        )
        .unwrap();

        let witness_key = SigningKey::generate(&mut OsRng);
        let signer = CosignatureV1Signer::new(
            KeyName::new(WITNESS_NAME.into()).unwrap(),
            Box::new(witness_key),
            Box::new(FixedClock),
        );
        let cosig_verifier = signer.verifier();
        Self {
            witness: Arc::new(Witness::new(db.clone(), signer)),
            db,
            log_signer: Ed25519NoteSigner::new(log_name, log_key),
            cosig_verifier,
            leaves: (0..16)
                .map(|i| record_hash(format!("leaf {i}").as_bytes()))
                .collect(),
        }
    }

    pub fn root(&self, size: u64) -> Hash {
        tree_hash(&self.leaves[..size as usize])
    }

    pub fn checkpoint_body(&self, size: u64) -> Vec<u8> {
        Checkpoint::new(ORIGIN, size, self.root(size), "")
            .unwrap()
            .to_bytes()
    }

    pub fn signed_note(&self, size: u64) -> Vec<u8> {
        let mut note = Note::new(&self.checkpoint_body(size)).unwrap();
        note.add_signature(&self.log_signer).unwrap();
        note.to_bytes()
    }

    pub fn proof(&self, old_size: u64, new_size: u64) -> Vec<Hash> {
        consistency_proof(old_size, &self.leaves[..new_size as usize]).unwrap()
    }

    /// Assembles an add-checkpoint request from its parts.
    pub fn request(&self, old_size: u64, proof: &[Hash], note: &[u8]) -> Vec<u8> {
        let mut req = format!("old {old_size}\n");
        for hash in proof {
            req.push_str(&format!("{hash}\n"));
        }
        req.push('\n');
        let mut req = req.into_bytes();
        req.extend(note);
        req
    }

    /// An honest request advancing `old_size` to `new_size`.
    pub fn honest_request(&self, old_size: u64, new_size: u64) -> Vec<u8> {
        let proof = if old_size > 0 && old_size < new_size {
            self.proof(old_size, new_size)
        } else {
            vec![]
        };
        self.request(old_size, &proof, &self.signed_note(new_size))
    }
}

/// Flips one base64 character inside the request's trailing signature line,
/// past the key ID prefix, so the line still parses but the signature bytes
/// change.
pub fn corrupt_signature(request: &[u8]) -> Vec<u8> {
    let mut out = request.to_vec();
    let line_start = out[..out.len() - 1]
        .iter()
        .rposition(|&b| b == b'\n')
        .unwrap()
        + 1;
    let b64_start = out[line_start..]
        .iter()
        .rposition(|&b| b == b' ')
        .unwrap()
        + line_start
        + 1;
    let target = b64_start + 10;
    out[target] = if out[target] == b'A' { b'B' } else { b'A' };
    out
}
