// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Timestamped Ed25519 cosignatures (algorithm 0x04) as defined by
//! [C2SP tlog-cosignature](https://c2sp.org/tlog-cosignature).
//!
//! A cosignature attests that the signer observed a specific tree head. The
//! signed message binds the current UNIX timestamp to the first three lines
//! of the checkpoint; extension lines are deliberately not covered:
//! ```text
//! cosignature/v1
//! time TTTTTTTTTT
//! <origin>
//! <size>
//! <base64 root hash>
//! ```
//! The wire signature is the big-endian `u64` timestamp followed by the
//! 64-byte Ed25519 signature.

use crate::checkpoint::Checkpoint;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use ed25519_dalek::{Verifier as Ed25519Verifier, VerifyingKey as Ed25519VerifyingKey};
use signed_note::{
    compute_key_id, encode_verifier_key, KeyName, NoteSigner, NoteVerifier, SignatureType,
};
use std::time::{SystemTime, UNIX_EPOCH};

/// Length of an encoded cosignature: timestamp plus Ed25519 signature.
const COSIGNATURE_LENGTH: usize = 8 + ed25519_dalek::SIGNATURE_LENGTH;

/// A handle to an Ed25519 signing key.
///
/// The key material may be held in process or live behind an external key
/// agent; either way the handle exposes only the public key and a raw
/// signing operation with no pre-hash.
pub trait Signer: Send + Sync {
    /// The public half of the key.
    fn public_key(&self) -> Ed25519VerifyingKey;

    /// Signs `msg`, returning the 64-byte Ed25519 signature.
    ///
    /// # Errors
    ///
    /// Returns a [`signature::Error`] if the key is unavailable or refuses
    /// to sign.
    fn sign(&self, msg: &[u8]) -> Result<ed25519_dalek::Signature, signature::Error>;
}

impl Signer for ed25519_dalek::SigningKey {
    fn public_key(&self) -> Ed25519VerifyingKey {
        self.verifying_key()
    }

    fn sign(&self, msg: &[u8]) -> Result<ed25519_dalek::Signature, signature::Error> {
        ed25519_dalek::Signer::try_sign(self, msg)
    }
}

/// A wall-clock source yielding UNIX seconds, injectable for tests.
pub trait Clock: Send + Sync {
    fn unix_secs(&self) -> u64;
}

/// The system wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

// The canonical signed message for a cosignature at time t.
fn signed_message(t: u64, checkpoint: &Checkpoint) -> Vec<u8> {
    format!(
        "cosignature/v1\ntime {t}\n{}\n{}\n{}\n",
        checkpoint.origin(),
        checkpoint.size(),
        checkpoint.hash()
    )
    .into_bytes()
}

/// Produces cosignature/v1 note signatures over checkpoint bodies.
pub struct CosignatureV1Signer {
    verifier: CosignatureV1Verifier,
    key: Box<dyn Signer>,
    clock: Box<dyn Clock>,
}

impl CosignatureV1Signer {
    pub fn new(name: KeyName, key: Box<dyn Signer>, clock: Box<dyn Clock>) -> Self {
        Self {
            verifier: CosignatureV1Verifier::new(name, key.public_key()),
            key,
            clock,
        }
    }

    /// The encoded verifier key string for this signer, identifying it as a
    /// cosignature/v1 key to clients.
    pub fn verifier_key(&self) -> String {
        self.verifier.verifier_key()
    }

    /// A verifier for signatures produced by this signer.
    pub fn verifier(&self) -> CosignatureV1Verifier {
        self.verifier.clone()
    }
}

impl NoteSigner for CosignatureV1Signer {
    fn name(&self) -> &KeyName {
        &self.verifier.name
    }

    fn key_id(&self) -> u32 {
        self.verifier.id
    }

    fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, signature::Error> {
        // Only valid checkpoints can be cosigned.
        let checkpoint = Checkpoint::from_bytes(msg).map_err(signature::Error::from_source)?;
        let t = self.clock.unix_secs();
        let sig = self.key.sign(&signed_message(t, &checkpoint))?;

        let mut out = Vec::with_capacity(COSIGNATURE_LENGTH);
        out.write_u64::<BigEndian>(t)
            .map_err(signature::Error::from_source)?;
        out.extend(sig.to_bytes());
        Ok(out)
    }
}

/// Verifies cosignature/v1 note signatures.
#[derive(Clone)]
pub struct CosignatureV1Verifier {
    name: KeyName,
    id: u32,
    verifying_key: Ed25519VerifyingKey,
}

impl CosignatureV1Verifier {
    pub fn new(name: KeyName, verifying_key: Ed25519VerifyingKey) -> Self {
        let pubkey = [
            &[SignatureType::CosignatureV1 as u8],
            verifying_key.to_bytes().as_slice(),
        ]
        .concat();
        let id = compute_key_id(&name, &pubkey);
        Self {
            name,
            id,
            verifying_key,
        }
    }

    /// The encoded verifier key string for this key.
    pub fn verifier_key(&self) -> String {
        encode_verifier_key(
            &self.name,
            SignatureType::CosignatureV1,
            self.verifying_key.to_bytes().as_slice(),
        )
    }
}

impl NoteVerifier for CosignatureV1Verifier {
    fn name(&self) -> &KeyName {
        &self.name
    }

    fn key_id(&self) -> u32 {
        self.id
    }

    fn verify(&self, msg: &[u8], sig: &[u8]) -> bool {
        if sig.len() != COSIGNATURE_LENGTH {
            return false;
        }
        let Ok(checkpoint) = Checkpoint::from_bytes(msg) else {
            return false;
        };
        let Some(t) = cosignature_timestamp(sig) else {
            return false;
        };
        let sig_bytes: [u8; ed25519_dalek::SIGNATURE_LENGTH] = match sig[8..].try_into() {
            Ok(ok) => ok,
            Err(_) => return false,
        };
        self.verifying_key
            .verify(
                &signed_message(t, &checkpoint),
                &ed25519_dalek::Signature::from_bytes(&sig_bytes),
            )
            .is_ok()
    }
}

/// Extracts the UNIX timestamp embedded in an encoded cosignature.
pub fn cosignature_timestamp(mut sig: &[u8]) -> Option<u64> {
    sig.read_u64::<BigEndian>().ok()
}
