// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Loading and pinning the witness signing key.
//!
//! The key is an Ed25519 seed held in a local file. Deployments pin the
//! expected public key with a fingerprint so a swapped key file fails at
//! startup instead of producing cosignatures under the wrong identity.

use base64::prelude::*;
use ed25519_dalek::{SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("reading key file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed private key file")]
    Malformed,
    #[error("key fingerprint mismatch: expected {expected}, found {found}")]
    FingerprintMismatch { expected: String, found: String },
}

/// Loads an Ed25519 signing key from a file holding the hex-encoded
/// 32-byte seed.
///
/// # Errors
///
/// Returns a [`KeyError`] if the file cannot be read or does not contain a
/// hex-encoded 32-byte seed.
pub fn load_signing_key(path: &Path) -> Result<SigningKey, KeyError> {
    let text = std::fs::read_to_string(path)?;
    let seed: [u8; 32] = hex::decode(text.trim())
        .map_err(|_| KeyError::Malformed)?
        .try_into()
        .map_err(|_| KeyError::Malformed)?;
    Ok(SigningKey::from_bytes(&seed))
}

/// The `SHA256:<base64>` fingerprint of a raw Ed25519 public key.
pub fn fingerprint(key: &VerifyingKey) -> String {
    let digest = Sha256::digest(key.to_bytes());
    format!("SHA256:{}", BASE64_STANDARD_NO_PAD.encode(digest))
}

/// Checks the loaded public key against a configured fingerprint, accepted
/// either as `SHA256:` plus unpadded base64 or as the bare lowercase hex
/// digest.
///
/// # Errors
///
/// Returns [`KeyError::FingerprintMismatch`] if the fingerprint does not
/// match.
pub fn check_fingerprint(key: &VerifyingKey, expected: &str) -> Result<(), KeyError> {
    let found = fingerprint(key);
    let matches = if expected.starts_with("SHA256:") {
        expected == found
    } else {
        expected == hex::encode(Sha256::digest(key.to_bytes()))
    };
    if matches {
        Ok(())
    } else {
        Err(KeyError::FingerprintMismatch {
            expected: expected.to_string(),
            found,
        })
    }
}
