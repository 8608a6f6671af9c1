// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

use crate::{compute_key_id, encode_verifier_key, KeyName, NoteError, NoteSigner, NoteVerifier, SignatureType};
use base64::prelude::*;
use ed25519_dalek::{
    Signer as Ed25519Signer, SigningKey as Ed25519SigningKey, Verifier as Ed25519Verifier,
    VerifyingKey as Ed25519VerifyingKey,
};
use rand_core::CryptoRngCore;

/// Verifier for the ordinary (non-timestamped) Ed25519 signature type.
#[derive(Clone, Debug)]
pub struct Ed25519NoteVerifier {
    name: KeyName,
    id: u32,
    verifying_key: Ed25519VerifyingKey,
}

impl NoteVerifier for Ed25519NoteVerifier {
    fn name(&self) -> &KeyName {
        &self.name
    }

    fn key_id(&self) -> u32 {
        self.id
    }

    fn verify(&self, msg: &[u8], sig: &[u8]) -> bool {
        let sig_bytes: [u8; ed25519_dalek::SIGNATURE_LENGTH] = match sig.try_into() {
            Ok(ok) => ok,
            Err(_) => return false,
        };
        self.verifying_key
            .verify(msg, &ed25519_dalek::Signature::from_bytes(&sig_bytes))
            .is_ok()
    }
}

impl Ed25519NoteVerifier {
    pub fn new(name: KeyName, verifying_key: Ed25519VerifyingKey) -> Self {
        let pubkey = [
            &[SignatureType::Ed25519 as u8],
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

    /// Constructs a verifier from an encoded verifier key
    /// `<name>+<id>+<base64 keydata>`.
    ///
    /// # Errors
    ///
    /// Returns a [`NoteError`] if `vkey` is malformed, uses an algorithm
    /// other than Ed25519, or carries a key ID that does not match the key.
    pub fn new_from_encoded_key(vkey: &str) -> Result<Self, NoteError> {
        let (name, rest) = vkey.split_once('+').ok_or(NoteError::Format)?;
        let (id16, key64) = rest.split_once('+').ok_or(NoteError::Format)?;
        let name = KeyName::new(name.to_owned())?;

        let id = u32::from_str_radix(id16, 16).map_err(|_| NoteError::Format)?;
        let key = BASE64_STANDARD
            .decode(key64)
            .map_err(|_| NoteError::Format)?;
        if id16.len() != 8 || key.is_empty() {
            return Err(NoteError::Format);
        }
        if id != compute_key_id(&name, &key) {
            return Err(NoteError::Id);
        }

        match SignatureType::try_from(key[0])? {
            SignatureType::Ed25519 => {
                let key_bytes: &[u8; ed25519_dalek::PUBLIC_KEY_LENGTH] =
                    &key[1..].try_into().map_err(|_| NoteError::Format)?;
                let verifying_key = Ed25519VerifyingKey::from_bytes(key_bytes)
                    .map_err(|_| NoteError::Format)?;
                Ok(Self {
                    name,
                    id,
                    verifying_key,
                })
            }
            _ => Err(NoteError::Alg),
        }
    }
}

/// Signer for the ordinary (non-timestamped) Ed25519 signature type.
#[derive(Clone)]
pub struct Ed25519NoteSigner {
    name: KeyName,
    id: u32,
    signing_key: Ed25519SigningKey,
}

impl NoteSigner for Ed25519NoteSigner {
    fn name(&self) -> &KeyName {
        &self.name
    }

    fn key_id(&self) -> u32 {
        self.id
    }

    fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, signature::Error> {
        let sig = self.signing_key.try_sign(msg)?;
        Ok(sig.to_vec())
    }
}

impl Ed25519NoteSigner {
    pub fn new(name: KeyName, signing_key: Ed25519SigningKey) -> Self {
        let pubkey = [
            &[SignatureType::Ed25519 as u8],
            signing_key.verifying_key().to_bytes().as_slice(),
        ]
        .concat();
        let id = compute_key_id(&name, &pubkey);
        Self {
            name,
            id,
            signing_key,
        }
    }

    /// Constructs a signer from an encoded signer key
    /// `PRIVATE+KEY+<name>+<id>+<base64 keydata>`.
    ///
    /// # Errors
    ///
    /// Returns a [`NoteError`] if `skey` is malformed or otherwise invalid.
    pub fn new_from_encoded_key(skey: &str) -> Result<Self, NoteError> {
        let (priv1, rest) = skey.split_once('+').ok_or(NoteError::Format)?;
        let (priv2, rest) = rest.split_once('+').ok_or(NoteError::Format)?;
        let (name, rest) = rest.split_once('+').ok_or(NoteError::Format)?;
        let (id16, key64) = rest.split_once('+').ok_or(NoteError::Format)?;
        let name = KeyName::new(name.to_owned())?;

        let id = u32::from_str_radix(id16, 16).map_err(|_| NoteError::Format)?;
        let key = BASE64_STANDARD
            .decode(key64)
            .map_err(|_| NoteError::Format)?;
        if priv1 != "PRIVATE" || priv2 != "KEY" || id16.len() != 8 || key.is_empty() {
            return Err(NoteError::Format);
        }

        match SignatureType::try_from(key[0])? {
            SignatureType::Ed25519 => {
                let signing_key =
                    Ed25519SigningKey::try_from(&key[1..]).map_err(|_| NoteError::Format)?;

                // The ID hashes the public key, which we only have after
                // deriving it from the private key.
                let pubkey = [
                    &[SignatureType::Ed25519 as u8],
                    signing_key.verifying_key().to_bytes().as_slice(),
                ]
                .concat();
                if id != compute_key_id(&name, &pubkey) {
                    return Err(NoteError::Id);
                }

                Ok(Self {
                    name,
                    id,
                    signing_key,
                })
            }
            _ => Err(NoteError::Alg),
        }
    }
}

/// Generates an encoded signer and verifier key pair for a named server.
/// The signer key is private and must be kept secret.
pub fn generate_encoded_ed25519_key<R: CryptoRngCore + ?Sized>(
    csprng: &mut R,
    name: &KeyName,
) -> (String, String) {
    let signing_key = Ed25519SigningKey::generate(csprng);

    let privkey = [
        &[SignatureType::Ed25519 as u8],
        signing_key.to_bytes().as_slice(),
    ]
    .concat();
    let pubkey = [
        &[SignatureType::Ed25519 as u8],
        signing_key.verifying_key().to_bytes().as_slice(),
    ]
    .concat();
    let skey = format!(
        "PRIVATE+KEY+{}+{:08x}+{}",
        name,
        compute_key_id(name, &pubkey),
        BASE64_STANDARD.encode(privkey)
    );
    let vkey = new_encoded_ed25519_verifier_key(name, &signing_key.verifying_key());

    (skey, vkey)
}

/// Returns an encoded verifier key for the given name and Ed25519 public key.
pub fn new_encoded_ed25519_verifier_key(name: &KeyName, key: &Ed25519VerifyingKey) -> String {
    encode_verifier_key(name, SignatureType::Ed25519, key.to_bytes().as_slice())
}
