// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Notes as specified by [C2SP signed-note](https://c2sp.org/signed-note).
//!
//! A note is a text ending in a newline (U+000A), followed by a blank line
//! (only a newline), followed by one or more signature lines of this form:
//! em dash (U+2014), space, key name, space, base64-encoded signature,
//! newline. The base64 payload is the big-endian `u32` key ID followed by
//! the raw signature bytes.
//!
//! A key is identified by a [`KeyName`] (typically the "host[/path]" base
//! URL of the server publishing the note) and a 32-bit key ID computed by
//! [`compute_key_id`] as RECOMMENDED by the
//! [spec](https://c2sp.org/signed-note#signatures):
//! ```text
//! key ID = SHA-256(key name || 0x0A || signature type || public key)[:4]
//! ```
//!
//! [`Note::from_bytes`] parses a message and validates that the text and
//! signature lines are syntactically well-formed. [`Note::verify`] checks
//! the signature lines against a [`VerifierList`] of trusted keys: the key
//! ID on a line is a lookup hint only, so every verifier registered under a
//! line's `(name, ID)` pair is tried, and the note is accepted as soon as
//! one signature cryptographically verifies.
//!
//! The standard [`NoteVerifier`] implementation is [`Ed25519NoteVerifier`],
//! constructed from a verifier key string of the form
//! `<name>+<id>+<base64 keydata>`. The matching [`Ed25519NoteSigner`] is
//! constructed from an encoded signer key of the form
//! `PRIVATE+KEY+<name>+<id>+<base64 keydata>`, which must be kept secret.

use base64::prelude::*;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use thiserror::Error;

mod ed25519;
pub use ed25519::{
    generate_encoded_ed25519_key, new_encoded_ed25519_verifier_key, Ed25519NoteSigner,
    Ed25519NoteVerifier,
};

/// Maximum note size we are willing to parse.
const MAX_NOTE_SIZE: usize = 1_000_000;

/// Maximum number of signature lines on a single note.
const MAX_NOTE_SIGNATURES: usize = 100;

/// An error returned when parsing, verifying, or signing notes and keys.
#[derive(Error, Debug)]
pub enum NoteError {
    #[error("malformed note")]
    MalformedNote,
    #[error("no known key signed this note")]
    UnknownKey,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("malformed verifier key")]
    Format,
    #[error("unknown verifier algorithm")]
    Alg,
    #[error("invalid verifier key ID")]
    Id,
    #[error(transparent)]
    Signature(#[from] signature::Error),
}

/// Signature algorithms from <https://c2sp.org/signed-note#signatures>.
///
/// The algorithm byte is the first byte of the encoded public key material
/// and is covered by the key ID hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SignatureType {
    /// Plain Ed25519 over the note text.
    Ed25519 = 1,
    /// Timestamped Ed25519 cosignature, <https://c2sp.org/tlog-cosignature>.
    CosignatureV1 = 4,
}

impl TryFrom<u8> for SignatureType {
    type Error = NoteError;

    fn try_from(alg: u8) -> Result<Self, NoteError> {
        match alg {
            1 => Ok(SignatureType::Ed25519),
            4 => Ok(SignatureType::CosignatureV1),
            _ => Err(NoteError::Alg),
        }
    }
}

/// The name of a server key.
///
/// Names must be non-empty, well-formed UTF-8 containing neither Unicode
/// spaces nor plus (U+002B), per <https://c2sp.org/signed-note#format>.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyName(String);

impl KeyName {
    /// Wraps a name, rejecting it if it is not a valid key name.
    ///
    /// # Errors
    ///
    /// Returns [`NoteError::Format`] if the name is invalid.
    pub fn new(name: String) -> Result<Self, NoteError> {
        if !Self::is_valid(&name) {
            return Err(NoteError::Format);
        }
        Ok(Self(name))
    }

    /// Reports whether `name` is a valid key name.
    pub fn is_valid(name: &str) -> bool {
        !(name.is_empty() || name.chars().any(char::is_whitespace) || name.contains('+'))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for KeyName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Computes the key ID for the given name and encoded public key (the
/// algorithm byte followed by the key material).
pub fn compute_key_id(name: &KeyName, key: &[u8]) -> u32 {
    let mut hasher = Sha256::new();
    hasher.update(name.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(key);
    let digest = hasher.finalize();
    u32::from_be_bytes(digest[..4].try_into().unwrap())
}

/// Encodes a verifier key string `<name>+<id>+<base64 keydata>` where
/// `keydata` is the algorithm byte followed by the raw public key material.
pub fn encode_verifier_key(name: &KeyName, alg: SignatureType, key_material: &[u8]) -> String {
    let key = [&[alg as u8], key_material].concat();
    format!(
        "{name}+{:08x}+{}",
        compute_key_id(name, &key),
        BASE64_STANDARD.encode(&key)
    )
}

/// A `NoteVerifier` verifies signatures made with a specific key.
pub trait NoteVerifier {
    /// The key name associated with this verifier.
    fn name(&self) -> &KeyName;

    /// The 32-bit key ID.
    fn key_id(&self) -> u32;

    /// Reports whether `sig` is a valid signature over `msg`.
    fn verify(&self, msg: &[u8], sig: &[u8]) -> bool;
}

/// A `NoteSigner` signs messages with a specific key.
pub trait NoteSigner {
    /// The key name associated with this signer.
    fn name(&self) -> &KeyName;

    /// The 32-bit key ID.
    fn key_id(&self) -> u32;

    /// Returns the raw signature bytes for `msg`, without the key ID prefix.
    ///
    /// # Errors
    ///
    /// Returns a [`signature::Error`] if the underlying key fails to sign.
    fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, signature::Error>;
}

/// A collection of trusted verifiers, indexed by `(name, key ID)`.
///
/// Key IDs are 32-bit truncated hashes and may collide, so more than one
/// verifier can be registered under the same pair; [`Note::verify`] tries
/// all of them.
#[derive(Default)]
pub struct VerifierList {
    map: HashMap<(KeyName, u32), Vec<Box<dyn NoteVerifier>>>,
}

impl std::fmt::Debug for VerifierList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerifierList")
            .field("keys", &self.map.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl VerifierList {
    pub fn new(list: Vec<Box<dyn NoteVerifier>>) -> Self {
        let mut map: HashMap<(KeyName, u32), Vec<Box<dyn NoteVerifier>>> = HashMap::new();
        for verifier in list {
            map.entry((verifier.name().clone(), verifier.key_id()))
                .or_default()
                .push(verifier);
        }
        Self { map }
    }

    /// All verifiers registered under the given name and key ID.
    pub fn matching(&self, name: &KeyName, id: u32) -> &[Box<dyn NoteVerifier>] {
        self.map
            .get(&(name.clone(), id))
            .map_or(&[], Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// A single signature line on a note.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct NoteSignature {
    name: KeyName,
    id: u32,
    sig: Vec<u8>,
}

impl NoteSignature {
    pub fn new(name: KeyName, id: u32, sig: Vec<u8>) -> Self {
        Self { name, id, sig }
    }

    /// Parses a signature line (without its trailing newline).
    ///
    /// # Errors
    ///
    /// Returns [`NoteError::MalformedNote`] if the line is not a valid
    /// signature line.
    pub fn from_bytes(line: &[u8]) -> Result<Self, NoteError> {
        let line = std::str::from_utf8(line).map_err(|_| NoteError::MalformedNote)?;
        let line = line.strip_prefix("— ").ok_or(NoteError::MalformedNote)?;
        let (name, b64) = line.split_once(' ').ok_or(NoteError::MalformedNote)?;
        let name = KeyName::new(name.to_owned()).map_err(|_| NoteError::MalformedNote)?;
        let payload = BASE64_STANDARD
            .decode(b64)
            .map_err(|_| NoteError::MalformedNote)?;
        // Key ID plus at least one signature byte.
        if payload.len() < 5 {
            return Err(NoteError::MalformedNote);
        }
        let id = u32::from_be_bytes(payload[..4].try_into().unwrap());
        Ok(Self::new(name, id, payload[4..].to_vec()))
    }

    pub fn name(&self) -> &KeyName {
        &self.name
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn signature(&self) -> &[u8] {
        &self.sig
    }

    /// Encodes the signature line for inclusion in a note, trailing newline
    /// included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let payload = [&self.id.to_be_bytes(), self.sig.as_slice()].concat();
        format!("— {} {}\n", self.name, BASE64_STANDARD.encode(payload)).into_bytes()
    }
}

/// A note text together with its signature lines.
#[derive(Debug, PartialEq)]
pub struct Note {
    text: Vec<u8>,
    sigs: Vec<NoteSignature>,
}

impl Note {
    /// Returns a new, unsigned note with the given text.
    ///
    /// # Errors
    ///
    /// Returns [`NoteError::MalformedNote`] if the text is too large, is not
    /// UTF-8, contains ASCII control characters other than newline, or does
    /// not end in a newline.
    pub fn new(text: &[u8]) -> Result<Self, NoteError> {
        check_text(text)?;
        if !text.ends_with(b"\n") {
            return Err(NoteError::MalformedNote);
        }
        Ok(Self {
            text: text.to_vec(),
            sigs: Vec::new(),
        })
    }

    /// Parses an encoded note, validating the text and every signature line.
    ///
    /// # Errors
    ///
    /// Returns [`NoteError::MalformedNote`] if the message is not a
    /// well-formed signed note.
    pub fn from_bytes(msg: &[u8]) -> Result<Self, NoteError> {
        check_text(msg)?;
        let msg = std::str::from_utf8(msg).map_err(|_| NoteError::MalformedNote)?;

        // The signature block starts after the last blank line.
        let (text, sig_block) = msg.rsplit_once("\n\n").ok_or(NoteError::MalformedNote)?;
        let sig_block = sig_block.strip_suffix('\n').ok_or(NoteError::MalformedNote)?;

        let mut sigs = Vec::new();
        for line in sig_block.split('\n') {
            sigs.push(NoteSignature::from_bytes(line.as_bytes())?);
            if sigs.len() > MAX_NOTE_SIGNATURES {
                return Err(NoteError::MalformedNote);
            }
        }

        let mut note = Self::new(format!("{text}\n").as_bytes())?;
        note.sigs = sigs;
        Ok(note)
    }

    /// The note text, trailing newline included.
    pub fn text(&self) -> &[u8] {
        &self.text
    }

    pub fn signatures(&self) -> &[NoteSignature] {
        &self.sigs
    }

    /// Checks the note's signature lines against the known verifiers and
    /// returns the signatures that verified.
    ///
    /// Every verifier registered under a line's `(name, key ID)` pair is
    /// tried; the truncated key ID is a hint, not a binding.
    ///
    /// # Errors
    ///
    /// Returns [`NoteError::UnknownKey`] if no signature line matches any
    /// known verifier, and [`NoteError::InvalidSignature`] if lines matched
    /// known verifiers but none of them cryptographically verified.
    pub fn verify(&self, known: &VerifierList) -> Result<Vec<NoteSignature>, NoteError> {
        let mut verified = Vec::new();
        let mut seen = BTreeSet::new();
        let mut matched_known_key = false;
        for sig in &self.sigs {
            if !seen.insert((sig.name.clone(), sig.id)) {
                continue;
            }
            let candidates = known.matching(&sig.name, sig.id);
            if !candidates.is_empty() {
                matched_known_key = true;
            }
            if candidates.iter().any(|v| v.verify(&self.text, &sig.sig)) {
                verified.push(sig.clone());
            }
        }
        if verified.is_empty() {
            if matched_known_key {
                return Err(NoteError::InvalidSignature);
            }
            return Err(NoteError::UnknownKey);
        }
        Ok(verified)
    }

    /// Signs the note text with `signer` and appends the resulting
    /// signature line, replacing any existing signature by the same key.
    ///
    /// # Errors
    ///
    /// Returns an error if the signer's key fails to sign.
    pub fn add_signature(&mut self, signer: &dyn NoteSigner) -> Result<(), NoteError> {
        let sig = signer.sign(&self.text)?;
        self.sigs
            .retain(|s| s.name != *signer.name() || s.id != signer.key_id());
        self.sigs
            .push(NoteSignature::new(signer.name().clone(), signer.key_id(), sig));
        Ok(())
    }

    /// Encodes the note in signed note format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = self.text.clone();
        buf.push(b'\n');
        for sig in &self.sigs {
            buf.extend(sig.to_bytes());
        }
        buf
    }
}

// Notes must be UTF-8 of bounded size with no non-newline ASCII control
// characters.
fn check_text(text: &[u8]) -> Result<(), NoteError> {
    if text.len() > MAX_NOTE_SIZE {
        return Err(NoteError::MalformedNote);
    }
    let text = std::str::from_utf8(text).map_err(|_| NoteError::MalformedNote)?;
    if text.chars().any(|ch| ch < '\u{0020}' && ch != '\n') {
        return Err(NoteError::MalformedNote);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    const PETER_VKEY: &str = "PeterNeumann+c74f20a3+ARpc2QcUPDhMQegwxbzhKqiBfsVkmqq/LDE4izWy10TW";
    const PETER_SKEY: &str =
        "PRIVATE+KEY+PeterNeumann+c74f20a3+AYEKFALVFGyNhPJEMzD1QIDr+Y7hfZx09iUvxdXHKDFz";
    const TEXT: &str = "If you think cryptography is the answer to your problem,\n\
                        then you don't know what your problem is.\n";
    const PETER_SIG: &str = "— PeterNeumann x08go/ZJkuBS9UG/SffcvIAQxVBtiFupLLr8pAcElZInNIuGUgYN1FFYC2pZSNXgKvqfqdngotpRZb6KE6RyyBwJnAM=\n";

    fn peter_verifiers() -> VerifierList {
        let v = Ed25519NoteVerifier::new_from_encoded_key(PETER_VKEY).unwrap();
        VerifierList::new(vec![Box::new(v)])
    }

    #[test]
    fn key_name_validity() {
        assert!(KeyName::is_valid("example.com/witness"));
        assert!(!KeyName::is_valid(""));
        assert!(!KeyName::is_valid("bad name"));
        assert!(!KeyName::is_valid("bad+name"));
        assert!(KeyName::new("a+b".into()).is_err());
    }

    #[test]
    fn sign_roundtrip() {
        let signer = Ed25519NoteSigner::new_from_encoded_key(PETER_SKEY).unwrap();
        let mut note = Note::new(TEXT.as_bytes()).unwrap();
        note.add_signature(&signer).unwrap();

        let want = format!("{TEXT}\n{PETER_SIG}");
        assert_eq!(note.to_bytes(), want.as_bytes());

        let parsed = Note::from_bytes(&note.to_bytes()).unwrap();
        assert_eq!(parsed.text(), TEXT.as_bytes());
        let verified = parsed.verify(&peter_verifiers()).unwrap();
        assert_eq!(verified.len(), 1);
        assert_eq!(verified[0].name().as_str(), "PeterNeumann");
    }

    #[test]
    fn verify_known_vector() {
        let msg = format!("{TEXT}\n{PETER_SIG}");
        let note = Note::from_bytes(msg.as_bytes()).unwrap();
        let verified = note.verify(&peter_verifiers()).unwrap();
        assert_eq!(verified[0].id(), 0xc74f_20a3);
    }

    #[test]
    fn verify_unknown_key() {
        let msg = format!("{TEXT}\n{PETER_SIG}");
        let note = Note::from_bytes(msg.as_bytes()).unwrap();
        let err = note.verify(&VerifierList::default()).unwrap_err();
        assert!(matches!(err, NoteError::UnknownKey));
    }

    #[test]
    fn verify_invalid_signature() {
        // Corrupt the signature bytes while keeping the key ID intact.
        let bad_sig = format!("{}ABCD{}", &PETER_SIG[..60], &PETER_SIG[60..]);
        let msg = format!("{TEXT}\n{bad_sig}");
        let note = Note::from_bytes(msg.as_bytes()).unwrap();
        let err = note.verify(&peter_verifiers()).unwrap_err();
        assert!(matches!(err, NoteError::InvalidSignature));
    }

    #[test]
    fn verify_second_signature_suffices() {
        // An unknown signature line plus a valid one still verifies.
        let (skey, vkey) = generate_encoded_ed25519_key(
            &mut OsRng,
            &KeyName::new("EnochRoot".into()).unwrap(),
        );
        let other = Ed25519NoteSigner::new_from_encoded_key(&skey).unwrap();
        let mut note = Note::new(TEXT.as_bytes()).unwrap();
        note.add_signature(&other).unwrap();
        let msg = [note.to_bytes(), PETER_SIG.as_bytes().to_vec()].concat();

        let note = Note::from_bytes(&msg).unwrap();
        assert_eq!(note.signatures().len(), 2);
        let verified = note.verify(&peter_verifiers()).unwrap();
        assert_eq!(verified.len(), 1);
        assert_eq!(verified[0].name().as_str(), "PeterNeumann");

        let v = Ed25519NoteVerifier::new_from_encoded_key(&vkey).unwrap();
        let both = VerifierList::new(vec![
            Box::new(v),
            Box::new(Ed25519NoteVerifier::new_from_encoded_key(PETER_VKEY).unwrap()),
        ]);
        assert_eq!(note.verify(&both).unwrap().len(), 2);
    }

    #[test]
    fn malformed_notes() {
        let bad: Vec<Vec<u8>> = vec![
            // No signature block.
            TEXT.as_bytes().to_vec(),
            // Signature block without trailing newline.
            format!("{TEXT}\n{}", &PETER_SIG[..PETER_SIG.len() - 1]).into_bytes(),
            // Control character in text.
            format!("\x01{TEXT}\n{PETER_SIG}").into_bytes(),
            // Invalid UTF-8.
            [&[0xff], format!("{TEXT}\n{PETER_SIG}").as_bytes()].concat(),
            // Space in key name.
            format!("{TEXT}\n— Bad Name x08go/ZJku\n").into_bytes(),
            // Too many signatures.
            format!("{TEXT}\n{}", PETER_SIG.repeat(MAX_NOTE_SIGNATURES + 1)).into_bytes(),
        ];
        for msg in bad {
            assert!(matches!(
                Note::from_bytes(&msg).unwrap_err(),
                NoteError::MalformedNote
            ));
        }
    }

    #[test]
    fn signature_line_roundtrip() {
        let sig = NoteSignature::from_bytes(PETER_SIG.trim_end().as_bytes()).unwrap();
        assert_eq!(sig.name().as_str(), "PeterNeumann");
        assert_eq!(sig.id(), 0xc74f_20a3);
        assert_eq!(sig.to_bytes(), PETER_SIG.as_bytes());
    }

    #[test]
    fn generated_key_roundtrip() {
        let name = KeyName::new("example.com/witness".into()).unwrap();
        let (skey, vkey) = generate_encoded_ed25519_key(&mut OsRng, &name);
        let signer = Ed25519NoteSigner::new_from_encoded_key(&skey).unwrap();
        let verifier = Ed25519NoteVerifier::new_from_encoded_key(&vkey).unwrap();
        assert_eq!(signer.name(), verifier.name());
        assert_eq!(signer.key_id(), verifier.key_id());

        let sig = signer.sign(b"hello world\n").unwrap();
        assert!(verifier.verify(b"hello world\n", &sig));
        assert!(!verifier.verify(b"hello world?\n", &sig));
    }
}
