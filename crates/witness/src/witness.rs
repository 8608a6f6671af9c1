// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! The add-checkpoint pipeline.
//!
//! A request body carries a proof preamble and a signed checkpoint note:
//! ```text
//! old <old_size>
//! <proof hash>
//! ...
//! <proof hash>
//!
//! <checkpoint note body>
//! <signature block>
//! ```
//! The pipeline parses the envelope, verifies the note against the
//! registered keys for the checkpoint's origin, checks the consistency
//! proof against the stored tree head, commits the advance through the
//! store's conditional update, and answers with a single cosignature line.
//!
//! Everything before the commit is read-only. Two requests racing from the
//! same old size are serialized by the conditional update: exactly one
//! observes the advance, the other gets the truthful current size back.

use crate::store::{Advance, StoreError, WitnessDb};
use signed_note::{Note, NoteError, NoteSignature, NoteSigner};
use std::sync::Arc;
use thiserror::Error;
use tlog_checkpoint::{check_tree, Checkpoint, CosignatureV1Signer, Hash, Proof};

/// Request processing failures, each mapped to one HTTP status by the
/// serving shell.
#[derive(Error, Debug)]
pub enum AddCheckpointError {
    #[error("invalid input")]
    BadRequest,
    #[error("unknown log")]
    UnknownLog,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("bad consistency proof")]
    BadProof,
    #[error("known tree size doesn't match provided old size")]
    Conflict { known_size: u64 },
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for AddCheckpointError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UnknownLog => AddCheckpointError::UnknownLog,
            other => AddCheckpointError::Internal(other.to_string()),
        }
    }
}

/// The witness service: the log registry plus the cosigning key.
pub struct Witness {
    db: Arc<WitnessDb>,
    signer: CosignatureV1Signer,
    #[cfg(test)]
    stall_before_commit: std::sync::Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
}

impl Witness {
    pub fn new(db: Arc<WitnessDb>, signer: CosignatureV1Signer) -> Self {
        Self {
            db,
            signer,
            #[cfg(test)]
            stall_before_commit: std::sync::Mutex::new(None),
        }
    }

    /// The witness's encoded cosignature/v1 verifier key.
    pub fn verifier_key(&self) -> String {
        self.signer.verifier_key()
    }

    /// Processes one add-checkpoint request body, returning the signature
    /// line (trailing newline included) to serve on success.
    ///
    /// # Errors
    ///
    /// Returns the [`AddCheckpointError`] describing why the checkpoint was
    /// not cosigned.
    pub fn process_add_checkpoint(&self, body: &[u8]) -> Result<Vec<u8>, AddCheckpointError> {
        let mut req = RequestFields::default();
        let result = self.add_checkpoint(body, &mut req);
        let outcome = match &result {
            Ok(_) => "cosigned".to_string(),
            Err(err) => err.to_string(),
        };
        log::debug!(
            "processed add-checkpoint request: origin={} old_size={} new_size={} outcome={outcome:?}",
            req.origin.as_deref().unwrap_or("?"),
            display_size(req.old_size),
            display_size(req.new_size),
        );
        result
    }

    fn add_checkpoint(
        &self,
        body: &[u8],
        req: &mut RequestFields,
    ) -> Result<Vec<u8>, AddCheckpointError> {
        let (old_size, proof, note_bytes) = split_request(body)?;
        req.old_size = Some(old_size);

        // The origin is the first line of the note body; it selects the
        // trusted keys before any signature is checked.
        let origin = note_bytes
            .split(|&b| b == b'\n')
            .next()
            .and_then(|line| std::str::from_utf8(line).ok())
            .ok_or(AddCheckpointError::BadRequest)?;
        req.origin = Some(origin.to_string());
        let verifiers = self.db.verifiers(origin)?;

        let note = Note::from_bytes(note_bytes).map_err(|_| AddCheckpointError::BadRequest)?;
        match note.verify(&verifiers) {
            Ok(_) => {}
            Err(NoteError::UnknownKey | NoteError::InvalidSignature) => {
                return Err(AddCheckpointError::InvalidSignature)
            }
            Err(err) => return Err(AddCheckpointError::Internal(err.to_string())),
        }

        let checkpoint =
            Checkpoint::from_bytes(note.text()).map_err(|_| AddCheckpointError::BadRequest)?;
        req.new_size = Some(checkpoint.size());

        self.check_consistency(&checkpoint, old_size, &proof)?;

        #[cfg(test)]
        self.stall_for_test();

        match self.db.compare_and_advance(
            checkpoint.origin(),
            old_size,
            checkpoint.size(),
            checkpoint.hash(),
        )? {
            Advance::Advanced => {}
            Advance::Conflict { known_size } => {
                // A racing request advanced this log between the
                // consistency check and the commit.
                return Err(AddCheckpointError::Conflict { known_size });
            }
        }

        let sig = self
            .signer
            .sign(note.text())
            .map_err(|err| AddCheckpointError::Internal(err.to_string()))?;
        Ok(
            NoteSignature::new(self.signer.name().clone(), self.signer.key_id(), sig)
                .to_bytes(),
        )
    }

    fn check_consistency(
        &self,
        checkpoint: &Checkpoint,
        old_size: u64,
        proof: &Proof,
    ) -> Result<(), AddCheckpointError> {
        if old_size > checkpoint.size() {
            return Err(AddCheckpointError::BadRequest);
        }
        let (known_size, known_hash) = self.db.get_log(checkpoint.origin())?;
        if known_size != old_size {
            return Err(AddCheckpointError::Conflict { known_size });
        }
        if old_size == 0 {
            // First tree head for this log; there is nothing to be
            // consistent with.
            return Ok(());
        }
        check_tree(
            proof,
            checkpoint.size(),
            checkpoint.hash(),
            old_size,
            known_hash,
        )
        .map_err(|_| AddCheckpointError::BadProof)
    }

    #[cfg(test)]
    fn stall_for_test(&self) {
        let stall = self
            .stall_before_commit
            .lock()
            .expect("stall mutex poisoned")
            .clone();
        if let Some(stall) = stall {
            stall();
        }
    }

    #[cfg(test)]
    fn set_stall(&self, stall: Option<Arc<dyn Fn() + Send + Sync>>) {
        *self
            .stall_before_commit
            .lock()
            .expect("stall mutex poisoned") = stall;
    }
}

// Request fields accumulated while parsing, for the per-request debug
// line. Fields stay unset when the request fails before they are parsed.
#[derive(Default)]
struct RequestFields {
    origin: Option<String>,
    old_size: Option<u64>,
    new_size: Option<u64>,
}

fn display_size(size: Option<u64>) -> String {
    size.map_or_else(|| "?".to_string(), |size| size.to_string())
}

// Splits a request body into the parsed old size, the consistency proof,
// and the raw note bytes.
fn split_request(body: &[u8]) -> Result<(u64, Proof, &[u8]), AddCheckpointError> {
    let split = body
        .windows(2)
        .position(|w| w == b"\n\n")
        .ok_or(AddCheckpointError::BadRequest)?;
    let (preamble, note_bytes) = (&body[..split], &body[split + 2..]);

    let preamble = std::str::from_utf8(preamble).map_err(|_| AddCheckpointError::BadRequest)?;
    let mut lines = preamble.split('\n');
    let old_size = lines
        .next()
        .and_then(|line| line.strip_prefix("old "))
        .and_then(|size| size.parse::<u64>().ok())
        .ok_or(AddCheckpointError::BadRequest)?;
    let proof = lines
        .map(Hash::parse_hash)
        .collect::<Result<Proof, _>>()
        .map_err(|_| AddCheckpointError::BadRequest)?;

    Ok((old_size, proof, note_bytes))
}
