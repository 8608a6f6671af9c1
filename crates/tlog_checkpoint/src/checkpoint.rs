// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! The checkpoint body format from
//! [C2SP tlog-checkpoint](https://c2sp.org/tlog-checkpoint).
//!
//! A checkpoint names a tree head and looks like this:
//! ```text
//! example.com/origin
//! 923748
//! nND/nri//U0xuHUrYSy0HtMeal2vzD9V4k/BO79C+QeI=
//! ```
//! It can be followed by extension lines, each non-empty and terminated by
//! a newline. The body is normally carried as the text of a signed note.

use crate::tlog::Hash;
use signed_note::KeyName;
use std::fmt;

/// Maximum checkpoint size we are willing to parse.
const MAX_CHECKPOINT_SIZE: usize = 1_000_000;

/// A parsed checkpoint body.
#[derive(PartialEq, Debug, Clone)]
pub struct Checkpoint {
    origin: String,
    size: u64,
    hash: Hash,
    /// Empty, or a sequence of non-empty newline-terminated lines.
    extension: String,
}

#[derive(Debug)]
pub struct MalformedCheckpointError;

impl fmt::Display for MalformedCheckpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed checkpoint")
    }
}

impl std::error::Error for MalformedCheckpointError {}

impl Checkpoint {
    /// The log's origin line.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// The size of the tree this checkpoint commits to.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The root hash of the tree this checkpoint commits to.
    pub fn hash(&self) -> Hash {
        self.hash
    }

    /// The raw extension lines, if any.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Assembles a checkpoint from its parts.
    ///
    /// # Errors
    ///
    /// Returns a [`MalformedCheckpointError`] if the origin is not a valid
    /// log name or the extension contains an empty or unterminated line.
    pub fn new(
        origin: &str,
        size: u64,
        hash: Hash,
        extension: &str,
    ) -> Result<Self, MalformedCheckpointError> {
        if !KeyName::is_valid(origin) {
            return Err(MalformedCheckpointError);
        }
        let mut rest = extension;
        while !rest.is_empty() {
            match rest.split_once('\n') {
                Some(("", _)) | None => return Err(MalformedCheckpointError),
                Some((_, after)) => rest = after,
            }
        }
        Ok(Self {
            origin: origin.to_string(),
            size,
            hash,
            extension: extension.to_string(),
        })
    }

    /// Parses an encoded checkpoint body.
    ///
    /// # Errors
    ///
    /// Returns a [`MalformedCheckpointError`] if the body is oversized, not
    /// newline-terminated, or any field is invalid. The size line must be
    /// the canonical decimal encoding, with no leading zeros or sign.
    pub fn from_bytes(text: &[u8]) -> Result<Self, MalformedCheckpointError> {
        if text.len() > MAX_CHECKPOINT_SIZE {
            return Err(MalformedCheckpointError);
        }
        let text = std::str::from_utf8(text).map_err(|_| MalformedCheckpointError)?;

        let (origin, rest) = text.split_once('\n').ok_or(MalformedCheckpointError)?;
        let (size_str, rest) = rest.split_once('\n').ok_or(MalformedCheckpointError)?;
        let (hash_str, extension) = rest.split_once('\n').ok_or(MalformedCheckpointError)?;

        let size: u64 = size_str.parse().map_err(|_| MalformedCheckpointError)?;
        if size.to_string() != size_str {
            return Err(MalformedCheckpointError);
        }
        let hash = Hash::parse_hash(hash_str).map_err(|_| MalformedCheckpointError)?;

        Self::new(origin, size, hash, extension)
    }

    /// Encodes the checkpoint body, trailing newline included.
    pub fn to_bytes(&self) -> Vec<u8> {
        format!(
            "{}\n{}\n{}\n{}",
            self.origin, self.size, self.hash, self.extension
        )
        .into_bytes()
    }
}
