// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! The log registry: per-origin tree-head state and verifier keys, backed
//! by a local SQLite database.
//!
//! All access goes through a single connection behind a mutex. The one
//! write path, [`WitnessDb::compare_and_advance`], is a conditional
//! `UPDATE ... WHERE tree_size = ?` checked through the affected-row count,
//! so a stored tree size can never decrease even under racing requests.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use signed_note::{Ed25519NoteVerifier, NoteVerifier, VerifierList};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tlog_checkpoint::{Hash, EMPTY_HASH};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("unknown log")]
    UnknownLog,
    #[error("invalid origin")]
    InvalidOrigin,
    #[error("invalid key for log {origin}")]
    InvalidKey { origin: String },
    #[error("malformed stored tree hash")]
    MalformedTreeHash,
    #[error("tree size out of range")]
    SizeOutOfRange,
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// The outcome of a conditional tree-head advance.
#[derive(Debug, PartialEq, Eq)]
pub enum Advance {
    /// The stored head moved to the new size and hash.
    Advanced,
    /// The stored size no longer matched the expected old size; the advance
    /// did not happen.
    Conflict { known_size: u64 },
}

/// One registered log, as reported by `list-logs`.
#[derive(Debug, Serialize)]
pub struct LogSummary {
    pub origin: String,
    pub size: u64,
    pub root_hash: String,
    pub keys: Vec<String>,
}

/// The witness database, owning per-log state and keys.
pub struct WitnessDb {
    conn: Mutex<Connection>,
}

impl WitnessDb {
    /// Opens (creating if needed) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the schema
    /// cannot be initialized.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    /// Opens a fresh in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be initialized.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             CREATE TABLE IF NOT EXISTS log (
                 origin TEXT PRIMARY KEY,
                 tree_size INTEGER NOT NULL,
                 tree_hash TEXT NOT NULL -- base64-encoded
             );
             CREATE TABLE IF NOT EXISTS key (
                 origin TEXT NOT NULL,
                 key TEXT NOT NULL, -- note verifier key
                 FOREIGN KEY(origin) REFERENCES log(origin)
             );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    /// The current tree head for `origin`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownLog`] if the origin is not registered.
    pub fn get_log(&self, origin: &str) -> Result<(u64, Hash), StoreError> {
        Self::read_log(&self.lock(), origin)
    }

    fn read_log(conn: &Connection, origin: &str) -> Result<(u64, Hash), StoreError> {
        let row: Option<(i64, String)> = conn
            .query_row(
                "SELECT tree_size, tree_hash FROM log WHERE origin = ?1",
                params![origin],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (size, hash) = row.ok_or(StoreError::UnknownLog)?;
        let size = u64::try_from(size).map_err(|_| StoreError::SizeOutOfRange)?;
        let hash = Hash::parse_hash(&hash).map_err(|_| StoreError::MalformedTreeHash)?;
        Ok((size, hash))
    }

    /// The stored verifier key strings for `origin`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownLog`] if no keys are registered for the
    /// origin.
    pub fn keys(&self, origin: &str) -> Result<Vec<String>, StoreError> {
        Self::read_keys(&self.lock(), origin)
    }

    fn read_keys(conn: &Connection, origin: &str) -> Result<Vec<String>, StoreError> {
        let mut stmt = conn.prepare("SELECT key FROM key WHERE origin = ?1")?;
        let keys = stmt
            .query_map(params![origin], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        if keys.is_empty() {
            return Err(StoreError::UnknownLog);
        }
        Ok(keys)
    }

    /// The verifiers for `origin`, parsed from the stored key strings.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownLog`] if the origin has no keys, and
    /// [`StoreError::InvalidKey`] if a stored key fails to parse. A key that
    /// was accepted at registration but no longer parses is an operator
    /// problem, not a client one.
    pub fn verifiers(&self, origin: &str) -> Result<VerifierList, StoreError> {
        let keys = self.keys(origin)?;
        let mut verifiers: Vec<Box<dyn NoteVerifier>> = Vec::with_capacity(keys.len());
        for key in keys {
            match Ed25519NoteVerifier::new_from_encoded_key(&key) {
                Ok(v) => verifiers.push(Box::new(v)),
                Err(err) => {
                    log::warn!("invalid key in database for log {origin}: {err}");
                    return Err(StoreError::InvalidKey {
                        origin: origin.to_string(),
                    });
                }
            }
        }
        Ok(VerifierList::new(verifiers))
    }

    /// Atomically moves the tree head for `origin` from `expected_old_size`
    /// to `(new_size, new_hash)`.
    ///
    /// The update only applies if the stored size still equals
    /// `expected_old_size`; otherwise the current size is re-read and
    /// reported as a conflict.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownLog`] if the origin disappeared, or a
    /// database error.
    pub fn compare_and_advance(
        &self,
        origin: &str,
        expected_old_size: u64,
        new_size: u64,
        new_hash: Hash,
    ) -> Result<Advance, StoreError> {
        let old = i64::try_from(expected_old_size).map_err(|_| StoreError::SizeOutOfRange)?;
        let new = i64::try_from(new_size).map_err(|_| StoreError::SizeOutOfRange)?;
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE log SET tree_size = ?1, tree_hash = ?2 WHERE origin = ?3 AND tree_size = ?4",
            params![new, new_hash.to_string(), origin, old],
        )?;
        if changed == 1 {
            return Ok(Advance::Advanced);
        }
        let (known_size, _) = Self::read_log(&conn, origin)?;
        Ok(Advance::Conflict { known_size })
    }

    /// Registers a new origin with an empty tree.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidOrigin`] if the origin is not a valid
    /// log name, or a database error (including a duplicate origin).
    pub fn add_log(&self, origin: &str) -> Result<(), StoreError> {
        if !signed_note::KeyName::is_valid(origin) {
            return Err(StoreError::InvalidOrigin);
        }
        self.lock().execute(
            "INSERT INTO log (origin, tree_size, tree_hash) VALUES (?1, 0, ?2)",
            params![origin, EMPTY_HASH.to_string()],
        )?;
        Ok(())
    }

    /// Adds a verifier key for an origin. The stored string is the full
    /// verifier-key encoding and its name must match the origin.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidKey`] if the key does not parse or is
    /// bound to a different name, [`StoreError::UnknownLog`] if the origin
    /// is not registered.
    pub fn add_key(&self, origin: &str, key: &str) -> Result<(), StoreError> {
        let verifier =
            Ed25519NoteVerifier::new_from_encoded_key(key).map_err(|_| StoreError::InvalidKey {
                origin: origin.to_string(),
            })?;
        if verifier.name().as_str() != origin {
            return Err(StoreError::InvalidKey {
                origin: origin.to_string(),
            });
        }
        let conn = self.lock();
        Self::read_log(&conn, origin)?;
        conn.execute(
            "INSERT INTO key (origin, key) VALUES (?1, ?2)",
            params![origin, key],
        )?;
        Ok(())
    }

    /// Removes a verifier key, reporting whether anything was deleted.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub fn del_key(&self, origin: &str, key: &str) -> Result<bool, StoreError> {
        let deleted = self.lock().execute(
            "DELETE FROM key WHERE origin = ?1 AND key = ?2",
            params![origin, key],
        )?;
        Ok(deleted > 0)
    }

    /// All registered logs with their current heads and keys.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub fn list_logs(&self) -> Result<Vec<LogSummary>, StoreError> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT origin, tree_size, tree_hash FROM log ORDER BY origin")?;
        let logs = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut out = Vec::with_capacity(logs.len());
        for (origin, size, root_hash) in logs {
            let keys = Self::read_keys(&conn, &origin).unwrap_or_default();
            out.push(LogSummary {
                size: u64::try_from(size).map_err(|_| StoreError::SizeOutOfRange)?,
                origin,
                root_hash,
                keys,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;
    use signed_note::{new_encoded_ed25519_verifier_key, KeyName};
    use tlog_checkpoint::record_hash;

    const ORIGIN: &str = "example.com/test-log";

    fn test_key() -> String {
        let key = SigningKey::generate(&mut OsRng);
        let name = KeyName::new(ORIGIN.into()).unwrap();
        new_encoded_ed25519_verifier_key(&name, &key.verifying_key())
    }

    #[test]
    fn new_log_starts_empty() {
        let db = WitnessDb::open_in_memory().unwrap();
        db.add_log(ORIGIN).unwrap();
        let (size, hash) = db.get_log(ORIGIN).unwrap();
        assert_eq!(size, 0);
        assert_eq!(hash, EMPTY_HASH);
    }

    #[test]
    fn unknown_origin() {
        let db = WitnessDb::open_in_memory().unwrap();
        assert!(matches!(
            db.get_log(ORIGIN).unwrap_err(),
            StoreError::UnknownLog
        ));
        assert!(matches!(
            db.verifiers(ORIGIN).unwrap_err(),
            StoreError::UnknownLog
        ));
    }

    #[test]
    fn duplicate_origin_rejected() {
        let db = WitnessDb::open_in_memory().unwrap();
        db.add_log(ORIGIN).unwrap();
        assert!(db.add_log(ORIGIN).is_err());
        assert!(matches!(
            db.add_log("has whitespace").unwrap_err(),
            StoreError::InvalidOrigin
        ));
    }

    #[test]
    fn advance_and_conflict() {
        let db = WitnessDb::open_in_memory().unwrap();
        db.add_log(ORIGIN).unwrap();
        let h1 = record_hash(b"1");
        let h2 = record_hash(b"2");

        assert_eq!(
            db.compare_and_advance(ORIGIN, 0, 5, h1).unwrap(),
            Advance::Advanced
        );
        assert_eq!(db.get_log(ORIGIN).unwrap(), (5, h1));

        // A stale expected size does not modify anything.
        assert_eq!(
            db.compare_and_advance(ORIGIN, 0, 9, h2).unwrap(),
            Advance::Conflict { known_size: 5 }
        );
        assert_eq!(db.get_log(ORIGIN).unwrap(), (5, h1));

        // Same-size advance refreshes the row and succeeds.
        assert_eq!(
            db.compare_and_advance(ORIGIN, 5, 5, h1).unwrap(),
            Advance::Advanced
        );
    }

    #[test]
    fn key_management() {
        let db = WitnessDb::open_in_memory().unwrap();
        db.add_log(ORIGIN).unwrap();
        let key = test_key();

        db.add_key(ORIGIN, &key).unwrap();
        assert_eq!(db.keys(ORIGIN).unwrap(), vec![key.clone()]);
        assert!(!db.verifiers(ORIGIN).unwrap().is_empty());

        assert!(db.del_key(ORIGIN, &key).unwrap());
        assert!(!db.del_key(ORIGIN, &key).unwrap());
        assert!(matches!(
            db.keys(ORIGIN).unwrap_err(),
            StoreError::UnknownLog
        ));
    }

    #[test]
    fn add_key_validates() {
        let db = WitnessDb::open_in_memory().unwrap();
        db.add_log(ORIGIN).unwrap();

        assert!(matches!(
            db.add_key(ORIGIN, "garbage").unwrap_err(),
            StoreError::InvalidKey { .. }
        ));

        // A key bound to a different name is rejected.
        let other = SigningKey::generate(&mut OsRng);
        let other_key = new_encoded_ed25519_verifier_key(
            &KeyName::new("example.com/other".into()).unwrap(),
            &other.verifying_key(),
        );
        assert!(matches!(
            db.add_key(ORIGIN, &other_key).unwrap_err(),
            StoreError::InvalidKey { .. }
        ));

        // Keys for unregistered origins are rejected.
        let unregistered = SigningKey::generate(&mut OsRng);
        let unregistered_key = new_encoded_ed25519_verifier_key(
            &KeyName::new("example.com/unregistered".into()).unwrap(),
            &unregistered.verifying_key(),
        );
        assert!(matches!(
            db.add_key("example.com/unregistered", &unregistered_key)
                .unwrap_err(),
            StoreError::UnknownLog
        ));
    }

    #[test]
    fn list_logs_summarizes() {
        let db = WitnessDb::open_in_memory().unwrap();
        db.add_log(ORIGIN).unwrap();
        let key = test_key();
        db.add_key(ORIGIN, &key).unwrap();
        db.add_log("example.com/empty").unwrap();

        let logs = db.list_logs().unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].origin, "example.com/empty");
        assert!(logs[0].keys.is_empty());
        assert_eq!(logs[1].origin, ORIGIN);
        assert_eq!(logs[1].size, 0);
        assert_eq!(logs[1].root_hash, EMPTY_HASH.to_string());
        assert_eq!(logs[1].keys, vec![key]);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("witness.db");
        {
            let db = WitnessDb::open(&path).unwrap();
            db.add_log(ORIGIN).unwrap();
            db.compare_and_advance(ORIGIN, 0, 3, record_hash(b"x"))
                .unwrap();
        }
        let db = WitnessDb::open(&path).unwrap();
        assert_eq!(db.get_log(ORIGIN).unwrap().0, 3);
    }
}
