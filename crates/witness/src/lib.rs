// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! A cosigning witness for transparency logs.
//!
//! The witness observes signed tree heads ("checkpoints") from a fixed set
//! of registered logs, verifies that each new head is consistent with the
//! latest head it has endorsed for that log, persists the advance, and
//! returns a timestamped [cosignature](https://c2sp.org/tlog-cosignature)
//! over the checkpoint. Cosignatures let log clients detect a log serving
//! divergent histories to different audiences.
//!
//! The serving surface is the [C2SP tlog-witness](https://c2sp.org/tlog-witness)
//! `add-checkpoint` endpoint, exposed by [`http::router`]. Per-log state
//! and verifier keys live in a local SQLite database managed by
//! [`store::WitnessDb`] and administered out of band with `witnessctl`.

pub mod http;
pub mod signer;
pub mod store;
pub mod witness;

pub use store::{Advance, LogSummary, StoreError, WitnessDb};
pub use witness::{AddCheckpointError, Witness};
