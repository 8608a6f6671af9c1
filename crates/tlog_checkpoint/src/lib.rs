// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Checkpoints and tree-head verification for transparency logs.
//!
//! Implements the [C2SP tlog-checkpoint](https://c2sp.org/tlog-checkpoint)
//! body format, the RFC 6962 Merkle tree hashing and consistency rules
//! needed to check that one tree head extends another, and the timestamped
//! [C2SP tlog-cosignature](https://c2sp.org/tlog-cosignature) signature
//! scheme.

pub mod checkpoint;
pub mod cosignature;
pub mod tlog;

pub use checkpoint::*;
pub use cosignature::*;
pub use tlog::*;
