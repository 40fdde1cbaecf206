// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! A client/server implementation of Path ORAM (Stefanov et al.).
//!
//! The client outsources `N` fixed-size blocks to an untrusted block store
//! arranged as a complete binary tree of encrypted buckets. To the server,
//! every logical read or write looks the same: one uniformly random
//! root-to-leaf path is fetched, and the same path is rewritten with `Z`
//! fresh ciphertexts per bucket. The position map, the stash, and all keys
//! live exclusively on the client and never touch disk.
//!
//! ```no_run
//! use path_oram::{Client, Operation};
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! # fn main() -> Result<(), path_oram::OramError> {
//! let mut rng = StdRng::seed_from_u64(0);
//! let mut client: Client = Client::new(64, 4, &mut rng)?;
//! client.add_server("primary", 64, 4, 4096, &mut rng)?;
//! client.access("primary", Operation::Write, 7, 0xDEADBEEF, &mut rng)?;
//! let value = client.access("primary", Operation::Read, 7, 0, &mut rng)?;
//! assert_eq!(value, 0xDEADBEEF);
//! client.remove_server("primary")?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::cargo, clippy::doc_markdown, missing_docs, rustdoc::all)]

use thiserror::Error;

pub mod block;
pub mod bucket;
pub mod client;
pub mod crypto;
pub mod position_map;
pub mod stash;
pub mod store;
pub(crate) mod utils;

#[cfg(test)]
pub(crate) mod test_utils;

pub use block::DecodedBlock;
pub use bucket::Bucket;
pub use client::{Client, Operation};
pub use position_map::PositionMap;
pub use stash::Stash;
pub use store::{BlockStore, CountingStore, DirectoryStore, MemoryStore};

/// The numeric type of logical block identifiers.
pub type Address = u64;
/// The numeric type of leaf labels, in `[0, 2^L)` for a tree of height `L`.
pub type Leaf = u64;
/// The numeric type of tree levels, `0` (root) through `L` (leaves).
pub type TreeLevel = u32;
/// The numeric type used to specify the number of blocks per bucket.
pub type BucketSize = usize;

/// The error type for every fallible operation in this crate.
///
/// No error is swallowed or retried internally; an error surfaced from
/// [`Client::access`] aborts that access and the caller decides what to do.
#[derive(Debug, Error)]
pub enum OramError {
    /// An operation named a server that was never registered.
    #[error("no server registered under the name `{0}`")]
    UnknownServer(String),

    /// [`Client::add_server`] was called with a name already in use.
    #[error("a server is already registered under the name `{0}`")]
    DuplicateServer(String),

    /// An access named a block id outside `[0, N)`.
    #[error("block id {0} is outside the outsourced range")]
    UnknownBlock(Address),

    /// A constructor was given an unusable parameter.
    #[error("invalid configuration: {parameter} = {value}")]
    InvalidConfiguration {
        /// The offending parameter.
        parameter: &'static str,
        /// The value it was given.
        value: u64,
    },

    /// The block store was asked for a node outside the tree.
    #[error("node ({level}, {index}) is outside the tree")]
    OutOfRange {
        /// The requested level.
        level: TreeLevel,
        /// The requested bucket index within that level.
        index: u64,
    },

    /// The underlying store failed a read or write.
    #[error("block store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A ciphertext or bucket did not have the expected shape.
    #[error("encryption envelope failure: {0}")]
    Crypto(&'static str),
}
