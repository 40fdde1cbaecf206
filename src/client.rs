// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The client session and the access engine.
//!
//! A [`Client`] owns everything trusted: the position map, one stash and
//! one 128-bit key per registered server, and the geometry `(N, Z, L)`.
//! Servers are independent block stores registered under logical names;
//! nothing correlates accesses across them.
//!
//! ## The access protocol
//!
//! One logical [`Client::access`] performs, in order: look up the target's
//! leaf and immediately remap it to a fresh uniform leaf; fetch the full
//! path to the *old* leaf; decrypt and absorb its real blocks into the
//! stash; serve the read or write from the stash; then rewrite the whole
//! old path, leaf level first, greedily filling each bucket with stash
//! blocks whose freshly assigned path still passes through that node, and
//! padding every bucket to `Z` with fresh encrypted dummies.
//!
//! Rewriting the entire old path (rather than only its intersection with
//! the newly assigned path) is what keeps the server's view a pure
//! function of the uniformly random leaf sequence: one path fetch and
//! `L + 1` full-bucket writes per access, always.
//!
//! ## Security caveats
//!
//! Obliviousness holds against an observer of the block store. The stash
//! and position map are assumed to live in trusted memory; no integrity
//! protection (MAC) is layered on the ciphertexts.

use crate::bucket::{self, Bucket};
use crate::crypto::{self, Key};
use crate::position_map::PositionMap;
use crate::stash::{Stash, StashBlock};
use crate::store::{BlockStore, DirectoryStore};
use crate::utils::{random_leaf, tree_height};
use crate::{block, Address, BucketSize, OramError, TreeLevel};
use rand::{CryptoRng, RngCore};
use std::collections::HashMap;

/// The two logical operations of an access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Return the block's current value (0 if never written).
    Read,
    /// Replace the block's value and return the new value.
    Write,
}

/// Everything the client keeps per registered server.
pub(crate) struct ServerState<S> {
    pub(crate) store: S,
    pub(crate) key: Key,
    pub(crate) stash: Stash,
}

/// A Path ORAM client multiplexing any number of independent servers.
///
/// The store backend is pluggable; the default is the on-disk
/// [`DirectoryStore`].
pub struct Client<S: BlockStore = DirectoryStore> {
    n: Address,
    height: TreeLevel,
    z: BucketSize,
    position_map: PositionMap,
    servers: HashMap<String, ServerState<S>>,
}

impl<S: BlockStore> Client<S> {
    /// Builds a client for `n` outsourced blocks with `z` blocks per
    /// bucket. Computes `L = ⌈log₂ N⌉` and assigns every block id a
    /// distinct uniformly random leaf. No server state is touched.
    ///
    /// # Errors
    ///
    /// Returns [`OramError::InvalidConfiguration`] if `n` or `z` is zero.
    pub fn new<R: RngCore + CryptoRng>(
        n: Address,
        z: BucketSize,
        rng: &mut R,
    ) -> Result<Self, OramError> {
        if n == 0 {
            return Err(OramError::InvalidConfiguration {
                parameter: "block count N",
                value: 0,
            });
        }
        if z == 0 {
            return Err(OramError::InvalidConfiguration {
                parameter: "bucket size Z",
                value: 0,
            });
        }

        let height = tree_height(n);
        log::info!("Client::new(N = {n}, Z = {z}, L = {height})");

        Ok(Self {
            n,
            height,
            z,
            position_map: PositionMap::new(n, height, rng),
            servers: HashMap::new(),
        })
    }

    /// Registers a server under `name`: builds a store for `n` blocks with
    /// `z` per bucket, generates a fresh key, and initializes every bucket
    /// of the tree with `Z` encrypted dummies.
    ///
    /// The client keeps a single position map sized at construction, so
    /// `n` and `z` must match the client's own geometry.
    ///
    /// # Errors
    ///
    /// Returns [`OramError::DuplicateServer`] if `name` is taken,
    /// [`OramError::InvalidConfiguration`] on a geometry mismatch, and
    /// propagates store construction and initialization failures.
    pub fn add_server<R: RngCore + CryptoRng>(
        &mut self,
        name: &str,
        n: Address,
        z: BucketSize,
        fsize: usize,
        rng: &mut R,
    ) -> Result<(), OramError> {
        if self.servers.contains_key(name) {
            return Err(OramError::DuplicateServer(name.to_string()));
        }
        if n != self.n {
            return Err(OramError::InvalidConfiguration {
                parameter: "server block count N",
                value: n,
            });
        }
        if z != self.z {
            return Err(OramError::InvalidConfiguration {
                parameter: "server bucket size Z",
                value: z as u64,
            });
        }
        let store = S::create(n, z, fsize, rng)?;
        self.add_server_with(name, store, rng)
    }

    /// Registers a server backed by a caller-built store, for backends
    /// with construction knobs beyond `fsize` (or test fakes).
    ///
    /// # Errors
    ///
    /// Returns [`OramError::DuplicateServer`] if `name` is taken and
    /// [`OramError::InvalidConfiguration`] if the store's geometry does
    /// not match the client's.
    pub fn add_server_with<R: RngCore + CryptoRng>(
        &mut self,
        name: &str,
        mut store: S,
        rng: &mut R,
    ) -> Result<(), OramError> {
        if self.servers.contains_key(name) {
            return Err(OramError::DuplicateServer(name.to_string()));
        }
        if store.block_count() != self.n || store.bucket_size() != self.z {
            return Err(OramError::InvalidConfiguration {
                parameter: "server geometry",
                value: store.block_count(),
            });
        }

        let key = crypto::generate_key(rng);

        store.create_tree()?;
        for level in 0..=store.height() {
            for index in 0..(1u64 << level) {
                let dummies = Bucket::assemble(&[], self.z, &key, rng)?;
                store.write_node(&dummies, level, index)?;
            }
        }

        log::info!("registered server `{name}` at {}", store.location());
        self.servers.insert(
            name.to_string(),
            ServerState {
                store,
                key,
                stash: Stash::new(),
            },
        );
        Ok(())
    }

    /// Unregisters `name`, releasing its tree and forgetting its key and
    /// stash.
    ///
    /// # Errors
    ///
    /// Returns [`OramError::UnknownServer`] if `name` is not registered.
    pub fn remove_server(&mut self, name: &str) -> Result<(), OramError> {
        let mut state = self
            .servers
            .remove(name)
            .ok_or_else(|| OramError::UnknownServer(name.to_string()))?;
        state.store.remove_tree()?;
        log::info!("removed server `{name}`");
        Ok(())
    }

    /// Performs one logical access against the named server.
    ///
    /// For [`Operation::Read`], `data` is ignored and the block's current
    /// value is returned (0 if the block was never written). For
    /// [`Operation::Write`], the block's value becomes `data` and `data`
    /// is returned.
    ///
    /// # Errors
    ///
    /// Returns [`OramError::UnknownServer`] or [`OramError::UnknownBlock`]
    /// for bad arguments; store and envelope failures abort the access and
    /// propagate. A failure before the path is absorbed rolls the position
    /// map back, leaving every piece of state exactly as it was. A failure
    /// while rewriting the path returns the affected blocks to the stash
    /// and still writes the remaining buckets (dummy-filled, best effort)
    /// so the server sees the usual `L + 1` bucket writes; the first such
    /// error is surfaced once the path is complete.
    pub fn access<R: RngCore + CryptoRng>(
        &mut self,
        name: &str,
        op: Operation,
        id: Address,
        data: u64,
        rng: &mut R,
    ) -> Result<u64, OramError> {
        if id >= self.n {
            return Err(OramError::UnknownBlock(id));
        }

        let height = self.height;
        let z = self.z;
        let Client {
            position_map,
            servers,
            ..
        } = self;
        let state = servers
            .get_mut(name)
            .ok_or_else(|| OramError::UnknownServer(name.to_string()))?;

        // Look up the target's path and remap it before touching the
        // server; the leaf fetched below is then identically distributed
        // for every access.
        let old_leaf = position_map.get(id)?;
        let new_leaf = random_leaf(height, rng);
        position_map.set(id, new_leaf)?;

        // Until the path's blocks are absorbed into the stash, nothing has
        // been taken from the server, so undoing the remap restores the
        // exact pre-access state.
        let fetched = state
            .store
            .get_path_buckets(old_leaf)
            .and_then(|buckets| bucket::find_real(&buckets, &state.key));
        let real_blocks = match fetched {
            Ok(blocks) => blocks,
            Err(error) => {
                position_map.set(id, old_leaf)?;
                return Err(error);
            }
        };
        state.stash.absorb(&real_blocks);

        let result = match op {
            Operation::Read => state.stash.value_of(id).unwrap_or(0),
            Operation::Write => {
                state.stash.upsert(id, data);
                data
            }
        };

        // Rewrite the whole old path, deepest level first, so a block
        // eligible for a leaf-side bucket is placed as deep as possible.
        // A failed bucket write does not cut the rewrite short: the blocks
        // drained for it go back into the stash (to be evicted by a later
        // access), the remaining levels are still written as dummy-filled
        // buckets so the server sees a complete path rewrite, and the
        // first error is surfaced at the end.
        let mut eviction_error: Option<OramError> = None;

        for level in (0..=height).rev() {
            let shift = height - level;
            let node = old_leaf >> shift;

            let candidates = if eviction_error.is_none() {
                state.stash.drain_eligible(z, |candidate| {
                    matches!(position_map.get(candidate), Ok(leaf) if leaf >> shift == node)
                })
            } else {
                Vec::new()
            };

            if let Err(error) = write_back(state, &candidates, z, level, node, rng) {
                for candidate in &candidates {
                    state.stash.upsert(candidate.id, candidate.value);
                }
                eviction_error.get_or_insert(error);
            }
        }

        if let Some(error) = eviction_error {
            return Err(error);
        }

        Ok(result)
    }

    /// A diagnostic description of the named server.
    ///
    /// # Errors
    ///
    /// Returns [`OramError::UnknownServer`] if `name` is not registered.
    pub fn server_info(&self, name: &str) -> Result<String, OramError> {
        let state = self
            .servers
            .get(name)
            .ok_or_else(|| OramError::UnknownServer(name.to_string()))?;
        Ok(format!(
            "Server: {name}\n\tN: {}\n\tZ: {}\n\tdir: {}",
            self.n,
            self.z,
            state.store.location()
        ))
    }

    /// The number of blocks currently stashed for the named server.
    ///
    /// # Errors
    ///
    /// Returns [`OramError::UnknownServer`] if `name` is not registered.
    pub fn stash_occupancy(&self, name: &str) -> Result<usize, OramError> {
        let state = self
            .servers
            .get(name)
            .ok_or_else(|| OramError::UnknownServer(name.to_string()))?;
        Ok(state.stash.len())
    }

    /// The number of outsourced blocks, `N`.
    pub fn block_count(&self) -> Address {
        self.n
    }

    /// The tree height, `L`.
    pub fn height(&self) -> TreeLevel {
        self.height
    }

    /// The number of blocks per bucket, `Z`.
    pub fn bucket_size(&self) -> BucketSize {
        self.z
    }

    #[cfg(test)]
    pub(crate) fn server_state_mut(&mut self, name: &str) -> &mut ServerState<S> {
        self.servers.get_mut(name).unwrap()
    }
}

/// Encrypts `candidates` into a full bucket and replaces node
/// `(level, node)`. The caller keeps ownership of the candidates until
/// this returns `Ok`.
fn write_back<S: BlockStore, R: RngCore + CryptoRng>(
    state: &mut ServerState<S>,
    candidates: &[StashBlock],
    z: BucketSize,
    level: TreeLevel,
    node: u64,
    rng: &mut R,
) -> Result<(), OramError> {
    let plaintexts = candidates
        .iter()
        .map(|b| block::encode(b.id, b.value))
        .collect::<Result<Vec<_>, _>>()?;
    let rebuilt = Bucket::assemble(&plaintexts, z, &state.key, rng)?;
    state.store.write_node(&rebuilt, level, node)
}
