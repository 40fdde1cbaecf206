// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The client-side position map.
//!
//! Maps every outsourced block id to the leaf whose path currently holds
//! (or will hold) the block's unique encrypted copy. Seeded as the length-N
//! prefix of a Fisher–Yates shuffle of all `2^L` leaves, so the initial
//! assignment is an injection; later remaps are i.i.d. uniform and are
//! allowed to collide.

use crate::utils::random_permutation_of_0_through_n_exclusive;
use crate::{Address, Leaf, OramError, TreeLevel};
use rand::{CryptoRng, RngCore};

/// The in-memory map from block id to assigned leaf.
#[derive(Debug, Clone)]
pub struct PositionMap {
    leaves: Vec<Leaf>,
}

impl PositionMap {
    /// Builds the map for `n` blocks in a tree of the given height, each id
    /// assigned a distinct uniformly random leaf.
    pub fn new<R: RngCore + CryptoRng>(n: Address, height: TreeLevel, rng: &mut R) -> Self {
        let mut shuffled = random_permutation_of_0_through_n_exclusive(1u64 << height, rng);
        shuffled.truncate(n as usize);
        Self { leaves: shuffled }
    }

    /// The leaf currently assigned to `id`.
    ///
    /// # Errors
    ///
    /// Returns [`OramError::UnknownBlock`] if `id` was never initialized.
    pub fn get(&self, id: Address) -> Result<Leaf, OramError> {
        self.leaves
            .get(id as usize)
            .copied()
            .ok_or(OramError::UnknownBlock(id))
    }

    /// Reassigns `id` to `leaf`.
    ///
    /// # Errors
    ///
    /// Returns [`OramError::UnknownBlock`] if `id` was never initialized.
    pub fn set(&mut self, id: Address, leaf: Leaf) -> Result<(), OramError> {
        match self.leaves.get_mut(id as usize) {
            Some(slot) => {
                *slot = leaf;
                Ok(())
            }
            None => Err(OramError::UnknownBlock(id)),
        }
    }

    /// The number of mapped block ids, `N`.
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }
}
