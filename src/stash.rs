// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The client-side stash.
//!
//! Holds decrypted real blocks between the path read and the path
//! write-back, plus any blocks that could not be evicted onto their
//! assigned path yet. The stash is a plain owned collection keyed by block
//! id; under the Path ORAM analysis its occupancy stays O(log N) with
//! overwhelming probability for `Z ≥ 4`, so it carries no hard cap.

use crate::block::{self, BlockBytes, DecodedBlock};
use crate::Address;
use subtle::{Choice, ConditionallySelectable, ConstantTimeEq};

/// A decrypted real block awaiting eviction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StashBlock {
    /// The block's logical id.
    pub id: Address,
    /// The block's value.
    pub value: u64,
}

/// The stash: an owned multiset of real blocks, deduplicated by id.
#[derive(Debug, Default)]
pub struct Stash {
    blocks: Vec<StashBlock>,
}

impl Stash {
    /// An empty stash.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds decoded real blocks to the stash. A block whose id is already
    /// present replaces the prior copy; dummies are discarded.
    pub fn absorb(&mut self, plaintexts: &[BlockBytes]) {
        for plaintext in plaintexts {
            if let DecodedBlock::Real { id, value } = block::decode(plaintext) {
                self.upsert(id, value);
            }
        }
    }

    /// The index of the block with the given id, if present.
    ///
    /// Scans the whole stash regardless of where (or whether) the id
    /// matches.
    pub fn find(&self, id: Address) -> Option<usize> {
        let mut found = Choice::from(0);
        let mut index = 0u64;

        for (i, candidate) in self.blocks.iter().enumerate() {
            let hit = candidate.id.ct_eq(&id);
            index.conditional_assign(&(i as u64), hit);
            found |= hit;
        }

        if found.into() {
            Some(index as usize)
        } else {
            None
        }
    }

    /// The value of the block with the given id, if present.
    pub fn value_of(&self, id: Address) -> Option<u64> {
        self.find(id).map(|index| self.blocks[index].value)
    }

    /// Sets the value of the block with the given id, appending if absent.
    pub fn upsert(&mut self, id: Address, value: u64) {
        match self.find(id) {
            Some(index) => self.blocks[index].value = value,
            None => self.blocks.push(StashBlock { id, value }),
        }
    }

    /// Removes and returns up to `capacity` blocks satisfying `eligible`,
    /// in stash order.
    ///
    /// Used during eviction: the predicate captures "this block's assigned
    /// path passes through the bucket being rebuilt".
    pub fn drain_eligible<F: FnMut(Address) -> bool>(
        &mut self,
        capacity: usize,
        mut eligible: F,
    ) -> Vec<StashBlock> {
        let mut drained = Vec::with_capacity(capacity);
        let mut index = 0;
        while index < self.blocks.len() {
            if drained.len() == capacity {
                break;
            }
            if eligible(self.blocks[index].id) {
                drained.push(self.blocks.remove(index));
            } else {
                index += 1;
            }
        }
        drained
    }

    /// The number of real blocks currently stashed.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the stash holds no blocks.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absorb_deduplicates_by_id() {
        let mut stash = Stash::new();
        stash.absorb(&[
            block::encode(1, 10).unwrap(),
            block::encode(2, 20).unwrap(),
            block::encode(1, 11).unwrap(),
        ]);

        assert_eq!(stash.len(), 2);
        assert_eq!(stash.value_of(1), Some(11));
        assert_eq!(stash.value_of(2), Some(20));
    }

    #[test]
    fn absorb_discards_dummies() {
        let mut stash = Stash::new();
        stash.absorb(&[block::dummy(), block::encode(5, 50).unwrap(), block::dummy()]);

        assert_eq!(stash.len(), 1);
        assert_eq!(stash.find(5), Some(0));
    }

    #[test]
    fn upsert_appends_then_replaces() {
        let mut stash = Stash::new();
        stash.upsert(7, 70);
        stash.upsert(7, 71);

        assert_eq!(stash.len(), 1);
        assert_eq!(stash.value_of(7), Some(71));
    }

    #[test]
    fn absent_ids_are_not_found() {
        let mut stash = Stash::new();
        stash.upsert(1, 10);

        assert_eq!(stash.find(9), None);
        assert_eq!(stash.value_of(9), None);
    }

    #[test]
    fn drain_respects_capacity_and_predicate() {
        let mut stash = Stash::new();
        for id in 0..6 {
            stash.upsert(id, id * 100);
        }

        // Only even ids are eligible, and at most two may leave.
        let drained = stash.drain_eligible(2, |id| id % 2 == 0);
        assert_eq!(
            drained,
            vec![
                StashBlock { id: 0, value: 0 },
                StashBlock { id: 2, value: 200 }
            ]
        );
        assert_eq!(stash.len(), 4);
        assert_eq!(stash.find(4), Some(2));
    }

    #[test]
    fn drain_of_nothing_eligible_is_empty() {
        let mut stash = Stash::new();
        stash.upsert(1, 10);

        assert!(stash.drain_eligible(4, |_| false).is_empty());
        assert_eq!(stash.len(), 1);
    }
}
