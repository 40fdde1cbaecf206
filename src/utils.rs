// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Utilities.

use crate::{Address, Leaf, TreeLevel};
use rand::distributions::Alphanumeric;
use rand::seq::SliceRandom;
use rand::{CryptoRng, Rng, RngCore};

/// The tree height `L = ⌈log₂ N⌉` for `N` outsourced blocks.
pub(crate) fn tree_height(n: Address) -> TreeLevel {
    debug_assert!(n > 0);
    n.next_power_of_two().trailing_zeros()
}

/// A uniformly random leaf label in `[0, 2^height)`.
pub(crate) fn random_leaf<R: RngCore + CryptoRng>(height: TreeLevel, rng: &mut R) -> Leaf {
    rng.gen_range(0..(1u64 << height))
}

pub(crate) fn random_permutation_of_0_through_n_exclusive<R: RngCore + CryptoRng>(
    n: u64,
    rng: &mut R,
) -> Vec<u64> {
    let mut permuted = Vec::from_iter(0..n);
    permuted.shuffle(rng);
    permuted
}

/// A random alphanumeric string, used to name per-server tree directories.
pub(crate) fn random_alphanumeric_string<R: RngCore + CryptoRng>(
    length: usize,
    rng: &mut R,
) -> String {
    rng.sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}
