// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Fixed-capacity buckets of encrypted blocks.
//!
//! A bucket holds exactly `Z` ciphertexts. Real blocks always travel inside
//! full buckets, padded with freshly encrypted dummies, so the server never
//! learns a bucket's occupancy. Slot order within a bucket carries no
//! meaning.

use crate::block::{self, BlockBytes, DecodedBlock};
use crate::crypto::{self, Ciphertext, Key, CIPHERTEXT_SIZE};
use crate::{Address, BucketSize, OramError};
use rand::{CryptoRng, RngCore};
use subtle::{Choice, ConditionallySelectable, ConstantTimeEq};

/// A bucket of exactly `Z` encrypted blocks.
#[derive(Clone, PartialEq, Eq)]
pub struct Bucket {
    slots: Vec<Ciphertext>,
}

impl Bucket {
    /// Encrypts `blocks` and pads with fresh encrypted dummies up to `z`
    /// slots. If more than `z` blocks are supplied, only the first `z` are
    /// used; keeping the candidate set within capacity is the caller's job.
    ///
    /// # Errors
    ///
    /// Returns [`OramError::Crypto`] if encryption fails.
    pub fn assemble<R: RngCore + CryptoRng>(
        blocks: &[BlockBytes],
        z: BucketSize,
        key: &Key,
        rng: &mut R,
    ) -> Result<Self, OramError> {
        let mut slots = Vec::with_capacity(z);
        for plaintext in blocks.iter().take(z) {
            slots.push(crypto::encrypt(plaintext, key, rng)?);
        }
        while slots.len() < z {
            slots.push(crypto::encrypt(&block::dummy(), key, rng)?);
        }
        Ok(Self { slots })
    }

    /// Decrypts all `Z` slots, dummies included.
    ///
    /// # Errors
    ///
    /// Returns [`OramError::Crypto`] if decryption fails.
    pub fn open(&self, key: &Key) -> Result<Vec<BlockBytes>, OramError> {
        self.slots
            .iter()
            .map(|slot| crypto::decrypt(slot, key))
            .collect()
    }

    /// The number of slots, `Z`.
    pub fn len(&self) -> BucketSize {
        self.slots.len()
    }

    /// Whether the bucket has no slots. Never true for a well-formed bucket.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The raw ciphertext slots, in order.
    pub fn slots(&self) -> &[Ciphertext] {
        &self.slots
    }

    /// Serializes the bucket as its `Z × 32` ciphertext bytes, in slot order.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.slots.len() * CIPHERTEXT_SIZE);
        for slot in &self.slots {
            bytes.extend_from_slice(slot);
        }
        bytes
    }

    /// Deserializes a bucket of `z` slots from its wire form.
    ///
    /// # Errors
    ///
    /// Returns [`OramError::Crypto`] if `bytes` is not exactly `z × 32`
    /// bytes long.
    pub fn from_bytes(bytes: &[u8], z: BucketSize) -> Result<Self, OramError> {
        if bytes.len() != z * CIPHERTEXT_SIZE {
            return Err(OramError::Crypto("bucket bytes have the wrong length"));
        }

        let slots = bytes
            .chunks_exact(CIPHERTEXT_SIZE)
            .map(|chunk| chunk.try_into().expect("exact 32-byte chunk"))
            .collect();
        Ok(Self { slots })
    }
}

impl std::fmt::Debug for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Bucket({} slots)", self.slots.len())
    }
}

/// Decrypts every slot of every bucket and returns the real blocks.
///
/// # Errors
///
/// Returns [`OramError::Crypto`] if any slot fails to decrypt.
pub fn find_real(buckets: &[Bucket], key: &Key) -> Result<Vec<BlockBytes>, OramError> {
    let mut real = Vec::new();
    for bucket in buckets {
        for plaintext in bucket.open(key)? {
            if !block::decode(&plaintext).is_dummy() {
                real.push(plaintext);
            }
        }
    }
    Ok(real)
}

/// Scans `buckets` for the real block with the given id.
///
/// Every slot is decrypted and compared, whether or not an earlier slot
/// already matched. Returns the index of the containing bucket and the
/// block's value, or `None`.
///
/// # Errors
///
/// Returns [`OramError::Crypto`] if any slot fails to decrypt.
pub fn find_value(
    buckets: &[Bucket],
    id: Address,
    key: &Key,
) -> Result<Option<(usize, u64)>, OramError> {
    let mut found = Choice::from(0);
    let mut value = 0u64;
    let mut holder = 0u64;

    for (index, bucket) in buckets.iter().enumerate() {
        for plaintext in bucket.open(key)? {
            if let DecodedBlock::Real {
                id: candidate,
                value: candidate_value,
            } = block::decode(&plaintext)
            {
                let hit = candidate.ct_eq(&id);
                value.conditional_assign(&candidate_value, hit);
                holder.conditional_assign(&(index as u64), hit);
                found |= hit;
            }
        }
    }

    if found.into() {
        Ok(Some((holder as usize, value)))
    } else {
        Ok(None)
    }
}
