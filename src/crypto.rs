// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The randomized encryption envelope for plaintext blocks.
//!
//! A 16-byte plaintext `p` encrypts to the 32-byte ciphertext
//! `r ‖ (p ⊕ PRF_k(r))`, where `r` is a fresh random 16-byte pad seed and
//! `PRF_k` is HMAC-SHA-256 under the server key, truncated to 16 bytes.
//! Re-encrypting equal plaintexts yields independent ciphertexts, which is
//! what makes rewritten buckets indistinguishable to the server.

use crate::block::{BlockBytes, BLOCK_SIZE};
use crate::OramError;
use hmac::{Hmac, Mac};
use rand::{CryptoRng, RngCore};
use sha2::Sha256;

/// The size in bytes of a per-server symmetric key.
pub const KEY_SIZE: usize = 16;

/// The size in bytes of an encrypted block.
pub const CIPHERTEXT_SIZE: usize = 2 * BLOCK_SIZE;

/// A per-server symmetric key.
pub type Key = [u8; KEY_SIZE];

/// An encrypted block.
pub type Ciphertext = [u8; CIPHERTEXT_SIZE];

type HmacSha256 = Hmac<Sha256>;

/// Samples a fresh key.
pub fn generate_key<R: RngCore + CryptoRng>(rng: &mut R) -> Key {
    let mut key = [0u8; KEY_SIZE];
    rng.fill_bytes(&mut key);
    key
}

/// Encrypts one plaintext block under `key` with fresh randomness.
///
/// # Errors
///
/// Returns [`OramError::Crypto`] if the PRF rejects the key.
pub fn encrypt<R: RngCore + CryptoRng>(
    plaintext: &BlockBytes,
    key: &Key,
    rng: &mut R,
) -> Result<Ciphertext, OramError> {
    let mut seed = [0u8; BLOCK_SIZE];
    rng.fill_bytes(&mut seed);
    let pad = prf(key, &seed)?;

    let mut ciphertext = [0u8; CIPHERTEXT_SIZE];
    ciphertext[..BLOCK_SIZE].copy_from_slice(&seed);
    for i in 0..BLOCK_SIZE {
        ciphertext[BLOCK_SIZE + i] = plaintext[i] ^ pad[i];
    }
    Ok(ciphertext)
}

/// Decrypts one encrypted block under `key`.
///
/// # Errors
///
/// Returns [`OramError::Crypto`] if the PRF rejects the key.
pub fn decrypt(ciphertext: &Ciphertext, key: &Key) -> Result<BlockBytes, OramError> {
    let mut seed = [0u8; BLOCK_SIZE];
    seed.copy_from_slice(&ciphertext[..BLOCK_SIZE]);
    let pad = prf(key, &seed)?;

    let mut plaintext = [0u8; BLOCK_SIZE];
    for i in 0..BLOCK_SIZE {
        plaintext[i] = ciphertext[BLOCK_SIZE + i] ^ pad[i];
    }
    Ok(plaintext)
}

fn prf(key: &Key, seed: &[u8; BLOCK_SIZE]) -> Result<[u8; BLOCK_SIZE], OramError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|_| OramError::Crypto("PRF rejected the key"))?;
    mac.update(seed);
    let digest = mac.finalize().into_bytes();

    let mut pad = [0u8; BLOCK_SIZE];
    pad.copy_from_slice(&digest[..BLOCK_SIZE]);
    Ok(pad)
}
