// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The plaintext block codec.
//!
//! A plaintext block is 16 bytes: the little-endian block id followed by the
//! little-endian value. One bit pattern is reserved as the dummy sentinel
//! that pads buckets below capacity; ids whose encoding would collide with
//! the sentinel's first half are rejected at encode time.

use crate::{Address, OramError};
use subtle::ConstantTimeEq;

/// The size in bytes of a plaintext block.
pub const BLOCK_SIZE: usize = 16;

/// A plaintext block: little-endian `id ‖ value`.
pub type BlockBytes = [u8; BLOCK_SIZE];

/// Block ids must be strictly below this bound.
///
/// The all-ones id would encode to the dummy sentinel's first half, so the
/// top bit is reserved outright.
pub const ADDRESS_LIMIT: Address = 1 << 63;

/// The dummy sentinel: eight `0xFF` bytes followed by eight zero bytes.
const DUMMY: BlockBytes = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// The result of decoding a plaintext block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodedBlock {
    /// The dummy sentinel.
    Dummy,
    /// A real block.
    Real {
        /// The block's logical id.
        id: Address,
        /// The block's value.
        value: u64,
    },
}

impl DecodedBlock {
    /// Returns true iff this block is the dummy sentinel.
    pub fn is_dummy(&self) -> bool {
        matches!(self, DecodedBlock::Dummy)
    }
}

/// Returns the dummy sentinel.
pub fn dummy() -> BlockBytes {
    DUMMY
}

/// Encodes `(id, value)` as a plaintext block.
///
/// # Errors
///
/// Returns [`OramError::UnknownBlock`] if `id` falls in the reserved range.
pub fn encode(id: Address, value: u64) -> Result<BlockBytes, OramError> {
    if id >= ADDRESS_LIMIT {
        return Err(OramError::UnknownBlock(id));
    }

    let mut bytes = [0u8; BLOCK_SIZE];
    bytes[..8].copy_from_slice(&id.to_le_bytes());
    bytes[8..].copy_from_slice(&value.to_le_bytes());
    Ok(bytes)
}

/// Decodes a plaintext block, recognizing the dummy sentinel.
pub fn decode(bytes: &BlockBytes) -> DecodedBlock {
    if bytes.ct_eq(&DUMMY).into() {
        return DecodedBlock::Dummy;
    }

    let id = u64::from_le_bytes(bytes[..8].try_into().expect("8-byte half"));
    let value = u64::from_le_bytes(bytes[8..].try_into().expect("8-byte half"));
    DecodedBlock::Real { id, value }
}
