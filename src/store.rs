// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Untrusted block stores.
//!
//! The server side of the protocol is nothing but a durable array of
//! `2^(L+1) − 1` bucket slots addressed by `(level, index)`. The
//! [`BlockStore`] trait captures exactly that capability set so the access
//! engine can run against an on-disk store, an in-memory fake, or an
//! instrumented wrapper interchangeably. Stores only ever see ciphertext.

use crate::bucket::Bucket;
use crate::crypto::CIPHERTEXT_SIZE;
use crate::utils::{random_alphanumeric_string, tree_height};
use crate::{Address, BucketSize, Leaf, OramError, TreeLevel};
use rand::{CryptoRng, RngCore};
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

/// The capability set the client requires of a server.
pub trait BlockStore: Sized {
    /// Builds a store handle for `n` outsourced blocks with `z` blocks per
    /// bucket. `fsize` is the backing-file size for stores that persist to
    /// disk; others may ignore it. No storage is allocated until
    /// [`BlockStore::create_tree`].
    ///
    /// # Errors
    ///
    /// Returns [`OramError::InvalidConfiguration`] for unusable parameters.
    fn create<R: RngCore + CryptoRng>(
        n: Address,
        z: BucketSize,
        fsize: usize,
        rng: &mut R,
    ) -> Result<Self, OramError>;

    /// The number of outsourced blocks, `N`.
    fn block_count(&self) -> Address;

    /// The tree height `L`; the tree has levels `0..=L`.
    fn height(&self) -> TreeLevel;

    /// The number of blocks per bucket, `Z`.
    fn bucket_size(&self) -> BucketSize;

    /// A human-readable description of where the tree lives.
    fn location(&self) -> String;

    /// Allocates zeroed storage for all `2^(L+1) − 1` bucket slots.
    ///
    /// # Errors
    ///
    /// Returns [`OramError::Io`] if allocation fails.
    fn create_tree(&mut self) -> Result<(), OramError>;

    /// Atomically replaces the `Z × 32` bytes of the slot at
    /// `(level, index)`.
    ///
    /// # Errors
    ///
    /// Returns [`OramError::OutOfRange`] for a slot outside the tree and
    /// [`OramError::Io`] for a failed write.
    fn write_node(&mut self, bucket: &Bucket, level: TreeLevel, index: u64)
        -> Result<(), OramError>;

    /// Reads the last-written content of the slot at `(level, index)`.
    ///
    /// # Errors
    ///
    /// Returns [`OramError::OutOfRange`] for a slot outside the tree and
    /// [`OramError::Io`] for a failed read.
    fn read_node(&mut self, level: TreeLevel, index: u64) -> Result<Bucket, OramError>;

    /// Releases all storage.
    ///
    /// # Errors
    ///
    /// Returns [`OramError::Io`] if the storage cannot be released.
    fn remove_tree(&mut self) -> Result<(), OramError>;

    /// The bucket index at each level of the path to `leaf`:
    /// `path[ℓ] = leaf >> (L − ℓ)`.
    ///
    /// # Errors
    ///
    /// Returns [`OramError::OutOfRange`] if `leaf` is not a leaf label.
    fn get_path(&self, leaf: Leaf) -> Result<Vec<u64>, OramError> {
        let height = self.height();
        if leaf >= (1u64 << height) {
            return Err(OramError::OutOfRange {
                level: height,
                index: leaf,
            });
        }
        Ok((0..=height).map(|level| leaf >> (height - level)).collect())
    }

    /// Reads the `L + 1` buckets on the path to `leaf`, root first.
    ///
    /// # Errors
    ///
    /// Propagates [`BlockStore::read_node`] errors.
    fn get_path_buckets(&mut self, leaf: Leaf) -> Result<Vec<Bucket>, OramError> {
        self.get_path(leaf)?
            .iter()
            .enumerate()
            .map(|(level, &index)| self.read_node(level as TreeLevel, index))
            .collect()
    }
}

fn check_node(
    height: TreeLevel,
    level: TreeLevel,
    index: u64,
) -> Result<(), OramError> {
    if level > height || index >= (1u64 << level) {
        return Err(OramError::OutOfRange { level, index });
    }
    Ok(())
}

fn missing_tree() -> OramError {
    OramError::Io(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        "tree storage was never allocated",
    ))
}

/// A block store persisting the tree as files under the OS temp directory.
///
/// Level `ℓ` is partitioned into files `<ℓ>.<k>` of `fsize` bytes, each
/// holding `fsize / (Z × 32)` buckets; bucket `(ℓ, n)` lives in file
/// `⌊n·Z·32 / fsize⌋` at byte offset `(n·Z·32) mod fsize`. The directory
/// name carries a random 10-character alphanumeric suffix so concurrent
/// trees never collide.
#[derive(Debug)]
pub struct DirectoryStore {
    n: Address,
    height: TreeLevel,
    z: BucketSize,
    fsize: usize,
    dir: PathBuf,
}

impl DirectoryStore {
    fn bucket_bytes(&self) -> usize {
        self.z * CIPHERTEXT_SIZE
    }

    fn file_and_offset(&self, level: TreeLevel, index: u64) -> (PathBuf, u64) {
        let byte_index = index * self.bucket_bytes() as u64;
        let file = byte_index / self.fsize as u64;
        let offset = byte_index % self.fsize as u64;
        (self.dir.join(format!("{level}.{file}")), offset)
    }

    fn files_for_level(&self, level: TreeLevel) -> u64 {
        let level_bytes = (1u64 << level) * self.bucket_bytes() as u64;
        level_bytes.div_ceil(self.fsize as u64)
    }
}

impl BlockStore for DirectoryStore {
    fn create<R: RngCore + CryptoRng>(
        n: Address,
        z: BucketSize,
        fsize: usize,
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
        // Buckets may not straddle file boundaries.
        if fsize == 0 || fsize % (z * CIPHERTEXT_SIZE) != 0 {
            return Err(OramError::InvalidConfiguration {
                parameter: "file size",
                value: fsize as u64,
            });
        }

        let dir = std::env::temp_dir().join(random_alphanumeric_string(10, rng));
        Ok(Self {
            n,
            height: tree_height(n),
            z,
            fsize,
            dir,
        })
    }

    fn block_count(&self) -> Address {
        self.n
    }

    fn height(&self) -> TreeLevel {
        self.height
    }

    fn bucket_size(&self) -> BucketSize {
        self.z
    }

    fn location(&self) -> String {
        self.dir.display().to_string()
    }

    fn create_tree(&mut self) -> Result<(), OramError> {
        log::info!(
            "allocating tree: {} levels under {}",
            self.height + 1,
            self.dir.display()
        );
        fs::create_dir_all(&self.dir)?;

        for level in 0..=self.height {
            for file in 0..self.files_for_level(level) {
                let handle = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(self.dir.join(format!("{level}.{file}")))?;
                handle.set_len(self.fsize as u64)?;
            }
        }
        Ok(())
    }

    fn write_node(
        &mut self,
        bucket: &Bucket,
        level: TreeLevel,
        index: u64,
    ) -> Result<(), OramError> {
        check_node(self.height, level, index)?;
        if bucket.len() != self.z {
            return Err(OramError::Crypto("bucket has the wrong slot count"));
        }
        log::debug!("physical write -- ({level}, {index})");

        let (path, offset) = self.file_and_offset(level, index);
        let mut handle = OpenOptions::new().write(true).open(path)?;
        handle.seek(SeekFrom::Start(offset))?;
        handle.write_all(&bucket.to_bytes())?;
        Ok(())
    }

    fn read_node(&mut self, level: TreeLevel, index: u64) -> Result<Bucket, OramError> {
        check_node(self.height, level, index)?;
        log::debug!("physical read -- ({level}, {index})");

        let (path, offset) = self.file_and_offset(level, index);
        let mut handle = fs::File::open(path)?;
        handle.seek(SeekFrom::Start(offset))?;

        let mut bytes = vec![0u8; self.bucket_bytes()];
        handle.read_exact(&mut bytes)?;
        Bucket::from_bytes(&bytes, self.z)
    }

    fn remove_tree(&mut self) -> Result<(), OramError> {
        log::info!("removing tree at {}", self.dir.display());
        fs::remove_dir_all(&self.dir)?;
        Ok(())
    }
}

/// A Vec-backed block store, useful as a test double for the on-disk one.
#[derive(Debug)]
pub struct MemoryStore {
    n: Address,
    height: TreeLevel,
    z: BucketSize,
    levels: Vec<Vec<Bucket>>,
}

impl BlockStore for MemoryStore {
    fn create<R: RngCore + CryptoRng>(
        n: Address,
        z: BucketSize,
        _fsize: usize,
        _rng: &mut R,
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
        Ok(Self {
            n,
            height: tree_height(n),
            z,
            levels: Vec::new(),
        })
    }

    fn block_count(&self) -> Address {
        self.n
    }

    fn height(&self) -> TreeLevel {
        self.height
    }

    fn bucket_size(&self) -> BucketSize {
        self.z
    }

    fn location(&self) -> String {
        "(in memory)".to_string()
    }

    fn create_tree(&mut self) -> Result<(), OramError> {
        let zeroed = Bucket::from_bytes(&vec![0u8; self.z * CIPHERTEXT_SIZE], self.z)?;
        self.levels = (0..=self.height)
            .map(|level| vec![zeroed.clone(); 1 << level])
            .collect();
        Ok(())
    }

    fn write_node(
        &mut self,
        bucket: &Bucket,
        level: TreeLevel,
        index: u64,
    ) -> Result<(), OramError> {
        check_node(self.height, level, index)?;
        if bucket.len() != self.z {
            return Err(OramError::Crypto("bucket has the wrong slot count"));
        }
        let slot = self
            .levels
            .get_mut(level as usize)
            .and_then(|row| row.get_mut(index as usize))
            .ok_or_else(missing_tree)?;
        *slot = bucket.clone();
        Ok(())
    }

    fn read_node(&mut self, level: TreeLevel, index: u64) -> Result<Bucket, OramError> {
        check_node(self.height, level, index)?;
        self.levels
            .get(level as usize)
            .and_then(|row| row.get(index as usize))
            .cloned()
            .ok_or_else(missing_tree)
    }

    fn remove_tree(&mut self) -> Result<(), OramError> {
        self.levels.clear();
        Ok(())
    }
}

/// A store wrapper that counts physical reads and writes per node and
/// records the leaf of every path fetch. Backs the observability tests.
#[derive(Debug)]
pub struct CountingStore<S> {
    inner: S,
    /// `reads[heap_index(ℓ, n)]` counts reads of node `(ℓ, n)`.
    reads: Vec<u64>,
    /// `writes[heap_index(ℓ, n)]` counts writes of node `(ℓ, n)`.
    writes: Vec<u64>,
    fetched_leaves: Vec<Leaf>,
}

impl<S: BlockStore> CountingStore<S> {
    fn heap_index(level: TreeLevel, index: u64) -> usize {
        ((1u64 << level) - 1 + index) as usize
    }

    /// The total number of physical bucket reads.
    pub fn read_count(&self) -> u64 {
        self.reads.iter().sum()
    }

    /// The total number of physical bucket writes.
    pub fn write_count(&self) -> u64 {
        self.writes.iter().sum()
    }

    /// The number of reads of node `(level, index)`.
    pub fn reads_of(&self, level: TreeLevel, index: u64) -> u64 {
        self.reads[Self::heap_index(level, index)]
    }

    /// The number of writes of node `(level, index)`.
    pub fn writes_of(&self, level: TreeLevel, index: u64) -> u64 {
        self.writes[Self::heap_index(level, index)]
    }

    /// The leaf of every path fetch, in order.
    pub fn fetched_leaves(&self) -> &[Leaf] {
        &self.fetched_leaves
    }
}

impl<S: BlockStore> BlockStore for CountingStore<S> {
    fn create<R: RngCore + CryptoRng>(
        n: Address,
        z: BucketSize,
        fsize: usize,
        rng: &mut R,
    ) -> Result<Self, OramError> {
        let inner = S::create(n, z, fsize, rng)?;
        let slots = (1usize << (inner.height() + 1)) - 1;
        Ok(Self {
            inner,
            reads: vec![0; slots],
            writes: vec![0; slots],
            fetched_leaves: Vec::new(),
        })
    }

    fn block_count(&self) -> Address {
        self.inner.block_count()
    }

    fn height(&self) -> TreeLevel {
        self.inner.height()
    }

    fn bucket_size(&self) -> BucketSize {
        self.inner.bucket_size()
    }

    fn location(&self) -> String {
        self.inner.location()
    }

    fn create_tree(&mut self) -> Result<(), OramError> {
        self.inner.create_tree()
    }

    fn write_node(
        &mut self,
        bucket: &Bucket,
        level: TreeLevel,
        index: u64,
    ) -> Result<(), OramError> {
        self.inner.write_node(bucket, level, index)?;
        self.writes[Self::heap_index(level, index)] += 1;
        Ok(())
    }

    fn read_node(&mut self, level: TreeLevel, index: u64) -> Result<Bucket, OramError> {
        let bucket = self.inner.read_node(level, index)?;
        self.reads[Self::heap_index(level, index)] += 1;
        Ok(bucket)
    }

    fn remove_tree(&mut self) -> Result<(), OramError> {
        self.inner.remove_tree()
    }

    fn get_path_buckets(&mut self, leaf: Leaf) -> Result<Vec<Bucket>, OramError> {
        self.fetched_leaves.push(leaf);
        self.get_path(leaf)?
            .iter()
            .enumerate()
            .map(|(level, &index)| self.read_node(level as TreeLevel, index))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_key;
    use crate::test_utils::init_logger;
    use duplicate::duplicate_item;
    use rand::{rngs::StdRng, SeedableRng};

    // The same suite runs against the on-disk store and the in-memory fake.
    #[duplicate_item(
        module_name        store_type;
        [directory_store]  [DirectoryStore];
        [memory_store]     [MemoryStore];
    )]
    mod module_name {
        use super::*;

        const N: Address = 8;
        const Z: BucketSize = 4;
        const FSIZE: usize = 4096;

        #[test]
        fn fresh_tree_is_zeroed() {
            init_logger();
            let mut rng = StdRng::seed_from_u64(0);
            let mut store = store_type::create(N, Z, FSIZE, &mut rng).unwrap();
            store.create_tree().unwrap();

            for level in 0..=store.height() {
                for index in 0..(1u64 << level) {
                    let bucket = store.read_node(level, index).unwrap();
                    assert_eq!(bucket.to_bytes(), vec![0u8; Z * CIPHERTEXT_SIZE]);
                }
            }
            store.remove_tree().unwrap();
        }

        #[test]
        fn write_read_round_trip() {
            init_logger();
            let mut rng = StdRng::seed_from_u64(1);
            let key = generate_key(&mut rng);
            let mut store = store_type::create(N, Z, FSIZE, &mut rng).unwrap();
            store.create_tree().unwrap();

            for (level, index) in [(0, 0), (1, 1), (2, 3), (3, 7)] {
                let bucket = Bucket::assemble(&[], Z, &key, &mut rng).unwrap();
                store.write_node(&bucket, level, index).unwrap();
                assert_eq!(store.read_node(level, index).unwrap(), bucket);
            }
            store.remove_tree().unwrap();
        }

        #[test]
        fn out_of_range_nodes_are_rejected() {
            init_logger();
            let mut rng = StdRng::seed_from_u64(2);
            let mut store = store_type::create(N, Z, FSIZE, &mut rng).unwrap();
            store.create_tree().unwrap();

            assert!(matches!(
                store.read_node(store.height() + 1, 0),
                Err(OramError::OutOfRange { .. })
            ));
            assert!(matches!(
                store.read_node(1, 2),
                Err(OramError::OutOfRange { .. })
            ));
            assert!(matches!(
                store.get_path(1u64 << store.height()),
                Err(OramError::OutOfRange { .. })
            ));
            store.remove_tree().unwrap();
        }

        #[test]
        fn paths_shift_toward_the_root() {
            init_logger();
            let mut rng = StdRng::seed_from_u64(3);
            let store = store_type::create(N, Z, FSIZE, &mut rng).unwrap();

            // N = 8 gives height 3; the path to leaf 5 (0b101) passes
            // through nodes 0, 1, 2, 5 at levels 0..=3.
            assert_eq!(store.get_path(5).unwrap(), vec![0, 1, 2, 5]);
            assert_eq!(store.get_path(0).unwrap(), vec![0, 0, 0, 0]);
            assert_eq!(store.get_path(7).unwrap(), vec![0, 1, 3, 7]);
        }

        #[test]
        fn path_buckets_match_node_reads() {
            init_logger();
            let mut rng = StdRng::seed_from_u64(4);
            let key = generate_key(&mut rng);
            let mut store = store_type::create(N, Z, FSIZE, &mut rng).unwrap();
            store.create_tree().unwrap();

            let leaf = 6;
            for (level, &index) in store.get_path(leaf).unwrap().iter().enumerate() {
                let bucket = Bucket::assemble(&[], Z, &key, &mut rng).unwrap();
                store.write_node(&bucket, level as TreeLevel, index).unwrap();
            }

            let buckets = store.get_path_buckets(leaf).unwrap();
            assert_eq!(buckets.len(), (store.height() + 1) as usize);
            for (level, &index) in store.get_path(leaf).unwrap().iter().enumerate() {
                assert_eq!(
                    buckets[level],
                    store.read_node(level as TreeLevel, index).unwrap()
                );
            }
            store.remove_tree().unwrap();
        }

        #[test]
        fn degenerate_parameters_are_rejected() {
            let mut rng = StdRng::seed_from_u64(5);
            assert!(store_type::create(0, Z, FSIZE, &mut rng).is_err());
            assert!(store_type::create(N, 0, FSIZE, &mut rng).is_err());
        }
    }

    #[test]
    fn buckets_split_across_files() {
        init_logger();
        let mut rng = StdRng::seed_from_u64(6);
        let key = generate_key(&mut rng);

        // One bucket per file: every node lands in its own `<level>.<k>`.
        let fsize = 4 * CIPHERTEXT_SIZE;
        let mut store = DirectoryStore::create(8, 4, fsize, &mut rng).unwrap();
        store.create_tree().unwrap();

        for index in 0..8 {
            let bucket = Bucket::assemble(&[], 4, &key, &mut rng).unwrap();
            store.write_node(&bucket, 3, index).unwrap();
            assert_eq!(store.read_node(3, index).unwrap(), bucket);
        }
        store.remove_tree().unwrap();
    }

    #[test]
    fn misaligned_file_size_is_rejected() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!(matches!(
            DirectoryStore::create(8, 4, 1000, &mut rng),
            Err(OramError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn removed_tree_is_gone_from_disk() {
        init_logger();
        let mut rng = StdRng::seed_from_u64(8);
        let mut store = DirectoryStore::create(8, 4, 4096, &mut rng).unwrap();
        store.create_tree().unwrap();

        let dir = PathBuf::from(store.location());
        assert!(dir.exists());
        store.remove_tree().unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn counting_store_sees_every_access() {
        init_logger();
        let mut rng = StdRng::seed_from_u64(9);
        let key = generate_key(&mut rng);
        let mut store = CountingStore::<MemoryStore>::create(8, 4, 4096, &mut rng).unwrap();
        store.create_tree().unwrap();

        store.get_path_buckets(5).unwrap();
        let bucket = Bucket::assemble(&[], 4, &key, &mut rng).unwrap();
        store.write_node(&bucket, 0, 0).unwrap();
        store.write_node(&bucket, 3, 5).unwrap();

        assert_eq!(store.read_count(), 4);
        assert_eq!(store.write_count(), 2);
        assert_eq!(store.reads_of(0, 0), 1);
        assert_eq!(store.reads_of(3, 5), 1);
        assert_eq!(store.writes_of(3, 5), 1);
        assert_eq!(store.fetched_leaves(), &[5]);
    }
}
