// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Common test utilities: a mirror-array workload harness that any store
//! backend can run under, and the macro that stamps out named tests for a
//! parameter grid.

use crate::client::{Client, Operation};
use crate::crypto::CIPHERTEXT_SIZE;
use crate::store::BlockStore;
use crate::{Address, BucketSize};
use rand::{rngs::StdRng, Rng, SeedableRng};

pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn workload_client<S: BlockStore>(n: Address, z: BucketSize, rng: &mut StdRng) -> Client<S> {
    // 32 buckets per backing file, whatever the bucket size.
    let fsize = 32 * z * CIPHERTEXT_SIZE;
    let mut client = Client::<S>::new(n, z, rng).unwrap();
    client.add_server("test", n, z, fsize, rng).unwrap();
    client
}

/// Runs random reads and writes against a fresh client, checking every
/// read against a mirror array, then verifies the full contents.
pub(crate) fn test_correctness_random_workload<S: BlockStore>(
    n: Address,
    z: BucketSize,
    num_operations: u32,
) {
    init_logger();
    let mut rng = StdRng::seed_from_u64(0);
    let mut client = workload_client::<S>(n, z, &mut rng);
    let mut mirror = vec![0u64; n as usize];

    for _ in 0..num_operations {
        let id = rng.gen_range(0..n);
        if rng.gen::<bool>() {
            assert_eq!(
                client
                    .access("test", Operation::Read, id, 0, &mut rng)
                    .unwrap(),
                mirror[id as usize]
            );
        } else {
            let value = rng.gen::<u64>();
            client
                .access("test", Operation::Write, id, value, &mut rng)
                .unwrap();
            mirror[id as usize] = value;
        }
    }

    for id in 0..n {
        assert_eq!(
            client
                .access("test", Operation::Read, id, 0, &mut rng)
                .unwrap(),
            mirror[id as usize],
            "{id}"
        );
    }
    client.remove_server("test").unwrap();
}

/// Runs sequential passes of `0, 1, ..., N − 1` with random values and
/// operations, then verifies the full contents.
pub(crate) fn test_correctness_linear_workload<S: BlockStore>(
    n: Address,
    z: BucketSize,
    num_passes: u32,
) {
    init_logger();
    let mut rng = StdRng::seed_from_u64(0);
    let mut client = workload_client::<S>(n, z, &mut rng);
    let mut mirror = vec![0u64; n as usize];

    for _ in 0..num_passes {
        for id in 0..n {
            if rng.gen::<bool>() {
                assert_eq!(
                    client
                        .access("test", Operation::Read, id, 0, &mut rng)
                        .unwrap(),
                    mirror[id as usize]
                );
            } else {
                let value = rng.gen::<u64>();
                client
                    .access("test", Operation::Write, id, value, &mut rng)
                    .unwrap();
                mirror[id as usize] = value;
            }
        }
    }

    for id in 0..n {
        assert_eq!(
            client
                .access("test", Operation::Read, id, 0, &mut rng)
                .unwrap(),
            mirror[id as usize],
            "{id}"
        );
    }
    client.remove_server("test").unwrap();
}

macro_rules! create_correctness_test {
    ($function_name:ident, $store_type:ident, $n:expr, $z:expr, $iterations:expr) => {
        paste::paste! {
            #[test]
            fn [<$function_name _ $store_type:snake _ $n _ $z _ $iterations>]() {
                $function_name::<$store_type>($n, $z, $iterations);
            }
        }
    };
}

pub(crate) use create_correctness_test;
