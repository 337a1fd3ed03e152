/*
Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! Content-defined node boundaries.
//!
//! After every entry is appended to a node, the encoded bytes of that entry alone are hashed
//! with a keyed 64-bit hash. The node ends after the entry when the hash falls below
//! `u64::MAX / mean_size * entry_len`, so on average a node closes every `mean_size` bytes.
//! Because only the entry's own bytes feed the decision, an edit can only move the
//! boundaries next to it.

use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher24;
use std::hash::Hasher;
use twox_hash::XxHash64;

/// The keyed hash used to place node boundaries.
///
/// The choice is part of a tree's configuration: trees built with different hashers have
/// different node refs for the same content.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundaryHasher {
    /// SipHash-2-4 keyed with the full 128-bit seed.
    #[default]
    SipHash24,
    /// XxHash64 seeded with both halves of the seed folded together. Faster, not a PRF.
    XxHash64,
}

impl BoundaryHasher {
    pub fn hash64(&self, data: &[u8], seed: &[u8; 16]) -> u64 {
        match self {
            BoundaryHasher::SipHash24 => {
                let mut hasher = SipHasher24::new_with_key(seed);
                hasher.write(data);
                hasher.finish()
            }
            BoundaryHasher::XxHash64 => {
                let (lo, hi) = split_seed(seed);
                let mut hasher = XxHash64::with_seed(lo ^ hi.rotate_left(32));
                hasher.write(data);
                hasher.finish()
            }
        }
    }

    /// Returns true if a node must end after the entry encoded as `data`.
    pub fn is_boundary(&self, data: &[u8], mean_size: usize, seed: &[u8; 16]) -> bool {
        let threshold = (u64::MAX / mean_size.max(1) as u64).saturating_mul(data.len() as u64);
        self.hash64(data, seed) < threshold
    }
}

/// Boundary test with the default hasher.
///
/// # Arguments
///
/// * `data` - The encoded bytes of the entry that was just appended.
/// * `mean_size` - The target mean node size in bytes.
/// * `seed` - The 128-bit hash key.
pub fn is_boundary(data: &[u8], mean_size: usize, seed: &[u8; 16]) -> bool {
    BoundaryHasher::SipHash24.is_boundary(data, mean_size, seed)
}

fn split_seed(seed: &[u8; 16]) -> (u64, u64) {
    let mut lo = [0u8; 8];
    let mut hi = [0u8; 8];
    lo.copy_from_slice(&seed[..8]);
    hi.copy_from_slice(&seed[8..]);
    (u64::from_le_bytes(lo), u64::from_le_bytes(hi))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundary_is_deterministic() {
        let seed = [7u8; 16];
        for i in 0..100u32 {
            let data = format!("entry-{}", i).into_bytes();
            assert_eq!(
                is_boundary(&data, 64, &seed),
                is_boundary(&data, 64, &seed)
            );
        }
    }

    #[test]
    fn test_seed_changes_hash() {
        let data = b"some encoded entry";
        for hasher in [BoundaryHasher::SipHash24, BoundaryHasher::XxHash64] {
            assert_ne!(
                hasher.hash64(data, &[0u8; 16]),
                hasher.hash64(data, &[1u8; 16])
            );
        }
    }

    #[test]
    fn test_entry_at_least_mean_size_always_splits() {
        let data = vec![0xAB; 128];
        for hasher in [BoundaryHasher::SipHash24, BoundaryHasher::XxHash64] {
            for seed in 0..16u8 {
                assert!(hasher.is_boundary(&data, 64, &[seed; 16]));
            }
        }
    }

    #[test]
    fn test_boundary_rate_tracks_mean_size() {
        // 9-byte entries with a mean of 90 bytes should split about 10% of the time.
        let seed = [0u8; 16];
        let mut splits = 0;
        let total = 20_000;
        for i in 0..total {
            let data = format!("k{:08}", i).into_bytes();
            assert_eq!(data.len(), 9);
            if is_boundary(&data, 90, &seed) {
                splits += 1;
            }
        }
        assert!(splits > total / 20, "too few splits: {}", splits);
        assert!(splits < total / 5, "too many splits: {}", splits);
    }
}
