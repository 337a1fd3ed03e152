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

use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Width in bytes of every content reference.
pub const REF_SIZE: usize = 32;

/// Represents the content hash of a blob held by a content store.
///
/// A `Ref` is the identity of a node in the tree. Two nodes with the same bytes always
/// produce the same `Ref`, which is what lets unchanged subtrees be shared between versions
/// of a tree and skipped during diff and sync.
///
/// The hash function is SHA-256 and the width is fixed at [`REF_SIZE`] bytes; the raw bytes
/// are written verbatim into index entries and serialized roots, so both must stay stable.
#[derive(PartialEq, Eq, Hash, PartialOrd, Ord, Clone, Copy, Serialize, Deserialize)]
pub struct Ref([u8; REF_SIZE]);

impl Ref {
    /// Computes the `Ref` of the given data.
    ///
    /// # Arguments
    ///
    /// * `data` - The blob to hash.
    ///
    /// # Returns
    ///
    /// The SHA-256 digest of `data`.
    pub fn of(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let result = hasher.finalize();

        let mut hash = [0u8; REF_SIZE];
        hash.copy_from_slice(&result[..REF_SIZE]);
        Ref(hash)
    }

    /// Wraps raw hash bytes, such as the value of an index entry.
    ///
    /// Fails with [`Error::Corruption`] if `data` is not exactly [`REF_SIZE`] bytes.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let hash = <[u8; REF_SIZE]>::try_from(data).map_err(|_| {
            Error::Corruption(format!(
                "ref must be {} bytes, found {}",
                REF_SIZE,
                data.len()
            ))
        })?;
        Ok(Ref(hash))
    }

    pub const fn from_bytes(hash: [u8; REF_SIZE]) -> Self {
        Ref(hash)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ref({})", &self.to_hex()[..16])
    }
}

impl AsRef<[u8]> for Ref {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
