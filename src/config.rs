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

use crate::boundary::BoundaryHasher;
use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MEAN_SIZE: usize = 8 * 1024;
pub const DEFAULT_MAX_SIZE: usize = 1024 * 1024;

/// Parameters that decide where node boundaries fall.
///
/// Every field affects the refs produced for identical input, so a tree must be written
/// with the same config for its whole life. Readers do not need the config.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TreeConfig {
    /// Target mean node size in bytes.
    pub mean_size: usize,
    /// Hard upper bound on the encoded size of a node.
    pub max_size: usize,
    /// Key for the boundary hash.
    pub seed: [u8; 16],
    pub hasher: BoundaryHasher,
}

impl Default for TreeConfig {
    fn default() -> Self {
        TreeConfig {
            mean_size: DEFAULT_MEAN_SIZE,
            max_size: DEFAULT_MAX_SIZE,
            seed: [0u8; 16],
            hasher: BoundaryHasher::default(),
        }
    }
}

impl TreeConfig {
    pub fn new(mean_size: usize, max_size: usize) -> Self {
        TreeConfig {
            mean_size,
            max_size,
            ..Default::default()
        }
    }

    pub fn with_seed(mut self, seed: [u8; 16]) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_hasher(mut self, hasher: BoundaryHasher) -> Self {
        self.hasher = hasher;
        self
    }

    /// Checks the config against itself and against the store it will write to.
    ///
    /// # Arguments
    ///
    /// * `store_max_size` - The largest blob the target store accepts.
    pub fn validate(&self, store_max_size: usize) -> Result<()> {
        if self.mean_size == 0 {
            return Err(Error::InvalidConfig("mean_size must be positive".into()));
        }
        if self.max_size == 0 {
            return Err(Error::InvalidConfig("max_size must be positive".into()));
        }
        if self.mean_size > self.max_size {
            return Err(Error::InvalidConfig(format!(
                "mean_size {} is larger than max_size {}",
                self.mean_size, self.max_size
            )));
        }
        if self.max_size > store_max_size {
            return Err(Error::InvalidConfig(format!(
                "max_size {} exceeds the store limit of {}",
                self.max_size, store_max_size
            )));
        }
        Ok(())
    }

    pub fn is_boundary(&self, encoded_entry: &[u8]) -> bool {
        self.hasher
            .is_boundary(encoded_entry, self.mean_size, &self.seed)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(data)?)
    }
}
