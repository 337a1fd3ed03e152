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

use crate::digest::Ref;
use thiserror::Error;

/// Errors surfaced by tree operations.
///
/// End of stream is not represented here: iteration APIs return `Ok(None)` when a span is
/// exhausted.
#[derive(Error, Debug)]
pub enum Error {
    /// Node bytes could not be decoded. Never retried.
    #[error("Corrupt node data: {0}")]
    Corruption(String),

    #[error("Entry of {size} bytes exceeds max node size {max}")]
    EntryTooLarge { size: usize, max: usize },

    #[error("Blob of {size} bytes exceeds store max size {max}")]
    BlobTooLarge { size: usize, max: usize },

    #[error("Blob not found: {0}")]
    NotFound(Ref),

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid tree config: {0}")]
    InvalidConfig(String),

    #[error("Invalid mutation: {0}")]
    InvalidMutation(String),

    #[error("Builder was poisoned by an earlier failure")]
    Poisoned,

    #[error("Builder is already finished")]
    Finished,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Traversal task failed: {0}")]
    Task(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[cfg(feature = "rocksdb_storage")]
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
