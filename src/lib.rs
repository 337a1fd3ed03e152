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

//! # gotkv
//!
//! A persistent, content-addressed ordered key-value tree. Nodes are immutable blobs named
//! by the SHA-256 of their bytes, and node boundaries are chosen by a keyed hash of the
//! entries themselves rather than by position, so the same set of entries always produces
//! the same tree and a local edit only changes the nodes on the path to it.
//!
//! ## Features
//!
//! - **Deduplication**: identical subtrees share one ref, across versions and across trees.
//! - **Cheap diff**: subtrees with equal refs are skipped without being fetched.
//! - **Cheap copy and sync**: whole nodes are reused by reference when building a new
//!   version, and replication stops at the first node the destination already holds.
//! - **Unbounded size**: index nodes point at lower nodes recursively, and every node
//!   respects a hard byte budget.
//!
//! ## Usage
//!
//! ```
//! use gotkv::config::TreeConfig;
//! use gotkv::node::Span;
//! use gotkv::storage::InMemoryStore;
//! use gotkv::tree::Operator;
//!
//! let op = Operator::new(InMemoryStore::default(), TreeConfig::default()).unwrap();
//! let root = op.new_empty().unwrap();
//! let root = op.put(&root, b"hello", b"world").unwrap();
//! assert_eq!(op.get(&root, b"hello").unwrap(), Some(b"world".to_vec()));
//! assert_eq!(op.count(&root, Span::total()).unwrap(), 1);
//! ```

pub mod boundary;
pub mod builder;
pub mod cancel;
pub mod config;
pub mod copy;
pub mod diff;
pub mod digest;
pub mod encoding;
pub mod errors;
pub mod iterator;
pub mod node;
pub mod reader;
#[cfg(feature = "rocksdb_storage")]
pub mod rocksdb;
pub mod storage;
pub mod sync;
pub mod tree;
pub mod writer;

pub use builder::Builder;
pub use cancel::CancelToken;
pub use config::TreeConfig;
pub use diff::{DiffResult, Differ};
pub use digest::Ref;
pub use errors::{Error, Result};
pub use iterator::TreeIterator;
pub use node::{Entry, Index, Root, Span};
pub use storage::{ContentStore, InMemoryStore};
pub use tree::{Mutation, Operator, TreeStats};
