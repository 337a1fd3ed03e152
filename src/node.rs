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

use crate::digest::{Ref, REF_SIZE};
use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};

/// A key-value pair. Keys are ordered byte-wise; empty keys and values are valid.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Entry {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Entry {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A pointer to a child node and the first key reachable through it.
///
/// Inside a node above the leaves an `Index` is stored as an [`Entry`] whose key is
/// `first_key` and whose value is the raw bytes of `node`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    pub node: Ref,
    pub first_key: Vec<u8>,
}

impl Index {
    pub fn from_entry(entry: Entry) -> Result<Self> {
        Ok(Index {
            node: Ref::from_slice(&entry.value)?,
            first_key: entry.key,
        })
    }

    pub fn to_entry(&self) -> Entry {
        Entry {
            key: self.first_key.clone(),
            value: self.node.as_bytes().to_vec(),
        }
    }
}

/// The entry point into a tree.
///
/// With `depth == 0` the ref names a leaf node; otherwise it names a node of index entries
/// that point at nodes of depth `depth - 1`. The empty tree is an explicit root whose ref is
/// the empty node.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct Root {
    pub node: Ref,
    pub depth: u8,
    pub first_key: Vec<u8>,
}

impl Root {
    pub fn index(&self) -> Index {
        Index {
            node: self.node,
            first_key: self.first_key.clone(),
        }
    }

    /// Serializes the root as `ref || depth || first_key`.
    ///
    /// This layout is referenced from snapshots written by other layers and must not change.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(REF_SIZE + 1 + self.first_key.len());
        out.extend_from_slice(self.node.as_bytes());
        out.push(self.depth);
        out.extend_from_slice(&self.first_key);
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < REF_SIZE + 1 {
            return Err(Error::Corruption(format!(
                "root must be at least {} bytes, found {}",
                REF_SIZE + 1,
                data.len()
            )));
        }
        Ok(Root {
            node: Ref::from_slice(&data[..REF_SIZE])?,
            depth: data[REF_SIZE],
            first_key: data[REF_SIZE + 1..].to_vec(),
        })
    }
}

/// A half-open key range `[begin, end)`. `end == None` is unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Span {
    pub begin: Vec<u8>,
    pub end: Option<Vec<u8>>,
}

impl Span {
    /// The span covering every key.
    pub fn total() -> Self {
        Span::default()
    }

    pub fn new(begin: impl Into<Vec<u8>>, end: impl Into<Vec<u8>>) -> Self {
        Span {
            begin: begin.into(),
            end: Some(end.into()),
        }
    }

    pub fn starting_at(begin: impl Into<Vec<u8>>) -> Self {
        Span {
            begin: begin.into(),
            end: None,
        }
    }

    /// Keys strictly below `end`.
    pub fn until(end: impl Into<Vec<u8>>) -> Self {
        Span {
            begin: Vec::new(),
            end: Some(end.into()),
        }
    }

    /// The span holding exactly `key`.
    pub fn single(key: &[u8]) -> Self {
        Span {
            begin: key.to_vec(),
            end: Some(key_after(key)),
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        key >= self.begin.as_slice() && self.below_end(key)
    }

    pub fn below_end(&self, key: &[u8]) -> bool {
        match &self.end {
            Some(end) => key < end.as_slice(),
            None => true,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(&self.end, Some(end) if end.as_slice() <= self.begin.as_slice())
    }
}

/// The least key strictly greater than `key`.
pub fn key_after(key: &[u8]) -> Vec<u8> {
    let mut next = Vec::with_capacity(key.len() + 1);
    next.extend_from_slice(key);
    next.push(0);
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_bytes() {
        let root = Root {
            node: Ref::of(b"node"),
            depth: 3,
            first_key: b"apple".to_vec(),
        };
        let bytes = root.to_bytes();
        assert_eq!(bytes.len(), REF_SIZE + 1 + 5);
        assert_eq!(bytes[REF_SIZE], 3);
        assert_eq!(Root::from_bytes(&bytes).unwrap(), root);

        assert!(Root::from_bytes(&bytes[..REF_SIZE]).is_err());
    }

    #[test]
    fn test_index_entry() {
        let index = Index {
            node: Ref::of(b"child"),
            first_key: b"k".to_vec(),
        };
        let entry = index.to_entry();
        assert_eq!(entry.value.len(), REF_SIZE);
        assert_eq!(Index::from_entry(entry).unwrap(), index);

        let bad = Entry::new(b"k".to_vec(), b"short".to_vec());
        assert!(matches!(Index::from_entry(bad), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_span() {
        let span = Span::new(b"b".to_vec(), b"d".to_vec());
        assert!(!span.contains(b"a"));
        assert!(span.contains(b"b"));
        assert!(span.contains(b"c\xff"));
        assert!(!span.contains(b"d"));
        assert!(!span.is_empty());

        assert!(Span::total().contains(b""));
        assert!(Span::total().contains(b"\xff\xff"));
        assert!(Span::new(b"b".to_vec(), b"b".to_vec()).is_empty());

        let single = Span::single(b"key");
        assert!(single.contains(b"key"));
        assert!(!single.contains(b"key\x00"));
        assert!(!single.contains(b"ke"));
    }
}
