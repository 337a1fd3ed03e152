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

use crate::cancel::CancelToken;
use crate::encoding::{decode_entry, encode_entry};
use crate::errors::{Error, Result};
use crate::node::{Entry, Index, Root};
use crate::storage::ContentStore;
use std::collections::VecDeque;
use tracing::trace;

/// Decoding position inside one node.
struct NodeCursor {
    data: Vec<u8>,
    offset: usize,
    prev_key: Vec<u8>,
    // decoded entry at `offset` and its encoded length
    peeked: Option<(Entry, usize)>,
}

impl NodeCursor {
    fn new(data: Vec<u8>) -> Self {
        NodeCursor {
            data,
            offset: 0,
            prev_key: Vec::new(),
            peeked: None,
        }
    }

    fn is_done(&self) -> bool {
        self.offset >= self.data.len()
    }

    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.offset)
    }

    fn peek(&mut self) -> Result<Option<&Entry>> {
        if self.is_done() {
            return Ok(None);
        }
        if self.peeked.is_none() {
            let (entry, len) = decode_entry(&self.prev_key, &self.data[self.offset..])?;
            if self.offset > 0 && entry.key <= self.prev_key {
                return Err(Error::Corruption("node keys are not increasing".into()));
            }
            self.peeked = Some((entry, len));
        }
        Ok(self.peeked.as_ref().map(|(entry, _)| entry))
    }

    fn next(&mut self) -> Result<Option<Entry>> {
        if self.peek()?.is_none() {
            return Ok(None);
        }
        let Some((entry, len)) = self.peeked.take() else {
            return Ok(None);
        };
        self.offset += len;
        self.prev_key.clear();
        self.prev_key.extend_from_slice(&entry.key);
        Ok(Some(entry))
    }

    /// The entry after the next one, without moving.
    fn peek_second(&mut self) -> Result<Option<Entry>> {
        if self.peek()?.is_none() {
            return Ok(None);
        }
        let Some((first, first_len)) = &self.peeked else {
            return Ok(None);
        };
        let offset = self.offset + *first_len;
        if offset >= self.data.len() {
            return Ok(None);
        }
        let (entry, _) = decode_entry(&first.key, &self.data[offset..])?;
        Ok(Some(entry))
    }
}

/// Reads the entries of an ordered list of nodes, one node at a time.
///
/// Nodes are fetched lazily: at most one node is held in memory, and the next one is only
/// requested from the store when the current one is used up. `Ok(None)` from
/// [`next`](Self::next) or [`peek`](Self::peek) means the stream is exhausted.
pub struct StreamReader {
    pending: VecDeque<Index>,
    node: Option<NodeCursor>,
    cancel: CancelToken,
}

impl StreamReader {
    /// Creates a reader over the nodes named by `indexes`, which must be in key order.
    pub fn new(indexes: Vec<Index>) -> Self {
        StreamReader {
            pending: indexes.into(),
            node: None,
            cancel: CancelToken::default(),
        }
    }

    /// Creates a reader that yields the root itself as a single index entry.
    ///
    /// Nothing is fetched: the entry is held in memory.
    pub fn for_root(root: &Root) -> Self {
        let mut data = Vec::new();
        let entry = root.index().to_entry();
        encode_entry(&mut data, &[], &entry.key, &entry.value);
        StreamReader {
            pending: VecDeque::new(),
            node: Some(NodeCursor::new(data)),
            cancel: CancelToken::default(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Queues another node to read after the ones already pending.
    pub fn push(&mut self, index: Index) {
        self.pending.push_back(index);
    }

    /// True when the current node is used up and nothing is queued.
    pub fn is_exhausted(&self) -> bool {
        self.pending.is_empty() && self.node.as_ref().map_or(true, NodeCursor::is_done)
    }

    /// Bytes not yet read from the current node.
    pub fn buffered(&self) -> usize {
        self.node.as_ref().map_or(0, NodeCursor::remaining)
    }

    /// Makes sure a node with unread entries is loaded, fetching queued nodes as needed.
    ///
    /// Returns false once every queued node has been read.
    pub(crate) fn load<S: ContentStore + ?Sized>(&mut self, store: &S) -> Result<bool> {
        loop {
            if self.node.as_ref().is_some_and(|n| !n.is_done()) {
                return Ok(true);
            }
            let Some(index) = self.pending.pop_front() else {
                return Ok(false);
            };
            self.cancel.check()?;
            let data = store.get(&index.node)?;
            trace!(node = %index.node, bytes = data.len(), "fetched node");
            let mut cursor = NodeCursor::new(data);
            if let Some(first) = cursor.peek()? {
                if first.key != index.first_key {
                    return Err(Error::Corruption(format!(
                        "node {} starts at {:?}, its index says {:?}",
                        index.node, first.key, index.first_key
                    )));
                }
            }
            self.node = Some(cursor);
        }
    }

    pub fn peek<S: ContentStore + ?Sized>(&mut self, store: &S) -> Result<Option<Entry>> {
        if !self.load(store)? {
            return Ok(None);
        }
        self.peek_in_node()
    }

    pub fn next<S: ContentStore + ?Sized>(&mut self, store: &S) -> Result<Option<Entry>> {
        if !self.load(store)? {
            return Ok(None);
        }
        match self.node.as_mut() {
            Some(cursor) => cursor.next(),
            None => Ok(None),
        }
    }

    /// Skips entries until the next one has a key of at least `key`.
    pub fn seek<S: ContentStore + ?Sized>(&mut self, store: &S, key: &[u8]) -> Result<()> {
        while let Some(entry) = self.peek(store)? {
            if entry.key.as_slice() >= key {
                break;
            }
            self.next(store)?;
        }
        Ok(())
    }

    /// The next entry of the current node, without fetching anything.
    pub(crate) fn peek_in_node(&mut self) -> Result<Option<Entry>> {
        match self.node.as_mut() {
            Some(cursor) => Ok(cursor.peek()?.cloned()),
            None => Ok(None),
        }
    }

    /// The entry following the next one, if it lies in the current node.
    pub(crate) fn peek_second_in_node(&mut self) -> Result<Option<Entry>> {
        match self.node.as_mut() {
            Some(cursor) => cursor.peek_second(),
            None => Ok(None),
        }
    }
}
