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

use crate::config::TreeConfig;
use crate::encoding::{decode_entry, encode_entry, encoded_len};
use crate::errors::{Error, Result};
use crate::node::{Entry, Index};
use crate::storage::ContentStore;
use tracing::trace;

/// Packs an ordered stream of entries into nodes.
///
/// Entries accumulate in a buffer until the boundary function fires after an entry, or until
/// the next entry would push the buffer past `max_size`. The buffer is then posted to the
/// store and an [`Index`] for the new node is handed to the caller's `emit` callback.
pub struct StreamWriter {
    config: TreeConfig,
    buf: Vec<u8>,
    first_key: Option<Vec<u8>>,
    // key compression context; reset at every node boundary
    prev_key: Vec<u8>,
    last_key: Option<Vec<u8>>,
    count: usize,
    appended: usize,
    flushed: usize,
    // the entry of the last posted node, when it held exactly one
    last_sole: Option<Entry>,
}

impl StreamWriter {
    pub fn new(config: TreeConfig) -> Self {
        StreamWriter {
            config,
            buf: Vec::new(),
            first_key: None,
            prev_key: Vec::new(),
            last_key: None,
            count: 0,
            appended: 0,
            flushed: 0,
            last_sole: None,
        }
    }

    /// Appends an entry, flushing before it if it would overflow the node and after it if
    /// it lands on a boundary.
    ///
    /// # Panics
    ///
    /// If `key` is not strictly greater than every key appended before it.
    pub fn append<S: ContentStore + ?Sized>(
        &mut self,
        store: &S,
        key: &[u8],
        value: &[u8],
        emit: &mut dyn FnMut(Index),
    ) -> Result<()> {
        if let Some(last) = &self.last_key {
            assert!(
                key > last.as_slice(),
                "entries appended out of order: {:?} after {:?}",
                key,
                last
            );
        }
        // the first entry of a node is encoded without compression, the worst case
        let standalone = encoded_len(&[], key, value);
        if standalone > self.config.max_size {
            return Err(Error::EntryTooLarge {
                size: standalone,
                max: self.config.max_size,
            });
        }
        if self.buf.len() + encoded_len(&self.prev_key, key, value) > self.config.max_size {
            self.flush(store, emit)?;
        }

        let offset = self.buf.len();
        encode_entry(&mut self.buf, &self.prev_key, key, value);
        if self.first_key.is_none() {
            self.first_key = Some(key.to_vec());
        }
        self.prev_key.clear();
        self.prev_key.extend_from_slice(key);
        self.last_key = Some(key.to_vec());
        self.count += 1;
        self.appended += 1;

        if self.config.is_boundary(&self.buf[offset..]) {
            self.flush(store, emit)?;
        }
        Ok(())
    }

    /// Posts the buffered node, if any, and emits its index. A no-op on an empty buffer.
    pub fn flush<S: ContentStore + ?Sized>(
        &mut self,
        store: &S,
        emit: &mut dyn FnMut(Index),
    ) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let node = store.post(&self.buf)?;
        self.last_sole = self.sole_entry()?;
        let first_key = self.first_key.take().unwrap_or_default();
        trace!(
            node = %node,
            bytes = self.buf.len(),
            entries = self.count,
            "posted node"
        );

        self.buf.clear();
        self.prev_key.clear();
        self.count = 0;
        self.flushed += 1;
        emit(Index { node, first_key });
        Ok(())
    }

    /// Bytes waiting in the current node.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn entry_count(&self) -> usize {
        self.count
    }

    /// Entries appended over the writer's lifetime.
    pub fn appended_count(&self) -> usize {
        self.appended
    }

    /// Nodes posted so far.
    pub fn flushed_count(&self) -> usize {
        self.flushed
    }

    /// The entry of the most recently posted node, if that node held exactly one.
    pub(crate) fn last_sole_entry(&self) -> Option<&Entry> {
        self.last_sole.as_ref()
    }

    /// Returns the only buffered entry when exactly one is waiting.
    pub(crate) fn sole_entry(&self) -> Result<Option<Entry>> {
        if self.count != 1 {
            return Ok(None);
        }
        let (entry, _) = decode_entry(&[], &self.buf)?;
        Ok(Some(entry))
    }
}
