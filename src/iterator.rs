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
use crate::errors::Result;
use crate::node::{Entry, Index, Root, Span};
use crate::reader::StreamReader;
use crate::storage::ContentStore;

/// Iterates over the entries of a tree that fall within a [`Span`], in key order.
///
/// The iterator keeps one [`StreamReader`] per level. Level 0 yields leaf entries, level
/// `i > 0` yields the index entries that point at nodes of depth `i - 1`, and the top level
/// `depth + 1` yields the root itself. When a level runs dry it pulls the next index from
/// the level above, so only the nodes on the current path are ever held in memory.
///
/// Positioning at the span's beginning is deferred until the first read.
pub struct TreeIterator<'a, S: ContentStore + ?Sized> {
    store: &'a S,
    root: Root,
    span: Span,
    levels: Vec<StreamReader>,
    positioned: bool,
    cancel: CancelToken,
}

impl<'a, S: ContentStore + ?Sized> TreeIterator<'a, S> {
    pub fn new(store: &'a S, root: &Root, span: Span) -> Self {
        let cancel = CancelToken::default();
        let positioned = span.begin.is_empty();
        TreeIterator {
            store,
            root: root.clone(),
            span,
            levels: fresh_levels(root, &cancel),
            positioned,
            cancel,
        }
    }

    /// Checks `cancel` before every node fetch.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.levels = fresh_levels(&self.root, &cancel);
        self.cancel = cancel;
        // readers were rebuilt, so any position is lost
        self.positioned = self.span.begin.is_empty();
        self
    }

    pub fn root(&self) -> &Root {
        &self.root
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Returns the next entry without consuming it. `Ok(None)` marks the end of the span.
    pub fn peek(&mut self) -> Result<Option<Entry>> {
        self.peek_at(0)
    }

    /// Returns and consumes the next entry. `Ok(None)` marks the end of the span.
    pub fn next(&mut self) -> Result<Option<Entry>> {
        self.next_at(0)
    }

    /// Repositions the iterator at the first entry with a key of at least `key`.
    ///
    /// Keys below the span's beginning are clamped to it. Seeking backwards is allowed.
    pub fn seek(&mut self, key: &[u8]) -> Result<()> {
        let target = if key < self.span.begin.as_slice() {
            self.span.begin.clone()
        } else {
            key.to_vec()
        };
        self.levels = fresh_levels(&self.root, &self.cancel);
        self.positioned = true;

        // at each level pick the last index whose first key is <= target
        for level in (1..self.levels.len()).rev() {
            if !self.levels[level].load(self.store)? {
                return Ok(());
            }
            while let Some(second) = self.levels[level].peek_second_in_node()? {
                if second.key > target {
                    break;
                }
                self.levels[level].next(self.store)?;
            }
            let Some(entry) = self.levels[level].next(self.store)? else {
                return Ok(());
            };
            self.levels[level - 1].push(Index::from_entry(entry)?);
        }

        while let Some(entry) = self.peek_raw(0, true)? {
            if entry.key >= target {
                break;
            }
            self.levels[0].next(self.store)?;
        }
        Ok(())
    }

    /// Drains the iterator.
    pub fn collect_entries(&mut self) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next()? {
            entries.push(entry);
        }
        Ok(entries)
    }

    pub(crate) fn ensure_positioned(&mut self) -> Result<()> {
        if !self.positioned {
            let begin = self.span.begin.clone();
            self.seek(&begin)?;
        }
        Ok(())
    }

    /// The level holding the root entry.
    pub(crate) fn top_level(&self) -> usize {
        self.levels.len() - 1
    }

    /// The lowest level whose reader still has entries in hand, or the number of levels
    /// once the whole tree has been read.
    ///
    /// Every reader below this level sits on a node boundary, so the next entry at any level
    /// up to and including this one is the start of a complete subtree.
    pub(crate) fn sync_level(&self) -> usize {
        self.levels
            .iter()
            .position(|r| !r.is_exhausted())
            .unwrap_or(self.levels.len())
    }

    /// Peeks at the next entry of `level`, bounded by the span's end.
    pub(crate) fn peek_at(&mut self, level: usize) -> Result<Option<Entry>> {
        self.ensure_positioned()?;
        match self.peek_raw(level, true)? {
            Some(entry) if self.span.below_end(&entry.key) => Ok(Some(entry)),
            _ => Ok(None),
        }
    }

    pub(crate) fn next_at(&mut self, level: usize) -> Result<Option<Entry>> {
        if self.peek_at(level)?.is_none() {
            return Ok(None);
        }
        self.levels[level].next(self.store)
    }

    /// Consumes the next entry of `level` if the subtree under it lies entirely inside the
    /// span and so does the first key after it.
    ///
    /// A node closed by the size limit rather than a boundary depends on the entry that
    /// follows it, so the subtree is only reusable while that entry is copied unchanged.
    pub(crate) fn whole_node_at(&mut self, level: usize) -> Result<Option<Entry>> {
        if self.peek_at(level)?.is_none() {
            return Ok(None);
        }
        if let Some(end) = self.span.end.clone() {
            match self.upper_bound(level)? {
                Some(bound) if bound < end => {}
                _ => return Ok(None),
            }
        }
        self.levels[level].next(self.store)
    }

    /// The first key after the subtree of the next entry at `level`, or `None` if that
    /// subtree runs to the end of the tree.
    fn upper_bound(&mut self, level: usize) -> Result<Option<Vec<u8>>> {
        if let Some(second) = self.levels[level].peek_second_in_node()? {
            return Ok(Some(second.key));
        }
        if level + 1 >= self.levels.len() {
            return Ok(None);
        }
        Ok(self.peek_raw(level + 1, false)?.map(|entry| entry.key))
    }

    fn peek_raw(&mut self, level: usize, bounded: bool) -> Result<Option<Entry>> {
        if !self.fill(level, bounded)? {
            return Ok(None);
        }
        self.levels[level].peek_in_node()
    }

    /// Makes sure the reader at `level` has a loaded node, pulling indexes from above.
    ///
    /// When `bounded`, indexes at or past the span's end are left in place.
    fn fill(&mut self, level: usize, bounded: bool) -> Result<bool> {
        loop {
            if self.levels[level].load(self.store)? {
                return Ok(true);
            }
            if level + 1 == self.levels.len() {
                return Ok(false);
            }
            let Some(entry) = self.peek_raw(level + 1, bounded)? else {
                return Ok(false);
            };
            if bounded && !self.span.below_end(&entry.key) {
                return Ok(false);
            }
            self.levels[level + 1].next(self.store)?;
            self.levels[level].push(Index::from_entry(entry)?);
        }
    }
}

fn fresh_levels(root: &Root, cancel: &CancelToken) -> Vec<StreamReader> {
    let depth = root.depth as usize;
    let mut levels: Vec<StreamReader> = (0..=depth)
        .map(|_| StreamReader::new(Vec::new()).with_cancel(cancel.clone()))
        .collect();
    levels.push(StreamReader::for_root(root).with_cancel(cancel.clone()));
    levels
}
