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
use crate::config::TreeConfig;
use crate::digest::Ref;
use crate::encoding::decode_node;
use crate::errors::{Error, Result};
use crate::node::{Index, Root};
use crate::storage::ContentStore;
use crate::writer::StreamWriter;
use tracing::debug;

// deepest level whose nodes a root can name
const MAX_LEVEL: usize = u8::MAX as usize;

/// Builds a tree from entries supplied in strictly increasing key order.
///
/// The builder keeps one [`StreamWriter`] per level, created on first use. Whenever the
/// writer at level `i` closes a node, an index entry for it is appended to level `i + 1`.
/// [`finish`](Self::finish) flushes the tower bottom-up and returns the [`Root`].
///
/// A builder that returned an error is poisoned: every later call fails with
/// [`Error::Poisoned`] and it must be discarded.
pub struct Builder<'a, S: ContentStore + ?Sized> {
    store: &'a S,
    config: TreeConfig,
    levels: Vec<StreamWriter>,
    root: Option<Root>,
    poisoned: bool,
    cancel: CancelToken,
}

impl<'a, S: ContentStore + ?Sized> Builder<'a, S> {
    /// Creates a builder writing to `store`.
    ///
    /// # Arguments
    ///
    /// * `store` - Destination of every node posted by the builder.
    /// * `config` - Boundary parameters; validated against the store's blob limit.
    pub fn new(store: &'a S, config: TreeConfig) -> Result<Self> {
        config.validate(store.max_size())?;
        Ok(Builder {
            store,
            config,
            levels: Vec::new(),
            root: None,
            poisoned: false,
            cancel: CancelToken::default(),
        })
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Appends a key-value pair to the tree.
    ///
    /// # Panics
    ///
    /// If `key` is not strictly greater than the previous key.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.put_at(0, key, value)
    }

    /// Appends an entry directly at `level`. Above level 0 the value must be a node ref.
    ///
    /// Only valid while every level below is empty; see [`sync_level`](Self::sync_level).
    pub(crate) fn put_at(&mut self, level: usize, key: &[u8], value: &[u8]) -> Result<()> {
        if self.root.is_some() {
            return Err(Error::Finished);
        }
        if self.poisoned {
            return Err(Error::Poisoned);
        }
        debug_assert!(level <= self.sync_level());
        let result = self
            .cancel
            .check()
            .and_then(|_| self.append_at(level, key, value));
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    fn writer(&mut self, level: usize) -> &mut StreamWriter {
        while self.levels.len() <= level {
            self.levels.push(StreamWriter::new(self.config.clone()));
        }
        &mut self.levels[level]
    }

    fn append_at(&mut self, level: usize, key: &[u8], value: &[u8]) -> Result<()> {
        let store = self.store;
        let mut emitted = Vec::new();
        self.writer(level)
            .append(store, key, value, &mut |idx| emitted.push(idx))?;
        self.promote(level, emitted)
    }

    /// Appends indexes emitted by `level` to the level above.
    fn promote(&mut self, level: usize, emitted: Vec<Index>) -> Result<()> {
        if !emitted.is_empty() && level >= MAX_LEVEL {
            return Err(Error::InvalidConfig(format!(
                "tree grew past {} levels; mean_size {} is too small for index entries",
                MAX_LEVEL, self.config.mean_size
            )));
        }
        for idx in emitted {
            self.append_at(level + 1, &idx.first_key, idx.node.as_bytes())?;
        }
        Ok(())
    }

    /// The lowest level holding buffered data, or `usize::MAX` when every level is empty.
    ///
    /// Entries may be appended at any level up to and including this one.
    pub fn sync_level(&self) -> usize {
        self.levels
            .iter()
            .position(|w| w.buffered() > 0)
            .unwrap_or(usize::MAX)
    }

    /// Flushes every level and returns the root of the tree.
    ///
    /// Calling `finish` again returns the same root without posting anything.
    pub fn finish(&mut self) -> Result<Root> {
        if let Some(root) = &self.root {
            return Ok(root.clone());
        }
        if self.poisoned {
            return Err(Error::Poisoned);
        }
        match self.finish_levels() {
            Ok(root) => {
                debug!(
                    root = %root.node,
                    depth = root.depth,
                    levels = self.levels.len(),
                    "finished tree"
                );
                self.root = Some(root.clone());
                Ok(root)
            }
            Err(err) => {
                self.poisoned = true;
                Err(err)
            }
        }
    }

    fn finish_levels(&mut self) -> Result<Root> {
        self.cancel.check()?;
        let store = self.store;
        if self.levels.is_empty() {
            return empty_root(store);
        }

        // flush every level with a level in use above it; flushing may grow the tower
        let mut top = 0;
        while self.levels[top + 1..].iter().any(|w| w.appended_count() > 0) {
            let mut emitted = Vec::new();
            self.levels[top].flush(store, &mut |idx| emitted.push(idx))?;
            self.promote(top, emitted)?;
            top += 1;
        }

        match self.levels[top].entry_count() {
            0 => empty_root(store),
            1 if top > 0 => self.collapse(top),
            _ => {
                let mut emitted = Vec::new();
                self.levels[top].flush(store, &mut |idx| emitted.push(idx))?;
                let index = emitted
                    .pop()
                    .ok_or_else(|| Error::Store("top level flush posted nothing".into()))?;
                Ok(Root {
                    node: index.node,
                    depth: depth_of(top)?,
                    first_key: index.first_key,
                })
            }
        }
    }

    /// Resolves a top level holding a single index to the highest node with more than one
    /// entry below it.
    ///
    /// Levels that only ever saw one entry posted single-index nodes, and those never
    /// become the root. A subtree appended by reference with nothing beside it is read back
    /// from the store, since the builder never saw its contents.
    fn collapse(&self, top: usize) -> Result<Root> {
        let mut level = top;
        let mut entry = self.levels[top]
            .sole_entry()?
            .ok_or_else(|| Error::Store("top level holds no entry".into()))?;
        while level > 1 {
            let below = &self.levels[level - 1];
            let next = match below.appended_count() {
                0 => {
                    let node = Ref::from_slice(&entry.value)?;
                    let mut entries = decode_node(&self.store.get(&node)?)?;
                    if entries.len() == 1 {
                        entries.pop()
                    } else {
                        None
                    }
                }
                1 => below.last_sole_entry().cloned(),
                _ => None,
            };
            match next {
                Some(child) => {
                    entry = child;
                    level -= 1;
                }
                None => break,
            }
        }
        Ok(Root {
            node: Ref::from_slice(&entry.value)?,
            depth: depth_of(level - 1)?,
            first_key: entry.key,
        })
    }
}

fn depth_of(level: usize) -> Result<u8> {
    u8::try_from(level).map_err(|_| Error::InvalidConfig(format!("tree depth {} exceeds 255", level)))
}

fn empty_root<S: ContentStore + ?Sized>(store: &S) -> Result<Root> {
    let node = store.post(&[])?;
    Ok(Root {
        node,
        depth: 0,
        first_key: Vec::new(),
    })
}
