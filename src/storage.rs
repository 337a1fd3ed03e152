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

use crate::config::DEFAULT_MAX_SIZE;
use crate::digest::Ref;
use crate::errors::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

/// A content-addressed blob store.
///
/// Implementors can provide custom storage backends, such as in-memory storage, an
/// embedded database, or a remote service. The tree never mutates a blob once posted and
/// never holds a lock around tree structure, so implementations must tolerate concurrent
/// `get`, `post` and `exists` from multiple tasks.
///
/// Store failures are returned as-is to the caller of the tree operation; retries, if any,
/// belong in the implementation.
pub trait ContentStore: Send + Sync {
    /// Stores a blob and returns its ref. Posting the same bytes twice returns the same ref.
    ///
    /// # Arguments
    ///
    /// * `data` - The blob, at most [`max_size`](Self::max_size) bytes.
    fn post(&self, data: &[u8]) -> Result<Ref>;

    /// Retrieves a blob by ref. A missing blob is [`Error::NotFound`].
    fn get(&self, node: &Ref) -> Result<Vec<u8>>;

    /// Reports whether a blob is present without fetching it.
    fn exists(&self, node: &Ref) -> Result<bool>;

    /// The largest blob this store accepts.
    fn max_size(&self) -> usize;
}

impl<T: ContentStore + ?Sized> ContentStore for Arc<T> {
    fn post(&self, data: &[u8]) -> Result<Ref> {
        (**self).post(data)
    }

    fn get(&self, node: &Ref) -> Result<Vec<u8>> {
        (**self).get(node)
    }

    fn exists(&self, node: &Ref) -> Result<bool> {
        (**self).exists(node)
    }

    fn max_size(&self) -> usize {
        (**self).max_size()
    }
}

/// Counters of the calls made against an [`InMemoryStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Every call to `post`.
    pub posts: usize,
    /// Posts that added a blob which was not already present.
    pub writes: usize,
    pub gets: usize,
    pub exists: usize,
}

/// An implementation of `ContentStore` that keeps blobs in a HashMap.
#[derive(Debug)]
pub struct InMemoryStore {
    map: RwLock<HashMap<Ref, Arc<Vec<u8>>>>,
    max_size: usize,
    posts: AtomicUsize,
    writes: AtomicUsize,
    gets: AtomicUsize,
    exists: AtomicUsize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE)
    }
}

impl InMemoryStore {
    /// Creates a new instance of `InMemoryStore` accepting blobs up to `max_size` bytes.
    pub fn new(max_size: usize) -> Self {
        InMemoryStore {
            map: RwLock::new(HashMap::new()),
            max_size,
            posts: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
            exists: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.read_map().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All refs currently held, in no particular order.
    pub fn refs(&self) -> Vec<Ref> {
        self.read_map()
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Removes a blob. Used by garbage collection.
    pub fn delete(&self, node: &Ref) -> Result<bool> {
        let mut map = self
            .map
            .write()
            .map_err(|_| Error::Store("in-memory store lock poisoned".into()))?;
        Ok(map.remove(node).is_some())
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            posts: self.posts.load(Ordering::SeqCst),
            writes: self.writes.load(Ordering::SeqCst),
            gets: self.gets.load(Ordering::SeqCst),
            exists: self.exists.load(Ordering::SeqCst),
        }
    }

    pub fn reset_stats(&self) {
        self.posts.store(0, Ordering::SeqCst);
        self.writes.store(0, Ordering::SeqCst);
        self.gets.store(0, Ordering::SeqCst);
        self.exists.store(0, Ordering::SeqCst);
    }

    fn read_map(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<Ref, Arc<Vec<u8>>>>> {
        self.map
            .read()
            .map_err(|_| Error::Store("in-memory store lock poisoned".into()))
    }
}

impl ContentStore for InMemoryStore {
    fn post(&self, data: &[u8]) -> Result<Ref> {
        self.posts.fetch_add(1, Ordering::SeqCst);
        if data.len() > self.max_size {
            return Err(Error::BlobTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }
        let node = Ref::of(data);
        let mut map = self
            .map
            .write()
            .map_err(|_| Error::Store("in-memory store lock poisoned".into()))?;
        if !map.contains_key(&node) {
            map.insert(node, Arc::new(data.to_vec()));
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(node)
    }

    fn get(&self, node: &Ref) -> Result<Vec<u8>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let map = self.read_map()?;
        map.get(node)
            .map(|data| data.as_ref().clone())
            .ok_or(Error::NotFound(*node))
    }

    fn exists(&self, node: &Ref) -> Result<bool> {
        self.exists.fetch_add(1, Ordering::SeqCst);
        Ok(self.read_map()?.contains_key(node))
    }

    fn max_size(&self) -> usize {
        self.max_size
    }
}
