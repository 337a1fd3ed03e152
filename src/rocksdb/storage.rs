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

use crate::config::{TreeConfig, DEFAULT_MAX_SIZE};
use crate::digest::{Ref, REF_SIZE};
use crate::errors::{Error, Result};
use crate::storage::ContentStore;
use lru::LruCache;
use rocksdb::{BlockBasedOptions, Cache, DBCompressionType, Options, SliceTransform, WriteBatch, DB};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::trace;

const CONFIG_PREFIX: &[u8] = b"config:";
const NODE_PREFIX: &[u8] = b"node:";
const DEFAULT_CACHE_SIZE: NonZeroUsize = match NonZeroUsize::new(1000) {
    Some(size) => size,
    None => NonZeroUsize::MIN,
};

/// RocksDB-backed content store.
///
/// Blobs are stored under `node:<ref>`; tree configs under `config:<name>`. Recently read
/// blobs are kept in an LRU cache, which is safe because blobs never change once posted.
pub struct RocksDbStore {
    db: Arc<DB>,
    cache: Mutex<LruCache<Ref, Arc<Vec<u8>>>>,
    max_size: usize,
}

impl RocksDbStore {
    /// Create a new RocksDbStore instance with default options
    pub fn new(path: PathBuf) -> Result<Self> {
        Self::with_options(path, Self::default_options())
    }

    /// Create RocksDbStore with custom options
    pub fn with_options(path: PathBuf, opts: Options) -> Result<Self> {
        let db = DB::open(&opts, path)?;
        Ok(RocksDbStore {
            db: Arc::new(db),
            cache: Mutex::new(LruCache::new(DEFAULT_CACHE_SIZE)),
            max_size: DEFAULT_MAX_SIZE,
        })
    }

    /// Create RocksDbStore with custom cache size
    pub fn with_cache_size(path: PathBuf, cache_size: usize) -> Result<Self> {
        let mut store = Self::new(path)?;
        store.cache = Mutex::new(LruCache::new(
            NonZeroUsize::new(cache_size).unwrap_or(DEFAULT_CACHE_SIZE),
        ));
        Ok(store)
    }

    /// Sets the largest blob accepted by `post`.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Get default RocksDB options tuned for immutable, content-addressed blobs
    pub fn default_options() -> Options {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        opts.set_write_buffer_size(128 * 1024 * 1024); // 128MB memtable
        opts.set_max_write_buffer_number(4);
        opts.set_min_write_buffer_number_to_merge(2);

        opts.set_compression_type(DBCompressionType::Lz4);
        opts.set_bottommost_compression_type(DBCompressionType::Zstd);

        // exists() is on the sync hot path
        let mut block_opts = BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);

        let cache = Cache::new_lru_cache(512 * 1024 * 1024); // 512MB block cache
        block_opts.set_block_cache(&cache);

        opts.set_block_based_table_factory(&block_opts);

        let prefix_len = NODE_PREFIX.len() + REF_SIZE;
        opts.set_prefix_extractor(SliceTransform::create_fixed_prefix(prefix_len));

        opts
    }

    fn node_key(node: &Ref) -> Vec<u8> {
        let mut key = Vec::with_capacity(NODE_PREFIX.len() + REF_SIZE);
        key.extend_from_slice(NODE_PREFIX);
        key.extend_from_slice(node.as_bytes());
        key
    }

    fn config_key(name: &str) -> Vec<u8> {
        let mut result = Vec::with_capacity(CONFIG_PREFIX.len() + name.len());
        result.extend_from_slice(CONFIG_PREFIX);
        result.extend_from_slice(name.as_bytes());
        result
    }

    fn lock_cache(&self) -> Result<std::sync::MutexGuard<'_, LruCache<Ref, Arc<Vec<u8>>>>> {
        self.cache
            .lock()
            .map_err(|_| Error::Store("blob cache lock poisoned".into()))
    }

    /// Persists the config a tree is written with, under `name`.
    pub fn save_config(&self, name: &str, config: &TreeConfig) -> Result<()> {
        self.db.put(Self::config_key(name), config.to_bytes()?)?;
        Ok(())
    }

    pub fn load_config(&self, name: &str) -> Result<Option<TreeConfig>> {
        match self.db.get(Self::config_key(name))? {
            Some(data) => Ok(Some(TreeConfig::from_bytes(&data)?)),
            None => Ok(None),
        }
    }

    /// Removes a blob. Used by garbage collection.
    pub fn delete(&self, node: &Ref) -> Result<()> {
        self.lock_cache()?.pop(node);
        self.db.delete(Self::node_key(node))?;
        Ok(())
    }

    /// Delete multiple blobs in a single batch operation
    pub fn batch_delete(&self, nodes: &[Ref]) -> Result<()> {
        let mut batch = WriteBatch::default();
        let mut cache = self.lock_cache()?;
        for node in nodes {
            cache.pop(node);
            batch.delete(Self::node_key(node));
        }
        self.db.write(batch)?;
        Ok(())
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl ContentStore for RocksDbStore {
    fn post(&self, data: &[u8]) -> Result<Ref> {
        if data.len() > self.max_size {
            return Err(Error::BlobTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }
        let node = Ref::of(data);
        self.db.put(Self::node_key(&node), data)?;
        self.lock_cache()?.put(node, Arc::new(data.to_vec()));
        trace!(node = %node, bytes = data.len(), "stored blob");
        Ok(node)
    }

    fn get(&self, node: &Ref) -> Result<Vec<u8>> {
        if let Some(data) = self.lock_cache()?.get(node) {
            return Ok(data.as_ref().clone());
        }
        let data = self
            .db
            .get(Self::node_key(node))?
            .ok_or(Error::NotFound(*node))?;
        self.lock_cache()?.put(*node, Arc::new(data.clone()));
        Ok(data)
    }

    fn exists(&self, node: &Ref) -> Result<bool> {
        if self.lock_cache()?.contains(node) {
            return Ok(true);
        }
        Ok(self.db.get_pinned(Self::node_key(node))?.is_some())
    }

    fn max_size(&self) -> usize {
        self.max_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::iterator::TreeIterator;
    use crate::node::Span;
    use tempfile::TempDir;

    #[test]
    fn test_rocksdb_basic_operations() {
        let temp_dir = TempDir::new().unwrap();
        let store = RocksDbStore::new(temp_dir.path().to_path_buf()).unwrap();

        let node = store.post(b"some node bytes").unwrap();
        assert_eq!(node, Ref::of(b"some node bytes"));
        assert!(store.exists(&node).unwrap());
        assert_eq!(store.get(&node).unwrap(), b"some node bytes");

        store.delete(&node).unwrap();
        assert!(!store.exists(&node).unwrap());
        assert!(matches!(store.get(&node), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_config_operations() {
        let temp_dir = TempDir::new().unwrap();
        let store = RocksDbStore::new(temp_dir.path().to_path_buf()).unwrap();

        let config = TreeConfig::new(256, 8192).with_seed([3u8; 16]);
        store.save_config("main", &config).unwrap();
        assert_eq!(store.load_config("main").unwrap(), Some(config));
        assert!(store.load_config("non_existent").unwrap().is_none());
    }

    #[test]
    fn test_batch_delete() {
        let temp_dir = TempDir::new().unwrap();
        let store = RocksDbStore::new(temp_dir.path().to_path_buf()).unwrap();

        let nodes: Vec<Ref> = (0..10)
            .map(|i| store.post(format!("node{}", i).as_bytes()).unwrap())
            .collect();
        for node in &nodes {
            assert!(store.exists(node).unwrap());
        }
        store.batch_delete(&nodes).unwrap();
        for node in &nodes {
            assert!(!store.exists(node).unwrap());
        }
    }

    #[test]
    fn test_tree_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let root = {
            let store = RocksDbStore::with_cache_size(temp_dir.path().to_path_buf(), 2).unwrap();
            let mut builder = Builder::new(&store, TreeConfig::new(128, 4096)).unwrap();
            for i in 0..500u32 {
                builder.put(&i.to_be_bytes(), b"value").unwrap();
            }
            let root = builder.finish().unwrap();
            store.flush().unwrap();
            root
        };

        let store = RocksDbStore::new(temp_dir.path().to_path_buf()).unwrap();
        let mut it = TreeIterator::new(&store, &root, Span::total());
        assert_eq!(it.collect_entries().unwrap().len(), 500);
    }
}
