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

//! Reachability walks over a tree: replicating it into another store, or marking every
//! node it references.
//!
//! Both walks visit a node, fan out over its children as concurrent tasks, call the
//! entry callback for every leaf entry, and finish the node only after all of its children
//! finished. A subtree whose root is already present at the destination (or already in
//! the set) is skipped whole. Store calls run on the blocking pool behind a semaphore
//! that bounds the number in flight.
//!
//! Each tree level has its own semaphore of `concurrency` permits. A child task is
//! spawned only once a permit of its level is held, and keeps it until its node is
//! finished, so at most `concurrency * (depth + 1)` fetched nodes are held at once.
//!
//! The first error aborts every sibling task still running and is returned to the caller.

use crate::cancel::CancelToken;
use crate::digest::Ref;
use crate::encoding::decode_node;
use crate::errors::{Error, Result};
use crate::node::{Entry, Root};
use crate::storage::ContentStore;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, trace};

pub const DEFAULT_CONCURRENCY: usize = 16;

/// Options for [`sync`] and [`populate`].
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Store calls allowed in flight at once, and nodes held per tree level.
    pub concurrency: usize,
    pub cancel: CancelToken,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            concurrency: DEFAULT_CONCURRENCY,
            cancel: CancelToken::default(),
        }
    }
}

impl SyncOptions {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// A thread-safe set of refs, filled by [`populate`].
#[derive(Debug, Default)]
pub struct RefSet {
    refs: Mutex<HashSet<Ref>>,
}

impl RefSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, node: &Ref) -> Result<bool> {
        let refs = self
            .refs
            .lock()
            .map_err(|_| Error::Store("ref set lock poisoned".into()))?;
        Ok(refs.contains(node))
    }

    /// Adds a ref, returning false if it was already present.
    pub fn insert(&self, node: Ref) -> Result<bool> {
        let mut refs = self
            .refs
            .lock()
            .map_err(|_| Error::Store("ref set lock poisoned".into()))?;
        Ok(refs.insert(node))
    }

    /// A poisoned lock still holds a valid set; inserts never leave it half-written.
    pub fn len(&self) -> usize {
        self.refs.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_inner(self) -> HashSet<Ref> {
        self.refs.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

/// Counts reported by a finished walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkStats {
    /// Nodes fetched and processed.
    pub visited: usize,
    /// Subtrees skipped because their root was already present.
    pub skipped: usize,
}

type EntryFn = dyn Fn(&Entry) -> Result<()> + Send + Sync;

enum Target {
    Store(Arc<dyn ContentStore>),
    Set(Arc<RefSet>),
}

struct Walker {
    src: Arc<dyn ContentStore>,
    target: Target,
    on_entry: Arc<EntryFn>,
    permits: Semaphore,
    levels: Vec<Arc<Semaphore>>,
    cancel: CancelToken,
    visited: AtomicUsize,
    skipped: AtomicUsize,
}

impl Walker {
    fn new(
        src: Arc<dyn ContentStore>,
        target: Target,
        on_entry: Arc<EntryFn>,
        depth: u8,
        opts: &SyncOptions,
    ) -> Result<Self> {
        if opts.concurrency == 0 {
            return Err(Error::InvalidConfig("concurrency must be positive".into()));
        }
        Ok(Walker {
            src,
            target,
            on_entry,
            permits: Semaphore::new(opts.concurrency),
            levels: (0..=depth)
                .map(|_| Arc::new(Semaphore::new(opts.concurrency)))
                .collect(),
            cancel: opts.cancel.clone(),
            visited: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
        })
    }

    /// Returns the node's bytes, or `None` if the target already has it.
    fn fetch(&self, node: &Ref) -> Result<Option<Vec<u8>>> {
        let present = match &self.target {
            Target::Store(dst) => dst.exists(node)?,
            Target::Set(set) => set.contains(node)?,
        };
        if present {
            return Ok(None);
        }
        let data = self.src.get(node)?;
        trace!(node = %node, bytes = data.len(), "fetched node");
        Ok(Some(data))
    }

    fn complete(&self, node: &Ref, data: &[u8]) -> Result<()> {
        match &self.target {
            Target::Store(dst) => {
                let posted = dst.post(data)?;
                if posted != *node {
                    return Err(Error::Corruption(format!(
                        "node {} was stored as {}",
                        node, posted
                    )));
                }
                trace!(node = %node, "copied node");
            }
            Target::Set(set) => {
                set.insert(*node)?;
            }
        }
        Ok(())
    }

    fn stats(&self) -> WalkStats {
        WalkStats {
            visited: self.visited.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
        }
    }

    /// Waits for room to hold one more node at `depth`.
    async fn level_permit(&self, depth: u8) -> Result<OwnedSemaphorePermit> {
        let level = self.levels.get(depth as usize).ok_or_else(|| {
            Error::Corruption(format!("node at depth {} is below the root", depth))
        })?;
        Arc::clone(level)
            .acquire_owned()
            .await
            .map_err(|e| Error::Task(e.to_string()))
    }

    /// Runs a store call on the blocking pool while holding a permit.
    async fn blocking<T, F>(self: &Arc<Self>, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Walker) -> Result<T> + Send + 'static,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| Error::Task(e.to_string()))?;
        let walker = Arc::clone(self);
        tokio::task::spawn_blocking(move || f(&*walker))
            .await
            .map_err(|e| Error::Task(format!("blocking store call failed: {}", e)))?
    }
}

fn joined(result: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    result.map_err(|e| Error::Task(e.to_string())).and_then(|r| r)
}

/// Walks the subtree at `node`, holding `permit` from its level until the node is finished.
fn visit(
    walker: Arc<Walker>,
    node: Ref,
    depth: u8,
    permit: OwnedSemaphorePermit,
) -> BoxFuture<'static, Result<()>> {
    async move {
        let _permit = permit;
        walker.cancel.check()?;
        let Some(data) = walker.blocking(move |w| w.fetch(&node)).await? else {
            walker.skipped.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        };
        let entries = decode_node(&data)?;

        if depth > 0 {
            let mut children = JoinSet::new();
            for entry in &entries {
                let child = Ref::from_slice(&entry.value)?;
                let permit = walker.level_permit(depth - 1).await?;
                children.spawn(visit(Arc::clone(&walker), child, depth - 1, permit));
                while let Some(result) = children.try_join_next() {
                    if let Err(err) = joined(result) {
                        children.abort_all();
                        return Err(err);
                    }
                }
            }
            while let Some(result) = children.join_next().await {
                if let Err(err) = joined(result) {
                    children.abort_all();
                    return Err(err);
                }
            }
        } else {
            for entry in &entries {
                (walker.on_entry)(entry)?;
            }
        }

        walker.cancel.check()?;
        walker
            .blocking(move |w| w.complete(&node, &data))
            .await?;
        walker.visited.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    .boxed()
}

/// Copies every node reachable from `root` that `dst` lacks, from `src` into `dst`.
///
/// `on_entry` is called for every leaf entry of every copied leaf node. A node is posted
/// only after all of its children are present in `dst`, so an interrupted sync never
/// leaves a node whose subtree is incomplete.
///
/// # Arguments
///
/// * `dst` - The store receiving the nodes.
/// * `src` - The store holding the tree.
/// * `root` - The tree to replicate.
/// * `opts` - Concurrency bound and cancellation.
/// * `on_entry` - Called for each leaf entry found; an error aborts the sync.
pub async fn sync<D, S, F>(
    dst: Arc<D>,
    src: Arc<S>,
    root: &Root,
    opts: &SyncOptions,
    on_entry: F,
) -> Result<WalkStats>
where
    D: ContentStore + 'static,
    S: ContentStore + 'static,
    F: Fn(&Entry) -> Result<()> + Send + Sync + 'static,
{
    debug!(root = %root.node, depth = root.depth, "sync started");
    let walker = Arc::new(Walker::new(
        src,
        Target::Store(dst),
        Arc::new(on_entry),
        root.depth,
        opts,
    )?);
    let permit = walker.level_permit(root.depth).await?;
    visit(Arc::clone(&walker), root.node, root.depth, permit).await?;
    let stats = walker.stats();
    debug!(
        root = %root.node,
        visited = stats.visited,
        skipped = stats.skipped,
        "sync finished"
    );
    Ok(stats)
}

/// Adds every node reachable from `root` to `set`.
///
/// Subtrees whose root is already in `set` are not visited again, so populating many
/// roots that share structure into one set costs the union of their nodes.
pub async fn populate<S, F>(
    store: Arc<S>,
    root: &Root,
    set: Arc<RefSet>,
    opts: &SyncOptions,
    on_entry: F,
) -> Result<WalkStats>
where
    S: ContentStore + 'static,
    F: Fn(&Entry) -> Result<()> + Send + Sync + 'static,
{
    debug!(root = %root.node, depth = root.depth, "populate started");
    let walker = Arc::new(Walker::new(
        store,
        Target::Set(set),
        Arc::new(on_entry),
        root.depth,
        opts,
    )?);
    let permit = walker.level_permit(root.depth).await?;
    visit(Arc::clone(&walker), root.node, root.depth, permit).await?;
    let stats = walker.stats();
    debug!(
        root = %root.node,
        visited = stats.visited,
        skipped = stats.skipped,
        "populate finished"
    );
    Ok(stats)
}
