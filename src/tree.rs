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

use crate::builder::Builder;
use crate::cancel::CancelToken;
use crate::config::TreeConfig;
use crate::copy::copy;
use crate::diff::{diff, DiffResult};
use crate::digest::Ref;
use crate::encoding::decode_node;
use crate::errors::{Error, Result};
use crate::iterator::TreeIterator;
use crate::node::{Entry, Root, Span};
use crate::storage::ContentStore;

/// Replaces everything inside `span` with `entries`.
///
/// `entries` must be sorted and every key must lie inside `span`. An empty list deletes the
/// span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub span: Span,
    pub entries: Vec<Entry>,
}

impl Mutation {
    /// Sets a single key.
    pub fn put(key: &[u8], value: &[u8]) -> Self {
        Mutation {
            span: Span::single(key),
            entries: vec![Entry::new(key, value)],
        }
    }

    pub fn delete(key: &[u8]) -> Self {
        Mutation {
            span: Span::single(key),
            entries: Vec::new(),
        }
    }

    pub fn delete_span(span: Span) -> Self {
        Mutation {
            span,
            entries: Vec::new(),
        }
    }
}

/// Shape of a tree, gathered by walking every node.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeStats {
    pub depth: u8,
    pub num_nodes: usize,
    pub num_leaves: usize,
    pub num_internal_nodes: usize,
    pub total_entries: usize,
    pub total_bytes: usize,
    pub avg_node_size: f64,
}

impl TreeStats {
    pub fn new() -> Self {
        TreeStats {
            depth: 0,
            num_nodes: 0,
            num_leaves: 0,
            num_internal_nodes: 0,
            total_entries: 0,
            total_bytes: 0,
            avg_node_size: 0.0,
        }
    }
}

impl Default for TreeStats {
    fn default() -> Self {
        TreeStats::new()
    }
}

/// Reads and edits trees held in one store with one config.
///
/// Trees are persistent: every edit returns a new [`Root`] and leaves the old one valid.
/// Nodes outside the edited ranges are shared between the two versions.
pub struct Operator<S: ContentStore> {
    store: S,
    config: TreeConfig,
    cancel: CancelToken,
}

impl<S: ContentStore> Operator<S> {
    /// Creates an operator.
    ///
    /// # Arguments
    ///
    /// * `store` - The store holding the trees.
    /// * `config` - Boundary parameters; must be the same for every edit of a given tree.
    pub fn new(store: S, config: TreeConfig) -> Result<Self> {
        config.validate(store.max_size())?;
        Ok(Operator {
            store,
            config,
            cancel: CancelToken::default(),
        })
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    pub fn builder(&self) -> Result<Builder<'_, S>> {
        Ok(Builder::new(&self.store, self.config.clone())?.with_cancel(self.cancel.clone()))
    }

    /// The tree with no entries.
    pub fn new_empty(&self) -> Result<Root> {
        self.builder()?.finish()
    }

    /// Builds a tree from entries in strictly increasing key order.
    ///
    /// # Panics
    ///
    /// If the keys are not strictly increasing.
    pub fn build<I, K, V>(&self, entries: I) -> Result<Root>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let mut builder = self.builder()?;
        for (key, value) in entries {
            builder.put(key.as_ref(), value.as_ref())?;
        }
        builder.finish()
    }

    pub fn iterate(&self, root: &Root, span: Span) -> TreeIterator<'_, S> {
        TreeIterator::new(&self.store, root, span).with_cancel(self.cancel.clone())
    }

    pub fn get(&self, root: &Root, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut it = self.iterate(root, Span::single(key));
        Ok(it.next()?.map(|entry| entry.value))
    }

    pub fn put(&self, root: &Root, key: &[u8], value: &[u8]) -> Result<Root> {
        self.mutate(root, vec![Mutation::put(key, value)])
    }

    pub fn delete(&self, root: &Root, key: &[u8]) -> Result<Root> {
        self.mutate(root, vec![Mutation::delete(key)])
    }

    pub fn delete_span(&self, root: &Root, span: Span) -> Result<Root> {
        self.mutate(root, vec![Mutation::delete_span(span)])
    }

    /// Applies a batch of mutations in one pass over the tree.
    ///
    /// Mutations must be sorted by span and must not overlap, and no span may end before
    /// it begins. Ranges between them are copied
    /// from `root`, reusing whole nodes wherever the new tree lines up with the old one.
    pub fn mutate(&self, root: &Root, mutations: Vec<Mutation>) -> Result<Root> {
        let mut builder = self.builder()?;
        let mut cursor = Some(Vec::new());

        for mutation in mutations {
            if mutation
                .span
                .end
                .as_ref()
                .is_some_and(|end| *end < mutation.span.begin)
            {
                return Err(Error::InvalidMutation(format!(
                    "span ending at {:?} ends before its start {:?}",
                    mutation.span.end, mutation.span.begin
                )));
            }
            let begin = match cursor.take() {
                Some(begin) if begin <= mutation.span.begin => begin,
                _ => {
                    return Err(Error::InvalidMutation(format!(
                        "span starting at {:?} overlaps an earlier mutation",
                        mutation.span.begin
                    )))
                }
            };
            let mut it = self.iterate(root, Span::new(begin, mutation.span.begin.clone()));
            copy(&mut builder, &mut it)?;

            let mut prev: Option<&[u8]> = None;
            for entry in &mutation.entries {
                if !mutation.span.contains(&entry.key) {
                    return Err(Error::InvalidMutation(format!(
                        "key {:?} lies outside its mutation span",
                        entry.key
                    )));
                }
                if prev.is_some_and(|p| p >= entry.key.as_slice()) {
                    return Err(Error::InvalidMutation(format!(
                        "key {:?} is out of order",
                        entry.key
                    )));
                }
                prev = Some(entry.key.as_slice());
                builder.put(&entry.key, &entry.value)?;
            }
            cursor = mutation.span.end;
        }

        if let Some(begin) = cursor {
            let mut it = self.iterate(root, Span::starting_at(begin));
            copy(&mut builder, &mut it)?;
        }
        builder.finish()
    }

    /// The first entry inside `span`.
    pub fn min_entry(&self, root: &Root, span: Span) -> Result<Option<Entry>> {
        self.iterate(root, span).next()
    }

    /// The last entry of the tree, found by descending the rightmost path.
    pub fn max_entry(&self, root: &Root) -> Result<Option<Entry>> {
        let mut node = root.node;
        let mut depth = root.depth;
        loop {
            self.cancel.check()?;
            let mut entries = decode_node(&self.store.get(&node)?)?;
            let Some(last) = entries.pop() else {
                return Ok(None);
            };
            if depth == 0 {
                return Ok(Some(last));
            }
            node = Ref::from_slice(&last.value)?;
            depth -= 1;
        }
    }

    pub fn count(&self, root: &Root, span: Span) -> Result<usize> {
        let mut it = self.iterate(root, span);
        let mut count = 0;
        while it.next()?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    pub fn diff(&self, left: &Root, right: &Root, span: Span) -> Result<Vec<DiffResult>> {
        diff(&self.store, left, right, span)
    }

    /// Walks every node of the tree and returns its shape.
    pub fn stats(&self, root: &Root) -> Result<TreeStats> {
        let mut stats = TreeStats {
            depth: root.depth,
            ..TreeStats::default()
        };
        let mut stack = vec![(root.node, root.depth)];
        while let Some((node, depth)) = stack.pop() {
            self.cancel.check()?;
            let data = self.store.get(&node)?;
            let entries = decode_node(&data)?;
            stats.num_nodes += 1;
            stats.total_bytes += data.len();
            if depth == 0 {
                stats.num_leaves += 1;
                stats.total_entries += entries.len();
                continue;
            }
            stats.num_internal_nodes += 1;
            for entry in entries.iter().rev() {
                stack.push((Ref::from_slice(&entry.value)?, depth - 1));
            }
        }
        if stats.num_nodes > 0 {
            stats.avg_node_size = stats.total_bytes as f64 / stats.num_nodes as f64;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;
    use std::sync::Arc;

    fn key(i: usize) -> Vec<u8> {
        format!("key-{:05}", i).into_bytes()
    }

    fn value(i: usize) -> Vec<u8> {
        format!("value-{}", i).into_bytes()
    }

    fn operator() -> Operator<Arc<InMemoryStore>> {
        Operator::new(Arc::new(InMemoryStore::default()), TreeConfig::new(128, 4096)).unwrap()
    }

    fn build(op: &Operator<Arc<InMemoryStore>>, n: usize) -> Root {
        op.build((0..n).map(|i| (key(i), value(i)))).unwrap()
    }

    #[test]
    fn test_put_and_get() {
        let op = operator();
        let mut root = op.new_empty().unwrap();
        for i in (0..200).rev() {
            root = op.put(&root, &key(i), &value(i)).unwrap();
        }
        for i in 0..200 {
            assert_eq!(op.get(&root, &key(i)).unwrap(), Some(value(i)));
        }
        assert_eq!(op.get(&root, b"missing").unwrap(), None);
        assert_eq!(root, build(&op, 200));
    }

    #[test]
    fn test_put_overwrites() {
        let op = operator();
        let root = build(&op, 100);
        let updated = op.put(&root, &key(50), b"new").unwrap();
        assert_eq!(op.get(&updated, &key(50)).unwrap(), Some(b"new".to_vec()));
        assert_eq!(op.get(&root, &key(50)).unwrap(), Some(value(50)));
        assert_eq!(op.count(&updated, Span::total()).unwrap(), 100);
    }

    #[test]
    fn test_delete() {
        let op = operator();
        let root = build(&op, 100);
        let deleted = op.delete(&root, &key(10)).unwrap();
        assert_eq!(op.get(&deleted, &key(10)).unwrap(), None);
        assert_eq!(op.count(&deleted, Span::total()).unwrap(), 99);

        // deleting a missing key changes nothing
        let same = op.delete(&root, b"absent").unwrap();
        assert_eq!(same, root);
    }

    #[test]
    fn test_delete_span() {
        let op = operator();
        let root = build(&op, 1000);
        let trimmed = op.delete_span(&root, Span::new(key(100), key(900))).unwrap();
        assert_eq!(op.count(&trimmed, Span::total()).unwrap(), 200);
        let expected = op
            .build((0..100).chain(900..1000).map(|i| (key(i), value(i))))
            .unwrap();
        assert_eq!(trimmed, expected);

        let everything = op.delete_span(&root, Span::total()).unwrap();
        assert_eq!(everything, op.new_empty().unwrap());
    }

    #[test]
    fn test_mutate_batch() {
        let op = operator();
        let root = build(&op, 1000);
        let mutations = vec![
            Mutation::delete(&key(5)),
            Mutation {
                span: Span::new(key(200), key(300)),
                entries: vec![Entry::new(key(250), b"only".to_vec())],
            },
            Mutation::put(&key(999), b"last"),
            Mutation::put(b"zzz", b"appended"),
        ];
        let mutated = op.mutate(&root, mutations).unwrap();

        let mut expected: Vec<(Vec<u8>, Vec<u8>)> = (0..1000)
            .filter(|i| *i != 5 && !(200..300).contains(i))
            .map(|i| (key(i), value(i)))
            .collect();
        expected.insert(199, (key(250), b"only".to_vec()));
        let last = expected.len() - 1;
        expected[last].1 = b"last".to_vec();
        expected.push((b"zzz".to_vec(), b"appended".to_vec()));
        assert_eq!(mutated, op.build(expected).unwrap());
    }

    #[test]
    fn test_mutate_rejects_bad_input() {
        let op = operator();
        let root = build(&op, 10);
        let overlapping = vec![
            Mutation::delete_span(Span::new(key(2), key(6))),
            Mutation::delete(&key(4)),
        ];
        assert!(matches!(
            op.mutate(&root, overlapping),
            Err(Error::InvalidMutation(_))
        ));

        let outside = vec![Mutation {
            span: Span::new(key(2), key(4)),
            entries: vec![Entry::new(key(5), b"".to_vec())],
        }];
        assert!(matches!(
            op.mutate(&root, outside),
            Err(Error::InvalidMutation(_))
        ));
    }

    #[test]
    fn test_mutate_reversed_span_is_rejected() {
        let op = operator();
        let root = build(&op, 10);
        assert!(matches!(
            op.delete_span(&root, Span::new(key(5), key(2))),
            Err(Error::InvalidMutation(_))
        ));

        let reversed = vec![
            Mutation::delete(&key(1)),
            Mutation {
                span: Span::new(key(7), key(3)),
                entries: vec![],
            },
        ];
        assert!(matches!(
            op.mutate(&root, reversed),
            Err(Error::InvalidMutation(_))
        ));
    }

    #[test]
    fn test_mutate_empty_span() {
        let op = operator();
        let root = build(&op, 100);
        assert_eq!(op.delete_span(&root, Span::new(key(40), key(40))).unwrap(), root);

        let batch = vec![
            Mutation::delete_span(Span::new(key(10), key(10))),
            Mutation::delete(&key(10)),
            Mutation::delete_span(Span::new(key(60), key(60))),
        ];
        let expected = op
            .build((0..100).filter(|i| *i != 10).map(|i| (key(i), value(i))))
            .unwrap();
        assert_eq!(op.mutate(&root, batch).unwrap(), expected);

        // an empty span has no room for entries
        let crowded = vec![Mutation {
            span: Span::new(key(40), key(40)),
            entries: vec![Entry::new(key(40), b"x".to_vec())],
        }];
        assert!(matches!(
            op.mutate(&root, crowded),
            Err(Error::InvalidMutation(_))
        ));
    }

    #[test]
    fn test_edits_match_fresh_build_when_nodes_close_at_max_size() {
        // with mean_size == max_size most nodes are closed by the size limit
        let op = Operator::new(
            Arc::new(InMemoryStore::default()),
            TreeConfig::new(256, 256),
        )
        .unwrap();
        let n = 400;
        let root = build(&op, n);
        assert!(root.depth > 0);

        for i in 0..n {
            let put = op.put(&root, &key(i), b"v").unwrap();
            let expected = op
                .build((0..n).map(|j| (key(j), if j == i { b"v".to_vec() } else { value(j) })))
                .unwrap();
            assert_eq!(put, expected, "put {}", i);

            let deleted = op.delete(&root, &key(i)).unwrap();
            let expected = op
                .build((0..n).filter(|j| *j != i).map(|j| (key(j), value(j))))
                .unwrap();
            assert_eq!(deleted, expected, "delete {}", i);

            let mut inserted_key = key(i);
            inserted_key.push(b'+');
            let inserted = op.put(&root, &inserted_key, b"new").unwrap();
            let mut entries: Vec<(Vec<u8>, Vec<u8>)> =
                (0..n).map(|j| (key(j), value(j))).collect();
            entries.insert(i + 1, (inserted_key, b"new".to_vec()));
            assert_eq!(inserted, op.build(entries).unwrap(), "insert after {}", i);
        }
    }

    #[test]
    fn test_min_max() {
        let op = operator();
        let empty = op.new_empty().unwrap();
        assert_eq!(op.min_entry(&empty, Span::total()).unwrap(), None);
        assert_eq!(op.max_entry(&empty).unwrap(), None);

        let root = build(&op, 1000);
        assert_eq!(op.min_entry(&root, Span::total()).unwrap().unwrap().key, key(0));
        assert_eq!(
            op.min_entry(&root, Span::starting_at(key(500))).unwrap().unwrap().key,
            key(500)
        );
        assert_eq!(op.max_entry(&root).unwrap().unwrap().key, key(999));
    }

    #[test]
    fn test_stats() {
        let op = operator();
        let root = build(&op, 2000);
        let stats = op.stats(&root).unwrap();
        assert_eq!(stats.depth, root.depth);
        assert_eq!(stats.total_entries, 2000);
        assert_eq!(stats.num_nodes, stats.num_leaves + stats.num_internal_nodes);
        // the store may also hold single-index nodes posted before the top was known
        assert!(stats.num_nodes <= op.store().len());
        assert!(stats.avg_node_size > 0.0);
        assert!(stats.avg_node_size <= 4096.0);

        let empty = op.stats(&op.new_empty().unwrap()).unwrap();
        assert_eq!(empty.num_leaves, 1);
        assert_eq!(empty.total_entries, 0);
    }

    #[test]
    fn test_diff_after_edit() {
        let op = operator();
        let root = build(&op, 500);
        let edited = op.put(&root, &key(100), b"edited").unwrap();
        assert_eq!(
            op.diff(&root, &edited, Span::total()).unwrap(),
            vec![DiffResult::Modified(key(100), value(100), b"edited".to_vec())]
        );
    }
}
