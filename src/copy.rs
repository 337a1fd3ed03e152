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
use crate::errors::Result;
use crate::iterator::TreeIterator;
use crate::storage::ContentStore;

/// Appends every remaining entry of `it` to `builder`.
///
/// Whenever the builder and the iterator are both aligned on a node boundary at some level,
/// the whole subtree is copied by appending its index entry instead of its leaves. The
/// iterator must read from the store the builder writes to, or from one holding the same
/// nodes, since copied subtrees are referenced rather than re-posted.
///
/// Returns the number of subtrees copied by reference.
pub fn copy<D, S>(builder: &mut Builder<'_, D>, it: &mut TreeIterator<'_, S>) -> Result<usize>
where
    D: ContentStore + ?Sized,
    S: ContentStore + ?Sized,
{
    it.ensure_positioned()?;
    let mut reused = 0;
    'outer: loop {
        let max_level = builder
            .sync_level()
            .min(it.sync_level())
            .min(it.top_level());
        for level in (1..=max_level).rev() {
            if let Some(entry) = it.whole_node_at(level)? {
                builder.put_at(level, &entry.key, &entry.value)?;
                reused += 1;
                continue 'outer;
            }
        }
        match it.next()? {
            Some(entry) => builder.put(&entry.key, &entry.value)?,
            None => return Ok(reused),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TreeConfig;
    use crate::digest::Ref;
    use crate::node::{Root, Span};
    use crate::storage::InMemoryStore;

    fn key(i: usize) -> Vec<u8> {
        format!("key-{:06}", i).into_bytes()
    }

    fn config() -> TreeConfig {
        TreeConfig::new(128, 4096)
    }

    fn build(store: &InMemoryStore, range: std::ops::Range<usize>) -> Root {
        let mut builder = Builder::new(store, config()).unwrap();
        for i in range {
            builder.put(&key(i), format!("value-{}", i).as_bytes()).unwrap();
        }
        builder.finish().unwrap()
    }

    #[test]
    fn test_copy_whole_tree_is_free() {
        let store = InMemoryStore::default();
        let root = build(&store, 0..3000);
        store.reset_stats();

        let mut builder = Builder::new(&store, config()).unwrap();
        let mut it = TreeIterator::new(&store, &root, Span::total());
        let reused = copy(&mut builder, &mut it).unwrap();
        let copied = builder.finish().unwrap();

        assert_eq!(copied, root);
        assert_eq!(reused, 1);
        // finish reads the reused root node back once to check it is not a single index
        assert!(store.stats().gets <= 1);
        assert_eq!(store.stats().posts, 0);
    }

    #[test]
    fn test_copy_range_matches_fresh_build() {
        let store = InMemoryStore::default();
        let root = build(&store, 0..3000);

        for (begin, end) in [(0, 1700), (900, 3000), (1000, 2000), (5, 6)] {
            let mut builder = Builder::new(&store, config()).unwrap();
            let mut it = TreeIterator::new(&store, &root, Span::new(key(begin), key(end)));
            copy(&mut builder, &mut it).unwrap();
            let copied = builder.finish().unwrap();

            let expected = build(&store, begin..end);
            assert_eq!(copied, expected, "range {}..{}", begin, end);
        }
    }

    #[test]
    fn test_copy_prefix_reuses_nodes() {
        let store = InMemoryStore::default();
        let root = build(&store, 0..3000);
        store.reset_stats();

        let mut builder = Builder::new(&store, config()).unwrap();
        let mut it = TreeIterator::new(&store, &root, Span::until(key(2900)));
        let reused = copy(&mut builder, &mut it).unwrap();
        builder.finish().unwrap();
        assert!(reused > 0);
        // far fewer fetches than leaves
        assert!(store.stats().gets < 60, "gets {}", store.stats().gets);
    }

    #[test]
    fn test_copy_after_put() {
        let store = InMemoryStore::default();
        let root = build(&store, 100..200);

        let mut builder = Builder::new(&store, config()).unwrap();
        for i in 0..100 {
            builder.put(&key(i), format!("value-{}", i).as_bytes()).unwrap();
        }
        let mut it = TreeIterator::new(&store, &root, Span::total());
        copy(&mut builder, &mut it).unwrap();
        let merged = builder.finish().unwrap();
        assert_eq!(merged, build(&store, 0..200));
        assert_ne!(merged.node, Ref::of(b""));
    }
}
