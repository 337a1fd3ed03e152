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

use crate::errors::Result;
use crate::iterator::TreeIterator;
use crate::node::{Root, Span};
use crate::storage::ContentStore;
use std::cmp::Ordering;

/// One difference between a left and a right tree.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum DiffResult {
    /// The key only exists on the right: `(key, right_value)`.
    Added(Vec<u8>, Vec<u8>),
    /// The key only exists on the left: `(key, left_value)`.
    Removed(Vec<u8>, Vec<u8>),
    /// The key exists on both sides with different values: `(key, left_value, right_value)`.
    Modified(Vec<u8>, Vec<u8>, Vec<u8>),
}

impl DiffResult {
    pub fn key(&self) -> &[u8] {
        match self {
            DiffResult::Added(key, _) | DiffResult::Removed(key, _) => key,
            DiffResult::Modified(key, _, _) => key,
        }
    }
}

/// Merge-joins two trees and yields the keys whose values differ.
///
/// Subtrees referenced by the same index entry on both sides are skipped without being
/// fetched, so the cost of a diff follows the size of the change rather than the size of
/// the trees.
pub struct Differ<'a, L: ContentStore + ?Sized, R: ContentStore + ?Sized> {
    left: TreeIterator<'a, L>,
    right: TreeIterator<'a, R>,
}

impl<'a, L: ContentStore + ?Sized, R: ContentStore + ?Sized> Differ<'a, L, R> {
    pub fn new(left: TreeIterator<'a, L>, right: TreeIterator<'a, R>) -> Self {
        Differ { left, right }
    }

    /// Returns the next difference in key order, or `Ok(None)` when the span is exhausted.
    pub fn next(&mut self) -> Result<Option<DiffResult>> {
        loop {
            self.skip_shared()?;
            let left = self.left.peek()?;
            let right = self.right.peek()?;
            let (left, right) = match (left, right) {
                (None, None) => return Ok(None),
                (Some(l), None) => {
                    self.left.next()?;
                    return Ok(Some(DiffResult::Removed(l.key, l.value)));
                }
                (None, Some(r)) => {
                    self.right.next()?;
                    return Ok(Some(DiffResult::Added(r.key, r.value)));
                }
                (Some(l), Some(r)) => (l, r),
            };
            match left.key.cmp(&right.key) {
                Ordering::Less => {
                    self.left.next()?;
                    return Ok(Some(DiffResult::Removed(left.key, left.value)));
                }
                Ordering::Greater => {
                    self.right.next()?;
                    return Ok(Some(DiffResult::Added(right.key, right.value)));
                }
                Ordering::Equal => {
                    self.left.next()?;
                    self.right.next()?;
                    if left.value != right.value {
                        return Ok(Some(DiffResult::Modified(
                            left.key,
                            left.value,
                            right.value,
                        )));
                    }
                }
            }
        }
    }

    /// Advances both sides past every subtree they share at the current position.
    fn skip_shared(&mut self) -> Result<()> {
        self.left.ensure_positioned()?;
        self.right.ensure_positioned()?;
        'outer: loop {
            let max_level = self
                .left
                .sync_level()
                .min(self.right.sync_level())
                .min(self.left.top_level())
                .min(self.right.top_level());
            for level in (1..=max_level).rev() {
                let (Some(l), Some(r)) = (self.left.peek_at(level)?, self.right.peek_at(level)?)
                else {
                    continue;
                };
                if l == r {
                    self.left.next_at(level)?;
                    self.right.next_at(level)?;
                    continue 'outer;
                }
            }
            return Ok(());
        }
    }
}

/// Collects every difference between `left` and `right` inside `span`.
pub fn diff<S: ContentStore + ?Sized>(
    store: &S,
    left: &Root,
    right: &Root,
    span: Span,
) -> Result<Vec<DiffResult>> {
    let mut differ = Differ::new(
        TreeIterator::new(store, left, span.clone()),
        TreeIterator::new(store, right, span),
    );
    let mut results = Vec::new();
    while let Some(result) = differ.next()? {
        results.push(result);
    }
    Ok(results)
}
