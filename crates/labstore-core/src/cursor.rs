//! Ordered cursor over one bucket.
//!
//! Fields and child buckets live in two sorted maps with disjoint keys; the
//! cursor walks them as one sequence in byte order. A child bucket is
//! reported with a `None` value, a field with `Some(bytes)` (possibly empty).
//!
//! The cursor borrows the transaction's tree, so positioning is O(log n)
//! per step and nothing is copied.

use std::ops::Bound;

use crate::bucket::Node;

/// `(key, value)`; value is `None` for a child bucket.
pub type Entry<'tx> = (&'tx [u8], Option<&'tx [u8]>);

pub struct Cursor<'tx> {
    node: &'tx Node,
    /// Key of the entry the cursor sits on
    position: Option<&'tx [u8]>,
}

impl<'tx> Cursor<'tx> {
    pub(crate) fn new(node: &'tx Node) -> Self {
        Self {
            node,
            position: None,
        }
    }

    /// Smallest entry whose key is above `lower`.
    fn lowest(&self, lower: Bound<&[u8]>) -> Option<Entry<'tx>> {
        let node: &'tx Node = self.node;
        let field = node
            .fields
            .range::<[u8], _>((lower, Bound::Unbounded))
            .next()
            .map(|(k, v)| (k.as_slice(), Some(v.as_slice())));
        let child = node
            .children
            .range::<[u8], _>((lower, Bound::Unbounded))
            .next()
            .map(|(k, _)| (k.as_slice(), None));
        match (field, child) {
            (Some(f), Some(c)) => Some(if f.0 < c.0 { f } else { c }),
            (f, c) => f.or(c),
        }
    }

    /// Largest entry whose key is below `upper`.
    fn highest(&self, upper: Bound<&[u8]>) -> Option<Entry<'tx>> {
        let node: &'tx Node = self.node;
        let field = node
            .fields
            .range::<[u8], _>((Bound::Unbounded, upper))
            .next_back()
            .map(|(k, v)| (k.as_slice(), Some(v.as_slice())));
        let child = node
            .children
            .range::<[u8], _>((Bound::Unbounded, upper))
            .next_back()
            .map(|(k, _)| (k.as_slice(), None));
        match (field, child) {
            (Some(f), Some(c)) => Some(if f.0 > c.0 { f } else { c }),
            (f, c) => f.or(c),
        }
    }

    fn settle(&mut self, entry: Option<Entry<'tx>>) -> Option<Entry<'tx>> {
        if let Some((key, _)) = entry {
            self.position = Some(key);
        }
        entry
    }

    pub fn first(&mut self) -> Option<Entry<'tx>> {
        let entry = self.lowest(Bound::Unbounded);
        self.position = None;
        self.settle(entry)
    }

    pub fn last(&mut self) -> Option<Entry<'tx>> {
        let entry = self.highest(Bound::Unbounded);
        self.position = None;
        self.settle(entry)
    }

    /// Step forward. From an unpositioned cursor this is `first`. At the
    /// end the cursor stays on the last entry and returns `None`.
    pub fn next(&mut self) -> Option<Entry<'tx>> {
        let entry = match self.position {
            Some(pos) => self.lowest(Bound::Excluded(pos)),
            None => return self.first(),
        };
        self.settle(entry)
    }

    /// Step backward. From an unpositioned cursor this is `last`.
    pub fn prev(&mut self) -> Option<Entry<'tx>> {
        let entry = match self.position {
            Some(pos) => self.highest(Bound::Excluded(pos)),
            None => return self.last(),
        };
        self.settle(entry)
    }

    /// Position on the first entry with key >= `key`.
    pub fn seek(&mut self, key: &[u8]) -> Option<Entry<'tx>> {
        let entry = self.lowest(Bound::Included(key));
        self.settle(entry)
    }

    /// Entry under the cursor.
    pub fn current(&self) -> Option<Entry<'tx>> {
        let pos = self.position?;
        self.lowest(Bound::Included(pos)).filter(|(key, _)| *key == pos)
    }
}

impl std::fmt::Debug for Cursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("fields", &self.node.fields.len())
            .field("buckets", &self.node.children.len())
            .field("position", &self.position)
            .finish()
    }
}
