//! Bucket tree: the nested namespace every transaction works on.
//!
//! A bucket holds flat fields (`key -> bytes`) and child buckets. A key
//! names either a field or a child, never both. Children sit behind `Arc`
//! so a write transaction copies only the buckets it touches
//! (`Arc::make_mut`); untouched subtrees stay shared with every reader
//! snapshot.
//!
//! Two handle types sit on top of `Node`:
//! - [`Bucket`]: read-only view, `Copy`, borrows the transaction's snapshot
//! - [`BucketMut`]: write view, also records every mutation in the
//!   transaction's WAL batch

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::Config;
use crate::cursor::{Cursor, Entry};
use crate::error::{LabError, LabResult};
use crate::format::{Operation, WalRecord};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Node {
    pub(crate) fields: BTreeMap<Vec<u8>, Vec<u8>>,
    pub(crate) children: BTreeMap<Vec<u8>, Arc<Node>>,
}

impl Node {
    fn insert_field(&mut self, key: &[u8], value: &[u8]) -> LabResult<()> {
        if self.children.contains_key(key) {
            return Err(LabError::IncompatibleValue { key: key.to_vec() });
        }
        self.fields.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn remove_field(&mut self, key: &[u8]) -> LabResult<()> {
        if self.children.contains_key(key) {
            return Err(LabError::IncompatibleValue { key: key.to_vec() });
        }
        self.fields.remove(key);
        Ok(())
    }

    fn create_child(&mut self, key: &[u8]) -> LabResult<&mut Node> {
        if self.fields.contains_key(key) {
            return Err(LabError::IncompatibleValue { key: key.to_vec() });
        }
        if self.children.contains_key(key) {
            return Err(LabError::BucketExists { key: key.to_vec() });
        }
        let slot = self.children.entry(key.to_vec()).or_default();
        Ok(Arc::make_mut(slot))
    }

    fn remove_child(&mut self, key: &[u8]) -> LabResult<()> {
        if self.fields.contains_key(key) {
            return Err(LabError::IncompatibleValue { key: key.to_vec() });
        }
        match self.children.remove(key) {
            Some(_) => Ok(()),
            None => Err(LabError::BucketNotFound { key: key.to_vec() }),
        }
    }

    fn descend_mut(&mut self, path: &[Vec<u8>]) -> LabResult<&mut Node> {
        let mut node = self;
        for segment in path {
            let child = node
                .children
                .get_mut(segment.as_slice())
                .ok_or_else(|| LabError::BucketNotFound {
                    key: segment.clone(),
                })?;
            node = Arc::make_mut(child);
        }
        Ok(node)
    }

    /// Replay one logged record against this (root) node.
    pub(crate) fn apply(&mut self, record: &WalRecord) -> LabResult<()> {
        match record.operation {
            Operation::Put => {
                let node = self.descend_mut(&record.path)?;
                node.insert_field(&record.key, &record.value)
            }
            Operation::Delete => self.descend_mut(&record.path)?.remove_field(&record.key),
            Operation::CreateBucket => {
                let node = self.descend_mut(&record.path)?;
                node.create_child(&record.key).map(|_| ())
            }
            Operation::DeleteBucket => self.descend_mut(&record.path)?.remove_child(&record.key),
            Operation::Checkpoint => {
                *self = Node::default();
                Ok(())
            }
            Operation::Commit => Ok(()),
        }
    }
}

/// Size limits every write is checked against.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Limits {
    max_key_size: usize,
    max_value_size: usize,
}

impl Limits {
    pub(crate) fn from_config(config: &Config) -> Self {
        Self {
            max_key_size: config.max_key_size,
            max_value_size: config.max_value_size,
        }
    }

    fn check_key(&self, key: &[u8]) -> LabResult<()> {
        if key.is_empty() {
            return Err(LabError::EmptyKey);
        }
        if key.len() > self.max_key_size {
            return Err(LabError::OversizedEntry {
                entry_size: key.len() as u64,
                max_size: self.max_key_size as u64,
                component: "key".to_string(),
            });
        }
        Ok(())
    }

    fn check_value(&self, value: &[u8]) -> LabResult<()> {
        if value.len() > self.max_value_size {
            return Err(LabError::OversizedEntry {
                entry_size: value.len() as u64,
                max_size: self.max_value_size as u64,
                component: "value".to_string(),
            });
        }
        Ok(())
    }
}

/// Read-only bucket handle, valid for the lifetime of its transaction.
#[derive(Clone, Copy)]
pub struct Bucket<'tx> {
    node: &'tx Node,
}

impl<'tx> Bucket<'tx> {
    pub(crate) fn new(node: &'tx Node) -> Self {
        Self { node }
    }

    /// Value of field `key`. `None` for absent keys and for child buckets.
    pub fn get(&self, key: &[u8]) -> Option<&'tx [u8]> {
        let node: &'tx Node = self.node;
        node.fields.get(key).map(Vec::as_slice)
    }

    /// Child bucket `key`, if there is one.
    pub fn bucket(&self, key: &[u8]) -> Option<Bucket<'tx>> {
        let node: &'tx Node = self.node;
        node.children.get(key).map(|child| Bucket::new(child))
    }

    /// Ordered cursor over fields and child buckets.
    pub fn cursor(&self) -> Cursor<'tx> {
        Cursor::new(self.node)
    }

    /// Every entry in key order; child buckets come back with a `None` value.
    pub fn iter(&self) -> impl Iterator<Item = Entry<'tx>> {
        let mut cursor = self.cursor();
        let mut started = false;
        std::iter::from_fn(move || {
            if started {
                cursor.next()
            } else {
                started = true;
                cursor.first()
            }
        })
    }

    /// Call `f` for every entry in key order, stopping at the first error.
    /// The value is `None` when the key names a child bucket.
    pub fn for_each<E, F>(&self, mut f: F) -> Result<(), E>
    where
        F: FnMut(&'tx [u8], Option<&'tx [u8]>) -> Result<(), E>,
    {
        for (key, value) in self.iter() {
            f(key, value)?;
        }
        Ok(())
    }

    pub fn field_count(&self) -> usize {
        self.node.fields.len()
    }

    pub fn bucket_count(&self) -> usize {
        self.node.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node.fields.is_empty() && self.node.children.is_empty()
    }
}

impl std::fmt::Debug for Bucket<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("fields", &self.field_count())
            .field("buckets", &self.bucket_count())
            .finish()
    }
}

/// Writable bucket handle. Every mutation goes to the transaction's private
/// tree and to its WAL batch; nothing is visible to other transactions
/// before commit.
pub struct BucketMut<'tx> {
    node: &'tx mut Node,
    path: Vec<Vec<u8>>,
    log: &'tx mut Vec<WalRecord>,
    limits: Limits,
    /// The transaction root holds buckets only, never fields.
    root: bool,
}

impl<'tx> BucketMut<'tx> {
    pub(crate) fn root(node: &'tx mut Node, log: &'tx mut Vec<WalRecord>, limits: Limits) -> Self {
        Self {
            node,
            path: Vec::new(),
            log,
            limits,
            root: true,
        }
    }

    fn reborrow(&mut self) -> BucketMut<'_> {
        BucketMut {
            node: &mut *self.node,
            path: self.path.clone(),
            log: &mut *self.log,
            limits: self.limits,
            root: self.root,
        }
    }

    fn child_path(&self, key: &[u8]) -> Vec<Vec<u8>> {
        let mut path = Vec::with_capacity(self.path.len() + 1);
        path.extend(self.path.iter().cloned());
        path.push(key.to_vec());
        path
    }

    /// Read-only view of this bucket, including uncommitted changes.
    pub fn as_bucket(&self) -> Bucket<'_> {
        Bucket::new(self.node)
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.node.fields.get(key).map(Vec::as_slice)
    }

    /// Read-only view of child bucket `key`.
    pub fn bucket(&self, key: &[u8]) -> Option<Bucket<'_>> {
        self.node.children.get(key).map(|child| Bucket::new(child))
    }

    /// Writable handle on existing child bucket `key`.
    pub fn bucket_mut(&mut self, key: &[u8]) -> Option<BucketMut<'_>> {
        self.reborrow().into_bucket_mut(key)
    }

    /// Create child bucket `key`. Fails with `BucketExists` if it is already there.
    pub fn create_bucket(&mut self, key: &[u8]) -> LabResult<BucketMut<'_>> {
        self.reborrow().into_create_bucket(key)
    }

    /// Return child bucket `key`, creating it first if needed.
    pub fn create_bucket_if_not_exists(&mut self, key: &[u8]) -> LabResult<BucketMut<'_>> {
        self.reborrow().into_create_bucket_if_not_exists(key)
    }

    /// Drop child bucket `key` with everything under it (if present) and
    /// create it again, empty.
    pub fn recreate_bucket(&mut self, key: &[u8]) -> LabResult<BucketMut<'_>> {
        self.reborrow().into_recreate_bucket(key)
    }

    /// Remove child bucket `key` and everything under it.
    pub fn delete_bucket(&mut self, key: &[u8]) -> LabResult<()> {
        self.limits.check_key(key)?;
        self.node.remove_child(key)?;
        self.log.push(WalRecord::delete_bucket(self.path.clone(), key));
        Ok(())
    }

    /// Set field `key` to `value`.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> LabResult<()> {
        if self.root {
            return Err(LabError::RootValue);
        }
        self.limits.check_key(key)?;
        self.limits.check_value(value)?;
        self.node.insert_field(key, value)?;
        self.log.push(WalRecord::put(self.path.clone(), key, value));
        Ok(())
    }

    /// Remove field `key`. Removing an absent field is not an error.
    pub fn delete(&mut self, key: &[u8]) -> LabResult<()> {
        if self.root {
            return Err(LabError::RootValue);
        }
        self.limits.check_key(key)?;
        if !self.node.fields.contains_key(key) && !self.node.children.contains_key(key) {
            return Ok(());
        }
        self.node.remove_field(key)?;
        self.log.push(WalRecord::delete(self.path.clone(), key));
        Ok(())
    }

    pub(crate) fn into_bucket_mut(self, key: &[u8]) -> Option<BucketMut<'tx>> {
        let path = self.child_path(key);
        let child = self.node.children.get_mut(key)?;
        Some(BucketMut {
            node: Arc::make_mut(child),
            path,
            log: self.log,
            limits: self.limits,
            root: false,
        })
    }

    pub(crate) fn into_create_bucket(self, key: &[u8]) -> LabResult<BucketMut<'tx>> {
        self.limits.check_key(key)?;
        let path = self.child_path(key);
        let node = self.node.create_child(key)?;
        self.log.push(WalRecord::create_bucket(self.path, key));
        Ok(BucketMut {
            node,
            path,
            log: self.log,
            limits: self.limits,
            root: false,
        })
    }

    pub(crate) fn into_create_bucket_if_not_exists(self, key: &[u8]) -> LabResult<BucketMut<'tx>> {
        if self.node.children.contains_key(key) {
            // Checked above, so the lookup cannot miss.
            return self
                .into_bucket_mut(key)
                .ok_or_else(|| LabError::BucketNotFound { key: key.to_vec() });
        }
        self.into_create_bucket(key)
    }

    pub(crate) fn into_recreate_bucket(mut self, key: &[u8]) -> LabResult<BucketMut<'tx>> {
        if self.node.children.contains_key(key) {
            self.delete_bucket(key)?;
        }
        self.into_create_bucket(key)
    }
}

impl std::fmt::Debug for BucketMut<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketMut")
            .field("depth", &self.path.len())
            .field("fields", &self.node.fields.len())
            .field("buckets", &self.node.children.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> Limits {
        Limits::from_config(&Config::default())
    }

    #[test]
    fn test_nested_writes_are_logged_with_paths() {
        let mut root = Node::default();
        let mut log = Vec::new();
        {
            let mut top = BucketMut::root(&mut root, &mut log, limits());
            let mut a = top.create_bucket(b"a").unwrap();
            let mut b = a.create_bucket(b"b").unwrap();
            b.put(b"k", b"v").unwrap();
        }

        assert_eq!(log.len(), 3);
        assert_eq!(log[0], WalRecord::create_bucket(Vec::new(), b"a"));
        assert_eq!(log[1], WalRecord::create_bucket(vec![b"a".to_vec()], b"b"));
        assert_eq!(log[2], WalRecord::put(vec![b"a".to_vec(), b"b".to_vec()], b"k", b"v"));
    }

    #[test]
    fn test_replay_rebuilds_same_tree() {
        let mut root = Node::default();
        let mut log = Vec::new();
        {
            let mut top = BucketMut::root(&mut root, &mut log, limits());
            let mut a = top.create_bucket(b"a").unwrap();
            a.put(b"x", b"1").unwrap();
            a.recreate_bucket(b"inner").unwrap().put(b"y", b"2").unwrap();
            a.recreate_bucket(b"inner").unwrap().put(b"z", b"3").unwrap();
            a.delete(b"x").unwrap();
        }

        let mut replayed = Node::default();
        for record in &log {
            replayed.apply(record).unwrap();
        }
        assert_eq!(replayed, root);

        let a = Bucket::new(&root).bucket(b"a").unwrap();
        let inner = a.bucket(b"inner").unwrap();
        assert_eq!(inner.get(b"y"), None);
        assert_eq!(inner.get(b"z"), Some(&b"3"[..]));
        assert_eq!(a.get(b"x"), None);
    }

    #[test]
    fn test_create_existing_bucket_fails() {
        let mut root = Node::default();
        let mut log = Vec::new();
        let mut top = BucketMut::root(&mut root, &mut log, limits());
        top.create_bucket(b"a").unwrap();
        assert!(matches!(top.create_bucket(b"a"), Err(LabError::BucketExists { .. })));
        assert!(top.create_bucket_if_not_exists(b"a").is_ok());
    }

    #[test]
    fn test_field_and_bucket_keys_do_not_mix() {
        let mut root = Node::default();
        let mut log = Vec::new();
        let mut top = BucketMut::root(&mut root, &mut log, limits());
        let mut a = top.create_bucket(b"a").unwrap();
        a.put(b"f", b"1").unwrap();
        a.create_bucket(b"c").unwrap();

        assert!(matches!(a.create_bucket(b"f"), Err(LabError::IncompatibleValue { .. })));
        assert!(matches!(a.put(b"c", b"2"), Err(LabError::IncompatibleValue { .. })));
        assert!(matches!(a.delete_bucket(b"f"), Err(LabError::IncompatibleValue { .. })));
    }

    #[test]
    fn test_delete_missing_bucket_fails() {
        let mut root = Node::default();
        let mut log = Vec::new();
        let mut top = BucketMut::root(&mut root, &mut log, limits());
        assert!(matches!(top.delete_bucket(b"nope"), Err(LabError::BucketNotFound { .. })));
        assert!(log.is_empty());
    }

    #[test]
    fn test_root_rejects_fields() {
        let mut root = Node::default();
        let mut log = Vec::new();
        let mut top = BucketMut::root(&mut root, &mut log, limits());
        assert!(matches!(top.put(b"k", b"v"), Err(LabError::RootValue)));
    }

    #[test]
    fn test_key_limits() {
        let mut root = Node::default();
        let mut log = Vec::new();
        let mut top = BucketMut::root(&mut root, &mut log, limits());
        assert!(matches!(top.create_bucket(b""), Err(LabError::EmptyKey)));
        let long = vec![b'k'; Config::default().max_key_size + 1];
        assert!(matches!(top.create_bucket(&long), Err(LabError::OversizedEntry { .. })));
    }

    #[test]
    fn test_copy_on_write_leaves_snapshot_untouched() {
        let mut root = Node::default();
        let mut log = Vec::new();
        BucketMut::root(&mut root, &mut log, limits())
            .create_bucket(b"a")
            .unwrap()
            .put(b"k", b"old")
            .unwrap();
        let snapshot = Arc::new(root);

        let mut private = (*snapshot).clone();
        let mut log = Vec::new();
        BucketMut::root(&mut private, &mut log, limits())
            .bucket_mut(b"a")
            .unwrap()
            .put(b"k", b"new")
            .unwrap();

        assert_eq!(Bucket::new(&snapshot).bucket(b"a").unwrap().get(b"k"), Some(&b"old"[..]));
        assert_eq!(Bucket::new(&private).bucket(b"a").unwrap().get(b"k"), Some(&b"new"[..]));
    }

    #[test]
    fn test_for_each_marks_buckets_with_none() {
        let mut root = Node::default();
        let mut log = Vec::new();
        {
            let mut top = BucketMut::root(&mut root, &mut log, limits());
            let mut a = top.create_bucket(b"a").unwrap();
            a.put(b"b", b"field").unwrap();
            a.create_bucket(b"c").unwrap();
            a.put(b"d", b"").unwrap();
        }

        let mut seen = Vec::new();
        Bucket::new(&root)
            .bucket(b"a")
            .unwrap()
            .for_each(|k, v| {
                seen.push((k.to_vec(), v.map(<[u8]>::to_vec)));
                Ok::<_, LabError>(())
            })
            .unwrap();

        assert_eq!(
            seen,
            vec![
                (b"b".to_vec(), Some(b"field".to_vec())),
                (b"c".to_vec(), None),
                (b"d".to_vec(), Some(Vec::new())),
            ]
        );
    }
}
