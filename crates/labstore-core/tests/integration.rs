//! Integration tests: LabStore through its public API.
//!
//! These tests open real stores in temp directories and drive them through
//! `update`/`view`, reopen, checkpoint and concurrent access.

use std::sync::Arc;
use std::thread;

use tempfile::TempDir;

use labstore_core::{Config, Context, LabError, LabResult, LabStore};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn test_store() -> (LabStore, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = LabStore::open(dir.path(), Config::relaxed()).unwrap();
    (store, dir)
}

fn ctx() -> Context {
    Context::background()
}

/// Every key under root bucket `name`, in cursor order.
fn keys(store: &LabStore, name: &[u8]) -> Vec<Vec<u8>> {
    store
        .view(&ctx(), |tx| {
            let bucket = match tx.bucket(name) {
                Some(b) => b,
                None => return Ok::<_, LabError>(Vec::new()),
            };
            Ok(bucket.iter().map(|(k, _)| k.to_vec()).collect())
        })
        .unwrap()
}

// ---------------------------------------------------------------------------
// Nested buckets
// ---------------------------------------------------------------------------

#[test]
fn test_nested_bucket_layout() {
    let (store, _dir) = test_store();

    store
        .update(&ctx(), |tx| {
            let mut root = tx.create_bucket(b"v1")?;
            let mut items = root.create_bucket(b"items")?;
            for name in ["gamma", "alpha", "beta"] {
                let mut item = items.create_bucket(name.as_bytes())?;
                item.put(b"id", name.as_bytes())?;
                item.create_bucket(b"labels")?.put(b"fast", b"")?;
            }
            Ok::<_, LabError>(())
        })
        .unwrap();

    store
        .view(&ctx(), |tx| {
            let items = tx.bucket(b"v1").unwrap().bucket(b"items").unwrap();
            let names: Vec<_> = items.iter().map(|(k, v)| (k.to_vec(), v.is_none())).collect();
            assert_eq!(
                names,
                vec![(b"alpha".to_vec(), true), (b"beta".to_vec(), true), (b"gamma".to_vec(), true)]
            );
            let beta = items.bucket(b"beta").unwrap();
            assert_eq!(beta.get(b"id"), Some(&b"beta"[..]));
            assert_eq!(beta.bucket(b"labels").unwrap().get(b"fast"), Some(&b""[..]));
            Ok::<_, LabError>(())
        })
        .unwrap();
}

#[test]
fn test_cursor_seek_over_root() {
    let (store, _dir) = test_store();
    store
        .update(&ctx(), |tx| {
            for name in [&b"a"[..], b"c", b"e"] {
                tx.create_bucket(name)?;
            }
            Ok::<_, LabError>(())
        })
        .unwrap();

    let tx = store.begin_read();
    let mut cursor = tx.cursor();
    assert_eq!(cursor.seek(b"b").map(|(k, _)| k), Some(&b"c"[..]));
    assert_eq!(cursor.next().map(|(k, _)| k), Some(&b"e"[..]));
    assert_eq!(cursor.next(), None);
    assert_eq!(cursor.prev().map(|(k, _)| k), Some(&b"c"[..]));
}

// ---------------------------------------------------------------------------
// Atomicity and durability
// ---------------------------------------------------------------------------

#[test]
fn test_failed_update_is_all_or_nothing() {
    let (store, _dir) = test_store();
    store
        .update(&ctx(), |tx| tx.create_bucket(b"b")?.put(b"keep", b"1"))
        .unwrap();

    let result: LabResult<()> = store.update(&ctx(), |tx| {
        tx.create_bucket(b"other")?;
        let mut b = tx.bucket_mut(b"b").unwrap();
        b.put(b"new", b"2")?;
        b.delete(b"keep")?;
        tx.create_bucket(b"b").map(|_| ())
    });
    assert!(matches!(result, Err(LabError::BucketExists { .. })));

    assert_eq!(keys(&store, b"b"), vec![b"keep".to_vec()]);
    assert!(store.begin_read().bucket(b"other").is_none());
}

#[test]
fn test_reopen_restores_everything() {
    let dir = TempDir::new().unwrap();
    {
        let store = LabStore::open(dir.path(), Config::durable()).unwrap();
        for i in 0..20u32 {
            store
                .update(&ctx(), |tx| {
                    tx.create_bucket_if_not_exists(b"n")?
                        .put(format!("k{i:02}").as_bytes(), &i.to_le_bytes())
                })
                .unwrap();
        }
        store
            .update(&ctx(), |tx| tx.bucket_mut(b"n").unwrap().delete(b"k05"))
            .unwrap();
    }

    let store = LabStore::open(dir.path(), Config::durable()).unwrap();
    let found = keys(&store, b"n");
    assert_eq!(found.len(), 19);
    assert!(!found.contains(&b"k05".to_vec()));
    assert_eq!(store.last_txid(), 21);
}

#[test]
fn test_checkpoint_then_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = LabStore::open(dir.path(), Config::relaxed()).unwrap();
        for round in 0..10u32 {
            store
                .update(&ctx(), |tx| {
                    let mut b = tx.create_bucket_if_not_exists(b"counter")?;
                    b.put(b"value", round.to_string().as_bytes())
                })
                .unwrap();
        }
        let result = store.checkpoint().unwrap();
        assert!(result.removed_files >= 1);
        assert!(result.bytes_saved() > 0);

        store
            .update(&ctx(), |tx| tx.create_bucket(b"later")?.put(b"x", b"y"))
            .unwrap();
    }

    let store = LabStore::open(dir.path(), Config::relaxed()).unwrap();
    store
        .view(&ctx(), |tx| {
            assert_eq!(tx.bucket(b"counter").unwrap().get(b"value"), Some(&b"9"[..]));
            assert_eq!(tx.bucket(b"later").unwrap().get(b"x"), Some(&b"y"[..]));
            Ok::<_, LabError>(())
        })
        .unwrap();
    assert_eq!(store.last_txid(), 12);
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[test]
fn test_readers_see_whole_transactions() {
    let (store, _dir) = test_store();
    let store = Arc::new(store);
    store
        .update(&ctx(), |tx| {
            let mut pair = tx.create_bucket(b"pair")?;
            pair.put(b"left", b"0")?;
            pair.put(b"right", b"0")
        })
        .unwrap();

    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for i in 1..=200u32 {
                let value = i.to_string();
                store
                    .update(&ctx(), |tx| {
                        let mut pair = tx.bucket_mut(b"pair").unwrap();
                        pair.put(b"left", value.as_bytes())?;
                        pair.put(b"right", value.as_bytes())
                    })
                    .unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..200 {
                    let tx = store.begin_read();
                    let pair = tx.bucket(b"pair").unwrap();
                    assert_eq!(pair.get(b"left"), pair.get(b"right"));
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for r in readers {
        r.join().unwrap();
    }
}

#[test]
fn test_deadline_in_the_past_refuses_view() {
    let (store, _dir) = test_store();
    let expired = ctx().with_timeout(std::time::Duration::ZERO);
    let result: LabResult<()> = store.view(&expired, |_| Ok(()));
    assert!(matches!(result, Err(LabError::DeadlineExceeded)));
}
