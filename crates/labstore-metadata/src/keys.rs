//! Bucket layout for cluster metadata.
//!
//! ```text
//! clusters/                     collection, root level
//!   <id>/                       one bucket per cluster, raw id bytes
//!     id, status, createdat, updatedat
//!     labels/<label> = ""
//!     definition/               only when the cluster has groups
//!       count
//!       0/, 1/, ...             one bucket per group
//!         size, instanceType, region
//!         labels/<label> = ""
//!         definition/           peer definition, optional
//! ```

use labstore_core::{Bucket, BucketMut, LabResult, ReadTx, WriteTx};

pub const BUCKET_CLUSTERS: &[u8] = b"clusters";

pub const KEY_ID: &[u8] = b"id";
pub const KEY_STATUS: &[u8] = b"status";
pub const KEY_CREATED_AT: &[u8] = b"createdat";
pub const KEY_UPDATED_AT: &[u8] = b"updatedat";
pub const KEY_LABELS: &[u8] = b"labels";
pub const KEY_DEFINITION: &[u8] = b"definition";
pub const KEY_SIZE: &[u8] = b"size";
pub const KEY_INSTANCE_TYPE: &[u8] = b"instanceType";
pub const KEY_REGION: &[u8] = b"region";

/// Length of a positional sequence stored next to its entries.
pub const KEY_COUNT: &[u8] = b"count";

pub const KEY_GIT_REFERENCE: &[u8] = b"gitReference";
pub const KEY_TRANSPORTS: &[u8] = b"transports";
pub const KEY_MUXERS: &[u8] = b"muxers";
pub const KEY_SECURITY_TRANSPORTS: &[u8] = b"securityTransports";
pub const KEY_ROUTING: &[u8] = b"routing";

/// The clusters collection, if anything was ever stored in it.
pub fn clusters_bucket(tx: &ReadTx) -> Option<Bucket<'_>> {
    tx.bucket(BUCKET_CLUSTERS)
}

/// The clusters collection, created on first use.
pub fn create_clusters_bucket<'tx>(tx: &'tx mut WriteTx<'_>) -> LabResult<BucketMut<'tx>> {
    tx.create_bucket_if_not_exists(BUCKET_CLUSTERS)
}

/// The clusters collection for writing, without creating it.
pub fn clusters_bucket_mut<'tx>(tx: &'tx mut WriteTx<'_>) -> Option<BucketMut<'tx>> {
    tx.bucket_mut(BUCKET_CLUSTERS)
}

/// Bucket key of a cluster inside the collection.
pub fn cluster_key(id: &str) -> &[u8] {
    id.as_bytes()
}

/// Key of entry `index` in a positional sequence.
pub fn index_key(index: usize) -> String {
    index.to_string()
}

/// Inverse of [`index_key`]; `None` for anything that is not a canonical
/// decimal index (`count`, `07`, `+1`, ...).
pub fn parse_index(key: &[u8]) -> Option<usize> {
    let canonical = !key.is_empty()
        && key.iter().all(u8::is_ascii_digit)
        && (key.len() == 1 || key[0] != b'0');
    if !canonical {
        return None;
    }
    std::str::from_utf8(key).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_keys_roundtrip() {
        for i in [0usize, 1, 9, 10, 123] {
            assert_eq!(parse_index(index_key(i).as_bytes()), Some(i));
        }
    }

    #[test]
    fn test_non_index_keys() {
        for key in [&b""[..], b"count", b"07", b"+1", b"-1", b"1a", b"labels"] {
            assert_eq!(parse_index(key), None, "{:?}", String::from_utf8_lossy(key));
        }
    }

    #[test]
    fn test_reserved_keys_distinct() {
        let keys = [
            KEY_ID, KEY_STATUS, KEY_CREATED_AT, KEY_UPDATED_AT, KEY_LABELS,
            KEY_DEFINITION, KEY_SIZE, KEY_INSTANCE_TYPE, KEY_REGION, KEY_COUNT,
        ];
        let unique: std::collections::BTreeSet<_> = keys.iter().collect();
        assert_eq!(unique.len(), keys.len());
        assert!(keys.iter().all(|k| parse_index(k).is_none()));
    }
}
