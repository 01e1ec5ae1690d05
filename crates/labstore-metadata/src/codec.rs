//! Cluster <-> bucket tree codec.
//!
//! Writers recreate every nested bucket they own, so a write is always a
//! full overwrite of the cluster. Readers pick the keys they know and
//! ignore the rest; child buckets met while scanning flat fields are
//! skipped.
//!
//! Positional sequences (groups, peer string lists) store their length in
//! `count`. A reader insists on every index below it and rejects indexes
//! above it. Buckets written without `count` are read by probing from 0.

use std::collections::BTreeSet;

use chrono::{DateTime, SecondsFormat, Utc};
use labstore_core::{Bucket, BucketMut};

use crate::error::{MetadataError, MetadataResult, ResultExt};
use crate::keys::*;
use crate::model::{Cluster, ClusterDefinition, ClusterGroup, ClusterStatus, PeerDefinition};

// ---------------------------------------------------------------------------
// Scalars
// ---------------------------------------------------------------------------

fn field_name(key: &[u8]) -> String {
    String::from_utf8_lossy(key).into_owned()
}

fn decode_str(key: &[u8], raw: &[u8]) -> MetadataResult<String> {
    String::from_utf8(raw.to_vec()).map_err(|_| {
        MetadataError::Format(format!("{}: value is not valid UTF-8", field_name(key)))
    })
}

fn decode_int<T: std::str::FromStr>(key: &[u8], raw: &[u8]) -> MetadataResult<T> {
    let text = decode_str(key, raw)?;
    text.parse().map_err(|_| {
        MetadataError::Format(format!("{}: invalid integer {text:?}", field_name(key)))
    })
}

fn encode_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_time(key: &[u8], raw: &[u8]) -> MetadataResult<DateTime<Utc>> {
    let text = decode_str(key, raw)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            MetadataError::Format(format!("{}: invalid timestamp {text:?}: {e}", field_name(key)))
        })
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

pub fn write_timestamps(
    bucket: &mut BucketMut<'_>,
    created: &DateTime<Utc>,
    updated: &DateTime<Utc>,
) -> MetadataResult<()> {
    bucket.put(KEY_CREATED_AT, encode_time(created).as_bytes())?;
    bucket.put(KEY_UPDATED_AT, encode_time(updated).as_bytes())?;
    Ok(())
}

/// `(created, updated)`. Both are required.
pub fn read_timestamps(bucket: Bucket<'_>) -> MetadataResult<(DateTime<Utc>, DateTime<Utc>)> {
    let read = |key: &[u8]| match bucket.get(key) {
        Some(raw) => decode_time(key, raw),
        None => Err(MetadataError::Format(format!("{} is missing", field_name(key)))),
    };
    Ok((read(KEY_CREATED_AT)?, read(KEY_UPDATED_AT)?))
}

// ---------------------------------------------------------------------------
// Labels
// ---------------------------------------------------------------------------

/// Replace the `labels` child with one empty-valued field per label.
pub fn write_labels(bucket: &mut BucketMut<'_>, labels: &BTreeSet<String>) -> MetadataResult<()> {
    let mut lbkt = bucket.recreate_bucket(KEY_LABELS)?;
    for label in labels {
        lbkt.put(label.as_bytes(), b"")?;
    }
    Ok(())
}

/// Labels under the `labels` child; empty when there is none.
pub fn read_labels(bucket: Bucket<'_>) -> MetadataResult<BTreeSet<String>> {
    let mut labels = BTreeSet::new();
    if let Some(lbkt) = bucket.bucket(KEY_LABELS) {
        lbkt.for_each(|key, value| {
            if value.is_some() {
                labels.insert(decode_str(KEY_LABELS, key)?);
            }
            Ok::<_, MetadataError>(())
        })?;
    }
    Ok(labels)
}

// ---------------------------------------------------------------------------
// Positional sequences
// ---------------------------------------------------------------------------

/// Number of entries in a positional sequence. `present` says whether an
/// entry exists under an index key.
fn sequence_len<F>(bucket: Bucket<'_>, present: F) -> MetadataResult<usize>
where
    F: Fn(&[u8]) -> bool,
{
    let count: usize = match bucket.get(KEY_COUNT) {
        Some(raw) => decode_int(KEY_COUNT, raw)?,
        None => {
            let mut n = 0;
            while present(index_key(n).as_bytes()) {
                n += 1;
            }
            return Ok(n);
        }
    };

    if let Some(missing) = (0..count).find(|&i| !present(index_key(i).as_bytes())) {
        return Err(MetadataError::Format(format!("entry {missing} of {count} is missing")));
    }
    bucket.for_each(|key, _| match parse_index(key) {
        Some(i) if i >= count => Err(MetadataError::Format(format!(
            "unexpected entry {i}, sequence holds {count}"
        ))),
        _ => Ok(()),
    })?;
    Ok(count)
}

fn write_string_list(
    bucket: &mut BucketMut<'_>,
    key: &[u8],
    items: &[String],
) -> MetadataResult<()> {
    let mut list = bucket.recreate_bucket(key)?;
    list.put(KEY_COUNT, items.len().to_string().as_bytes())?;
    for (i, item) in items.iter().enumerate() {
        list.put(index_key(i).as_bytes(), item.as_bytes())?;
    }
    Ok(())
}

fn read_string_list(bucket: Bucket<'_>, key: &[u8]) -> MetadataResult<Vec<String>> {
    let Some(list) = bucket.bucket(key) else {
        return Ok(Vec::new());
    };
    let len = sequence_len(list, |k| list.get(k).is_some()).context(field_name(key))?;
    let mut items = Vec::with_capacity(len);
    for i in 0..len {
        let index = index_key(i);
        let raw = list.get(index.as_bytes()).unwrap_or_default();
        items.push(decode_str(index.as_bytes(), raw).context(field_name(key))?);
    }
    Ok(items)
}

// ---------------------------------------------------------------------------
// Peer definition
// ---------------------------------------------------------------------------

/// Write `peer` into a fresh `definition` child of a group bucket.
pub fn write_peer_definition(
    bucket: &mut BucketMut<'_>,
    peer: &PeerDefinition,
) -> MetadataResult<()> {
    let mut pbkt = bucket.recreate_bucket(KEY_DEFINITION)?;
    write_string_list(&mut pbkt, KEY_TRANSPORTS, &peer.transports)?;
    write_string_list(&mut pbkt, KEY_MUXERS, &peer.muxers)?;
    write_string_list(&mut pbkt, KEY_SECURITY_TRANSPORTS, &peer.security_transports)?;
    pbkt.put(KEY_GIT_REFERENCE, peer.git_reference.as_bytes())?;
    pbkt.put(KEY_ROUTING, peer.routing.as_bytes())?;
    Ok(())
}

/// Peer definition stored under a group bucket, if any.
pub fn read_peer_definition(bucket: Bucket<'_>) -> MetadataResult<Option<PeerDefinition>> {
    let Some(pbkt) = bucket.bucket(KEY_DEFINITION) else {
        return Ok(None);
    };

    let mut peer = PeerDefinition {
        transports: read_string_list(pbkt, KEY_TRANSPORTS)?,
        muxers: read_string_list(pbkt, KEY_MUXERS)?,
        security_transports: read_string_list(pbkt, KEY_SECURITY_TRANSPORTS)?,
        ..PeerDefinition::default()
    };
    pbkt.for_each(|key, value| {
        let Some(value) = value else { return Ok(()) };
        match key {
            KEY_GIT_REFERENCE => peer.git_reference = decode_str(key, value)?,
            KEY_ROUTING => peer.routing = decode_str(key, value)?,
            _ => {}
        }
        Ok::<_, MetadataError>(())
    })?;
    Ok(Some(peer))
}

// ---------------------------------------------------------------------------
// Cluster definition
// ---------------------------------------------------------------------------

fn write_group(gbkt: &mut BucketMut<'_>, group: &ClusterGroup) -> MetadataResult<()> {
    write_labels(gbkt, &group.labels)?;
    if let Some(peer) = &group.peer {
        write_peer_definition(gbkt, peer)?;
    }
    gbkt.put(KEY_SIZE, group.size.to_string().as_bytes())?;
    gbkt.put(KEY_INSTANCE_TYPE, group.instance_type.as_bytes())?;
    gbkt.put(KEY_REGION, group.region.as_bytes())?;
    Ok(())
}

fn read_group(gbkt: Bucket<'_>) -> MetadataResult<ClusterGroup> {
    let mut group = ClusterGroup {
        labels: read_labels(gbkt)?,
        peer: read_peer_definition(gbkt).context("peer definition")?,
        ..ClusterGroup::default()
    };
    gbkt.for_each(|key, value| {
        let Some(value) = value else { return Ok(()) };
        match key {
            KEY_SIZE => group.size = decode_int(key, value)?,
            KEY_INSTANCE_TYPE => group.instance_type = decode_str(key, value)?,
            KEY_REGION => group.region = decode_str(key, value)?,
            _ => {}
        }
        Ok::<_, MetadataError>(())
    })?;
    Ok(group)
}

/// Replace the `definition` child. No groups means no child at all.
pub fn write_cluster_definition(
    bucket: &mut BucketMut<'_>,
    definition: &ClusterDefinition,
) -> MetadataResult<()> {
    if definition.groups.is_empty() {
        if bucket.bucket(KEY_DEFINITION).is_some() {
            bucket.delete_bucket(KEY_DEFINITION)?;
        }
        return Ok(());
    }

    let mut dbkt = bucket.recreate_bucket(KEY_DEFINITION)?;
    dbkt.put(KEY_COUNT, definition.groups.len().to_string().as_bytes())?;
    for (i, group) in definition.groups.iter().enumerate() {
        let mut gbkt = dbkt.create_bucket(index_key(i).as_bytes())?;
        write_group(&mut gbkt, group).with_context(|| format!("group {i}"))?;
    }
    Ok(())
}

pub fn read_cluster_definition(bucket: Bucket<'_>) -> MetadataResult<ClusterDefinition> {
    let Some(dbkt) = bucket.bucket(KEY_DEFINITION) else {
        return Ok(ClusterDefinition::default());
    };

    let len = sequence_len(dbkt, |k| dbkt.bucket(k).is_some()).context("groups")?;
    let mut groups = Vec::with_capacity(len);
    for i in 0..len {
        let gbkt = dbkt
            .bucket(index_key(i).as_bytes())
            .ok_or_else(|| MetadataError::Format(format!("group {i} is missing")))?;
        groups.push(read_group(gbkt).with_context(|| format!("group {i}"))?);
    }
    Ok(ClusterDefinition { groups })
}

// ---------------------------------------------------------------------------
// Cluster
// ---------------------------------------------------------------------------

/// Write every part of `cluster` into its entity bucket.
pub fn write_cluster(bucket: &mut BucketMut<'_>, cluster: &Cluster) -> MetadataResult<()> {
    write_timestamps(bucket, &cluster.created_at, &cluster.updated_at)?;
    write_cluster_definition(bucket, &cluster.definition)?;
    write_labels(bucket, &cluster.labels)?;
    bucket.put(KEY_ID, cluster.id.as_bytes())?;
    let status = cluster.status.map_or("", |s| s.as_str());
    bucket.put(KEY_STATUS, status.as_bytes())?;
    Ok(())
}

/// Decode the entity bucket of cluster `id`.
pub fn read_cluster(bucket: Bucket<'_>, id: &str) -> MetadataResult<Cluster> {
    let (created_at, updated_at) = read_timestamps(bucket)?;
    let mut cluster = Cluster {
        id: id.to_string(),
        status: None,
        definition: read_cluster_definition(bucket)?,
        labels: read_labels(bucket)?,
        created_at,
        updated_at,
    };

    bucket.for_each(|key, value| {
        let Some(value) = value else { return Ok(()) };
        match key {
            KEY_ID => cluster.id = decode_str(key, value)?,
            KEY_STATUS if value.is_empty() => cluster.status = None,
            KEY_STATUS => {
                let name = decode_str(key, value)?;
                let status = name
                    .parse::<ClusterStatus>()
                    .map_err(|_| MetadataError::Format(format!("status: unknown value {name:?}")))?;
                cluster.status = Some(status);
            }
            _ => {}
        }
        Ok::<_, MetadataError>(())
    })?;
    Ok(cluster)
}
