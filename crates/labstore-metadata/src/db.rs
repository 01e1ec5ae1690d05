//! Cluster lifecycle operations over a `LabStore`.

use std::path::Path;
use std::sync::Arc;

use labstore_core::{Config, Context, LabError, LabStore};

use crate::clock::{Clock, SystemClock};
use crate::codec::{read_cluster, read_timestamps, write_cluster};
use crate::error::{MetadataError, MetadataResult, ResultExt};
use crate::keys::{cluster_key, clusters_bucket, clusters_bucket_mut, create_clusters_bucket};
use crate::model::Cluster;

fn describe(id: &str) -> String {
    format!("cluster {id:?}")
}

fn not_found(id: &str) -> MetadataError {
    MetadataError::NotFound(describe(id))
}

/// Cluster metadata persisted in a `LabStore`.
///
/// Each operation runs in exactly one transaction: `get_cluster` and
/// `list_clusters` in a read transaction, everything else in a write
/// transaction that either commits whole or leaves no trace. Nothing is
/// cached between calls.
pub struct ClusterStore {
    store: Arc<LabStore>,
    clock: Arc<dyn Clock>,
}

impl ClusterStore {
    /// Use `store` with wall-clock timestamps.
    pub fn new(store: Arc<LabStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<LabStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Open (or create) a store at `path` and wrap it.
    pub fn open<P: AsRef<Path>>(path: P, config: Config) -> MetadataResult<Self> {
        let store = LabStore::open(path, config)?;
        Ok(Self::new(Arc::new(store)))
    }

    /// The underlying store.
    pub fn store(&self) -> &LabStore {
        &self.store
    }

    /// Cluster `id`, fully decoded.
    pub fn get_cluster(&self, ctx: &Context, id: &str) -> MetadataResult<Cluster> {
        self.store.view(ctx, |tx| {
            let cbkt = clusters_bucket(tx)
                .and_then(|bkt| bkt.bucket(cluster_key(id)))
                .filter(|cbkt| !cbkt.is_empty())
                .ok_or_else(|| not_found(id))?;
            read_cluster(cbkt, id).with_context(|| describe(id))
        })
    }

    /// Every cluster, in ascending id byte order.
    pub fn list_clusters(&self, ctx: &Context) -> MetadataResult<Vec<Cluster>> {
        self.store.view(ctx, |tx| {
            let mut clusters = Vec::new();
            let Some(bkt) = clusters_bucket(tx) else {
                return Ok(clusters);
            };
            bkt.for_each(|key, value| {
                // Only child buckets are clusters.
                if value.is_some() {
                    return Ok(());
                }
                let Some(cbkt) = bkt.bucket(key).filter(|c| !c.is_empty()) else {
                    return Ok(());
                };
                let id = String::from_utf8(key.to_vec()).map_err(|_| {
                    MetadataError::Format(format!("cluster key {key:02x?} is not valid UTF-8"))
                })?;
                clusters.push(read_cluster(cbkt, &id).with_context(|| describe(&id))?);
                Ok::<_, MetadataError>(())
            })?;
            Ok(clusters)
        })
    }

    /// Persist a new cluster. Both timestamps are set to now; whatever the
    /// caller put there is ignored. An empty container left under the id
    /// counts as absent and is replaced.
    pub fn create_cluster(&self, ctx: &Context, mut cluster: Cluster) -> MetadataResult<Cluster> {
        cluster.validate()?;

        let cluster = self.store.update(ctx, |tx| {
            let mut clusters = create_clusters_bucket(tx)?;
            let key = cluster_key(&cluster.id);
            // An empty container holds no cluster; take its place.
            if clusters.bucket(key).is_some_and(|cbkt| cbkt.is_empty()) {
                clusters.delete_bucket(key).with_context(|| describe(&cluster.id))?;
            }
            let mut cbkt = match clusters.create_bucket(key) {
                Ok(cbkt) => cbkt,
                Err(LabError::BucketExists { .. }) => {
                    return Err(MetadataError::AlreadyExists(describe(&cluster.id)));
                }
                Err(e) => return Err(MetadataError::from(e).context(describe(&cluster.id))),
            };

            let now = self.clock.now();
            cluster.created_at = now;
            cluster.updated_at = now;
            write_cluster(&mut cbkt, &cluster).with_context(|| describe(&cluster.id))?;
            Ok(cluster)
        })?;

        tracing::debug!(
            cluster = %cluster.id,
            groups = cluster.definition.groups.len(),
            "cluster created"
        );
        Ok(cluster)
    }

    /// Overwrite status, definition and labels of an existing cluster.
    ///
    /// The stored creation time is kept; the update time moves to now (or
    /// stays put if the clock is behind the stored value).
    pub fn update_cluster(&self, ctx: &Context, mut cluster: Cluster) -> MetadataResult<Cluster> {
        if cluster.id.is_empty() {
            return Err(MetadataError::InvalidArgument("cluster id required for update".into()));
        }
        cluster.definition.validate()?;

        let cluster = self.store.update(ctx, |tx| {
            let Some(mut clusters) = clusters_bucket_mut(tx) else {
                return Err(not_found(&cluster.id));
            };
            let mut cbkt = match clusters.bucket_mut(cluster_key(&cluster.id)) {
                Some(cbkt) if !cbkt.as_bucket().is_empty() => cbkt,
                _ => return Err(not_found(&cluster.id)),
            };

            let (created_at, updated_at) =
                read_timestamps(cbkt.as_bucket()).with_context(|| describe(&cluster.id))?;
            cluster.created_at = created_at;
            cluster.updated_at = self.clock.now().max(updated_at);
            write_cluster(&mut cbkt, &cluster).with_context(|| describe(&cluster.id))?;
            Ok(cluster)
        })?;

        tracing::debug!(cluster = %cluster.id, "cluster updated");
        Ok(cluster)
    }

    /// Add `adds` to and then remove `removes` from the labels of every
    /// cluster in `ids`, in one transaction.
    ///
    /// Returns the updated clusters in the order of `ids`. If any id is
    /// missing nothing is changed.
    pub fn label_clusters<S: AsRef<str>>(
        &self,
        ctx: &Context,
        ids: &[S],
        adds: &[S],
        removes: &[S],
    ) -> MetadataResult<Vec<Cluster>> {
        let updated = self.store.update(ctx, |tx| {
            let mut updated = Vec::with_capacity(ids.len());
            let Some(first) = ids.first() else {
                return Ok(updated);
            };
            let Some(mut clusters) = clusters_bucket_mut(tx) else {
                return Err(not_found(first.as_ref()));
            };

            let now = self.clock.now();
            for id in ids {
                let id = id.as_ref();
                let mut cbkt = match clusters.bucket_mut(cluster_key(id)) {
                    Some(cbkt) if !cbkt.as_bucket().is_empty() => cbkt,
                    _ => return Err(not_found(id)),
                };

                let mut cluster = read_cluster(cbkt.as_bucket(), id).with_context(|| describe(id))?;
                cluster.labels.extend(adds.iter().map(|l| l.as_ref().to_string()));
                for label in removes {
                    cluster.labels.remove(label.as_ref());
                }
                cluster.updated_at = now.max(cluster.updated_at);

                write_cluster(&mut cbkt, &cluster).with_context(|| describe(id))?;
                updated.push(cluster);
            }
            Ok(updated)
        })?;

        tracing::debug!(
            clusters = updated.len(),
            adds = adds.len(),
            removes = removes.len(),
            "clusters labelled"
        );
        Ok(updated)
    }

    /// Remove cluster `id` and everything stored under it.
    pub fn delete_cluster(&self, ctx: &Context, id: &str) -> MetadataResult<()> {
        self.store.update(ctx, |tx| {
            let Some(mut clusters) = clusters_bucket_mut(tx) else {
                return Ok(());
            };
            match clusters.delete_bucket(cluster_key(id)) {
                Ok(()) => Ok(()),
                Err(
                    LabError::BucketNotFound { .. }
                    | LabError::EmptyKey
                    | LabError::IncompatibleValue { .. },
                ) => Err(not_found(id)),
                Err(e) => Err(MetadataError::from(e).context(describe(id))),
            }
        })?;

        tracing::debug!(cluster = id, "cluster deleted");
        Ok(())
    }
}

impl std::fmt::Debug for ClusterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterStore")
            .field("path", &self.store.path())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SteppingClock;
    use crate::error::ErrorKind;
    use crate::model::{ClusterDefinition, ClusterGroup, ClusterStatus};
    use chrono::{DateTime, Duration, Utc};
    use tempfile::TempDir;

    fn start() -> DateTime<Utc> {
        "2024-03-01T12:00:00Z".parse().unwrap()
    }

    fn test_db() -> (ClusterStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = LabStore::open(dir.path(), Config::relaxed()).unwrap();
        let clock = SteppingClock::new(start(), Duration::seconds(1));
        (ClusterStore::with_clock(Arc::new(store), Arc::new(clock)), dir)
    }

    fn ctx() -> Context {
        Context::background()
    }

    fn cluster(id: &str) -> Cluster {
        let group = ClusterGroup::new(2, "m5.large", "us-east-1");
        Cluster::new(id, ClusterDefinition::new(vec![group]))
    }

    #[test]
    fn test_create_then_get() {
        let (db, _dir) = test_db();
        let created = db.create_cluster(&ctx(), cluster("c1").with_labels(["x"])).unwrap();
        assert_eq!(created.created_at, start());
        assert_eq!(created.updated_at, start());

        let fetched = db.get_cluster(&ctx(), "c1").unwrap();
        assert_eq!(fetched, created);
    }

    #[test]
    fn test_create_twice_keeps_first() {
        let (db, _dir) = test_db();
        let first = db.create_cluster(&ctx(), cluster("c1").with_labels(["first"])).unwrap();

        let err = db.create_cluster(&ctx(), cluster("c1").with_labels(["second"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(db.get_cluster(&ctx(), "c1").unwrap(), first);
    }

    #[test]
    fn test_create_replaces_empty_container() {
        let (db, _dir) = test_db();
        db.store()
            .update(&ctx(), |tx| {
                create_clusters_bucket(tx)?.create_bucket(b"c1")?;
                Ok::<_, LabError>(())
            })
            .unwrap();
        assert!(db.get_cluster(&ctx(), "c1").unwrap_err().is_not_found());

        let created = db.create_cluster(&ctx(), cluster("c1")).unwrap();
        assert_eq!(db.get_cluster(&ctx(), "c1").unwrap(), created);
    }

    #[test]
    fn test_create_rejects_bad_input() {
        let (db, _dir) = test_db();
        for id in ["", "has space", "-x"] {
            let err = db.create_cluster(&ctx(), cluster(id)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "{id:?}");
        }

        let group = ClusterGroup::new(1001, "t", "r");
        let huge = Cluster::new("huge", ClusterDefinition::new(vec![group]));
        assert_eq!(db.create_cluster(&ctx(), huge).unwrap_err().kind(), ErrorKind::InvalidArgument);
        assert!(db.list_clusters(&ctx()).unwrap().is_empty());
    }

    #[test]
    fn test_get_missing() {
        let (db, _dir) = test_db();
        assert_eq!(db.get_cluster(&ctx(), "nope").unwrap_err().kind(), ErrorKind::NotFound);

        db.create_cluster(&ctx(), cluster("c1")).unwrap();
        let err = db.get_cluster(&ctx(), "nope").unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "cluster \"nope\": not found");
    }

    #[test]
    fn test_update_preserves_created_at() {
        let (db, _dir) = test_db();
        let created = db.create_cluster(&ctx(), cluster("c1")).unwrap();

        let mut change = created.clone().with_status(ClusterStatus::Created);
        change.created_at = DateTime::<Utc>::UNIX_EPOCH;
        change.definition.groups.push(ClusterGroup::new(1, "c5.xlarge", "eu-west-1"));
        let updated = db.update_cluster(&ctx(), change).unwrap();

        assert_eq!(updated.id, "c1");
        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at > created.updated_at);
        assert_eq!(updated.status, Some(ClusterStatus::Created));
        assert_eq!(db.get_cluster(&ctx(), "c1").unwrap(), updated);
    }

    #[test]
    fn test_update_missing_or_unnamed() {
        let (db, _dir) = test_db();
        let err = db.update_cluster(&ctx(), cluster("ghost")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        db.create_cluster(&ctx(), cluster("c1")).unwrap();
        let err = db.update_cluster(&ctx(), cluster("ghost")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = db.update_cluster(&ctx(), cluster("")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(db.get_cluster(&ctx(), "ghost").is_err());
    }

    #[test]
    fn test_label_batch_is_idempotent() {
        let (db, _dir) = test_db();
        db.create_cluster(&ctx(), cluster("c1").with_labels(["keep", "drop"])).unwrap();

        let (adds, removes) = (["new", "keep"], ["drop", "absent"]);
        let once = db.label_clusters(&ctx(), &["c1"], &adds, &removes).unwrap();
        let twice = db.label_clusters(&ctx(), &["c1"], &adds, &removes).unwrap();

        let expected: Vec<_> = ["keep", "new"].into_iter().map(String::from).collect();
        assert_eq!(once[0].labels.iter().cloned().collect::<Vec<_>>(), expected);
        assert_eq!(twice[0].labels, once[0].labels);
        assert!(twice[0].updated_at > once[0].updated_at);
    }

    #[test]
    fn test_label_batch_all_or_nothing() {
        let (db, _dir) = test_db();
        let a = db.create_cluster(&ctx(), cluster("a")).unwrap();
        let b = db.create_cluster(&ctx(), cluster("b")).unwrap();

        let err = db.label_clusters(&ctx(), &["a", "missing", "b"], &["x"], &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(db.get_cluster(&ctx(), "a").unwrap(), a);
        assert_eq!(db.get_cluster(&ctx(), "b").unwrap(), b);
    }

    #[test]
    fn test_label_batch_keeps_input_order() {
        let (db, _dir) = test_db();
        for id in ["a", "b", "c"] {
            db.create_cluster(&ctx(), cluster(id)).unwrap();
        }
        let result = db.label_clusters(&ctx(), &["c", "a", "b"], &["l"], &[]).unwrap();
        let ids: Vec<_> = result.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert!(db.label_clusters(&ctx(), &[] as &[&str], &["l"], &[]).unwrap().is_empty());
    }

    #[test]
    fn test_delete() {
        let (db, _dir) = test_db();
        db.delete_cluster(&ctx(), "c1").unwrap();

        db.create_cluster(&ctx(), cluster("c1")).unwrap();
        db.create_cluster(&ctx(), cluster("c2")).unwrap();
        db.delete_cluster(&ctx(), "c1").unwrap();

        assert!(db.get_cluster(&ctx(), "c1").unwrap_err().is_not_found());
        assert!(db.delete_cluster(&ctx(), "c1").unwrap_err().is_not_found());
        assert!(db.delete_cluster(&ctx(), "").unwrap_err().is_not_found());
        assert_eq!(db.list_clusters(&ctx()).unwrap().len(), 1);
    }

    #[test]
    fn test_list_sorted_by_id() {
        let (db, _dir) = test_db();
        assert!(db.list_clusters(&ctx()).unwrap().is_empty());
        for id in ["zeta", "alpha", "mid"] {
            db.create_cluster(&ctx(), cluster(id)).unwrap();
        }
        let ids: Vec<_> = db.list_clusters(&ctx()).unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_cancelled_context() {
        let (db, _dir) = test_db();
        let cancelled = ctx();
        cancelled.cancel();

        let err = db.create_cluster(&cancelled, cluster("c1")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(db.list_clusters(&cancelled).unwrap_err().kind(), ErrorKind::Cancelled);
        assert!(db.get_cluster(&ctx(), "c1").unwrap_err().is_not_found());
    }
}
