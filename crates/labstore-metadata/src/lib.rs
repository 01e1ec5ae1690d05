//! Cluster metadata for LabStore
//!
//! Stores lab clusters (groups of peers with their build definitions and
//! labels) in a `LabStore` bucket tree.
//!
//! # Architecture
//!
//! - `keys`: where things live (collection bucket, reserved field names)
//! - `codec`: `Cluster` <-> nested buckets, reversible and exact
//! - `db`: `ClusterStore`, one transaction per lifecycle operation
//!
//! ```no_run
//! use labstore_core::{Config, Context};
//! use labstore_metadata::{Cluster, ClusterDefinition, ClusterGroup, ClusterStore};
//!
//! let clusters = ClusterStore::open("/tmp/lab", Config::default())?;
//! let ctx = Context::background();
//! let definition = ClusterDefinition::new(vec![ClusterGroup::new(3, "m5.large", "us-east-1")]);
//! let created = clusters.create_cluster(&ctx, Cluster::new("c1", definition))?;
//! assert_eq!(created.created_at, created.updated_at);
//! clusters.label_clusters(&ctx, &["c1"], &["prod"], &[])?;
//! # Ok::<(), labstore_metadata::MetadataError>(())
//! ```

pub mod clock;
pub mod codec;
pub mod db;
pub mod error;
pub mod keys;
pub mod model;

pub use clock::{Clock, SteppingClock, SystemClock};
pub use db::ClusterStore;
pub use error::{ErrorKind, MetadataError, MetadataResult, ResultExt};
pub use model::{
    validate_cluster_id, Cluster, ClusterDefinition, ClusterGroup, ClusterStatus, PeerDefinition,
    CLUSTER_SIZE_MAX,
};
