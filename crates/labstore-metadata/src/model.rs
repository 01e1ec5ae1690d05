//! Cluster entities as callers see them.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::{MetadataError, MetadataResult};

/// Upper bound on the total number of peers a cluster definition may request.
pub const CLUSTER_SIZE_MAX: u64 = 1000;

/// Longest identifier accepted by [`validate_cluster_id`], in bytes.
pub const MAX_ID_LENGTH: usize = 76;

/// A named set of peer groups plus bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    /// Unique name, also the storage key. Immutable once created.
    pub id: String,
    /// `None` until a caller sets one.
    pub status: Option<ClusterStatus>,
    pub definition: ClusterDefinition,
    pub labels: BTreeSet<String>,
    /// Set by the store on create, never changed afterwards
    pub created_at: DateTime<Utc>,
    /// Refreshed by the store on every mutation
    pub updated_at: DateTime<Utc>,
}

impl Cluster {
    /// A cluster with nothing but an id and a definition. Timestamps are
    /// placeholders until the store assigns real ones.
    pub fn new(id: impl Into<String>, definition: ClusterDefinition) -> Self {
        Self {
            id: id.into(),
            status: None,
            definition,
            labels: BTreeSet::new(),
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_status(mut self, status: ClusterStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Checks applied before a cluster is created.
    pub fn validate(&self) -> MetadataResult<()> {
        validate_cluster_id(&self.id)?;
        self.definition.validate()
    }
}

/// Where a cluster is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterStatus {
    Creating,
    Connecting,
    Created,
    Destroying,
    Destroyed,
    Error,
}

impl ClusterStatus {
    pub const ALL: [ClusterStatus; 6] = [
        ClusterStatus::Creating,
        ClusterStatus::Connecting,
        ClusterStatus::Created,
        ClusterStatus::Destroying,
        ClusterStatus::Destroyed,
        ClusterStatus::Error,
    ];

    /// Name persisted in the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterStatus::Creating => "creating",
            ClusterStatus::Connecting => "connecting",
            ClusterStatus::Created => "created",
            ClusterStatus::Destroying => "destroying",
            ClusterStatus::Destroyed => "destroyed",
            ClusterStatus::Error => "error",
        }
    }
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClusterStatus {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| MetadataError::InvalidArgument(format!("unknown cluster status {s:?}")))
    }
}

/// Ordered peer groups. Position is the only identity a group has.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterDefinition {
    pub groups: Vec<ClusterGroup>,
}

impl ClusterDefinition {
    pub fn new(groups: Vec<ClusterGroup>) -> Self {
        Self { groups }
    }

    /// Total number of peers across all groups.
    pub fn size(&self) -> u64 {
        self.groups.iter().map(|g| u64::from(g.size)).sum()
    }

    /// Every region and instance type used by the groups, without duplicates.
    ///
    /// Nothing applies these automatically; callers merge them into
    /// [`Cluster::labels`] when they want them.
    pub fn generate_labels(&self) -> BTreeSet<String> {
        self.groups
            .iter()
            .flat_map(|g| [g.region.clone(), g.instance_type.clone()])
            .collect()
    }

    pub fn validate(&self) -> MetadataResult<()> {
        let size = self.size();
        if size > CLUSTER_SIZE_MAX {
            return Err(MetadataError::InvalidArgument(format!(
                "cluster size {size} exceeds maximum of {CLUSTER_SIZE_MAX}"
            )));
        }
        Ok(())
    }
}

/// A homogeneous block of peers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterGroup {
    pub size: u32,
    pub instance_type: String,
    pub region: String,
    /// Peer build for this group; `None` keeps the cluster default.
    pub peer: Option<PeerDefinition>,
    pub labels: BTreeSet<String>,
}

impl ClusterGroup {
    pub fn new(size: u32, instance_type: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            size,
            instance_type: instance_type.into(),
            region: region.into(),
            peer: None,
            labels: BTreeSet::new(),
        }
    }

    pub fn with_peer(mut self, peer: PeerDefinition) -> Self {
        self.peer = Some(peer);
        self
    }
}

/// How the peers of a group are built and wired.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerDefinition {
    /// Git ref of the peer implementation to build
    pub git_reference: String,
    pub transports: Vec<String>,
    pub muxers: Vec<String>,
    pub security_transports: Vec<String>,
    pub routing: String,
}

/// Accept ids made of ASCII alphanumeric runs joined by single `.`, `_` or
/// `-`, at most [`MAX_ID_LENGTH`] bytes long.
pub fn validate_cluster_id(id: &str) -> MetadataResult<()> {
    if id.is_empty() {
        return Err(MetadataError::InvalidArgument("identifier must not be empty".into()));
    }
    if id.len() > MAX_ID_LENGTH {
        return Err(MetadataError::InvalidArgument(format!(
            "identifier {id:?} greater than maximum length ({MAX_ID_LENGTH} characters)"
        )));
    }

    let mut previous_separator = true;
    for b in id.bytes() {
        let separator = match b {
            b'.' | b'_' | b'-' => true,
            b if b.is_ascii_alphanumeric() => false,
            _ => return Err(invalid_id(id)),
        };
        if separator && previous_separator {
            return Err(invalid_id(id));
        }
        previous_separator = separator;
    }
    if previous_separator {
        return Err(invalid_id(id));
    }
    Ok(())
}

fn invalid_id(id: &str) -> MetadataError {
    MetadataError::InvalidArgument(format!(
        "identifier {id:?} must be alphanumeric components separated by '.', '_' or '-'"
    ))
}
