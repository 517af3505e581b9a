use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Rendering of an absent tag at the output boundary.
pub const NOT_FOUND: &str = "not found";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    #[serde(rename = "CacheCluster")]
    Cluster,
    #[serde(rename = "ReplicationGroup")]
    ReplicationGroup,
}

impl ResourceKind {
    /// Label used in reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Cluster => "CacheCluster",
            ResourceKind::ReplicationGroup => "ReplicationGroup",
        }
    }

    /// Resource-type segment of the ARN.
    pub fn arn_segment(&self) -> &'static str {
        match self {
            ResourceKind::Cluster => "cluster",
            ResourceKind::ReplicationGroup => "replication-group",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CacheCluster" => Ok(ResourceKind::Cluster),
            "ReplicationGroup" => Ok(ResourceKind::ReplicationGroup),
            other => Err(format!("unknown resource type: {other}")),
        }
    }
}

/// Resolved value of a requested tag key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagValue {
    Found(String),
    NotFound,
}

impl TagValue {
    pub fn as_found(&self) -> Option<&str> {
        match self {
            TagValue::Found(v) => Some(v.as_str()),
            TagValue::NotFound => None,
        }
    }

    /// Inverse of `Display`, used when replaying a previously written report.
    pub fn from_rendered(s: &str) -> Self {
        if s == NOT_FOUND { TagValue::NotFound } else { TagValue::Found(s.to_string()) }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Found(v) => f.write_str(v),
            TagValue::NotFound => f.write_str(NOT_FOUND),
        }
    }
}

/// One inventory row. Built once per resource per scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub profile: String,
    pub account_id: String,
    pub region: String,
    pub kind: ResourceKind,
    pub resource_id: String,
    /// Empty when no ARN could be resolved.
    pub arn: String,
    pub engine: String,
    pub engine_version: String,
    /// ISO-8601, empty when unknown.
    pub creation_time: String,
    pub node_types: BTreeSet<String>,
    pub num_nodes: u32,
    pub at_rest_encryption: bool,
    pub transit_encryption: bool,
    /// One entry per configured tag key, in configured order.
    pub tags: Vec<(String, TagValue)>,
}

impl ResourceRecord {
    /// Sorted, semicolon-joined node types.
    pub fn node_types_joined(&self) -> String {
        self.node_types.iter().map(String::as_str).collect::<Vec<_>>().join(";")
    }

    pub fn tag(&self, key: &str) -> Option<&TagValue> {
        self.tags.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Stable identity of the row across scans.
    pub fn identity(&self) -> (&str, &str, &str) {
        (&self.profile, &self.region, &self.resource_id)
    }
}

/// Profile name to failure reason, only for profiles that failed as a whole.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FailureReport(BTreeMap<String, String>);

impl FailureReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty messages are not failures and are ignored.
    pub fn record(&mut self, profile: impl Into<String>, reason: impl Into<String>) {
        let reason = reason.into();
        if !reason.is_empty() {
            self.0.insert(profile.into(), reason);
        }
    }

    pub fn get(&self, profile: &str) -> Option<&str> {
        self.0.get(profile).map(String::as_str)
    }

    pub fn contains(&self, profile: &str) -> bool {
        self.0.contains_key(profile)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
