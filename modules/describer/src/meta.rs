//! Raw resource metadata as the provider reports it (PascalCase JSON).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CacheNode {
    pub cache_node_id: Option<String>,
    pub cache_node_status: Option<String>,
    pub cache_node_create_time: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClusterMeta {
    pub cache_cluster_id: Option<String>,
    #[serde(rename = "ARN")]
    pub arn: Option<String>,
    #[serde(rename = "ClusterARN")]
    pub cluster_arn: Option<String>,
    pub replication_group_id: Option<String>,
    pub engine: Option<String>,
    pub engine_version: Option<String>,
    pub cache_node_type: Option<String>,
    pub num_cache_nodes: Option<u32>,
    pub num_nodes: Option<u32>,
    /// Present only when node detail was requested.
    pub cache_nodes: Option<Vec<CacheNode>>,
    pub cache_cluster_create_time: Option<String>,
    pub cluster_create_time: Option<String>,
    pub snapshot_create_time: Option<String>,
    pub at_rest_encryption_enabled: Option<bool>,
    pub transit_encryption_enabled: Option<bool>,
}

impl ClusterMeta {
    /// Node list length, else the reported count, else zero.
    pub fn node_count(&self) -> u32 {
        let listed = self.cache_nodes.as_ref().map(|n| n.len() as u32).unwrap_or(0);
        if listed > 0 {
            return listed;
        }
        self.num_cache_nodes.or(self.num_nodes).unwrap_or(0)
    }

    pub fn provided_arn(&self) -> Option<&str> {
        self.arn.as_deref().or(self.cluster_arn.as_deref()).filter(|a| !a.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GroupMeta {
    pub replication_group_id: Option<String>,
    #[serde(rename = "ARN")]
    pub arn: Option<String>,
    #[serde(rename = "ReplicationGroupARN")]
    pub replication_group_arn: Option<String>,
    pub description: Option<String>,
    pub engine: Option<String>,
    pub engine_version: Option<String>,
    pub cache_node_type: Option<String>,
    #[serde(default)]
    pub member_clusters: Vec<String>,
    pub at_rest_encryption_enabled: Option<bool>,
    pub transit_encryption_enabled: Option<bool>,
}

impl GroupMeta {
    pub fn provided_arn(&self) -> Option<&str> {
        self.arn.as_deref().or(self.replication_group_arn.as_deref()).filter(|a| !a.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Tag {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct DescribeCacheClustersResponse {
    #[serde(default)]
    pub cache_clusters: Vec<ClusterMeta>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct DescribeReplicationGroupsResponse {
    #[serde(default)]
    pub replication_groups: Vec<GroupMeta>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ListTagsResponse {
    #[serde(default)]
    pub tag_list: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct CallerIdentityResponse {
    pub account: String,
}
