//! Provider capability boundary and the resource describer helpers built on it.

use inventory_core::{ProviderError, ScanError};
use std::collections::HashMap;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{error, warn};

pub mod aws_cli;
#[cfg(any(test, feature = "fake"))]
pub mod fake;
pub mod meta;
pub mod profiles;

pub use aws_cli::AwsCliProvider;
pub use meta::{CacheNode, ClusterMeta, GroupMeta, Tag};
pub use profiles::available_profiles;

/// Opens per-profile sessions. Shared across worker threads.
pub trait Provider: Send + Sync {
    fn open_session(&self, profile: &str) -> Result<Box<dyn Session>, ProviderError>;
}

/// Credentials for one profile.
pub trait Session: Send {
    /// Account id of the caller; the first call made for every profile.
    fn caller_identity(&self) -> Result<String, ProviderError>;
    fn region_client(&self, region: &str) -> Result<Box<dyn RegionClient>, ProviderError>;
}

/// Cache API calls scoped to one region.
pub trait RegionClient: Send {
    fn region(&self) -> &str;
    fn describe_clusters(&self, show_node_info: bool) -> Result<Vec<ClusterMeta>, ProviderError>;
    fn describe_replication_groups(&self) -> Result<Vec<GroupMeta>, ProviderError>;
    /// Always requests node detail.
    fn describe_single_cluster(&self, cluster_id: &str) -> Result<Option<ClusterMeta>, ProviderError>;
    fn list_tags(&self, arn: &str) -> Result<Vec<Tag>, ProviderError>;
}

/// Fetch tags for a resource as a key/value map.
///
/// Credential failures propagate. Anything else is logged and yields an
/// empty map, so tags are best-effort.
pub fn list_tags_for_resource(client: &dyn RegionClient, arn: &str) -> Result<HashMap<String, String>, ScanError> {
    match client.list_tags(arn) {
        Ok(tags) => Ok(tags.into_iter().map(|t| (t.key, t.value)).collect()),
        Err(e) => match ScanError::classify(e) {
            ScanError::Recoverable(e) => {
                warn!(arn, error = %e, "failed to list tags");
                Ok(HashMap::new())
            }
            other => {
                error!(arn, "failed to list tags: credentials appear invalid or expired, refresh your AWS session");
                Err(other)
            }
        },
    }
}

/// Describe one cluster with node detail. Not found or a non-credential
/// failure yields `None`.
pub fn describe_cache_cluster(client: &dyn RegionClient, cluster_id: &str) -> Result<Option<ClusterMeta>, ScanError> {
    match client.describe_single_cluster(cluster_id) {
        Ok(found) => Ok(found),
        Err(e) => match ScanError::classify(e) {
            ScanError::Recoverable(e) => {
                warn!(cluster_id, region = client.region(), error = %e, "failed to describe cache cluster");
                Ok(None)
            }
            other => {
                warn!(
                    cluster_id,
                    region = client.region(),
                    "failed to describe cache cluster: credentials appear invalid or expired"
                );
                Err(other)
            }
        },
    }
}

/// Build an ARN for the two known resource types; anything else gets an
/// empty string rather than an invented ARN.
pub fn try_construct_arn(resource_type: &str, region: &str, account_id: &str, resource_id: &str) -> String {
    if resource_type != "replication-group" && resource_type != "cluster" {
        return String::new();
    }
    format!("arn:aws:elasticache:{region}:{account_id}:{resource_type}:{resource_id}")
}

/// First populated creation timestamp among the known field names.
pub fn format_creation_time(meta: &ClusterMeta) -> Option<String> {
    [&meta.cache_cluster_create_time, &meta.cluster_create_time, &meta.snapshot_create_time]
        .into_iter()
        .flatten()
        .find(|v| !v.is_empty())
        .cloned()
}

/// Earliest timestamp. Unparseable values only win when nothing parses.
pub fn earliest_timestamp<I>(times: I) -> Option<String>
where
    I: IntoIterator<Item = String>,
{
    times
        .into_iter()
        .map(|t| (OffsetDateTime::parse(&t, &Rfc3339).ok(), t))
        .min_by(|(pa, a), (pb, b)| match (pa, pb) {
            (Some(x), Some(y)) => x.cmp(y).then_with(|| a.cmp(b)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.cmp(b),
        })
        .map(|(_, t)| t)
}
