//! Flat inventory records built from provider metadata, node statistics and tags.

use change_detect::FingerprintFields;
use describer::{
    describe_cache_cluster, earliest_timestamp, format_creation_time, list_tags_for_resource, try_construct_arn,
    ClusterMeta, GroupMeta, RegionClient,
};
use inventory_core::{ResourceKind, ResourceRecord, ScanConfig, ScanError, TagValue};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// Where a resource lives and what to collect for it.
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
    pub profile: &'a str,
    pub account_id: &'a str,
    pub region: &'a str,
    pub config: &'a ScanConfig,
}

fn non_empty(s: &Option<String>) -> Option<&str> {
    s.as_deref().filter(|s| !s.is_empty())
}

/// Resource name at the end of an ARN, used when the id field is absent.
fn arn_resource_id(arn: &str) -> Option<String> {
    let (_, tail) = arn.rsplit_once(':')?;
    Some(tail.to_string()).filter(|t| !t.is_empty())
}

/// Cluster id, else the name carried by a provider ARN. `None` when the
/// record has no identity at all.
pub fn cluster_id(meta: &ClusterMeta) -> Option<String> {
    non_empty(&meta.cache_cluster_id).map(str::to_string).or_else(|| meta.provided_arn().and_then(arn_resource_id))
}

pub fn group_id(meta: &GroupMeta) -> Option<String> {
    non_empty(&meta.replication_group_id).map(str::to_string).or_else(|| meta.provided_arn().and_then(arn_resource_id))
}

/// Provider ARN if present, else one constructed from the account and id.
pub fn cluster_arn(ctx: &BuildContext<'_>, meta: &ClusterMeta) -> Option<String> {
    if let Some(arn) = meta.provided_arn() {
        return Some(arn.to_string());
    }
    let id = non_empty(&meta.cache_cluster_id)?;
    Some(try_construct_arn(ResourceKind::Cluster.arn_segment(), ctx.region, ctx.account_id, id)).filter(|a| !a.is_empty())
}

pub fn group_arn(ctx: &BuildContext<'_>, meta: &GroupMeta) -> Option<String> {
    if let Some(arn) = meta.provided_arn() {
        return Some(arn.to_string());
    }
    let id = non_empty(&meta.replication_group_id)?;
    Some(try_construct_arn(ResourceKind::ReplicationGroup.arn_segment(), ctx.region, ctx.account_id, id))
        .filter(|a| !a.is_empty())
}

fn hashed_tags(tags: &HashMap<String, String>, keys: &[String]) -> BTreeMap<String, String> {
    keys.iter().filter_map(|k| tags.get(k).map(|v| (k.clone(), v.clone()))).collect()
}

fn single_type(node_type: &Option<String>) -> BTreeSet<String> {
    node_type.iter().filter(|t| !t.is_empty()).cloned().collect()
}

/// Change-relevant fields from the describe-all payload alone.
pub fn cluster_fingerprint_fields(meta: &ClusterMeta, tags: &HashMap<String, String>, hashed: &[String]) -> FingerprintFields {
    FingerprintFields {
        engine: meta.engine.clone().unwrap_or_default(),
        engine_version: meta.engine_version.clone().unwrap_or_default(),
        node_types: single_type(&meta.cache_node_type),
        num_nodes: meta.node_count(),
        at_rest_encryption: meta.at_rest_encryption_enabled.unwrap_or(false),
        transit_encryption: meta.transit_encryption_enabled.unwrap_or(false),
        tags: hashed_tags(tags, hashed),
    }
}

/// Group node count here is the member count, whatever the node-detail setting.
pub fn group_fingerprint_fields(meta: &GroupMeta, tags: &HashMap<String, String>, hashed: &[String]) -> FingerprintFields {
    FingerprintFields {
        engine: meta.engine.clone().unwrap_or_default(),
        engine_version: meta.engine_version.clone().unwrap_or_default(),
        node_types: single_type(&meta.cache_node_type),
        num_nodes: meta.member_clusters.len() as u32,
        at_rest_encryption: meta.at_rest_encryption_enabled.unwrap_or(false),
        transit_encryption: meta.transit_encryption_enabled.unwrap_or(false),
        tags: hashed_tags(tags, hashed),
    }
}

/// Tags for an ARN, or nothing when no ARN could be resolved.
pub fn fetch_tags(client: &dyn RegionClient, arn: Option<&str>) -> Result<HashMap<String, String>, ScanError> {
    match arn {
        Some(arn) => list_tags_for_resource(client, arn),
        None => Ok(HashMap::new()),
    }
}

fn resolve_tags(requested: &[String], found: &HashMap<String, String>) -> Vec<(String, TagValue)> {
    requested
        .iter()
        .map(|k| {
            let v = found.get(k).map(|v| TagValue::Found(v.clone())).unwrap_or(TagValue::NotFound);
            (k.clone(), v)
        })
        .collect()
}

/// Record for a standalone cluster. `prefetched` tags skip the tag call.
pub fn build_cluster_record(
    ctx: &BuildContext<'_>,
    client: &dyn RegionClient,
    meta: &ClusterMeta,
    prefetched: Option<HashMap<String, String>>,
) -> Result<ResourceRecord, ScanError> {
    let id = cluster_id(meta).unwrap_or_default();
    let arn = cluster_arn(ctx, meta);
    let tags = match prefetched {
        Some(t) => t,
        None => fetch_tags(client, arn.as_deref())?,
    };
    debug!(profile = ctx.profile, region = ctx.region, resource_id = %id, "built cache cluster record");
    Ok(ResourceRecord {
        profile: ctx.profile.to_string(),
        account_id: ctx.account_id.to_string(),
        region: ctx.region.to_string(),
        kind: ResourceKind::Cluster,
        resource_id: id,
        arn: arn.unwrap_or_default(),
        engine: meta.engine.clone().unwrap_or_default(),
        engine_version: meta.engine_version.clone().unwrap_or_default(),
        creation_time: format_creation_time(meta).unwrap_or_default(),
        node_types: single_type(&meta.cache_node_type),
        num_nodes: meta.node_count(),
        at_rest_encryption: meta.at_rest_encryption_enabled.unwrap_or(false),
        transit_encryption: meta.transit_encryption_enabled.unwrap_or(false),
        tags: resolve_tags(&ctx.config.tags, &tags),
    })
}

#[derive(Debug, Default)]
struct MemberStats {
    node_types: BTreeSet<String>,
    total_nodes: u32,
    creation_times: Vec<String>,
    engine: Option<String>,
    engine_version: Option<String>,
}

/// Per-member describes, one call per member cluster. Members that cannot
/// be described are left out of the totals.
fn member_stats(client: &dyn RegionClient, members: &[String]) -> Result<MemberStats, ScanError> {
    let mut stats = MemberStats::default();
    for member in members {
        let Some(cc) = describe_cache_cluster(client, member)? else { continue };
        stats.node_types.extend(single_type(&cc.cache_node_type));
        stats.total_nodes += cc.cache_nodes.as_ref().map_or(0, |n| n.len() as u32);
        if let Some(t) = format_creation_time(&cc) {
            stats.creation_times.push(t);
        }
        if stats.engine.is_none() {
            stats.engine = cc.engine.clone();
            stats.engine_version = cc.engine_version.clone();
        }
    }
    Ok(stats)
}

/// Record for a replication group.
///
/// With node detail the node count is exact and the creation time is the
/// earliest member's. Without it the node count is the member-cluster count
/// and the creation time is unknown.
pub fn build_group_record(
    ctx: &BuildContext<'_>,
    client: &dyn RegionClient,
    meta: &GroupMeta,
    prefetched: Option<HashMap<String, String>>,
) -> Result<ResourceRecord, ScanError> {
    let id = group_id(meta).unwrap_or_default();
    let mut node_types = single_type(&meta.cache_node_type);
    let mut engine = meta.engine.clone();
    let mut engine_version = meta.engine_version.clone();
    let (num_nodes, creation_time) = if ctx.config.node_info {
        let stats = member_stats(client, &meta.member_clusters)?;
        node_types.extend(stats.node_types);
        if engine.is_none() {
            engine = stats.engine;
            engine_version = engine_version.or(stats.engine_version);
        }
        (stats.total_nodes, earliest_timestamp(stats.creation_times).unwrap_or_default())
    } else {
        (meta.member_clusters.len() as u32, String::new())
    };

    let arn = group_arn(ctx, meta);
    let tags = match prefetched {
        Some(t) => t,
        None => fetch_tags(client, arn.as_deref())?,
    };
    debug!(profile = ctx.profile, region = ctx.region, resource_id = %id, "built replication group record");
    Ok(ResourceRecord {
        profile: ctx.profile.to_string(),
        account_id: ctx.account_id.to_string(),
        region: ctx.region.to_string(),
        kind: ResourceKind::ReplicationGroup,
        resource_id: id,
        arn: arn.unwrap_or_default(),
        engine: engine.unwrap_or_default(),
        engine_version: engine_version.unwrap_or_default(),
        creation_time,
        node_types,
        num_nodes,
        at_rest_encryption: meta.at_rest_encryption_enabled.unwrap_or(false),
        transit_encryption: meta.transit_encryption_enabled.unwrap_or(false),
        tags: resolve_tags(&ctx.config.tags, &tags),
    })
}
