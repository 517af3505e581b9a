//! Provider backed by the `aws` command-line tool.

use crate::meta::{
    CallerIdentityResponse, ClusterMeta, DescribeCacheClustersResponse, DescribeReplicationGroupsResponse, GroupMeta,
    ListTagsResponse, Tag,
};
use crate::{Provider, RegionClient, Session};
use inventory_core::ProviderError;
use regex::Regex;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, OnceLock};
use tracing::debug;

const CLI_ERROR_PATTERN: &str =
    r"An error occurred \((?P<code>[^)]+)\) when calling the (?P<op>\w+) operation(?: \([^)]*\))?: (?P<msg>.*)";
const REGION_PATTERN: &str = r"^[a-z]{2}(-[a-z]+)+-\d+$";

fn cli_error_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(CLI_ERROR_PATTERN).ok()).as_ref()
}

fn region_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(REGION_PATTERN).ok()).as_ref()
}

/// Turn the CLI's stderr into a provider error, keeping the error code when
/// the message carries one.
pub fn parse_cli_error(operation: &str, stderr: &str) -> ProviderError {
    let text = stderr.trim();
    if let Some(caps) = cli_error_regex().and_then(|re| re.captures(text)) {
        return ProviderError::api(&caps["op"], &caps["code"], caps["msg"].trim());
    }
    if text.is_empty() {
        ProviderError::Transport(format!("{operation} failed without output"))
    } else {
        ProviderError::Transport(text.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct AwsCliProvider {
    binary: Arc<PathBuf>,
}

impl Default for AwsCliProvider {
    fn default() -> Self {
        AwsCliProvider::new("aws")
    }
}

impl AwsCliProvider {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        AwsCliProvider { binary: Arc::new(binary.into()) }
    }
}

impl Provider for AwsCliProvider {
    fn open_session(&self, profile: &str) -> Result<Box<dyn Session>, ProviderError> {
        Ok(Box::new(CliSession { binary: self.binary.clone(), profile: profile.to_string() }))
    }
}

struct CliSession {
    binary: Arc<PathBuf>,
    profile: String,
}

fn run_json<T: DeserializeOwned>(
    binary: &Path,
    profile: &str,
    region: Option<&str>,
    operation: &str,
    args: &[&str],
) -> Result<T, ProviderError> {
    let mut cmd = Command::new(binary);
    cmd.args(args).arg("--profile").arg(profile).arg("--output").arg("json");
    if let Some(r) = region {
        cmd.arg("--region").arg(r);
    }
    cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
    debug!(profile, region, operation, "invoking aws cli");
    let out = cmd.output()?;
    if !out.status.success() {
        return Err(parse_cli_error(operation, &String::from_utf8_lossy(&out.stderr)));
    }
    Ok(serde_json::from_slice(&out.stdout)?)
}

impl Session for CliSession {
    fn caller_identity(&self) -> Result<String, ProviderError> {
        let resp: CallerIdentityResponse =
            run_json(&self.binary, &self.profile, None, "GetCallerIdentity", &["sts", "get-caller-identity"])?;
        Ok(resp.account)
    }

    fn region_client(&self, region: &str) -> Result<Box<dyn RegionClient>, ProviderError> {
        if !region_regex().map_or(false, |re| re.is_match(region)) {
            return Err(ProviderError::Transport(format!("invalid region name: {region:?}")));
        }
        Ok(Box::new(CliRegionClient {
            binary: self.binary.clone(),
            profile: self.profile.clone(),
            region: region.to_string(),
        }))
    }
}

struct CliRegionClient {
    binary: Arc<PathBuf>,
    profile: String,
    region: String,
}

impl CliRegionClient {
    fn call<T: DeserializeOwned>(&self, operation: &str, args: &[&str]) -> Result<T, ProviderError> {
        run_json(&self.binary, &self.profile, Some(&self.region), operation, args)
    }
}

impl RegionClient for CliRegionClient {
    fn region(&self) -> &str {
        &self.region
    }

    fn describe_clusters(&self, show_node_info: bool) -> Result<Vec<ClusterMeta>, ProviderError> {
        let node_flag = if show_node_info { "--show-cache-node-info" } else { "--no-show-cache-node-info" };
        let resp: DescribeCacheClustersResponse =
            self.call("DescribeCacheClusters", &["elasticache", "describe-cache-clusters", node_flag])?;
        Ok(resp.cache_clusters)
    }

    fn describe_replication_groups(&self) -> Result<Vec<GroupMeta>, ProviderError> {
        let resp: DescribeReplicationGroupsResponse =
            self.call("DescribeReplicationGroups", &["elasticache", "describe-replication-groups"])?;
        Ok(resp.replication_groups)
    }

    fn describe_single_cluster(&self, cluster_id: &str) -> Result<Option<ClusterMeta>, ProviderError> {
        let result: Result<DescribeCacheClustersResponse, _> = self.call(
            "DescribeCacheClusters",
            &["elasticache", "describe-cache-clusters", "--cache-cluster-id", cluster_id, "--show-cache-node-info"],
        );
        match result {
            Ok(resp) => Ok(resp.cache_clusters.into_iter().next()),
            Err(e) if e.code() == Some("CacheClusterNotFound") => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn list_tags(&self, arn: &str) -> Result<Vec<Tag>, ProviderError> {
        let resp: ListTagsResponse =
            self.call("ListTagsForResource", &["elasticache", "list-tags-for-resource", "--resource-name", arn])?;
        Ok(resp.tag_list)
    }
}
