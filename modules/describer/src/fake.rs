//! In-memory provider for exercising the scanner without a cloud account.

use crate::meta::{ClusterMeta, GroupMeta, Tag};
use crate::{Provider, RegionClient, Session};
use inventory_core::ProviderError;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    OpenSession,
    CallerIdentity,
    RegionClient,
    DescribeClusters,
    DescribeReplicationGroups,
    DescribeSingleCluster,
    ListTags,
}

impl Op {
    fn operation_name(&self) -> &'static str {
        match self {
            Op::OpenSession => "OpenSession",
            Op::CallerIdentity => "GetCallerIdentity",
            Op::RegionClient => "CreateClient",
            Op::DescribeClusters | Op::DescribeSingleCluster => "DescribeCacheClusters",
            Op::DescribeReplicationGroups => "DescribeReplicationGroups",
            Op::ListTags => "ListTagsForResource",
        }
    }
}

#[derive(Debug, Clone)]
struct Failure {
    op: Op,
    /// Region, cluster id or ARN depending on the op; `None` matches all.
    target: Option<String>,
    code: String,
}

/// Resources and scripted failures for one profile.
#[derive(Debug, Clone, Default)]
pub struct Account {
    account_id: String,
    clusters: BTreeMap<String, Vec<ClusterMeta>>,
    groups: BTreeMap<String, Vec<GroupMeta>>,
    tags: HashMap<String, Vec<Tag>>,
    failures: Vec<Failure>,
    panic_on_identity: bool,
}

impl Account {
    pub fn new(account_id: &str) -> Self {
        Account { account_id: account_id.to_string(), ..Default::default() }
    }

    pub fn with_cluster(mut self, region: &str, cluster: ClusterMeta) -> Self {
        self.clusters.entry(region.to_string()).or_default().push(cluster);
        self
    }

    pub fn with_group(mut self, region: &str, group: GroupMeta) -> Self {
        self.groups.entry(region.to_string()).or_default().push(group);
        self
    }

    pub fn with_tags(mut self, arn: &str, tags: &[(&str, &str)]) -> Self {
        let list = tags.iter().map(|(k, v)| Tag { key: k.to_string(), value: v.to_string() }).collect();
        self.tags.insert(arn.to_string(), list);
        self
    }

    pub fn fail(mut self, op: Op, code: &str) -> Self {
        self.failures.push(Failure { op, target: None, code: code.to_string() });
        self
    }

    pub fn fail_for(mut self, op: Op, target: &str, code: &str) -> Self {
        self.failures.push(Failure { op, target: Some(target.to_string()), code: code.to_string() });
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panic_on_identity = true;
        self
    }

    fn check(&self, op: Op, target: &str) -> Result<(), ProviderError> {
        let hit = self
            .failures
            .iter()
            .find(|f| f.op == op && f.target.as_deref().map_or(true, |t| t == target));
        match hit {
            Some(f) => Err(ProviderError::api(op.operation_name(), f.code.clone(), format!("simulated {} on {}", f.code, target))),
            None => Ok(()),
        }
    }
}

/// Calls observed by the fake, for assertions.
#[derive(Debug, Default, Clone)]
pub struct CallLog {
    pub list_tags: Vec<String>,
    pub describe_single: Vec<String>,
    pub describe_clusters: Vec<(String, bool)>,
    pub describe_groups: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeProvider {
    accounts: HashMap<String, Arc<Account>>,
    calls: Arc<Mutex<CallLog>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(mut self, profile: &str, account: Account) -> Self {
        self.accounts.insert(profile.to_string(), Arc::new(account));
        self
    }

    pub fn calls(&self) -> CallLog {
        lock(&self.calls).clone()
    }
}

fn lock(calls: &Mutex<CallLog>) -> MutexGuard<'_, CallLog> {
    calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Provider for FakeProvider {
    fn open_session(&self, profile: &str) -> Result<Box<dyn Session>, ProviderError> {
        let account = self
            .accounts
            .get(profile)
            .cloned()
            .ok_or_else(|| ProviderError::Transport(format!("The config profile ({profile}) could not be found")))?;
        account.check(Op::OpenSession, profile)?;
        Ok(Box::new(FakeSession { account, calls: self.calls.clone() }))
    }
}

struct FakeSession {
    account: Arc<Account>,
    calls: Arc<Mutex<CallLog>>,
}

impl Session for FakeSession {
    fn caller_identity(&self) -> Result<String, ProviderError> {
        if self.account.panic_on_identity {
            panic!("identity lookup blew up");
        }
        self.account.check(Op::CallerIdentity, &self.account.account_id)?;
        Ok(self.account.account_id.clone())
    }

    fn region_client(&self, region: &str) -> Result<Box<dyn RegionClient>, ProviderError> {
        self.account.check(Op::RegionClient, region)?;
        Ok(Box::new(FakeRegionClient {
            region: region.to_string(),
            account: self.account.clone(),
            calls: self.calls.clone(),
        }))
    }
}

struct FakeRegionClient {
    region: String,
    account: Arc<Account>,
    calls: Arc<Mutex<CallLog>>,
}

impl RegionClient for FakeRegionClient {
    fn region(&self) -> &str {
        &self.region
    }

    fn describe_clusters(&self, show_node_info: bool) -> Result<Vec<ClusterMeta>, ProviderError> {
        lock(&self.calls).describe_clusters.push((self.region.clone(), show_node_info));
        self.account.check(Op::DescribeClusters, &self.region)?;
        let clusters = self.account.clusters.get(&self.region).cloned().unwrap_or_default();
        Ok(clusters
            .into_iter()
            .map(|mut c| {
                if !show_node_info {
                    c.cache_nodes = None;
                }
                c
            })
            .collect())
    }

    fn describe_replication_groups(&self) -> Result<Vec<GroupMeta>, ProviderError> {
        lock(&self.calls).describe_groups.push(self.region.clone());
        self.account.check(Op::DescribeReplicationGroups, &self.region)?;
        Ok(self.account.groups.get(&self.region).cloned().unwrap_or_default())
    }

    fn describe_single_cluster(&self, cluster_id: &str) -> Result<Option<ClusterMeta>, ProviderError> {
        lock(&self.calls).describe_single.push(cluster_id.to_string());
        self.account.check(Op::DescribeSingleCluster, cluster_id)?;
        Ok(self
            .account
            .clusters
            .get(&self.region)
            .and_then(|cs| cs.iter().find(|c| c.cache_cluster_id.as_deref() == Some(cluster_id)))
            .cloned())
    }

    fn list_tags(&self, arn: &str) -> Result<Vec<Tag>, ProviderError> {
        lock(&self.calls).list_tags.push(arn.to_string());
        self.account.check(Op::ListTags, arn)?;
        Ok(self.account.tags.get(arn).cloned().unwrap_or_default())
    }
}
