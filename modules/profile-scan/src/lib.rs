//! Per-profile region scanning and the bounded multi-profile fan-out.

mod orchestrator;

pub use orchestrator::{scan_profiles, ScanOutcome};

use change_detect::{unchanged, FingerprintFields, Observation, ProfileState};
use describer::{ClusterMeta, GroupMeta, Provider, RegionClient, Session};
use inventory_core::{credential_remediation, ProviderError, ResourceRecord, ScanConfig, ScanError};
use row_builder::BuildContext;
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

/// Terminal state of one profile's scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileStatus {
    Completed,
    /// Credentials were rejected; carries the remediation message.
    CredentialFailure(String),
    /// Any other profile-level failure; carries the raw error text.
    Failed(String),
}

impl ProfileStatus {
    pub fn failure_message(&self) -> Option<&str> {
        match self {
            ProfileStatus::Completed => None,
            ProfileStatus::CredentialFailure(m) | ProfileStatus::Failed(m) => Some(m),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, ProfileStatus::Completed)
    }
}

#[derive(Debug, Clone)]
pub struct ProfileScan {
    pub profile: String,
    pub account_id: Option<String>,
    pub records: Vec<ResourceRecord>,
    /// Every resource seen, rebuilt or skipped as unchanged.
    pub observations: Vec<Observation>,
    pub status: ProfileStatus,
}

impl ProfileScan {
    pub fn failed(profile: &str, status: ProfileStatus) -> Self {
        ProfileScan { profile: profile.to_string(), account_id: None, records: Vec::new(), observations: Vec::new(), status }
    }
}

/// Scan every configured region of one profile, sequentially.
///
/// Identity failures end in a failed `ProfileScan`. A credential failure
/// after authentication aborts the profile and is returned as `Err`; every
/// other error is contained at the resource or region it happened in.
pub fn scan_profile(
    provider: &dyn Provider,
    profile: &str,
    config: &ScanConfig,
    previous: Option<&ProfileState>,
) -> Result<ProfileScan, ScanError> {
    let (session, account_id) = match authenticate(provider, profile) {
        Ok(found) => found,
        Err(status) => return Ok(ProfileScan::failed(profile, status)),
    };
    info!(profile, account_id = %account_id, "scanning profile");

    let mut scan = ProfileScan {
        profile: profile.to_string(),
        account_id: Some(account_id.clone()),
        records: Vec::new(),
        observations: Vec::new(),
        status: ProfileStatus::Completed,
    };
    for region in &config.regions {
        let client = match session.region_client(region) {
            Ok(c) => c,
            Err(e) => {
                warn!(profile, region = %region, error = %e, "could not create client, skipping region");
                continue;
            }
        };
        let mut region_scan = RegionScan {
            ctx: BuildContext { profile, account_id: &account_id, region, config },
            client: client.as_ref(),
            previous,
            records: Vec::new(),
            observations: Vec::new(),
        };
        if config.include_replication_groups {
            region_scan.replication_groups()?;
        }
        region_scan.cache_clusters()?;
        debug!(profile, region = %region, rows = region_scan.records.len(), "region done");
        scan.records.append(&mut region_scan.records);
        scan.observations.append(&mut region_scan.observations);
    }
    info!(profile, rows = scan.records.len(), seen = scan.observations.len(), "profile scan complete");
    Ok(scan)
}

fn authenticate(provider: &dyn Provider, profile: &str) -> Result<(Box<dyn Session>, String), ProfileStatus> {
    let resolved = provider.open_session(profile).and_then(|session| {
        let account_id = session.caller_identity()?;
        Ok((session, account_id))
    });
    resolved.map_err(|e| match ScanError::classify(e) {
        ScanError::Credential(e) => {
            let message = credential_remediation(profile);
            warn!(profile, "{message}");
            debug!(profile, error = %e, "identity check rejected");
            ProfileStatus::CredentialFailure(message)
        }
        other => {
            error!(profile, error = ?other, "failed to resolve account identity");
            ProfileStatus::Failed(other.to_string())
        }
    })
}

struct RegionScan<'a> {
    ctx: BuildContext<'a>,
    client: &'a dyn RegionClient,
    previous: Option<&'a ProfileState>,
    records: Vec<ResourceRecord>,
    observations: Vec<Observation>,
}

impl<'a> RegionScan<'a> {
    /// Describe-all result, or nothing when the call failed recoverably.
    fn listed<T>(&self, what: &str, result: Result<Vec<T>, ProviderError>) -> Result<Vec<T>, ScanError> {
        match result {
            Ok(items) => Ok(items),
            Err(e) => match ScanError::classify(e) {
                ScanError::Recoverable(e) => {
                    warn!(profile = self.ctx.profile, region = self.ctx.region, error = %e, "failed to describe {what}");
                    Ok(Vec::new())
                }
                other => {
                    warn!(
                        profile = self.ctx.profile,
                        region = self.ctx.region,
                        "{}",
                        credential_remediation(self.ctx.profile)
                    );
                    Err(other)
                }
            },
        }
    }

    fn replication_groups(&mut self) -> Result<(), ScanError> {
        let groups = self.listed("replication groups", self.client.describe_replication_groups())?;
        for meta in &groups {
            match self.replication_group(meta) {
                Ok(()) => {}
                Err(e) if e.is_credential() => return Err(e),
                Err(e) => warn!(
                    profile = self.ctx.profile,
                    region = self.ctx.region,
                    resource_id = meta.replication_group_id.as_deref().unwrap_or_default(),
                    error = %e,
                    "error processing replication group"
                ),
            }
        }
        Ok(())
    }

    fn cache_clusters(&mut self) -> Result<(), ScanError> {
        let clusters = self.listed("cache clusters", self.client.describe_clusters(self.ctx.config.node_info))?;
        for meta in &clusters {
            match self.cache_cluster(meta) {
                Ok(()) => {}
                Err(e) if e.is_credential() => return Err(e),
                Err(e) => warn!(
                    profile = self.ctx.profile,
                    region = self.ctx.region,
                    resource_id = meta.cache_cluster_id.as_deref().unwrap_or_default(),
                    error = %e,
                    "error processing cache cluster"
                ),
            }
        }
        Ok(())
    }

    fn replication_group(&mut self, meta: &GroupMeta) -> Result<(), ScanError> {
        let id = row_builder::group_id(meta);
        let prefetched = self.prefetch_tags(row_builder::group_arn(&self.ctx, meta))?;
        let fields = row_builder::group_fingerprint_fields(
            meta,
            prefetched.as_ref().unwrap_or(&HashMap::new()),
            &self.ctx.config.fingerprint_tags,
        );
        let (ctx, client) = (self.ctx, self.client);
        self.settle(id.as_deref(), fields, move || row_builder::build_group_record(&ctx, client, meta, prefetched))
    }

    fn cache_cluster(&mut self, meta: &ClusterMeta) -> Result<(), ScanError> {
        let id = row_builder::cluster_id(meta);
        let prefetched = self.prefetch_tags(row_builder::cluster_arn(&self.ctx, meta))?;
        let fields = row_builder::cluster_fingerprint_fields(
            meta,
            prefetched.as_ref().unwrap_or(&HashMap::new()),
            &self.ctx.config.fingerprint_tags,
        );
        let (ctx, client) = (self.ctx, self.client);
        self.settle(id.as_deref(), fields, move || row_builder::build_cluster_record(&ctx, client, meta, prefetched))
    }

    /// Tags are only needed ahead of the change check when some of them are hashed.
    fn prefetch_tags(&self, arn: Option<String>) -> Result<Option<HashMap<String, String>>, ScanError> {
        if self.ctx.config.fingerprint_tags.is_empty() {
            return Ok(None);
        }
        row_builder::fetch_tags(self.client, arn.as_deref()).map(Some)
    }

    /// Skip the build when incremental and unchanged; either way the
    /// resource is observed once it is accounted for. A resource without an
    /// id is always built and never observed.
    fn settle<F>(&mut self, id: Option<&str>, fields: FingerprintFields, build: F) -> Result<(), ScanError>
    where
        F: FnOnce() -> Result<ResourceRecord, ScanError>,
    {
        let Some(id) = id else {
            warn!(profile = self.ctx.profile, region = self.ctx.region, "resource has no identifier, reporting without change tracking");
            self.records.push(build()?);
            return Ok(());
        };
        let skip = self.ctx.config.incremental && unchanged(id, &fields, self.previous, self.ctx.region);
        if skip {
            debug!(profile = self.ctx.profile, region = self.ctx.region, resource_id = id, "skipping unchanged resource");
        } else {
            self.records.push(build()?);
        }
        self.observations.push(Observation {
            region: self.ctx.region.to_string(),
            resource_id: id.to_string(),
            fingerprint: fields.fingerprint(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use change_detect::ScanState;
    use describer::fake::{Account, FakeProvider, Op};
    use inventory_core::{ResourceKind, TagValue};

    const ACCOUNT: &str = "111122223333";
    const C1_ARN: &str = "arn:aws:elasticache:us-east-1:111122223333:cluster:c1";

    fn c1() -> ClusterMeta {
        ClusterMeta {
            cache_cluster_id: Some("c1".into()),
            engine: Some("redis".into()),
            engine_version: Some("6.0.6".into()),
            cache_node_type: Some("cache.t3.medium".into()),
            num_cache_nodes: Some(3),
            ..Default::default()
        }
    }

    fn acct_a() -> Account {
        Account::new(ACCOUNT).with_cluster("us-east-1", c1()).with_tags(C1_ARN, &[("Team", "Infra")])
    }

    fn config() -> ScanConfig {
        ScanConfig::new(vec!["us-east-1".into()], vec!["Team".into()])
    }

    fn group() -> GroupMeta {
        GroupMeta {
            replication_group_id: Some("rg1".into()),
            engine: Some("redis".into()),
            engine_version: Some("7.0.0".into()),
            member_clusters: vec!["c1".into()],
            ..Default::default()
        }
    }

    #[test]
    fn single_cluster_end_to_end() {
        let provider = FakeProvider::new().with_account("acctA", acct_a());
        let scan = scan_profile(&provider, "acctA", &config(), None).unwrap();
        assert_eq!(scan.status, ProfileStatus::Completed);
        assert_eq!(scan.account_id.as_deref(), Some(ACCOUNT));
        assert_eq!(scan.records.len(), 1);
        let rec = &scan.records[0];
        assert_eq!(rec.kind, ResourceKind::Cluster);
        assert_eq!(rec.resource_id, "c1");
        assert_eq!(rec.num_nodes, 3);
        assert_eq!(rec.tag("Team"), Some(&TagValue::Found("Infra".into())));
        assert_eq!(scan.observations.len(), 1);
        assert_eq!(provider.calls().describe_clusters, vec![("us-east-1".to_string(), false)]);
    }

    #[test]
    fn replication_groups_excluded_unless_enabled() {
        let provider = FakeProvider::new().with_account("acctA", acct_a().with_group("us-east-1", group()));
        let scan = scan_profile(&provider, "acctA", &config(), None).unwrap();
        assert!(scan.records.iter().all(|r| r.kind != ResourceKind::ReplicationGroup));
        assert!(provider.calls().describe_groups.is_empty());

        let mut cfg = config();
        cfg.include_replication_groups = true;
        let scan = scan_profile(&provider, "acctA", &cfg, None).unwrap();
        let kinds: Vec<_> = scan.records.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![ResourceKind::ReplicationGroup, ResourceKind::Cluster]);
    }

    #[test]
    fn transient_resource_errors_do_not_hide_siblings() {
        let c2 = ClusterMeta { cache_cluster_id: Some("c2".into()), num_cache_nodes: Some(1), ..Default::default() };
        let account = acct_a()
            .with_cluster("us-east-1", ClusterMeta::default())
            .with_cluster("us-east-1", c2)
            .fail_for(Op::ListTags, C1_ARN, "Throttling");
        let provider = FakeProvider::new().with_account("acctA", account);
        let scan = scan_profile(&provider, "acctA", &config(), None).unwrap();
        let ids: Vec<_> = scan.records.iter().map(|r| r.resource_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "", "c2"]);
        assert_eq!(scan.records[0].tag("Team"), Some(&TagValue::NotFound));
        assert_eq!(scan.observations.len(), 2);
    }

    #[test]
    fn cluster_without_id_is_reported_but_not_tracked() {
        let anonymous = ClusterMeta { engine: Some("redis".into()), num_cache_nodes: Some(2), ..Default::default() };
        let provider =
            FakeProvider::new().with_account("acctA", Account::new(ACCOUNT).with_cluster("us-east-1", anonymous));
        let mut cfg = config();
        cfg.incremental = true;
        let scan = scan_profile(&provider, "acctA", &cfg, None).unwrap();
        assert_eq!(scan.status, ProfileStatus::Completed);
        assert_eq!(scan.records.len(), 1);
        let rec = &scan.records[0];
        assert_eq!(rec.resource_id, "");
        assert_eq!(rec.arn, "");
        assert_eq!(rec.num_nodes, 2);
        assert_eq!(rec.tag("Team"), Some(&TagValue::NotFound));
        assert!(provider.calls().list_tags.is_empty());
        assert!(scan.observations.is_empty());
    }

    #[test]
    fn identity_credential_failure_yields_remediation() {
        let provider =
            FakeProvider::new().with_account("acctA", acct_a().fail(Op::CallerIdentity, "ExpiredToken"));
        let scan = scan_profile(&provider, "acctA", &config(), None).unwrap();
        assert!(scan.records.is_empty());
        match &scan.status {
            ProfileStatus::CredentialFailure(m) => assert!(m.contains("aws sso login --profile acctA")),
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[test]
    fn identity_other_failure_keeps_raw_text() {
        let provider = FakeProvider::new();
        let scan = scan_profile(&provider, "ghost", &config(), None).unwrap();
        assert!(scan.records.is_empty());
        assert_eq!(
            scan.status.failure_message(),
            Some("The config profile (ghost) could not be found")
        );
    }

    #[test]
    fn credential_failure_mid_scan_aborts_profile() {
        let provider =
            FakeProvider::new().with_account("acctA", acct_a().fail(Op::DescribeClusters, "InvalidClientTokenId"));
        let err = scan_profile(&provider, "acctA", &config(), None).unwrap_err();
        assert!(err.is_credential());
    }

    #[test]
    fn failing_region_client_skips_only_that_region() {
        let provider =
            FakeProvider::new().with_account("acctA", acct_a().fail_for(Op::RegionClient, "eu-west-1", "InvalidRegion"));
        let cfg = ScanConfig::new(vec!["eu-west-1".into(), "us-east-1".into()], vec!["Team".into()]);
        let scan = scan_profile(&provider, "acctA", &cfg, None).unwrap();
        assert_eq!(scan.records.len(), 1);
        assert_eq!(scan.records[0].region, "us-east-1");
    }

    #[test]
    fn failed_group_describe_still_scans_clusters() {
        let account = acct_a().with_group("us-east-1", group()).fail(Op::DescribeReplicationGroups, "ServiceUnavailable");
        let provider = FakeProvider::new().with_account("acctA", account);
        let mut cfg = config();
        cfg.include_replication_groups = true;
        let scan = scan_profile(&provider, "acctA", &cfg, None).unwrap();
        assert_eq!(scan.records.len(), 1);
        assert_eq!(scan.records[0].kind, ResourceKind::Cluster);
    }

    #[test]
    fn incremental_rerun_skips_unchanged_cluster() {
        let provider = FakeProvider::new().with_account("acctA", acct_a());
        let mut cfg = config();
        cfg.incremental = true;

        let first = scan_profile(&provider, "acctA", &cfg, None).unwrap();
        assert_eq!(first.records.len(), 1);
        let mut state = ScanState::started("t0");
        for o in &first.observations {
            state.record("acctA", o, "t0");
        }
        let tag_calls = provider.calls().list_tags.len();

        let second = scan_profile(&provider, "acctA", &cfg, state.profile("acctA")).unwrap();
        assert!(second.records.is_empty());
        assert_eq!(provider.calls().list_tags.len(), tag_calls);
        assert_eq!(second.observations, first.observations);
    }

    #[test]
    fn changed_resource_is_rebuilt_on_incremental_rerun() {
        let mut cfg = config();
        cfg.incremental = true;
        let mut state = ScanState::started("t0");
        let stale = Observation {
            region: "us-east-1".into(),
            resource_id: "c1".into(),
            fingerprint: change_detect::Fingerprint::from("0".repeat(32)),
        };
        state.record("acctA", &stale, "t0");
        let provider = FakeProvider::new().with_account("acctA", acct_a());
        let scan = scan_profile(&provider, "acctA", &cfg, state.profile("acctA")).unwrap();
        assert_eq!(scan.records.len(), 1);
    }

    #[test]
    fn hashed_tags_are_fetched_once() {
        let provider = FakeProvider::new().with_account("acctA", acct_a());
        let mut cfg = config();
        cfg.fingerprint_tags = vec!["Team".into()];
        let scan = scan_profile(&provider, "acctA", &cfg, None).unwrap();
        assert_eq!(scan.records[0].tag("Team"), Some(&TagValue::Found("Infra".into())));
        assert_eq!(provider.calls().list_tags, vec![C1_ARN.to_string()]);
    }
}
