use crate::{scan_profile, ProfileScan, ProfileStatus};
use change_detect::ScanState;
use describer::Provider;
use inventory_core::{credential_remediation, is_invalid_client_token, FailureReport, ResourceRecord, ScanConfig, ScanError};
use std::error::Error as StdError;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinError;
use tracing::{error, info, warn};

/// Merged result of a multi-profile scan.
///
/// Rows are moved out of each profile into `records`; `profiles` keeps the
/// per-profile status and observations.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub records: Vec<ResourceRecord>,
    pub failures: FailureReport,
    pub profiles: Vec<ProfileScan>,
}

impl ScanOutcome {
    fn merge(&mut self, mut scan: ProfileScan) {
        if let Some(message) = scan.status.failure_message() {
            self.failures.record(scan.profile.clone(), message);
        }
        self.records.append(&mut scan.records);
        self.profiles.push(scan);
    }

    /// State to persist after this scan: observations of completed profiles,
    /// previous entries for profiles that did not complete.
    pub fn next_state(&self, previous: &ScanState, now: &str) -> ScanState {
        let mut next = ScanState::started(now);
        for scan in &self.profiles {
            if scan.status.is_completed() {
                for observation in &scan.observations {
                    next.record(&scan.profile, observation, now);
                }
            } else {
                next.carry_forward(previous, &scan.profile);
            }
        }
        next
    }
}

fn failure_status(profile: &str, err: &(dyn StdError + 'static)) -> ProfileStatus {
    if is_invalid_client_token(err) {
        ProfileStatus::CredentialFailure(credential_remediation(profile))
    } else {
        ProfileStatus::Failed(err.to_string())
    }
}

fn settle(profile: &str, joined: Result<Result<ProfileScan, ScanError>, JoinError>) -> ProfileScan {
    match joined {
        Ok(Ok(scan)) => scan,
        Ok(Err(e)) => {
            warn!(profile, error = %e, "profile scan aborted");
            ProfileScan::failed(profile, failure_status(profile, &e))
        }
        Err(e) => {
            error!(profile, error = %e, "profile scan task failed");
            ProfileScan::failed(profile, failure_status(profile, &e))
        }
    }
}

/// Scan all profiles with at most `min(parallel_profiles, N)` in flight,
/// merging results as each profile finishes. Never fails as a whole.
pub async fn scan_profiles(
    provider: Arc<dyn Provider>,
    profiles: Vec<String>,
    config: Arc<ScanConfig>,
    previous: Arc<ScanState>,
) -> ScanOutcome {
    let mut outcome = ScanOutcome::default();
    if profiles.is_empty() {
        return outcome;
    }
    let width = config.parallel_profiles.min(profiles.len()).max(1);
    info!(profiles = profiles.len(), width, "starting profile scans");

    let sem = Arc::new(Semaphore::new(width));
    let (tx, mut rx) = mpsc::channel::<ProfileScan>(profiles.len());
    for profile in profiles {
        let tx = tx.clone();
        let sem = sem.clone();
        let provider = provider.clone();
        let config = config.clone();
        let previous = previous.clone();
        tokio::spawn(async move {
            let scan = match sem.acquire_owned().await {
                Ok(_permit) => {
                    let name = profile.clone();
                    let joined = tokio::task::spawn_blocking(move || {
                        scan_profile(provider.as_ref(), &name, &config, previous.profile(&name))
                    })
                    .await;
                    settle(&profile, joined)
                }
                Err(e) => ProfileScan::failed(&profile, ProfileStatus::Failed(e.to_string())),
            };
            let _ = tx.send(scan).await;
        });
    }
    drop(tx);

    while let Some(scan) = rx.recv().await {
        info!(profile = %scan.profile, rows = scan.records.len(), ok = scan.status.is_completed(), "profile finished");
        outcome.merge(scan);
    }
    info!(rows = outcome.records.len(), failed = outcome.failures.len(), "profile scans complete");
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use change_detect::{Fingerprint, Observation};
    use describer::fake::{Account, FakeProvider, Op};
    use describer::{ClusterMeta, RegionClient, Session};
    use inventory_core::ProviderError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn cluster(id: &str) -> ClusterMeta {
        ClusterMeta {
            cache_cluster_id: Some(id.into()),
            engine: Some("redis".into()),
            engine_version: Some("6.0.6".into()),
            num_cache_nodes: Some(3),
            ..Default::default()
        }
    }

    fn provider() -> FakeProvider {
        FakeProvider::new()
            .with_account(
                "good",
                Account::new("111111111111")
                    .with_cluster("us-east-1", cluster("c1"))
                    .with_tags("arn:aws:elasticache:us-east-1:111111111111:cluster:c1", &[("Team", "Infra")]),
            )
            .with_account("expired", Account::new("222222222222").fail(Op::CallerIdentity, "InvalidClientTokenId"))
            .with_account("boom", Account::new("333333333333").panicking())
            .with_account(
                "revoked",
                Account::new("444444444444")
                    .with_cluster("us-east-1", cluster("c9"))
                    .fail(Op::ListTags, "ExpiredToken"),
            )
    }

    fn config(width: usize) -> Arc<ScanConfig> {
        let mut c = ScanConfig::new(vec!["us-east-1".into()], vec!["Team".into()]);
        c.parallel_profiles = width;
        Arc::new(c)
    }

    async fn run(profiles: &[&str], width: usize) -> ScanOutcome {
        scan_profiles(
            Arc::new(provider()),
            profiles.iter().map(|p| p.to_string()).collect(),
            config(width),
            Arc::new(ScanState::default()),
        )
        .await
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failing_profile_does_not_affect_sibling() {
        let outcome = run(&["good", "expired"], 4).await;
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].profile, "good");
        assert_eq!(outcome.records[0].resource_id, "c1");
        assert_eq!(outcome.failures.len(), 1);
        let message = outcome.failures.get("expired").unwrap();
        assert!(message.contains("aws sso login --profile expired"));
        assert!(!outcome.failures.contains("good"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panicking_profile_is_recorded_as_failure() {
        let outcome = run(&["boom", "good"], 2).await;
        assert_eq!(outcome.records.len(), 1);
        assert!(outcome.failures.contains("boom"));
        assert_eq!(outcome.profiles.len(), 2);
    }

    #[tokio::test]
    async fn credential_abort_mid_scan_gets_friendly_message() {
        let outcome = run(&["revoked"], 1).await;
        assert!(outcome.records.is_empty());
        let message = outcome.failures.get("revoked").unwrap();
        assert!(message.contains("appears invalid or expired"));
        assert!(matches!(outcome.profiles[0].status, ProfileStatus::CredentialFailure(_)));
    }

    #[tokio::test]
    async fn width_one_still_scans_every_profile() {
        let outcome = run(&["good", "expired", "revoked"], 1).await;
        let mut seen: Vec<_> = outcome.profiles.iter().map(|p| p.profile.as_str()).collect();
        seen.sort();
        assert_eq!(seen, vec!["expired", "good", "revoked"]);
    }

    #[tokio::test]
    async fn no_profiles_is_empty_outcome() {
        let outcome = run(&[], 4).await;
        assert!(outcome.records.is_empty());
        assert!(outcome.failures.is_empty());
    }

    #[tokio::test]
    async fn next_state_keeps_failed_profiles_previous_entries() {
        let mut previous = ScanState::started("t0");
        let old = Observation {
            region: "us-east-1".into(),
            resource_id: "old".into(),
            fingerprint: Fingerprint::from("h".to_string()),
        };
        previous.record("expired", &old, "t0");
        previous.record("good", &old, "t0");

        let outcome = run(&["good", "expired"], 2).await;
        let next = outcome.next_state(&previous, "t1");
        assert_eq!(next.last_scan.as_deref(), Some("t1"));
        let good = next.profile("good").unwrap();
        assert!(good.resource("us-east-1", "c1").is_some());
        assert!(good.resource("us-east-1", "old").is_none());
        assert_eq!(next.profile("expired").unwrap().resource("us-east-1", "old").unwrap().last_seen, "t0");
    }

    /// Counts sessions in flight while each one authenticates.
    #[derive(Default)]
    struct Gauge {
        live: AtomicUsize,
        peak: AtomicUsize,
        opened: AtomicUsize,
    }

    struct SlowProvider(Arc<Gauge>);

    struct SlowSession(Arc<Gauge>);

    impl Provider for SlowProvider {
        fn open_session(&self, _profile: &str) -> Result<Box<dyn Session>, ProviderError> {
            self.0.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(SlowSession(self.0.clone())))
        }
    }

    impl Session for SlowSession {
        fn caller_identity(&self) -> Result<String, ProviderError> {
            let now = self.0.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.0.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            self.0.live.fetch_sub(1, Ordering::SeqCst);
            Ok("555555555555".into())
        }

        fn region_client(&self, _region: &str) -> Result<Box<dyn RegionClient>, ProviderError> {
            Err(ProviderError::Transport("no endpoint".into()))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn in_flight_profiles_never_exceed_width() {
        let gauge = Arc::new(Gauge::default());
        let profiles: Vec<String> = (0..10).map(|i| format!("p{i}")).collect();
        let outcome = scan_profiles(
            Arc::new(SlowProvider(gauge.clone())),
            profiles,
            config(3),
            Arc::new(ScanState::default()),
        )
        .await;
        let peak = gauge.peak.load(Ordering::SeqCst);
        assert!(peak >= 1 && peak <= 3, "peak {peak}");
        assert_eq!(gauge.opened.load(Ordering::SeqCst), 10);
        assert_eq!(outcome.profiles.len(), 10);
    }
}
