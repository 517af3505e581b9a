use crate::error::ConfigError;
use std::path::{Path, PathBuf};

pub const DEFAULT_TAG: &str = "Team";
pub const DEFAULT_PARALLEL_PROFILES: usize = 4;

/// What to scan and how. Validate once, then share read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    pub regions: Vec<String>,
    pub tags: Vec<String>,
    pub include_replication_groups: bool,
    pub node_info: bool,
    pub parallel_profiles: usize,
    pub incremental: bool,
    /// Tag keys whose values take part in change detection.
    pub fingerprint_tags: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            regions: Vec::new(),
            tags: vec![DEFAULT_TAG.to_string()],
            include_replication_groups: false,
            node_info: false,
            parallel_profiles: DEFAULT_PARALLEL_PROFILES,
            incremental: false,
            fingerprint_tags: Vec::new(),
        }
    }
}

impl ScanConfig {
    pub fn new(regions: Vec<String>, tags: Vec<String>) -> Self {
        ScanConfig { regions, tags, ..Default::default() }
    }

    /// Normalize and check invariants: regions non-empty, tags non-empty.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        self.regions = dedup_trimmed(self.regions);
        self.tags = dedup_trimmed(self.tags);
        self.fingerprint_tags = dedup_trimmed(self.fingerprint_tags);
        if self.regions.is_empty() {
            return Err(ConfigError::NoRegions);
        }
        if self.tags.is_empty() {
            self.tags = vec![DEFAULT_TAG.to_string()];
        }
        if self.parallel_profiles == 0 {
            return Err(ConfigError::InvalidParallelism);
        }
        Ok(self)
    }
}

fn dedup_trimmed(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        let t = item.trim();
        if !t.is_empty() && !out.iter().any(|o| o == t) {
            out.push(t.to_string());
        }
    }
    out
}

/// Where a run writes its artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub output_dir: PathBuf,
    pub csv: String,
    pub jsonl: Option<String>,
    pub summary: String,
    pub state: String,
    pub failures: String,
    pub log: String,
}

impl Default for OutputPaths {
    fn default() -> Self {
        OutputPaths {
            output_dir: PathBuf::from("."),
            csv: "elasticache_report.csv".into(),
            jsonl: None,
            summary: "elasticache_summary.json".into(),
            state: "scan_state.json".into(),
            failures: "scan_failures.json".into(),
            log: "scan_errors.log".into(),
        }
    }
}

impl OutputPaths {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        OutputPaths { output_dir: dir.as_ref().to_path_buf(), ..Default::default() }
    }

    fn join(&self, name: &str) -> PathBuf {
        self.output_dir.join(name)
    }

    pub fn csv_path(&self) -> PathBuf { self.join(&self.csv) }
    pub fn jsonl_path(&self) -> Option<PathBuf> { self.jsonl.as_deref().map(|n| self.join(n)) }
    pub fn summary_path(&self) -> PathBuf { self.join(&self.summary) }
    pub fn state_path(&self) -> PathBuf { self.join(&self.state) }
    pub fn failures_path(&self) -> PathBuf { self.join(&self.failures) }
    pub fn log_path(&self) -> PathBuf { self.join(&self.log) }
}
