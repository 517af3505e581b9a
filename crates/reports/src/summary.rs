use crate::ReportError;
use inventory_core::ResourceRecord;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

/// Headline metrics over an inventory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InventorySummary {
    pub total: usize,
    pub at_rest_encrypted: usize,
    pub transit_encrypted: usize,
    pub region_count: usize,
    pub profile_count: usize,
    pub engine_versions: BTreeMap<String, usize>,
    pub resource_types: BTreeMap<String, usize>,
    pub regions: Vec<String>,
    pub accounts: Vec<String>,
    /// Distinct values across the configured tag columns.
    pub tag_values: Vec<String>,
    /// Major engine versions, e.g. `6.x`.
    pub engine_groups: Vec<String>,
}

fn major_group(version: &str) -> Option<String> {
    let major = version.split('.').next()?;
    (!major.is_empty() && major.chars().all(|c| c.is_ascii_digit())).then(|| format!("{major}.x"))
}

impl InventorySummary {
    /// `profiles` is the set of profiles that were scanned, whether or not
    /// they produced rows.
    pub fn from_records(records: &[ResourceRecord], profiles: &[String]) -> Self {
        let mut engine_versions = BTreeMap::new();
        let mut resource_types = BTreeMap::new();
        let mut regions = BTreeSet::new();
        let mut accounts = BTreeSet::new();
        let mut tag_values = BTreeSet::new();
        let mut engine_groups = BTreeSet::new();
        for rec in records {
            if !rec.engine_version.is_empty() {
                *engine_versions.entry(rec.engine_version.clone()).or_insert(0) += 1;
                engine_groups.extend(major_group(&rec.engine_version));
            }
            *resource_types.entry(rec.kind.as_str().to_string()).or_insert(0) += 1;
            regions.insert(rec.region.clone());
            accounts.insert(rec.account_id.clone());
            tag_values.extend(rec.tags.iter().filter_map(|(_, v)| v.as_found()).map(str::to_string));
        }
        InventorySummary {
            total: records.len(),
            at_rest_encrypted: records.iter().filter(|r| r.at_rest_encryption).count(),
            transit_encrypted: records.iter().filter(|r| r.transit_encryption).count(),
            region_count: regions.len(),
            profile_count: profiles.len(),
            engine_versions,
            resource_types,
            regions: regions.into_iter().collect(),
            accounts: accounts.into_iter().collect(),
            tag_values: tag_values.into_iter().collect(),
            engine_groups: engine_groups.into_iter().collect(),
        }
    }

    pub fn write(&self, path: &Path) -> Result<(), ReportError> {
        let mut w = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut w, self)?;
        w.write_all(b"\n")?;
        w.flush()?;
        info!(path = %path.display(), "wrote summary");
        Ok(())
    }

    pub fn log(&self) {
        info!(
            total = self.total,
            at_rest_encrypted = self.at_rest_encrypted,
            transit_encrypted = self.transit_encrypted,
            regions = self.region_count,
            profiles = self.profile_count,
            "inventory summary"
        );
    }
}
