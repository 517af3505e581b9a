//! Persisted scan state used to skip unchanged resources on the next run.

use crate::fingerprint::Fingerprint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, warn};

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_else(|_| String::new())
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("io error writing state: {0}")]
    Io(#[from] io::Error),
    #[error("could not encode state: {0}")]
    Json(#[from] serde_json::Error),
    #[error("could not move state into place: {0}")]
    Persist(#[from] tempfile::PersistError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceState {
    pub hash: Fingerprint,
    #[serde(default)]
    pub last_seen: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileState {
    #[serde(default)]
    pub regions: BTreeMap<String, BTreeMap<String, ResourceState>>,
}

impl ProfileState {
    pub fn resource(&self, region: &str, resource_id: &str) -> Option<&ResourceState> {
        self.regions.get(region).and_then(|r| r.get(resource_id))
    }

    pub fn resource_count(&self) -> usize {
        self.regions.values().map(BTreeMap::len).sum()
    }
}

/// One resource seen during a scan, whether rebuilt or skipped as unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub region: String,
    pub resource_id: String,
    pub fingerprint: Fingerprint,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanState {
    #[serde(default)]
    pub last_scan: Option<String>,
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileState>,
}

impl ScanState {
    pub fn started(at: impl Into<String>) -> Self {
        ScanState { last_scan: Some(at.into()), profiles: BTreeMap::new() }
    }

    /// Read state from disk. Absent, unreadable or malformed state is an
    /// empty state, never an error.
    pub fn load(path: &Path) -> Self {
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no previous scan state");
                return ScanState::default();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not read scan state, starting cold");
                return ScanState::default();
            }
        };
        match serde_json::from_str(&text) {
            Ok(state) => state,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "scan state is malformed, starting cold");
                ScanState::default()
            }
        }
    }

    /// Write atomically: a temp file in the target directory renamed over
    /// the destination.
    pub fn save(&self, path: &Path) -> Result<(), StateError> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, self)?;
        tmp.write_all(b"\n")?;
        tmp.flush()?;
        tmp.persist(path)?;
        Ok(())
    }

    pub fn profile(&self, profile: &str) -> Option<&ProfileState> {
        self.profiles.get(profile)
    }

    pub fn record(&mut self, profile: &str, observation: &Observation, seen_at: &str) {
        self.profiles
            .entry(profile.to_string())
            .or_default()
            .regions
            .entry(observation.region.clone())
            .or_default()
            .insert(
                observation.resource_id.clone(),
                ResourceState { hash: observation.fingerprint.clone(), last_seen: seen_at.to_string() },
            );
    }

    /// Keep a profile's previous entries untouched, e.g. when it failed this run.
    pub fn carry_forward(&mut self, previous: &ScanState, profile: &str) {
        if let Some(p) = previous.profiles.get(profile) {
            self.profiles.insert(profile.to_string(), p.clone());
        }
    }

    pub fn resource_count(&self) -> usize {
        self.profiles.values().map(ProfileState::resource_count).sum()
    }
}
