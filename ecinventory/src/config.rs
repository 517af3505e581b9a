use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// `scan:` section of the YAML config file. Every field is optional and only
/// fills options left unset on the command line.
#[derive(Debug, Default, Deserialize, Clone, PartialEq, Eq)]
pub struct ScanSection {
    pub regions: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
    pub profiles: Option<Vec<String>>,
    pub include_replication_groups: Option<bool>,
    pub node_info: Option<bool>,
    pub incremental: Option<bool>,
    pub parallel_profiles: Option<usize>,
    pub fingerprint_tags: Option<Vec<String>>,
    pub output_dir: Option<PathBuf>,
    pub out_csv: Option<String>,
    pub out_jsonl: Option<String>,
    pub out_summary: Option<String>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct Config {
    pub scan: Option<ScanSection>,
}

/// Load `path`, or `./ecinventory.yaml` when no path is given. A missing or
/// unparsable file yields `None`.
pub fn load_config(path: Option<&Path>) -> Option<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new("ecinventory.yaml");
            if p.exists() { p.to_path_buf() } else { return None; }
        }
    };
    let s = fs::read_to_string(path).ok()?;
    serde_yaml::from_str(&s).ok()
}
