//! Profile discovery from the shared config and credentials files.

use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_PROFILE: &str = "default";

fn env_or_home(var: &str, file: &str) -> Option<PathBuf> {
    if let Some(p) = std::env::var_os(var) {
        return Some(PathBuf::from(p));
    }
    dirs::home_dir().map(|h| h.join(".aws").join(file))
}

/// All profiles the local credential files know about; `default` is always
/// included.
pub fn available_profiles() -> Vec<String> {
    let config = env_or_home("AWS_CONFIG_FILE", "config");
    let credentials = env_or_home("AWS_SHARED_CREDENTIALS_FILE", "credentials");
    profiles_from_files(config.as_deref(), credentials.as_deref())
}

pub fn profiles_from_files(config: Option<&Path>, credentials: Option<&Path>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut push = |name: String| {
        if !name.is_empty() && !out.contains(&name) {
            out.push(name);
        }
    };
    if let Some(text) = config.and_then(|p| fs::read_to_string(p).ok()) {
        parse_sections(&text, true).into_iter().for_each(&mut push);
    }
    if let Some(text) = credentials.and_then(|p| fs::read_to_string(p).ok()) {
        parse_sections(&text, false).into_iter().for_each(&mut push);
    }
    push(DEFAULT_PROFILE.to_string());
    out
}

/// Section headers naming profiles. The config file prefixes non-default
/// profiles with `profile `; other section kinds there are skipped.
fn parse_sections(text: &str, config_style: bool) -> Vec<String> {
    let mut names = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        let Some(inner) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) else { continue };
        let inner = inner.trim();
        if !config_style || inner == DEFAULT_PROFILE {
            names.push(inner.to_string());
        } else if let Some(name) = inner.strip_prefix("profile ") {
            names.push(name.trim().to_string());
        }
    }
    names
}
