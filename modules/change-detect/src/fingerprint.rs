use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

const SEED: u32 = 0x5eed_cafe;

/// The change-relevant view of a resource. Sets and maps are ordered so the
/// serialized form is canonical.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FingerprintFields {
    pub engine: String,
    pub engine_version: String,
    pub node_types: BTreeSet<String>,
    pub num_nodes: u32,
    pub at_rest_encryption: bool,
    pub transit_encryption: bool,
    pub tags: BTreeMap<String, String>,
}

impl FingerprintFields {
    /// MurmurHash3 x64/128 of the canonical JSON form. Not collision-proof;
    /// a collision only suppresses one report refresh.
    pub fn fingerprint(&self) -> Fingerprint {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        let digest = murmur3::murmur3_x64_128(&mut canonical.as_slice(), SEED).unwrap_or_default();
        Fingerprint(format!("{digest:032x}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Fingerprint {
    fn from(s: String) -> Self {
        Fingerprint(s)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
