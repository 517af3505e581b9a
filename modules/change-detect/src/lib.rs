//! Change detection for incremental scans.

mod fingerprint;
mod state;

pub use fingerprint::{Fingerprint, FingerprintFields};
pub use state::{now_rfc3339, Observation, ProfileState, ResourceState, ScanState, StateError};

/// True when the resource's fingerprint matches what the previous scan
/// persisted for it. No previous state, or no entry for the region or id,
/// means "rescan".
pub fn unchanged(resource_id: &str, fields: &FingerprintFields, previous: Option<&ProfileState>, region: &str) -> bool {
    let Some(stored) = previous.and_then(|p| p.resource(region, resource_id)) else {
        return false;
    };
    fields.fingerprint().as_str() == stored.hash.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> FingerprintFields {
        FingerprintFields { engine: "redis".into(), engine_version: "6.0.6".into(), num_nodes: 3, ..Default::default() }
    }

    fn state_with(region: &str, id: &str, hash: Fingerprint) -> ScanState {
        let mut s = ScanState::started("t0");
        s.record("p", &Observation { region: region.into(), resource_id: id.into(), fingerprint: hash }, "t0");
        s
    }

    #[test]
    fn no_previous_state_means_changed() {
        assert!(!unchanged("c1", &fields(), None, "us-east-1"));
        let empty = ProfileState::default();
        assert!(!unchanged("c1", &fields(), Some(&empty), "us-east-1"));
    }

    #[test]
    fn absent_region_or_id_means_changed() {
        let state = state_with("us-east-1", "c1", fields().fingerprint());
        let profile = state.profile("p");
        assert!(!unchanged("c1", &fields(), profile, "sa-east-1"));
        assert!(!unchanged("c2", &fields(), profile, "us-east-1"));
    }

    #[test]
    fn matching_fingerprint_is_unchanged() {
        let state = state_with("us-east-1", "c1", fields().fingerprint());
        assert!(unchanged("c1", &fields(), state.profile("p"), "us-east-1"));
    }

    #[test]
    fn differing_fingerprint_is_changed() {
        let state = state_with("us-east-1", "c1", Fingerprint::from("stale".to_string()));
        assert!(!unchanged("c1", &fields(), state.profile("p"), "us-east-1"));
    }
}
