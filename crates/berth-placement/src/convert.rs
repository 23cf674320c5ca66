//! Type conversions between state store types and placement types.
//!
//! Bridges `berth_state::HostInfo` to the pipeline's `HostCandidate` and
//! `HostLiveState`.

use berth_state::HostInfo;

use crate::snapshot::{HostCandidate, HostLiveState, HostSnapshot, LiveState};

/// Convert a [`HostInfo`] to a [`HostCandidate`].
pub fn candidate_from_host(host: &HostInfo) -> HostCandidate {
    HostCandidate {
        host_id: host.id.clone(),
        aggregates: host.aggregates.clone(),
    }
}

/// Convert a [`HostInfo`] to its live capacity view.
///
/// A forced-down host is reported unavailable regardless of free capacity.
pub fn live_from_host(host: &HostInfo) -> HostLiveState {
    HostLiveState {
        available: !host.forced_down,
        capacity: host.capacity,
        free: host.free(),
    }
}

/// Build a snapshot from an inventory listing. Candidates are ordered by host ID.
pub fn snapshot_from_hosts(hosts: &[HostInfo]) -> HostSnapshot {
    let mut candidates: Vec<HostCandidate> = hosts.iter().map(candidate_from_host).collect();
    candidates.sort_by(|a, b| a.host_id.cmp(&b.host_id));
    candidates.dedup_by(|a, b| a.host_id == b.host_id);

    let live = LiveState {
        hosts: hosts
            .iter()
            .map(|h| (h.id.clone(), live_from_host(h)))
            .collect(),
    };
    HostSnapshot { candidates, live }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_state::ResourceShape;
    use std::collections::BTreeSet;

    fn sample_host(id: &str) -> HostInfo {
        HostInfo {
            id: id.to_string(),
            aggregates: BTreeSet::from(["az1".to_string()]),
            capacity: ResourceShape::new(16, 32768, 500),
            used: ResourceShape::new(4, 8192, 100),
            forced_down: false,
            updated_at: 0,
        }
    }

    #[test]
    fn candidate_keeps_aggregates() {
        let candidate = candidate_from_host(&sample_host("host1"));
        assert_eq!(candidate.host_id, "host1");
        assert!(candidate.aggregates.contains("az1"));
    }

    #[test]
    fn live_state_subtracts_usage() {
        let live = live_from_host(&sample_host("host1"));
        assert!(live.available);
        assert_eq!(live.free, ResourceShape::new(12, 24576, 400));
        assert_eq!(live.capacity.memory_mb, 32768);
    }

    #[test]
    fn forced_down_host_is_unavailable() {
        let mut host = sample_host("host1");
        host.forced_down = true;
        assert!(!live_from_host(&host).available);
    }

    #[test]
    fn over_committed_host_reports_zero_free() {
        let mut host = sample_host("host1");
        host.used = ResourceShape::new(32, 65536, 1000);
        assert_eq!(live_from_host(&host).free, ResourceShape::default());
    }

    #[test]
    fn snapshot_orders_candidates() {
        let hosts = vec![sample_host("host3"), sample_host("host1"), sample_host("host2")];
        let snapshot = snapshot_from_hosts(&hosts);
        let ids: Vec<&str> = snapshot
            .candidates
            .iter()
            .map(|c| c.host_id.as_str())
            .collect();
        assert_eq!(ids, vec!["host1", "host2", "host3"]);
        assert_eq!(snapshot.live.hosts.len(), 3);
    }
}
