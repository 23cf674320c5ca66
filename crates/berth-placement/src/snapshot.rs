//! Candidate hosts and the live view the pipeline filters against.

use std::collections::{BTreeMap, BTreeSet};

use berth_state::{AggregateId, HostId, ResourceShape};
use serde::{Deserialize, Serialize};

/// A host that may receive the instance, with its aggregate membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCandidate {
    pub host_id: HostId,
    pub aggregates: BTreeSet<AggregateId>,
}

impl HostCandidate {
    pub fn new(host_id: impl Into<HostId>) -> Self {
        Self {
            host_id: host_id.into(),
            aggregates: BTreeSet::new(),
        }
    }

    pub fn in_aggregate(mut self, aggregate: impl Into<AggregateId>) -> Self {
        self.aggregates.insert(aggregate.into());
        self
    }
}

/// Capacity and availability of one host at snapshot time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostLiveState {
    /// False when the host is forced down or otherwise unreachable.
    pub available: bool,
    pub capacity: ResourceShape,
    pub free: ResourceShape,
}

/// Point-in-time view of every host the pipeline may consult.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveState {
    pub hosts: BTreeMap<HostId, HostLiveState>,
}

impl LiveState {
    pub fn get(&self, host_id: &str) -> Option<&HostLiveState> {
        self.hosts.get(host_id)
    }

    /// True only when the host is known and reported available.
    pub fn is_available(&self, host_id: &str) -> bool {
        self.get(host_id).is_some_and(|h| h.available)
    }
}

/// Candidates plus live state, taken together from one source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSnapshot {
    pub candidates: Vec<HostCandidate>,
    pub live: LiveState,
}
