//! Host filter pipeline.
//!
//! Candidates pass through a fixed sequence of stages:
//! 1. drop excluded hosts
//! 2. keep only required hosts (when any are required)
//! 3. drop hosts in an excluded aggregate
//! 4. keep only hosts in a required aggregate (when any are required)
//! 5. drop hosts that are unavailable or forced down
//! 6. drop hosts without room for the requested shape
//!
//! The survivors are ranked by a [`Weigher`]. When a stage leaves nothing,
//! the result names that stage instead of a host.

use std::collections::BTreeSet;
use std::fmt;

use berth_state::{ConstraintSet, HostId, ResourceShape};
use serde::Serialize;
use tracing::debug;

use crate::snapshot::{HostCandidate, LiveState};
use crate::weigher::{WeighedHost, Weigher, rank};

/// A step of the pipeline. `Inventory` stands for "no candidates at all".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterStage {
    Inventory,
    ExcludedHosts,
    RequiredHosts,
    ExcludedAggregates,
    RequiredAggregates,
    Availability,
    Capacity,
}

impl FilterStage {
    /// Filtering stages in the order they run.
    pub const ORDER: [FilterStage; 6] = [
        FilterStage::ExcludedHosts,
        FilterStage::RequiredHosts,
        FilterStage::ExcludedAggregates,
        FilterStage::RequiredAggregates,
        FilterStage::Availability,
        FilterStage::Capacity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterStage::Inventory => "inventory",
            FilterStage::ExcludedHosts => "excluded_hosts",
            FilterStage::RequiredHosts => "required_hosts",
            FilterStage::ExcludedAggregates => "excluded_aggregates",
            FilterStage::RequiredAggregates => "required_aggregates",
            FilterStage::Availability => "availability",
            FilterStage::Capacity => "capacity",
        }
    }

    fn admits(
        &self,
        candidate: &HostCandidate,
        constraints: &ConstraintSet,
        live: &LiveState,
        request: &ResourceShape,
    ) -> bool {
        match self {
            FilterStage::Inventory => true,
            FilterStage::ExcludedHosts => !constraints.excluded_hosts.contains(&candidate.host_id),
            FilterStage::RequiredHosts => {
                constraints.required_hosts.is_empty()
                    || constraints.required_hosts.contains(&candidate.host_id)
            }
            FilterStage::ExcludedAggregates => candidate
                .aggregates
                .is_disjoint(&constraints.excluded_aggregates),
            FilterStage::RequiredAggregates => {
                constraints.required_aggregates.is_empty()
                    || !candidate
                        .aggregates
                        .is_disjoint(&constraints.required_aggregates)
            }
            FilterStage::Availability => live.is_available(&candidate.host_id),
            FilterStage::Capacity => live
                .get(&candidate.host_id)
                .is_some_and(|h| request.fits_within(&h.free)),
        }
    }
}

impl fmt::Display for FilterStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How many hosts were left after a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub stage: FilterStage,
    pub remaining: usize,
}

/// The chosen host with the full ranking that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectedHost {
    pub host_id: HostId,
    /// Every eligible host, best first. `ranked[0]` is the selection.
    pub ranked: Vec<WeighedHost>,
    pub trace: Vec<StageReport>,
}

/// Why no host was selected.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exhaustion {
    /// The stage that left the candidate set empty.
    pub stage: FilterStage,
    pub trace: Vec<StageReport>,
    /// The constraints the pipeline ran with.
    pub constraints: ConstraintSet,
    pub candidates: usize,
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Selection {
    Selected(SelectedHost),
    Exhausted(Exhaustion),
}

impl Selection {
    pub fn selected_host(&self) -> Option<&str> {
        match self {
            Selection::Selected(s) => Some(&s.host_id),
            Selection::Exhausted(_) => None,
        }
    }
}

/// Run the pipeline.
///
/// Side-effect free: identical inputs always give an identical `Selection`.
/// Duplicate candidates are considered once.
pub fn select(
    candidates: &[HostCandidate],
    constraints: &ConstraintSet,
    live: &LiveState,
    request: &ResourceShape,
    weigher: &dyn Weigher,
) -> Selection {
    let mut seen = BTreeSet::new();
    let mut remaining: Vec<&HostCandidate> = candidates
        .iter()
        .filter(|c| seen.insert(c.host_id.as_str()))
        .collect();
    let considered = remaining.len();

    let mut trace = vec![StageReport {
        stage: FilterStage::Inventory,
        remaining: considered,
    }];
    if remaining.is_empty() {
        return exhausted(FilterStage::Inventory, trace, constraints, considered);
    }

    for stage in FilterStage::ORDER {
        remaining.retain(|c| stage.admits(c, constraints, live, request));
        trace.push(StageReport {
            stage,
            remaining: remaining.len(),
        });
        if remaining.is_empty() {
            return exhausted(stage, trace, constraints, considered);
        }
    }

    let ranked = rank(
        remaining.iter().map(|c| c.host_id.as_str()),
        live,
        request,
        weigher,
    );
    let Some(best) = ranked.first() else {
        // Capacity already required a live entry for every survivor.
        return exhausted(FilterStage::Capacity, trace, constraints, considered);
    };

    debug!(
        host = %best.host_id,
        weight = best.weight,
        eligible = ranked.len(),
        weigher = weigher.name(),
        "host selected"
    );
    Selection::Selected(SelectedHost {
        host_id: best.host_id.clone(),
        ranked,
        trace,
    })
}

fn exhausted(
    stage: FilterStage,
    trace: Vec<StageReport>,
    constraints: &ConstraintSet,
    candidates: usize,
) -> Selection {
    debug!(%stage, candidates, "no host survived filtering");
    Selection::Exhausted(Exhaustion {
        stage,
        trace,
        constraints: constraints.clone(),
        candidates,
    })
}
