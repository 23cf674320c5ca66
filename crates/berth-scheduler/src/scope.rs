//! Operation scope manager.
//!
//! Turns an [`OperationIntent`] into the constraints one placement runs
//! with. The result keeps two sets apart:
//!
//! - `durable`: what the caller asked to keep for the life of the instance.
//!   This is the only set a commit ever writes back.
//! - `overlay`: exclusions and forced targets synthesized to steer this one
//!   move (e.g., "not the host it is on now"). Discarded when the operation
//!   ends, whatever the outcome.
//!
//! The pipeline sees `merged = durable ⊕ overlay`.

use std::sync::Arc;

use berth_placement::{HostSnapshot, ResourceWeigher, SelectedHost, Selection, Weigher, select};
use berth_state::{ConstraintSet, Flavor, HostId, OperationKind, PlacementRecord, ResourceShape};
use tracing::{info, warn};

use crate::error::{SchedulerError, SchedulerResult};
use crate::intent::OperationIntent;

/// Policy knobs that shape the transient overlay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScopePolicy {
    /// When false, resize and cold migrate exclude the current host.
    pub allow_resize_to_same_host: bool,
}

/// The constraint scoping of a single operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationScope {
    kind: OperationKind,
    durable: ConstraintSet,
    overlay: ConstraintSet,
    merged: ConstraintSet,
    source_host: Option<HostId>,
    flavor: Flavor,
}

impl OperationScope {
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn durable(&self) -> &ConstraintSet {
        &self.durable
    }

    pub fn overlay(&self) -> &ConstraintSet {
        &self.overlay
    }

    /// Constraints the pipeline runs with.
    pub fn merged(&self) -> &ConstraintSet {
        &self.merged
    }

    /// The constraint set to store on success. Never includes the overlay.
    pub fn commit_constraints(&self) -> &ConstraintSet {
        &self.durable
    }

    /// Host the instance occupies before the move, if any.
    pub fn source_host(&self) -> Option<&str> {
        self.source_host.as_deref()
    }

    /// Flavor the instance has once the move lands.
    pub fn flavor(&self) -> &Flavor {
        &self.flavor
    }

    /// Resources the destination must have free.
    pub fn request(&self) -> ResourceShape {
        self.flavor.resources
    }
}

/// Derives operation scopes and runs placements against them.
#[derive(Clone)]
pub struct OperationScopeManager {
    policy: ScopePolicy,
    weigher: Arc<dyn Weigher>,
}

impl OperationScopeManager {
    pub fn new(policy: ScopePolicy, weigher: Arc<dyn Weigher>) -> Self {
        Self { policy, weigher }
    }

    pub fn policy(&self) -> ScopePolicy {
        self.policy
    }

    /// Build the scope for `intent` against the instance's current record.
    ///
    /// `record` is `None` only for a build that has not been stored yet.
    pub fn derive(
        &self,
        instance_id: &str,
        record: Option<&PlacementRecord>,
        intent: &OperationIntent,
    ) -> SchedulerResult<OperationScope> {
        let kind = intent.kind;
        let (durable, source_host, current_flavor) = match (kind, record) {
            (OperationKind::Build, _) => (
                intent.durable_constraints.clone().unwrap_or_default(),
                None,
                None,
            ),
            (_, Some(record)) => (
                record.constraint_set.clone(),
                record.current_host.clone(),
                Some(record.flavor.clone()),
            ),
            (_, None) => return Err(SchedulerError::InstanceNotFound(instance_id.to_string())),
        };

        let flavor = intent
            .flavor
            .clone()
            .or(current_flavor)
            .ok_or_else(|| SchedulerError::InvalidRequest(format!("{kind} requires a flavor")))?;

        let mut overlay = ConstraintSet::default();
        let avoid_current = match kind {
            OperationKind::Build | OperationKind::Unshelve => false,
            OperationKind::Resize | OperationKind::ColdMigrate => {
                !self.policy.allow_resize_to_same_host
            }
            OperationKind::LiveMigrate | OperationKind::Evacuate => true,
        };
        if avoid_current {
            if let Some(host) = &source_host {
                overlay.excluded_hosts.insert(host.clone());
            }
        }
        if let Some(host) = &intent.initiator_host {
            overlay.excluded_hosts.insert(host.clone());
        }
        if let Some(target) = &intent.force_target {
            if kind == OperationKind::Resize {
                return Err(SchedulerError::InvalidRequest(
                    "resize does not accept a forced target host".to_string(),
                ));
            }
            if kind != OperationKind::Build && source_host.as_deref() == Some(target.as_str()) {
                return Err(SchedulerError::Configuration(format!(
                    "{kind} of {instance_id} forced onto {target}, the host it already occupies"
                )));
            }
            overlay.required_hosts.insert(target.clone());
        }

        let merged = durable.merge(&overlay)?;
        Ok(OperationScope {
            kind,
            durable,
            overlay,
            merged,
            source_host,
            flavor,
        })
    }

    /// Run the filter pipeline for `scope` over `snapshot`.
    ///
    /// Exhaustion becomes [`SchedulerError::NoEligibleHost`] and is logged
    /// with everything an operator needs to see why.
    pub fn place(
        &self,
        instance_id: &str,
        scope: &OperationScope,
        snapshot: &HostSnapshot,
    ) -> SchedulerResult<SelectedHost> {
        let selection = select(
            &snapshot.candidates,
            &scope.merged,
            &snapshot.live,
            &scope.request(),
            self.weigher.as_ref(),
        );
        match selection {
            Selection::Selected(selected) => {
                info!(
                    instance = %instance_id,
                    operation = %scope.kind,
                    host = %selected.host_id,
                    eligible = selected.ranked.len(),
                    "placement selected host"
                );
                Ok(selected)
            }
            Selection::Exhausted(exhaustion) => {
                let trace: Vec<String> = exhaustion
                    .trace
                    .iter()
                    .map(|r| format!("{}={}", r.stage, r.remaining))
                    .collect();
                warn!(
                    instance = %instance_id,
                    operation = %scope.kind,
                    stage = %exhaustion.stage,
                    candidates = exhaustion.candidates,
                    trace = %trace.join(","),
                    constraints = ?exhaustion.constraints,
                    durable = ?scope.durable,
                    overlay = ?scope.overlay,
                    "no valid host was found"
                );
                Err(SchedulerError::NoEligibleHost {
                    kind: scope.kind,
                    instance_id: instance_id.to_string(),
                    stage: exhaustion.stage,
                    trace: exhaustion.trace,
                    constraints: exhaustion.constraints,
                })
            }
        }
    }
}

impl Default for OperationScopeManager {
    fn default() -> Self {
        Self::new(ScopePolicy::default(), Arc::new(ResourceWeigher::spread()))
    }
}
