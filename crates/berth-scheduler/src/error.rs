//! Scheduler error types.

use berth_placement::{FilterStage, StageReport};
use berth_state::{ConstraintConflict, ConstraintSet, InstanceId, OperationKind, StateError};
use thiserror::Error;

/// Errors returned by the scope manager and the lifecycle coordinator.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Another operation owns the instance, or a versioned write went stale.
    /// Retry the whole operation from fresh state.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("no valid host was found for {kind} of {instance_id}: candidates exhausted at {stage}")]
    NoEligibleHost {
        kind: OperationKind,
        instance_id: InstanceId,
        stage: FilterStage,
        trace: Vec<StageReport>,
        /// The merged (durable + transient) constraints the pipeline ran with.
        constraints: ConstraintSet,
    },

    #[error("agent failure: {0}")]
    AgentFailure(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    #[error("operation aborted: {0}")]
    Aborted(String),

    #[error("state store error: {0}")]
    State(StateError),

    #[error("runtime error: {0}")]
    Runtime(#[from] anyhow::Error),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

impl From<StateError> for SchedulerError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::Conflict { .. } => SchedulerError::Conflict(err.to_string()),
            other => SchedulerError::State(other),
        }
    }
}

impl From<ConstraintConflict> for SchedulerError {
    fn from(err: ConstraintConflict) -> Self {
        SchedulerError::Configuration(err.to_string())
    }
}

impl SchedulerError {
    /// Filter stage that emptied the candidate set, for placement failures.
    pub fn filter_stage(&self) -> Option<FilterStage> {
        match self {
            SchedulerError::NoEligibleHost { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_conflict_becomes_scheduler_conflict() {
        let err: SchedulerError = StateError::Conflict {
            key: "vm-1".to_string(),
            expected: 1,
            actual: 2,
        }
        .into();
        assert!(matches!(err, SchedulerError::Conflict(_)));

        let err: SchedulerError = StateError::Read("disk".to_string()).into();
        assert!(matches!(err, SchedulerError::State(_)));
    }

    #[test]
    fn required_conflict_is_configuration_error() {
        let base = ConstraintSet::default().require_host("a");
        let overlay = ConstraintSet::default().require_host("b");
        let err: SchedulerError = base.merge(&overlay).unwrap_err().into();
        assert!(matches!(err, SchedulerError::Configuration(_)));
    }

    #[test]
    fn no_eligible_host_message_names_stage() {
        let err = SchedulerError::NoEligibleHost {
            kind: OperationKind::Evacuate,
            instance_id: "vm-1".to_string(),
            stage: FilterStage::ExcludedHosts,
            trace: vec![],
            constraints: ConstraintSet::default(),
        };
        assert_eq!(
            err.to_string(),
            "no valid host was found for evacuate of vm-1: candidates exhausted at excluded_hosts"
        );
        assert_eq!(err.filter_stage(), Some(FilterStage::ExcludedHosts));
    }
}
