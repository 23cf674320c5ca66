//! Per-instance lifecycle state machine.
//!
//! ```text
//! Stable ─▶ {Op}Pending ─▶ {Op}InProgress ─┬─▶ Stable | AwaitingConfirm | Shelved
//!                                           └─▶ Error | pre-op state
//! ```
//!
//! Guards and transitions are pure; the coordinator applies them under its
//! state lock and persists the result.

use berth_placement::LiveState;
use berth_state::{Flavor, HostId, LifecycleState, OperationKind, PlacementRecord};

use crate::error::{SchedulerError, SchedulerResult};

/// Check that `kind` may start from `current`.
///
/// A busy instance is a [`SchedulerError::Conflict`]; any other mismatch
/// between operation and state is an [`SchedulerError::InvalidRequest`].
pub fn admit(
    instance_id: &str,
    kind: OperationKind,
    current: Option<&LifecycleState>,
    record: Option<&PlacementRecord>,
    live: &LiveState,
) -> SchedulerResult<()> {
    if kind == OperationKind::Build {
        return match (current, record) {
            (None, None) => Ok(()),
            _ => Err(SchedulerError::Conflict(format!(
                "instance {instance_id} already exists"
            ))),
        };
    }

    let (Some(current), Some(record)) = (current, record) else {
        return Err(SchedulerError::InstanceNotFound(instance_id.to_string()));
    };
    if current.is_busy() {
        return Err(busy(instance_id, current));
    }
    if let LifecycleState::AwaitingConfirm { .. } = current {
        return Err(SchedulerError::Conflict(format!(
            "instance {instance_id} has a move awaiting confirmation"
        )));
    }

    let allowed = match kind {
        OperationKind::Build => true,
        OperationKind::Resize | OperationKind::ColdMigrate | OperationKind::LiveMigrate => {
            *current == LifecycleState::Stable
        }
        OperationKind::Evacuate => match current {
            LifecycleState::Error => true,
            LifecycleState::Stable => match &record.current_host {
                Some(host) if !live.is_available(host) => true,
                Some(host) => {
                    return Err(SchedulerError::InvalidRequest(format!(
                        "cannot evacuate {instance_id}: host {host} is still up"
                    )));
                }
                None => false,
            },
            _ => false,
        },
        OperationKind::Unshelve => *current == LifecycleState::Shelved,
    };

    if allowed {
        Ok(())
    } else {
        Err(SchedulerError::InvalidRequest(format!(
            "cannot {kind} instance {instance_id} in state {}",
            current.label()
        )))
    }
}

/// Guard for operations that must not overlap with a move: shelve, delete,
/// constraint edits.
pub fn require_idle(instance_id: &str, current: &LifecycleState) -> SchedulerResult<()> {
    if current.is_busy() {
        Err(busy(instance_id, current))
    } else {
        Ok(())
    }
}

/// A landed move waiting for confirm or revert.
#[derive(Debug, Clone, PartialEq)]
pub struct UnconfirmedMove {
    pub operation: OperationKind,
    pub source_host: HostId,
    pub previous_flavor: Flavor,
}

/// Guard for confirm/revert.
pub fn require_awaiting_confirm(
    instance_id: &str,
    current: &LifecycleState,
) -> SchedulerResult<UnconfirmedMove> {
    match current {
        LifecycleState::AwaitingConfirm {
            operation,
            source_host,
            previous_flavor,
        } => Ok(UnconfirmedMove {
            operation: *operation,
            source_host: source_host.clone(),
            previous_flavor: previous_flavor.clone(),
        }),
        other if other.is_busy() => Err(busy(instance_id, other)),
        other => Err(SchedulerError::InvalidRequest(format!(
            "instance {instance_id} has no move to confirm (state {})",
            other.label()
        ))),
    }
}

pub fn pending(kind: OperationKind) -> LifecycleState {
    LifecycleState::Pending { operation: kind }
}

pub fn in_progress(kind: OperationKind) -> LifecycleState {
    LifecycleState::InProgress { operation: kind }
}

/// State after a move lands.
pub fn on_success(
    kind: OperationKind,
    confirm_resize: bool,
    source_host: Option<&str>,
    previous_flavor: &Flavor,
) -> LifecycleState {
    match (kind, source_host) {
        (OperationKind::Resize | OperationKind::ColdMigrate, Some(source)) if confirm_resize => {
            LifecycleState::AwaitingConfirm {
                operation: kind,
                source_host: source.to_string(),
                previous_flavor: previous_flavor.clone(),
            }
        }
        _ => LifecycleState::Stable,
    }
}

/// State after an operation fails.
///
/// `prior` is the state the operation started from. A build has nothing
/// to return to, so callers pass `Error` for it.
pub fn on_failure(kind: OperationKind, prior: &LifecycleState, err: &SchedulerError) -> LifecycleState {
    match err {
        SchedulerError::Aborted(_) => prior.clone(),
        SchedulerError::NoEligibleHost { .. } => match kind {
            OperationKind::Build | OperationKind::Evacuate => LifecycleState::Error,
            // Scheduling failed before anything moved.
            _ => prior.clone(),
        },
        _ => LifecycleState::Error,
    }
}

fn busy(instance_id: &str, current: &LifecycleState) -> SchedulerError {
    SchedulerError::Conflict(format!(
        "instance {instance_id} is busy ({})",
        current.label()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_placement::{FilterStage, HostLiveState};
    use berth_state::{ConstraintSet, ResourceShape};

    fn record_on(host: &str) -> PlacementRecord {
        let mut record = PlacementRecord::new(
            "vm-1",
            Flavor::new("flavor1", ResourceShape::new(1, 1024, 10)),
            "cirros",
            ConstraintSet::default(),
        );
        record.current_host = Some(host.to_string());
        record
    }

    fn live(host: &str, available: bool) -> LiveState {
        let mut live = LiveState::default();
        live.hosts.insert(
            host.to_string(),
            HostLiveState {
                available,
                capacity: ResourceShape::default(),
                free: ResourceShape::default(),
            },
        );
        live
    }

    fn no_host() -> SchedulerError {
        SchedulerError::NoEligibleHost {
            kind: OperationKind::Resize,
            instance_id: "vm-1".to_string(),
            stage: FilterStage::Capacity,
            trace: vec![],
            constraints: ConstraintSet::default(),
        }
    }

    #[test]
    fn build_requires_fresh_instance() {
        let up = live("host1", true);
        assert!(admit("vm-1", OperationKind::Build, None, None, &up).is_ok());

        let err = admit(
            "vm-1",
            OperationKind::Build,
            Some(&LifecycleState::Stable),
            Some(&record_on("host1")),
            &up,
        )
        .unwrap_err();
        assert!(matches!(err, SchedulerError::Conflict(_)));
    }

    #[test]
    fn busy_instance_rejects_with_conflict() {
        let record = record_on("host1");
        let up = live("host1", true);
        for state in [pending(OperationKind::Resize), in_progress(OperationKind::Evacuate)] {
            let err = admit("vm-1", OperationKind::ColdMigrate, Some(&state), Some(&record), &up)
                .unwrap_err();
            assert!(matches!(err, SchedulerError::Conflict(_)));
        }
    }

    #[test]
    fn evacuate_needs_error_or_down_host() {
        let record = record_on("host1");
        let stable = LifecycleState::Stable;

        let err = admit(
            "vm-1",
            OperationKind::Evacuate,
            Some(&stable),
            Some(&record),
            &live("host1", true),
        )
        .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidRequest(_)));

        assert!(
            admit(
                "vm-1",
                OperationKind::Evacuate,
                Some(&stable),
                Some(&record),
                &live("host1", false)
            )
            .is_ok()
        );
        assert!(
            admit(
                "vm-1",
                OperationKind::Evacuate,
                Some(&LifecycleState::Error),
                Some(&record),
                &live("host1", true)
            )
            .is_ok()
        );
    }

    #[test]
    fn resize_from_error_is_invalid() {
        let err = admit(
            "vm-1",
            OperationKind::Resize,
            Some(&LifecycleState::Error),
            Some(&record_on("host1")),
            &live("host1", true),
        )
        .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidRequest(_)));
    }

    #[test]
    fn unshelve_only_from_shelved() {
        let record = PlacementRecord::new(
            "vm-1",
            Flavor::new("flavor1", ResourceShape::default()),
            "cirros",
            ConstraintSet::default(),
        );
        let up = LiveState::default();
        assert!(
            admit("vm-1", OperationKind::Unshelve, Some(&LifecycleState::Shelved), Some(&record), &up)
                .is_ok()
        );
        assert!(
            admit("vm-1", OperationKind::Unshelve, Some(&LifecycleState::Stable), Some(&record), &up)
                .is_err()
        );
    }

    #[test]
    fn missing_instance_is_not_found() {
        let err = admit("vm-1", OperationKind::Resize, None, None, &LiveState::default()).unwrap_err();
        assert!(matches!(err, SchedulerError::InstanceNotFound(_)));
    }

    #[test]
    fn failed_scheduling_keeps_instance_where_it_was() {
        let stable = LifecycleState::Stable;
        assert_eq!(on_failure(OperationKind::Resize, &stable, &no_host()), stable);
        assert_eq!(
            on_failure(OperationKind::Evacuate, &stable, &no_host()),
            LifecycleState::Error
        );
        assert_eq!(
            on_failure(
                OperationKind::LiveMigrate,
                &stable,
                &SchedulerError::AgentFailure("boom".to_string())
            ),
            LifecycleState::Error
        );
        assert_eq!(
            on_failure(
                OperationKind::Unshelve,
                &LifecycleState::Shelved,
                &SchedulerError::Aborted("op-1".to_string())
            ),
            LifecycleState::Shelved
        );
    }

    #[test]
    fn resize_waits_for_confirmation_when_configured() {
        let flavor = Flavor::new("flavor1", ResourceShape::default());
        let state = on_success(OperationKind::Resize, true, Some("host1"), &flavor);
        let unconfirmed = require_awaiting_confirm("vm-1", &state).unwrap();
        assert_eq!(unconfirmed.operation, OperationKind::Resize);
        assert_eq!(unconfirmed.source_host, "host1");
        assert_eq!(unconfirmed.previous_flavor, flavor);

        let migrated = on_success(OperationKind::ColdMigrate, true, Some("host2"), &flavor);
        assert_eq!(
            require_awaiting_confirm("vm-1", &migrated).unwrap().operation,
            OperationKind::ColdMigrate
        );

        assert_eq!(
            on_success(OperationKind::Resize, false, Some("host1"), &flavor),
            LifecycleState::Stable
        );
        assert_eq!(
            on_success(OperationKind::Evacuate, true, Some("host1"), &flavor),
            LifecycleState::Stable
        );
    }

    #[test]
    fn confirm_without_pending_resize_is_invalid() {
        let err = require_awaiting_confirm("vm-1", &LifecycleState::Stable).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidRequest(_)));
    }
}
