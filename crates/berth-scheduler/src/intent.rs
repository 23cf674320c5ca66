//! Operation intents: what the caller asked for, before any scoping.

use berth_state::{ConstraintSet, Flavor, HostId, OperationKind};
use serde::{Deserialize, Serialize};

use crate::error::{SchedulerError, SchedulerResult};

/// Caller-supplied parameters of a lifecycle request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationParams {
    /// Target flavor. Required for build and resize.
    pub flavor: Option<Flavor>,
    /// Image reference. Required for build.
    pub image_ref: Option<String>,
    /// Constraints the caller wants to keep for the life of the instance.
    /// Only honoured on build; use `set_constraints` afterwards.
    pub constraints: Option<ConstraintSet>,
    /// Host the move must land on.
    pub force_target: Option<HostId>,
    /// Host to steer away from during this operation only.
    pub initiator_host: Option<HostId>,
}

impl OperationParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flavor(mut self, flavor: Flavor) -> Self {
        self.flavor = Some(flavor);
        self
    }

    pub fn with_image(mut self, image_ref: impl Into<String>) -> Self {
        self.image_ref = Some(image_ref.into());
        self
    }

    pub fn with_constraints(mut self, constraints: ConstraintSet) -> Self {
        self.constraints = Some(constraints);
        self
    }

    pub fn force_target(mut self, host: impl Into<HostId>) -> Self {
        self.force_target = Some(host.into());
        self
    }

    pub fn avoid_host(mut self, host: impl Into<HostId>) -> Self {
        self.initiator_host = Some(host.into());
        self
    }
}

/// A validated request for one lifecycle operation. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationIntent {
    pub kind: OperationKind,
    pub initiator_host: Option<HostId>,
    pub force_target: Option<HostId>,
    pub flavor: Option<Flavor>,
    pub image_ref: Option<String>,
    pub durable_constraints: Option<ConstraintSet>,
}

impl OperationIntent {
    /// Check the parameters against the operation kind.
    pub fn new(kind: OperationKind, params: OperationParams) -> SchedulerResult<Self> {
        match kind {
            OperationKind::Build => {
                if params.flavor.is_none() {
                    return Err(invalid("build requires a flavor"));
                }
                if params.image_ref.is_none() {
                    return Err(invalid("build requires an image"));
                }
            }
            OperationKind::Resize => {
                if params.flavor.is_none() {
                    return Err(invalid("resize requires a target flavor"));
                }
                if params.force_target.is_some() {
                    return Err(invalid("resize does not accept a forced target host"));
                }
            }
            _ => {
                if params.flavor.is_some() {
                    return Err(invalid(&format!("{kind} cannot change the flavor")));
                }
            }
        }
        if kind != OperationKind::Build && params.constraints.is_some() {
            return Err(invalid(
                "durable constraints can only be set at build or through set_constraints",
            ));
        }

        Ok(Self {
            kind,
            initiator_host: params.initiator_host,
            force_target: params.force_target,
            flavor: params.flavor,
            image_ref: params.image_ref,
            durable_constraints: params.constraints,
        })
    }
}

fn invalid(reason: &str) -> SchedulerError {
    SchedulerError::InvalidRequest(reason.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_state::ResourceShape;

    fn flavor() -> Flavor {
        Flavor::new("m1.small", ResourceShape::new(1, 2048, 20))
    }

    #[test]
    fn build_needs_flavor_and_image() {
        let err = OperationIntent::new(OperationKind::Build, OperationParams::new()).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidRequest(_)));

        let params = OperationParams::new().with_flavor(flavor());
        assert!(OperationIntent::new(OperationKind::Build, params).is_err());

        let params = OperationParams::new().with_flavor(flavor()).with_image("cirros");
        let intent = OperationIntent::new(OperationKind::Build, params).unwrap();
        assert_eq!(intent.image_ref.as_deref(), Some("cirros"));
    }

    #[test]
    fn resize_rejects_forced_target() {
        let params = OperationParams::new()
            .with_flavor(flavor())
            .force_target("host2");
        let err = OperationIntent::new(OperationKind::Resize, params).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidRequest(_)));
    }

    #[test]
    fn moves_cannot_change_flavor_or_durable_constraints() {
        let params = OperationParams::new().with_flavor(flavor());
        assert!(OperationIntent::new(OperationKind::Evacuate, params).is_err());

        let params = OperationParams::new().with_constraints(ConstraintSet::default());
        assert!(OperationIntent::new(OperationKind::LiveMigrate, params).is_err());
    }

    #[test]
    fn live_migrate_keeps_force_target() {
        let params = OperationParams::new().force_target("host3").avoid_host("host9");
        let intent = OperationIntent::new(OperationKind::LiveMigrate, params).unwrap();
        assert_eq!(intent.force_target.as_deref(), Some("host3"));
        assert_eq!(intent.initiator_host.as_deref(), Some("host9"));
    }
}
