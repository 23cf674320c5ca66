//! Interfaces to the collaborators the coordinator drives but does not own.
//!
//! - [`ComputeAgent`] executes moves on compute hosts.
//! - [`HostStateSource`] supplies the point-in-time host snapshot the
//!   pipeline filters against.
//!
//! Both are object-safe and hand out boxed futures, so tests can inject
//! mocks behind an `Arc<dyn _>`.

use std::future::Future;
use std::pin::Pin;

use berth_placement::HostSnapshot;
use berth_state::{HostId, InstanceId, OperationKind, ResourceShape};
use serde::{Deserialize, Serialize};

/// Boxed future returned by agent calls.
pub type AgentFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One move for the agent to execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRequest {
    pub instance_id: InstanceId,
    pub kind: OperationKind,
    /// Host the instance leaves. `None` for build and unshelve.
    pub source_host: Option<HostId>,
    pub target_host: HostId,
    /// Resources to claim on the target.
    pub resources: ResourceShape,
    /// Resources to give back on the source once the move lands.
    pub source_resources: ResourceShape,
}

/// Agent verdict on a move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum MoveOutcome {
    Success,
    Failure(String),
    /// The target no longer had room. The coordinator re-runs placement.
    CapacityConflict(String),
}

/// Executes moves on compute hosts.
pub trait ComputeAgent: Send + Sync {
    fn execute_move<'a>(&'a self, request: &'a MoveRequest) -> AgentFuture<'a, MoveOutcome>;

    /// Give back what `instance_id` holds on `host_id`.
    fn release<'a>(
        &'a self,
        instance_id: &'a str,
        host_id: &'a str,
        resources: ResourceShape,
    ) -> AgentFuture<'a, anyhow::Result<()>>;

    /// Mark a host unreachable (`true`) or back in service (`false`).
    fn force_down<'a>(&'a self, host_id: &'a str, down: bool) -> AgentFuture<'a, anyhow::Result<()>>;
}

/// Source of host candidates and their live state.
pub trait HostStateSource: Send + Sync {
    fn snapshot(&self) -> anyhow::Result<HostSnapshot>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records requests and answers with a fixed outcome.
    struct RecordingAgent {
        outcome: MoveOutcome,
        seen: Mutex<Vec<MoveRequest>>,
    }

    impl ComputeAgent for RecordingAgent {
        fn execute_move<'a>(&'a self, request: &'a MoveRequest) -> AgentFuture<'a, MoveOutcome> {
            Box::pin(async move {
                self.seen.lock().unwrap().push(request.clone());
                self.outcome.clone()
            })
        }

        fn release<'a>(
            &'a self,
            _instance_id: &'a str,
            _host_id: &'a str,
            _resources: ResourceShape,
        ) -> AgentFuture<'a, anyhow::Result<()>> {
            Box::pin(async { Ok(()) })
        }

        fn force_down<'a>(
            &'a self,
            _host_id: &'a str,
            _down: bool,
        ) -> AgentFuture<'a, anyhow::Result<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn agent_is_usable_as_trait_object() {
        let agent: Box<dyn ComputeAgent> = Box::new(RecordingAgent {
            outcome: MoveOutcome::CapacityConflict("full".to_string()),
            seen: Mutex::new(Vec::new()),
        });
        let request = MoveRequest {
            instance_id: "vm-1".to_string(),
            kind: OperationKind::ColdMigrate,
            source_host: Some("host1".to_string()),
            target_host: "host2".to_string(),
            resources: ResourceShape::new(1, 512, 5),
            source_resources: ResourceShape::new(1, 512, 5),
        };

        let outcome = agent.execute_move(&request).await;
        assert_eq!(outcome, MoveOutcome::CapacityConflict("full".to_string()));
        assert!(agent.force_down("host1", true).await.is_ok());
    }

    #[test]
    fn outcome_serializes_with_reason() {
        let json = serde_json::to_string(&MoveOutcome::Failure("disk full".to_string())).unwrap();
        assert_eq!(json, r#"{"outcome":"failure","reason":"disk full"}"#);
    }
}
