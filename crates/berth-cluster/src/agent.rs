//! Simulated compute agent.
//!
//! Executes moves against the [`HostInventory`] instead of real hosts: a
//! move claims capacity on the target and releases it on the source. The
//! capacity check here is the last word; when two instances raced for the
//! same host, the loser gets `CapacityConflict` and the coordinator
//! re-runs placement.

use std::collections::HashMap;
use std::time::Duration;

use berth_scheduler::{AgentFuture, ComputeAgent, MoveOutcome, MoveRequest};
use berth_state::{HostId, ResourceShape};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::inventory::{Claim, HostInventory};

pub struct SimulatedAgent {
    inventory: HostInventory,
    /// Injected failures: target host → reason.
    failures: Mutex<HashMap<HostId, String>>,
    /// Delay before every move, to exercise timeouts.
    delay: Option<Duration>,
    moves: Mutex<Vec<MoveRequest>>,
}

impl SimulatedAgent {
    pub fn new(inventory: HostInventory) -> Self {
        Self {
            inventory,
            failures: Mutex::new(HashMap::new()),
            delay: None,
            moves: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn inventory(&self) -> &HostInventory {
        &self.inventory
    }

    /// Make every move onto `host_id` fail with `reason`.
    pub async fn fail_moves_to(&self, host_id: &str, reason: &str) {
        self.failures
            .lock()
            .await
            .insert(host_id.to_string(), reason.to_string());
    }

    pub async fn clear_failures(&self) {
        self.failures.lock().await.clear();
    }

    /// Every move request received so far, in order.
    pub async fn moves(&self) -> Vec<MoveRequest> {
        self.moves.lock().await.clone()
    }

    async fn run_move(&self, request: &MoveRequest) -> MoveOutcome {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.moves.lock().await.push(request.clone());

        let target = &request.target_host;
        if let Some(reason) = self.failures.lock().await.get(target) {
            warn!(instance = %request.instance_id, %target, %reason, "injected move failure");
            return MoveOutcome::Failure(reason.clone());
        }

        match self.inventory.claim(target, &request.resources) {
            Ok(Claim::Claimed) => {}
            Ok(Claim::Insufficient { free }) => {
                return MoveOutcome::CapacityConflict(format!(
                    "host {target} has {free} free, {} requested",
                    request.resources
                ));
            }
            Ok(Claim::HostDown) => {
                return MoveOutcome::Failure(format!("host {target} is down"));
            }
            Ok(Claim::UnknownHost) => {
                return MoveOutcome::Failure(format!("host {target} is not registered"));
            }
            Err(e) => return MoveOutcome::Failure(format!("claim on {target} failed: {e}")),
        }

        if let Some(source) = &request.source_host {
            match self.inventory.release(source, &request.source_resources) {
                Ok(true) => {}
                Ok(false) => warn!(host = %source, "source host vanished before release"),
                Err(e) => warn!(host = %source, error = %e, "failed to release source capacity"),
            }
        }

        info!(
            instance = %request.instance_id,
            operation = %request.kind,
            source = ?request.source_host,
            %target,
            "move executed"
        );
        MoveOutcome::Success
    }
}

impl ComputeAgent for SimulatedAgent {
    fn execute_move<'a>(&'a self, request: &'a MoveRequest) -> AgentFuture<'a, MoveOutcome> {
        Box::pin(self.run_move(request))
    }

    fn release<'a>(
        &'a self,
        instance_id: &'a str,
        host_id: &'a str,
        resources: ResourceShape,
    ) -> AgentFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            if !self.inventory.release(host_id, &resources)? {
                warn!(instance = %instance_id, host = %host_id, "release on unknown host");
            }
            Ok(())
        })
    }

    fn force_down<'a>(&'a self, host_id: &'a str, down: bool) -> AgentFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            if !self.inventory.force_down(host_id, down)? {
                anyhow::bail!("host {host_id} is not registered");
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use berth_state::{OperationKind, StateStore};

    fn shape(mem: u64) -> ResourceShape {
        ResourceShape::new(1, mem, 10)
    }

    fn agent_with(hosts: &[(&str, u64)]) -> SimulatedAgent {
        let inventory = HostInventory::new(StateStore::open_in_memory().unwrap());
        for (id, mem) in hosts {
            inventory
                .register_host(id, BTreeSet::new(), shape(*mem))
                .unwrap();
        }
        SimulatedAgent::new(inventory)
    }

    fn move_to(target: &str, source: Option<&str>, mem: u64) -> MoveRequest {
        MoveRequest {
            instance_id: "vm-1".to_string(),
            kind: OperationKind::ColdMigrate,
            source_host: source.map(str::to_string),
            target_host: target.to_string(),
            resources: shape(mem),
            source_resources: shape(mem),
        }
    }

    fn used(agent: &SimulatedAgent, host: &str) -> u64 {
        agent
            .inventory()
            .get_host(host)
            .unwrap()
            .unwrap()
            .used
            .memory_mb
    }

    #[tokio::test]
    async fn move_claims_target_and_releases_source() {
        let agent = agent_with(&[("host1", 4096), ("host2", 4096)]);
        agent.inventory().claim("host1", &shape(1024)).unwrap();

        let outcome = agent.execute_move(&move_to("host2", Some("host1"), 1024)).await;
        assert_eq!(outcome, MoveOutcome::Success);
        assert_eq!(used(&agent, "host1"), 0);
        assert_eq!(used(&agent, "host2"), 1024);
        assert_eq!(agent.moves().await.len(), 1);
    }

    #[tokio::test]
    async fn full_target_is_capacity_conflict() {
        let agent = agent_with(&[("host1", 1024)]);
        let outcome = agent.execute_move(&move_to("host1", None, 2048)).await;
        assert!(matches!(outcome, MoveOutcome::CapacityConflict(_)));
        assert_eq!(used(&agent, "host1"), 0);
    }

    #[tokio::test]
    async fn down_target_fails() {
        let agent = agent_with(&[("host1", 4096)]);
        agent.force_down("host1", true).await.unwrap();
        let outcome = agent.execute_move(&move_to("host1", None, 512)).await;
        assert_eq!(outcome, MoveOutcome::Failure("host host1 is down".to_string()));

        agent.force_down("host1", false).await.unwrap();
        assert_eq!(
            agent.execute_move(&move_to("host1", None, 512)).await,
            MoveOutcome::Success
        );
    }

    #[tokio::test]
    async fn injected_failure() {
        let agent = agent_with(&[("host1", 4096)]);
        agent.fail_moves_to("host1", "hypervisor crashed").await;
        let outcome = agent.execute_move(&move_to("host1", None, 512)).await;
        assert_eq!(outcome, MoveOutcome::Failure("hypervisor crashed".to_string()));
        assert_eq!(used(&agent, "host1"), 0);

        agent.clear_failures().await;
        assert_eq!(
            agent.execute_move(&move_to("host1", None, 512)).await,
            MoveOutcome::Success
        );
    }

    #[tokio::test]
    async fn force_down_unknown_host_errors() {
        let agent = agent_with(&[]);
        assert!(agent.force_down("ghost", true).await.is_err());
    }

    #[tokio::test]
    async fn release_frees_capacity() {
        let agent = agent_with(&[("host1", 4096)]);
        agent.inventory().claim("host1", &shape(2048)).unwrap();
        agent.release("vm-1", "host1", shape(2048)).await.unwrap();
        assert_eq!(used(&agent, "host1"), 0);
    }
}
