//! Lifecycle coordinator: sequences placement with agent moves.
//!
//! For every operation the coordinator:
//! 1. admits it against the instance's lifecycle state (under one lock, so
//!    a second request for a busy instance fails fast with `Conflict`)
//! 2. derives the operation scope and persists `Pending`
//! 3. on a spawned task: runs placement, dispatches the move to the agent
//!    under a timeout, and retries placement on capacity conflicts
//! 4. commits the durable constraint set and new host with a versioned
//!    write, or leaves the record untouched and records a fault
//!
//! The in-memory lifecycle map is authoritative while the process runs and
//! is mirrored into the state store on every transition.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use berth_core::SchedulerConfig;
use berth_placement::{ResourceWeigher, WeightMultipliers};
use berth_state::*;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::agent::{ComputeAgent, HostStateSource, MoveOutcome, MoveRequest};
use crate::error::{SchedulerError, SchedulerResult};
use crate::intent::{OperationIntent, OperationParams};
use crate::lifecycle::{self, UnconfirmedMove};
use crate::scope::{OperationScope, OperationScopeManager, ScopePolicy};

const PHASE_SCHEDULING: u8 = 0;
const PHASE_DISPATCHED: u8 = 1;
const PHASE_ABORTED: u8 = 2;
const PHASE_FINISHED: u8 = 3;

static OPERATION_SEQ: AtomicU64 = AtomicU64::new(0);

/// Coordinator settings, usually built from `[scheduler]` in berth.toml.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    pub policy: ScopePolicy,
    pub confirm_resize: bool,
    pub max_placement_attempts: u32,
    pub agent_timeout: Duration,
    pub weights: WeightMultipliers,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            policy: ScopePolicy::default(),
            confirm_resize: false,
            max_placement_attempts: 3,
            agent_timeout: Duration::from_secs(30),
            weights: WeightMultipliers::default(),
        }
    }
}

impl TryFrom<&SchedulerConfig> for CoordinatorConfig {
    type Error = SchedulerError;

    fn try_from(config: &SchedulerConfig) -> SchedulerResult<Self> {
        let agent_timeout = config
            .agent_timeout()
            .map_err(|e| SchedulerError::Configuration(format!("scheduler.agent_timeout: {e}")))?;
        if config.max_placement_attempts == 0 {
            return Err(SchedulerError::Configuration(
                "scheduler.max_placement_attempts must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            policy: ScopePolicy {
                allow_resize_to_same_host: config.allow_resize_to_same_host,
            },
            confirm_resize: config.confirm_resize,
            max_placement_attempts: config.max_placement_attempts,
            agent_timeout,
            weights: WeightMultipliers {
                ram: config.weights.ram,
                cpu: config.weights.cpu,
                disk: config.weights.disk,
            },
        })
    }
}

/// Result of a successfully landed operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationOutcome {
    pub operation_id: OperationId,
    pub instance_id: InstanceId,
    pub kind: OperationKind,
    pub source_host: Option<HostId>,
    pub dest_host: HostId,
    /// Placement rounds it took, counting capacity-conflict retries.
    pub attempts: u32,
    pub lifecycle: LifecycleState,
    pub record: PlacementRecord,
}

/// Returned by [`Coordinator::request`] once the operation is admitted.
pub struct Accepted {
    pub operation_id: OperationId,
    pub handle: OperationHandle,
}

/// Handle to an operation running in the background.
pub struct OperationHandle {
    operation_id: OperationId,
    phase: Arc<AtomicU8>,
    join: JoinHandle<SchedulerResult<OperationOutcome>>,
}

impl OperationHandle {
    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    /// Abort the operation if the move has not been dispatched yet.
    ///
    /// Returns false once the agent call is issued; from then on the
    /// operation resolves through the agent's own outcome.
    pub fn abort(&self) -> bool {
        self.phase
            .compare_exchange(
                PHASE_SCHEDULING,
                PHASE_ABORTED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Wait for the operation to finish.
    pub async fn wait(self) -> SchedulerResult<OperationOutcome> {
        match self.join.await {
            Ok(result) => result,
            Err(e) => Err(SchedulerError::Runtime(anyhow::anyhow!(
                "operation {} task failed: {e}",
                self.operation_id
            ))),
        }
    }
}

/// Drives lifecycle operations for every instance.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

struct Inner {
    store: StateStore,
    agent: Arc<dyn ComputeAgent>,
    hosts: Arc<dyn HostStateSource>,
    scopes: OperationScopeManager,
    config: CoordinatorConfig,
    /// instance_id → lifecycle state.
    lifecycles: Mutex<HashMap<InstanceId, LifecycleState>>,
}

/// Everything a spawned operation needs.
struct OperationTask {
    operation_id: OperationId,
    instance_id: InstanceId,
    scope: OperationScope,
    /// The record as admitted; the commit is checked against its version.
    record: PlacementRecord,
    /// State to fall back to when the operation fails without moving.
    prior: LifecycleState,
    phase: Arc<AtomicU8>,
    created_at: u64,
}

impl Coordinator {
    pub fn new(
        store: StateStore,
        agent: Arc<dyn ComputeAgent>,
        hosts: Arc<dyn HostStateSource>,
        config: CoordinatorConfig,
    ) -> Self {
        let scopes =
            OperationScopeManager::new(config.policy, Arc::new(ResourceWeigher::new(config.weights)));
        Self {
            inner: Arc::new(Inner {
                store,
                agent,
                hosts,
                scopes,
                config,
                lifecycles: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    /// Admit an operation and start it in the background.
    ///
    /// Validation, state guards and scope derivation happen before this
    /// returns, so `Conflict`, `InvalidRequest` and `Configuration` errors
    /// surface here rather than through the handle.
    pub async fn request(
        &self,
        instance_id: &str,
        kind: OperationKind,
        params: OperationParams,
    ) -> SchedulerResult<Accepted> {
        let intent = OperationIntent::new(kind, params)?;
        let snapshot = self.inner.hosts.snapshot()?;
        let inner = &self.inner;

        let mut lifecycles = inner.lifecycles.lock().await;
        let current = inner.load_lifecycle(&mut lifecycles, instance_id)?;
        let existing = inner.store.get_record(instance_id)?;
        lifecycle::admit(
            instance_id,
            kind,
            current.as_ref(),
            existing.as_ref(),
            &snapshot.live,
        )?;
        let scope = inner.scopes.derive(instance_id, existing.as_ref(), &intent)?;

        let (record, prior) = match (existing, current) {
            (Some(record), Some(current)) => (record, current),
            _ => {
                let record = PlacementRecord::new(
                    instance_id,
                    scope.flavor().clone(),
                    intent.image_ref.clone().unwrap_or_default(),
                    scope.commit_constraints().clone(),
                );
                let stored = inner.store.compare_and_swap(instance_id, 0, &record)?;
                // A build that fails has nothing to return to.
                (stored, LifecycleState::Error)
            }
        };

        let operation_id = next_operation_id();
        let created_at = epoch_secs();
        inner.store.put_operation(&OperationRecord {
            operation_id: operation_id.clone(),
            instance_id: instance_id.to_string(),
            kind,
            source_host: scope.source_host().map(str::to_string),
            dest_host: None,
            status: OperationStatus::Accepted,
            created_at,
            updated_at: created_at,
        })?;
        inner.set_lifecycle_locked(
            &mut lifecycles,
            instance_id,
            lifecycle::pending(kind),
            Some(&operation_id),
        )?;
        drop(lifecycles);

        info!(
            instance = %instance_id,
            operation = %kind,
            %operation_id,
            overlay = ?scope.overlay(),
            "operation accepted"
        );

        let phase = Arc::new(AtomicU8::new(PHASE_SCHEDULING));
        let task = OperationTask {
            operation_id: operation_id.clone(),
            instance_id: instance_id.to_string(),
            scope,
            record,
            prior,
            phase: Arc::clone(&phase),
            created_at,
        };
        let runner = Arc::clone(&self.inner);
        let join = tokio::spawn(async move { runner.execute(task).await });

        Ok(Accepted {
            operation_id: operation_id.clone(),
            handle: OperationHandle {
                operation_id,
                phase,
                join,
            },
        })
    }

    /// Request an operation and wait for it to finish.
    pub async fn run(
        &self,
        instance_id: &str,
        kind: OperationKind,
        params: OperationParams,
    ) -> SchedulerResult<OperationOutcome> {
        self.request(instance_id, kind, params).await?.handle.wait().await
    }

    /// Accept a resize or cold migration that is awaiting confirmation.
    pub async fn confirm_resize(&self, instance_id: &str) -> SchedulerResult<PlacementRecord> {
        let inner = &self.inner;
        let mut lifecycles = inner.lifecycles.lock().await;
        let current = inner.require_lifecycle(&mut lifecycles, instance_id)?;
        let unconfirmed = lifecycle::require_awaiting_confirm(instance_id, &current)?;
        let record = inner.store.require_record(instance_id)?;
        inner.set_lifecycle_locked(&mut lifecycles, instance_id, LifecycleState::Stable, None)?;
        info!(
            instance = %instance_id,
            operation = %unconfirmed.operation,
            host = ?record.current_host,
            "move confirmed"
        );
        Ok(record)
    }

    /// Move an unconfirmed instance back to its source host with its
    /// previous flavor. No placement runs: the source host is where it
    /// came from.
    pub async fn revert_resize(&self, instance_id: &str) -> SchedulerResult<PlacementRecord> {
        let inner = &self.inner;
        let operation_id = next_operation_id();
        let (unconfirmed, record) = {
            let mut lifecycles = inner.lifecycles.lock().await;
            let current = inner.require_lifecycle(&mut lifecycles, instance_id)?;
            let unconfirmed = lifecycle::require_awaiting_confirm(instance_id, &current)?;
            let record = inner.store.require_record(instance_id)?;
            inner.set_lifecycle_locked(
                &mut lifecycles,
                instance_id,
                lifecycle::in_progress(unconfirmed.operation),
                Some(&operation_id),
            )?;
            (unconfirmed, record)
        };
        let kind = unconfirmed.operation;
        let source_host = &unconfirmed.source_host;

        let created_at = epoch_secs();
        let mut op = OperationRecord {
            operation_id: operation_id.clone(),
            instance_id: instance_id.to_string(),
            kind,
            source_host: record.current_host.clone(),
            dest_host: Some(source_host.clone()),
            status: OperationStatus::Executing,
            created_at,
            updated_at: created_at,
        };
        inner.store.put_operation(&op)?;

        match inner.revert(instance_id, &record, &unconfirmed).await {
            Ok(stored) => {
                op.status = OperationStatus::Completed;
                op.updated_at = epoch_secs();
                inner.store.put_operation(&op)?;
                inner
                    .set_lifecycle(instance_id, LifecycleState::Stable, Some(&operation_id))
                    .await?;
                info!(instance = %instance_id, operation = %kind, host = %source_host, "move reverted");
                Ok(stored)
            }
            Err(err) => {
                error!(instance = %instance_id, operation = %kind, error = %err, "revert failed");
                op.status = OperationStatus::Failed {
                    reason: err.to_string(),
                };
                op.updated_at = epoch_secs();
                inner.store.put_operation(&op)?;
                inner.record_fault(instance_id, &operation_id, kind, &err);
                inner
                    .set_lifecycle(instance_id, LifecycleState::Error, Some(&operation_id))
                    .await?;
                Err(err)
            }
        }
    }

    /// Release the instance's host and keep only its record.
    ///
    /// The state lock is held only to claim the instance; the agent call
    /// runs without it.
    pub async fn shelve_offload(&self, instance_id: &str) -> SchedulerResult<PlacementRecord> {
        let inner = &self.inner;
        let record = {
            let mut lifecycles = inner.lifecycles.lock().await;
            let current = inner.require_lifecycle(&mut lifecycles, instance_id)?;
            lifecycle::require_idle(instance_id, &current)?;
            if current != LifecycleState::Stable {
                return Err(SchedulerError::InvalidRequest(format!(
                    "cannot shelve instance {instance_id} in state {}",
                    current.label()
                )));
            }
            let record = inner.store.require_record(instance_id)?;
            inner.set_lifecycle_locked(
                &mut lifecycles,
                instance_id,
                LifecycleState::Releasing,
                None,
            )?;
            record
        };

        if let Some(host) = &record.current_host
            && let Err(err) = inner
                .release_host(instance_id, host, record.flavor.resources)
                .await
        {
            warn!(instance = %instance_id, %host, error = %err, "shelve offload failed");
            inner
                .set_lifecycle(instance_id, LifecycleState::Stable, None)
                .await?;
            return Err(err);
        }

        let mut next = record.clone();
        next.current_host = None;
        let stored = match inner
            .store
            .compare_and_swap(instance_id, record.version, &next)
        {
            Ok(stored) => stored,
            Err(e) => {
                inner
                    .set_lifecycle(instance_id, LifecycleState::Error, None)
                    .await?;
                return Err(e.into());
            }
        };
        inner
            .set_lifecycle(instance_id, LifecycleState::Shelved, None)
            .await?;
        info!(instance = %instance_id, released = ?record.current_host, "instance shelved");
        Ok(stored)
    }

    /// Permanently delete an instance: release its host and drop its
    /// record, lifecycle state, operation log and fault.
    pub async fn delete(&self, instance_id: &str) -> SchedulerResult<()> {
        let inner = &self.inner;
        let (prior, record) = {
            let mut lifecycles = inner.lifecycles.lock().await;
            let current = inner.load_lifecycle(&mut lifecycles, instance_id)?;
            if let Some(current) = &current {
                lifecycle::require_idle(instance_id, current)?;
            }
            let record = inner.store.get_record(instance_id)?;
            if current.is_none() && record.is_none() {
                return Err(SchedulerError::InstanceNotFound(instance_id.to_string()));
            }
            inner.set_lifecycle_locked(
                &mut lifecycles,
                instance_id,
                LifecycleState::Releasing,
                None,
            )?;
            (current, record)
        };

        if let Some(record) = &record
            && let Some(host) = &record.current_host
            && let Err(err) = inner
                .release_host(instance_id, host, record.flavor.resources)
                .await
        {
            warn!(instance = %instance_id, %host, error = %err, "delete failed");
            inner.restore_lifecycle(instance_id, prior).await?;
            return Err(err);
        }

        let mut lifecycles = inner.lifecycles.lock().await;
        if let Some(record) = &record
            && let Err(e) = inner.store.delete_record(instance_id, record.version)
        {
            inner.set_lifecycle_locked(&mut lifecycles, instance_id, LifecycleState::Error, None)?;
            return Err(e.into());
        }
        inner.store.delete_instance_state(instance_id)?;
        let operations = inner.store.delete_operations_for_instance(instance_id)?;
        inner.store.delete_fault(instance_id)?;
        lifecycles.remove(instance_id);
        info!(instance = %instance_id, operations, "instance deleted");
        Ok(())
    }

    /// Replace the durable constraint set.
    ///
    /// This is the operator's way to clear stale exclusions.
    pub async fn set_constraints(
        &self,
        instance_id: &str,
        constraints: ConstraintSet,
    ) -> SchedulerResult<PlacementRecord> {
        let inner = &self.inner;
        let mut lifecycles = inner.lifecycles.lock().await;
        let current = inner.require_lifecycle(&mut lifecycles, instance_id)?;
        lifecycle::require_idle(instance_id, &current)?;

        let record = inner.store.require_record(instance_id)?;
        let mut next = record.clone();
        next.constraint_set = constraints;
        let stored = inner
            .store
            .compare_and_swap(instance_id, record.version, &next)?;
        info!(
            instance = %instance_id,
            previous = ?record.constraint_set,
            constraints = ?stored.constraint_set,
            version = stored.version,
            "durable constraints replaced"
        );
        Ok(stored)
    }

    /// Mark a host down or back up through the agent.
    pub async fn force_down(&self, host_id: &str, down: bool) -> SchedulerResult<()> {
        let limit = self.inner.config.agent_timeout;
        tokio::time::timeout(limit, self.inner.agent.force_down(host_id, down))
            .await
            .map_err(|_| {
                SchedulerError::AgentFailure(format!(
                    "agent did not answer force-down of {host_id} within {limit:?}"
                ))
            })??;
        info!(host = %host_id, down, "host force-down updated");
        Ok(())
    }

    pub async fn lifecycle(&self, instance_id: &str) -> SchedulerResult<Option<LifecycleState>> {
        let mut lifecycles = self.inner.lifecycles.lock().await;
        self.inner.load_lifecycle(&mut lifecycles, instance_id)
    }

    pub fn record(&self, instance_id: &str) -> SchedulerResult<Option<PlacementRecord>> {
        Ok(self.inner.store.get_record(instance_id)?)
    }

    pub fn operation(
        &self,
        instance_id: &str,
        operation_id: &str,
    ) -> SchedulerResult<Option<OperationRecord>> {
        Ok(self.inner.store.get_operation(instance_id, operation_id)?)
    }

    pub fn operations(&self, instance_id: &str) -> SchedulerResult<Vec<OperationRecord>> {
        Ok(self.inner.store.list_operations_for_instance(instance_id)?)
    }

    /// The latest fault recorded for an instance.
    pub fn fault(&self, instance_id: &str) -> SchedulerResult<Option<InstanceFault>> {
        Ok(self.inner.store.get_fault(instance_id)?)
    }
}

impl Inner {
    async fn execute(&self, task: OperationTask) -> SchedulerResult<OperationOutcome> {
        let result = self.drive(&task).await;
        task.phase.store(PHASE_FINISHED, Ordering::Release);
        match result {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.fail(&task, &err).await;
                Err(err)
            }
        }
    }

    async fn drive(&self, task: &OperationTask) -> SchedulerResult<OperationOutcome> {
        let kind = task.scope.kind();
        if task.phase.load(Ordering::Acquire) == PHASE_ABORTED {
            return Err(aborted(task));
        }
        self.set_lifecycle(
            &task.instance_id,
            lifecycle::in_progress(kind),
            Some(&task.operation_id),
        )
        .await?;
        self.update_operation(task, OperationStatus::Scheduling, None)?;

        let max_attempts = self.config.max_placement_attempts.max(1);
        let mut attempts = 0;
        let dest_host = loop {
            attempts += 1;
            let snapshot = self.hosts.snapshot()?;
            let selected = self.scopes.place(&task.instance_id, &task.scope, &snapshot)?;

            if attempts == 1
                && task
                    .phase
                    .compare_exchange(
                        PHASE_SCHEDULING,
                        PHASE_DISPATCHED,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_err()
            {
                return Err(aborted(task));
            }
            self.update_operation(task, OperationStatus::Executing, Some(&selected.host_id))?;

            let request = MoveRequest {
                instance_id: task.instance_id.clone(),
                kind,
                source_host: task.scope.source_host().map(str::to_string),
                target_host: selected.host_id.clone(),
                resources: task.scope.request(),
                source_resources: task.record.flavor.resources,
            };
            debug!(
                instance = %task.instance_id,
                operation = %kind,
                target = %request.target_host,
                attempt = attempts,
                "dispatching move"
            );

            match self.dispatch(&request).await? {
                MoveOutcome::Success => break selected.host_id,
                MoveOutcome::Failure(reason) => {
                    return Err(SchedulerError::AgentFailure(format!(
                        "move to {} failed: {reason}",
                        request.target_host
                    )));
                }
                MoveOutcome::CapacityConflict(reason) if attempts < max_attempts => {
                    warn!(
                        instance = %task.instance_id,
                        operation = %kind,
                        target = %request.target_host,
                        attempt = attempts,
                        %reason,
                        "capacity conflict, re-running placement"
                    );
                }
                MoveOutcome::CapacityConflict(reason) => {
                    return Err(SchedulerError::AgentFailure(format!(
                        "capacity conflict persisted after {attempts} attempts: {reason}"
                    )));
                }
            }
        };

        let mut next = task.record.clone();
        next.current_host = Some(dest_host.clone());
        next.flavor = task.scope.flavor().clone();
        next.constraint_set = task.scope.commit_constraints().clone();
        let stored = self
            .store
            .compare_and_swap(&task.instance_id, task.record.version, &next)?;

        let state = lifecycle::on_success(
            kind,
            self.config.confirm_resize,
            task.scope.source_host(),
            &task.record.flavor,
        );
        self.set_lifecycle(&task.instance_id, state.clone(), Some(&task.operation_id))
            .await?;
        self.update_operation(task, OperationStatus::Completed, Some(&dest_host))?;

        info!(
            instance = %task.instance_id,
            operation = %kind,
            source = ?task.scope.source_host(),
            dest = %dest_host,
            attempts,
            version = stored.version,
            "operation completed"
        );
        Ok(OperationOutcome {
            operation_id: task.operation_id.clone(),
            instance_id: task.instance_id.clone(),
            kind,
            source_host: task.scope.source_host().map(str::to_string),
            dest_host,
            attempts,
            lifecycle: state,
            record: stored,
        })
    }

    /// Roll back after a failed operation. The placement record is not
    /// touched: its durable constraints and host stay as they were.
    async fn fail(&self, task: &OperationTask, err: &SchedulerError) {
        let kind = task.scope.kind();
        let next = lifecycle::on_failure(kind, &task.prior, err);

        let status = match err {
            SchedulerError::Aborted(_) => {
                info!(instance = %task.instance_id, operation = %kind, "operation aborted");
                OperationStatus::Aborted
            }
            other => {
                // Exhaustion was already reported at warn by the scope manager.
                if !matches!(other, SchedulerError::NoEligibleHost { .. }) {
                    error!(
                        instance = %task.instance_id,
                        operation = %kind,
                        operation_id = %task.operation_id,
                        error = %other,
                        "operation failed"
                    );
                }
                self.record_fault(&task.instance_id, &task.operation_id, kind, other);
                OperationStatus::Failed {
                    reason: other.to_string(),
                }
            }
        };

        if let Err(e) = self.update_operation(task, status, None) {
            error!(instance = %task.instance_id, error = %e, "failed to update operation log");
        }
        if let Err(e) = self
            .set_lifecycle(&task.instance_id, next, Some(&task.operation_id))
            .await
        {
            error!(instance = %task.instance_id, error = %e, "failed to persist lifecycle state");
        }
    }

    async fn revert(
        &self,
        instance_id: &str,
        record: &PlacementRecord,
        unconfirmed: &UnconfirmedMove,
    ) -> SchedulerResult<PlacementRecord> {
        let source_host = &unconfirmed.source_host;
        let request = MoveRequest {
            instance_id: instance_id.to_string(),
            kind: unconfirmed.operation,
            source_host: record.current_host.clone(),
            target_host: source_host.clone(),
            resources: unconfirmed.previous_flavor.resources,
            source_resources: record.flavor.resources,
        };
        match self.dispatch(&request).await? {
            MoveOutcome::Success => {}
            MoveOutcome::Failure(reason) | MoveOutcome::CapacityConflict(reason) => {
                return Err(SchedulerError::AgentFailure(format!(
                    "revert to {source_host} failed: {reason}"
                )));
            }
        }

        let mut next = record.clone();
        next.current_host = Some(source_host.clone());
        next.flavor = unconfirmed.previous_flavor.clone();
        Ok(self
            .store
            .compare_and_swap(instance_id, record.version, &next)?)
    }

    /// Issue a move with the configured timeout.
    async fn dispatch(&self, request: &MoveRequest) -> SchedulerResult<MoveOutcome> {
        let limit = self.config.agent_timeout;
        tokio::time::timeout(limit, self.agent.execute_move(request))
            .await
            .map_err(|_| {
                SchedulerError::AgentFailure(format!(
                    "agent did not answer for move to {} within {limit:?}",
                    request.target_host
                ))
            })
    }

    /// Hand capacity back on `host` with the configured timeout.
    async fn release_host(
        &self,
        instance_id: &str,
        host: &str,
        resources: ResourceShape,
    ) -> SchedulerResult<()> {
        let limit = self.config.agent_timeout;
        match tokio::time::timeout(limit, self.agent.release(instance_id, host, resources)).await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SchedulerError::AgentFailure(format!(
                "release on {host} failed: {e}"
            ))),
            Err(_) => Err(SchedulerError::AgentFailure(format!(
                "agent did not release capacity on {host} within {limit:?}"
            ))),
        }
    }

    /// Put back the state an instance had before a failed release.
    async fn restore_lifecycle(
        &self,
        instance_id: &str,
        prior: Option<LifecycleState>,
    ) -> SchedulerResult<()> {
        match prior {
            Some(state) => self.set_lifecycle(instance_id, state, None).await,
            None => {
                let mut lifecycles = self.lifecycles.lock().await;
                lifecycles.remove(instance_id);
                self.store.delete_instance_state(instance_id)?;
                Ok(())
            }
        }
    }

    /// Lifecycle state of an instance, loading it from the store on first use.
    ///
    /// A busy state found only in the store belongs to an operation whose
    /// process is gone; it is moved to `Error`.
    fn load_lifecycle(
        &self,
        lifecycles: &mut HashMap<InstanceId, LifecycleState>,
        instance_id: &str,
    ) -> SchedulerResult<Option<LifecycleState>> {
        if let Some(state) = lifecycles.get(instance_id) {
            return Ok(Some(state.clone()));
        }
        let Some(stored) = self.store.get_instance_state(instance_id)? else {
            return Ok(None);
        };
        if stored.lifecycle.is_busy() {
            warn!(
                instance = %instance_id,
                state = %stored.lifecycle.label(),
                operation_id = ?stored.operation_id,
                "orphaned operation found, marking instance as error"
            );
            self.set_lifecycle_locked(
                lifecycles,
                instance_id,
                LifecycleState::Error,
                stored.operation_id.as_deref(),
            )?;
            return Ok(Some(LifecycleState::Error));
        }
        lifecycles.insert(instance_id.to_string(), stored.lifecycle.clone());
        Ok(Some(stored.lifecycle))
    }

    fn require_lifecycle(
        &self,
        lifecycles: &mut HashMap<InstanceId, LifecycleState>,
        instance_id: &str,
    ) -> SchedulerResult<LifecycleState> {
        self.load_lifecycle(lifecycles, instance_id)?
            .ok_or_else(|| SchedulerError::InstanceNotFound(instance_id.to_string()))
    }

    async fn set_lifecycle(
        &self,
        instance_id: &str,
        state: LifecycleState,
        operation_id: Option<&str>,
    ) -> SchedulerResult<()> {
        let mut lifecycles = self.lifecycles.lock().await;
        self.set_lifecycle_locked(&mut lifecycles, instance_id, state, operation_id)
    }

    fn set_lifecycle_locked(
        &self,
        lifecycles: &mut HashMap<InstanceId, LifecycleState>,
        instance_id: &str,
        state: LifecycleState,
        operation_id: Option<&str>,
    ) -> SchedulerResult<()> {
        self.store.put_instance_state(&InstanceState {
            instance_id: instance_id.to_string(),
            lifecycle: state.clone(),
            operation_id: operation_id.map(str::to_string),
            updated_at: epoch_secs(),
        })?;
        let from = lifecycles
            .insert(instance_id.to_string(), state.clone())
            .map_or_else(|| "none".to_string(), |s| s.label());
        info!(instance = %instance_id, %from, to = %state.label(), "lifecycle transition");
        Ok(())
    }

    fn update_operation(
        &self,
        task: &OperationTask,
        status: OperationStatus,
        dest_host: Option<&str>,
    ) -> SchedulerResult<()> {
        let mut op = self
            .store
            .get_operation(&task.instance_id, &task.operation_id)?
            .unwrap_or_else(|| OperationRecord {
                operation_id: task.operation_id.clone(),
                instance_id: task.instance_id.clone(),
                kind: task.scope.kind(),
                source_host: task.scope.source_host().map(str::to_string),
                dest_host: None,
                status: OperationStatus::Accepted,
                created_at: task.created_at,
                updated_at: task.created_at,
            });
        op.status = status;
        if let Some(host) = dest_host {
            op.dest_host = Some(host.to_string());
        }
        op.updated_at = epoch_secs();
        self.store.put_operation(&op)?;
        Ok(())
    }

    fn record_fault(
        &self,
        instance_id: &str,
        operation_id: &str,
        kind: OperationKind,
        err: &SchedulerError,
    ) {
        let constraints = match err {
            SchedulerError::NoEligibleHost { constraints, .. } => Some(constraints.clone()),
            _ => None,
        };
        let fault = InstanceFault {
            instance_id: instance_id.to_string(),
            operation_id: operation_id.to_string(),
            kind,
            message: err.to_string(),
            filter_stage: err.filter_stage().map(|s| s.to_string()),
            constraints,
            created_at: epoch_secs(),
        };
        if let Err(e) = self.store.put_fault(&fault) {
            error!(instance = %instance_id, error = %e, "failed to record fault");
        }
    }
}

fn aborted(task: &OperationTask) -> SchedulerError {
    SchedulerError::Aborted(task.operation_id.clone())
}

fn next_operation_id() -> OperationId {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let seq = OPERATION_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("op-{nanos:x}-{seq}")
}
