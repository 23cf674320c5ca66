//! Domain types for the berth state store.
//!
//! These types represent the persisted placement records, hosts,
//! lifecycle state, operation log and faults. All types are serializable
//! to/from JSON for storage in redb tables.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable identifier of an instance.
pub type InstanceId = String;

/// Identifier of a host in the cluster.
pub type HostId = String;

/// Identifier of a host aggregate (a named group of hosts).
pub type AggregateId = String;

/// Identifier of a single lifecycle operation.
pub type OperationId = String;

// ── Resources ─────────────────────────────────────────────────────

/// An amount of compute resources: a flavor's demand or a host's capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceShape {
    pub vcpus: u32,
    pub memory_mb: u64,
    pub disk_gb: u64,
}

impl ResourceShape {
    pub fn new(vcpus: u32, memory_mb: u64, disk_gb: u64) -> Self {
        Self {
            vcpus,
            memory_mb,
            disk_gb,
        }
    }

    /// True if every dimension of `self` fits inside `available`.
    pub fn fits_within(&self, available: &ResourceShape) -> bool {
        self.vcpus <= available.vcpus
            && self.memory_mb <= available.memory_mb
            && self.disk_gb <= available.disk_gb
    }

    pub fn saturating_add(&self, other: &ResourceShape) -> ResourceShape {
        ResourceShape {
            vcpus: self.vcpus.saturating_add(other.vcpus),
            memory_mb: self.memory_mb.saturating_add(other.memory_mb),
            disk_gb: self.disk_gb.saturating_add(other.disk_gb),
        }
    }

    pub fn saturating_sub(&self, other: &ResourceShape) -> ResourceShape {
        ResourceShape {
            vcpus: self.vcpus.saturating_sub(other.vcpus),
            memory_mb: self.memory_mb.saturating_sub(other.memory_mb),
            disk_gb: self.disk_gb.saturating_sub(other.disk_gb),
        }
    }
}

impl fmt::Display for ResourceShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} vcpu / {} MiB / {} GiB",
            self.vcpus, self.memory_mb, self.disk_gb
        )
    }
}

/// A flavor reference together with the resource shape it resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flavor {
    pub id: String,
    pub resources: ResourceShape,
}

impl Flavor {
    pub fn new(id: impl Into<String>, resources: ResourceShape) -> Self {
        Self {
            id: id.into(),
            resources,
        }
    }
}

// ── Constraints ───────────────────────────────────────────────────

/// Host eligibility rules.
///
/// A `ConstraintSet` is a plain value. Whether it is durable or scoped to a
/// single operation is decided by where it is held, never by a flag inside it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstraintSet {
    pub excluded_hosts: BTreeSet<HostId>,
    /// When non-empty, placement is restricted to these hosts.
    pub required_hosts: BTreeSet<HostId>,
    pub excluded_aggregates: BTreeSet<AggregateId>,
    /// When non-empty, a host must belong to at least one of these aggregates.
    pub required_aggregates: BTreeSet<AggregateId>,
}

/// Two required sets that no host can satisfy at once.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstraintConflict {
    #[error("required hosts {base:?} and {overlay:?} have no host in common")]
    RequiredHosts {
        base: BTreeSet<HostId>,
        overlay: BTreeSet<HostId>,
    },

    #[error("required aggregates {base:?} and {overlay:?} have no aggregate in common")]
    RequiredAggregates {
        base: BTreeSet<AggregateId>,
        overlay: BTreeSet<AggregateId>,
    },
}

impl ConstraintSet {
    pub fn is_empty(&self) -> bool {
        self.excluded_hosts.is_empty()
            && self.required_hosts.is_empty()
            && self.excluded_aggregates.is_empty()
            && self.required_aggregates.is_empty()
    }

    pub fn exclude_host(mut self, host: impl Into<HostId>) -> Self {
        self.excluded_hosts.insert(host.into());
        self
    }

    pub fn require_host(mut self, host: impl Into<HostId>) -> Self {
        self.required_hosts.insert(host.into());
        self
    }

    pub fn exclude_aggregate(mut self, aggregate: impl Into<AggregateId>) -> Self {
        self.excluded_aggregates.insert(aggregate.into());
        self
    }

    pub fn require_aggregate(mut self, aggregate: impl Into<AggregateId>) -> Self {
        self.required_aggregates.insert(aggregate.into());
        self
    }

    /// Overlay `overlay` on top of `self`, producing a new set.
    ///
    /// Exclusions accumulate. Required sets narrow to their intersection
    /// when both sides carry one; an empty intersection is a conflict.
    pub fn merge(&self, overlay: &ConstraintSet) -> Result<ConstraintSet, ConstraintConflict> {
        let required_hosts =
            merge_required(&self.required_hosts, &overlay.required_hosts).ok_or_else(|| {
                ConstraintConflict::RequiredHosts {
                    base: self.required_hosts.clone(),
                    overlay: overlay.required_hosts.clone(),
                }
            })?;
        let required_aggregates =
            merge_required(&self.required_aggregates, &overlay.required_aggregates).ok_or_else(
                || ConstraintConflict::RequiredAggregates {
                    base: self.required_aggregates.clone(),
                    overlay: overlay.required_aggregates.clone(),
                },
            )?;

        Ok(ConstraintSet {
            excluded_hosts: self
                .excluded_hosts
                .union(&overlay.excluded_hosts)
                .cloned()
                .collect(),
            required_hosts,
            excluded_aggregates: self
                .excluded_aggregates
                .union(&overlay.excluded_aggregates)
                .cloned()
                .collect(),
            required_aggregates,
        })
    }
}

fn merge_required(base: &BTreeSet<String>, overlay: &BTreeSet<String>) -> Option<BTreeSet<String>> {
    match (base.is_empty(), overlay.is_empty()) {
        (true, _) => Some(overlay.clone()),
        (false, true) => Some(base.clone()),
        (false, false) => {
            let common: BTreeSet<String> = base.intersection(overlay).cloned().collect();
            (!common.is_empty()).then_some(common)
        }
    }
}

// ── Placement record ──────────────────────────────────────────────

/// The durable placement record of one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementRecord {
    pub instance_id: InstanceId,
    pub flavor: Flavor,
    pub image_ref: String,
    /// Constraints the caller asked to keep across operations.
    pub constraint_set: ConstraintSet,
    /// Set only when an operation lands the instance on a host.
    pub current_host: Option<HostId>,
    /// Optimistic concurrency counter; 0 means "never stored".
    pub version: u64,
    pub created_at: u64,
    pub updated_at: u64,
}

impl PlacementRecord {
    /// A record that has not been stored yet.
    pub fn new(
        instance_id: impl Into<InstanceId>,
        flavor: Flavor,
        image_ref: impl Into<String>,
        constraint_set: ConstraintSet,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            flavor,
            image_ref: image_ref.into(),
            constraint_set,
            current_host: None,
            version: 0,
            created_at: 0,
            updated_at: 0,
        }
    }
}

// ── Hosts ─────────────────────────────────────────────────────────

/// A compute host as registered in the inventory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostInfo {
    pub id: HostId,
    pub aggregates: BTreeSet<AggregateId>,
    pub capacity: ResourceShape,
    pub used: ResourceShape,
    /// Operator signal: the host is unreachable and takes no placements.
    pub forced_down: bool,
    pub updated_at: u64,
}

impl HostInfo {
    pub fn free(&self) -> ResourceShape {
        self.capacity.saturating_sub(&self.used)
    }
}

// ── Lifecycle ─────────────────────────────────────────────────────

/// Lifecycle operations that place an instance on a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Build,
    Resize,
    ColdMigrate,
    LiveMigrate,
    Evacuate,
    Unshelve,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Build => "build",
            OperationKind::Resize => "resize",
            OperationKind::ColdMigrate => "cold_migrate",
            OperationKind::LiveMigrate => "live_migrate",
            OperationKind::Evacuate => "evacuate",
            OperationKind::Unshelve => "unshelve",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an instance is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LifecycleState {
    Stable,
    Pending { operation: OperationKind },
    InProgress { operation: OperationKind },
    /// A resize or cold migration landed and waits for the caller to
    /// confirm or revert it.
    AwaitingConfirm {
        operation: OperationKind,
        source_host: HostId,
        previous_flavor: Flavor,
    },
    /// Handing the instance's host capacity back (shelve offload, delete).
    Releasing,
    /// Offloaded: no host holds the instance.
    Shelved,
    Error,
}

impl LifecycleState {
    /// True while an operation owns the instance.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            LifecycleState::Pending { .. }
                | LifecycleState::InProgress { .. }
                | LifecycleState::Releasing
        )
    }

    pub fn label(&self) -> String {
        match self {
            LifecycleState::Stable => "stable".to_string(),
            LifecycleState::Pending { operation } => format!("{operation}_pending"),
            LifecycleState::InProgress { operation } => format!("{operation}_in_progress"),
            LifecycleState::AwaitingConfirm { .. } => "awaiting_confirm".to_string(),
            LifecycleState::Releasing => "releasing".to_string(),
            LifecycleState::Shelved => "shelved".to_string(),
            LifecycleState::Error => "error".to_string(),
        }
    }
}

/// Persisted lifecycle state of one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceState {
    pub instance_id: InstanceId,
    pub lifecycle: LifecycleState,
    /// The operation that last moved the lifecycle.
    pub operation_id: Option<OperationId>,
    pub updated_at: u64,
}

// ── Operation log ─────────────────────────────────────────────────

/// Progress of one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OperationStatus {
    Accepted,
    Scheduling,
    Executing,
    Completed,
    Failed { reason: String },
    Aborted,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Failed { .. } | OperationStatus::Aborted
        )
    }
}

/// One lifecycle operation as recorded for later inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub operation_id: OperationId,
    pub instance_id: InstanceId,
    pub kind: OperationKind,
    pub source_host: Option<HostId>,
    pub dest_host: Option<HostId>,
    pub status: OperationStatus,
    pub created_at: u64,
    pub updated_at: u64,
}

// ── Faults ────────────────────────────────────────────────────────

/// The most recent failure of an instance, kept for operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceFault {
    pub instance_id: InstanceId,
    pub operation_id: OperationId,
    pub kind: OperationKind,
    pub message: String,
    /// Filter stage that emptied the candidate set, for placement failures.
    pub filter_stage: Option<String>,
    /// Constraint snapshot the failed placement ran with.
    pub constraints: Option<ConstraintSet>,
    pub created_at: u64,
}

impl OperationRecord {
    /// Build the composite key for the operations table.
    pub fn table_key(&self) -> String {
        operation_key(&self.instance_id, &self.operation_id)
    }
}

/// Composite key `{instance_id}:{operation_id}`.
pub fn operation_key(instance_id: &str, operation_id: &str) -> String {
    format!("{instance_id}:{operation_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn merge_unions_exclusions() {
        let base = ConstraintSet::default().exclude_host("a").exclude_aggregate("slow");
        let overlay = ConstraintSet::default().exclude_host("b");

        let merged = base.merge(&overlay).unwrap();
        assert_eq!(merged.excluded_hosts, hosts(&["a", "b"]));
        assert_eq!(merged.excluded_aggregates, hosts(&["slow"]));
        // Inputs are untouched.
        assert_eq!(base.excluded_hosts, hosts(&["a"]));
    }

    #[test]
    fn merge_takes_one_sided_required_set() {
        let base = ConstraintSet::default();
        let overlay = ConstraintSet::default().require_host("b");
        assert_eq!(base.merge(&overlay).unwrap().required_hosts, hosts(&["b"]));
        assert_eq!(overlay.merge(&base).unwrap().required_hosts, hosts(&["b"]));
    }

    #[test]
    fn merge_narrows_overlapping_required_sets() {
        let base = ConstraintSet::default().require_host("a").require_host("b");
        let overlay = ConstraintSet::default().require_host("b");
        assert_eq!(base.merge(&overlay).unwrap().required_hosts, hosts(&["b"]));
    }

    #[test]
    fn merge_rejects_disjoint_required_hosts() {
        let base = ConstraintSet::default().require_host("a");
        let overlay = ConstraintSet::default().require_host("b");
        assert!(matches!(
            base.merge(&overlay),
            Err(ConstraintConflict::RequiredHosts { .. })
        ));
    }

    #[test]
    fn merge_rejects_disjoint_required_aggregates() {
        let base = ConstraintSet::default().require_aggregate("az1");
        let overlay = ConstraintSet::default().require_aggregate("az2");
        assert!(matches!(
            base.merge(&overlay),
            Err(ConstraintConflict::RequiredAggregates { .. })
        ));
    }

    #[test]
    fn resource_shape_fit() {
        let free = ResourceShape::new(4, 4096, 40);
        assert!(ResourceShape::new(4, 4096, 40).fits_within(&free));
        assert!(!ResourceShape::new(5, 1024, 10).fits_within(&free));
        assert!(!ResourceShape::new(1, 1024, 41).fits_within(&free));
        assert_eq!(
            free.saturating_sub(&ResourceShape::new(8, 1024, 10)),
            ResourceShape::new(0, 3072, 30)
        );
    }

    #[test]
    fn lifecycle_labels() {
        assert_eq!(
            LifecycleState::Pending {
                operation: OperationKind::Evacuate
            }
            .label(),
            "evacuate_pending"
        );
        assert!(LifecycleState::InProgress {
            operation: OperationKind::Resize
        }
        .is_busy());
        assert!(LifecycleState::Releasing.is_busy());
        assert!(!LifecycleState::Error.is_busy());
    }

    #[test]
    fn constraint_set_defaults_missing_fields() {
        let set: ConstraintSet = serde_json::from_str(r#"{"excluded_hosts":["h1"]}"#).unwrap();
        assert_eq!(set.excluded_hosts, hosts(&["h1"]));
        assert!(set.required_hosts.is_empty());
    }
}
