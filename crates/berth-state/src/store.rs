//! StateStore: redb-backed state persistence for berth.
//!
//! Provides typed access to placement records, hosts, lifecycle state,
//! the operation log and faults. All values are JSON-serialized into
//! redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        for table in [RECORDS, HOSTS, INSTANCE_STATES, OPERATIONS, FAULTS] {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Placement records ──────────────────────────────────────────

    /// Get the placement record of an instance.
    pub fn get_record(&self, instance_id: &str) -> StateResult<Option<PlacementRecord>> {
        self.get_json(RECORDS, instance_id)
    }

    /// Get the placement record of an instance, or `NotFound`.
    pub fn require_record(&self, instance_id: &str) -> StateResult<PlacementRecord> {
        self.get_record(instance_id)?
            .ok_or_else(|| StateError::NotFound(format!("placement record {instance_id}")))
    }

    /// Write `record` if the stored version equals `expected_version`.
    ///
    /// `expected_version == 0` means the record must not exist yet. On
    /// success the stored copy carries `expected_version + 1` and is
    /// returned. The read-check-write happens inside one write
    /// transaction, so concurrent writers are serialized by redb.
    pub fn compare_and_swap(
        &self,
        instance_id: &str,
        expected_version: u64,
        record: &PlacementRecord,
    ) -> StateResult<PlacementRecord> {
        if record.instance_id != instance_id {
            return Err(StateError::Write(format!(
                "record for {} written under key {instance_id}",
                record.instance_id
            )));
        }

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let stored = {
            let mut table = txn.open_table(RECORDS).map_err(map_err!(Table))?;
            let current: Option<PlacementRecord> =
                match table.get(instance_id).map_err(map_err!(Read))? {
                    Some(guard) => Some(
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                    ),
                    None => None,
                };

            let actual = current.as_ref().map_or(0, |r| r.version);
            if actual != expected_version {
                debug!(%instance_id, expected_version, actual, "placement record CAS rejected");
                return Err(StateError::Conflict {
                    key: instance_id.to_string(),
                    expected: expected_version,
                    actual,
                });
            }

            let now = epoch_secs();
            let mut stored = record.clone();
            stored.version = expected_version + 1;
            stored.created_at = current.map_or(now, |r| r.created_at);
            stored.updated_at = now;

            let value = serde_json::to_vec(&stored).map_err(map_err!(Serialize))?;
            table
                .insert(instance_id, value.as_slice())
                .map_err(map_err!(Write))?;
            stored
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%instance_id, version = stored.version, "placement record stored");
        Ok(stored)
    }

    /// Delete a placement record if its version equals `expected_version`.
    pub fn delete_record(&self, instance_id: &str, expected_version: u64) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(RECORDS).map_err(map_err!(Table))?;
            let actual: u64 = match table.get(instance_id).map_err(map_err!(Read))? {
                Some(guard) => {
                    let record: PlacementRecord =
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                    record.version
                }
                None => {
                    return Err(StateError::NotFound(format!(
                        "placement record {instance_id}"
                    )));
                }
            };
            if actual != expected_version {
                return Err(StateError::Conflict {
                    key: instance_id.to_string(),
                    expected: expected_version,
                    actual,
                });
            }
            table.remove(instance_id).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%instance_id, "placement record deleted");
        Ok(())
    }

    /// List all placement records.
    pub fn list_records(&self) -> StateResult<Vec<PlacementRecord>> {
        self.list_json(RECORDS, "")
    }

    // ── Hosts ──────────────────────────────────────────────────────

    /// Insert or update a host.
    pub fn put_host(&self, host: &HostInfo) -> StateResult<()> {
        self.put_json(HOSTS, &host.id, host)
    }

    /// Get a host by ID.
    pub fn get_host(&self, host_id: &str) -> StateResult<Option<HostInfo>> {
        self.get_json(HOSTS, host_id)
    }

    /// List all hosts, ordered by host ID.
    pub fn list_hosts(&self) -> StateResult<Vec<HostInfo>> {
        self.list_json(HOSTS, "")
    }

    /// Apply `f` to a host inside one write transaction and store the result.
    ///
    /// Returns `None` when the host is unknown. Concurrent updates are
    /// serialized, so `f` always sees the latest usage figures.
    pub fn update_host<T>(
        &self,
        host_id: &str,
        f: impl FnOnce(&mut HostInfo) -> T,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let output = {
            let mut table = txn.open_table(HOSTS).map_err(map_err!(Table))?;
            let current: Option<HostInfo> = match table.get(host_id).map_err(map_err!(Read))? {
                Some(guard) => {
                    Some(serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?)
                }
                None => None,
            };
            let Some(mut host) = current else {
                return Ok(None);
            };

            let output = f(&mut host);
            host.updated_at = epoch_secs();
            let value = serde_json::to_vec(&host).map_err(map_err!(Serialize))?;
            table
                .insert(host_id, value.as_slice())
                .map_err(map_err!(Write))?;
            output
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(Some(output))
    }

    /// Delete a host by ID. Returns true if it existed.
    pub fn delete_host(&self, host_id: &str) -> StateResult<bool> {
        self.remove_key(HOSTS, host_id)
    }

    // ── Lifecycle state ────────────────────────────────────────────

    /// Insert or update the lifecycle state of an instance.
    pub fn put_instance_state(&self, state: &InstanceState) -> StateResult<()> {
        self.put_json(INSTANCE_STATES, &state.instance_id, state)
    }

    pub fn get_instance_state(&self, instance_id: &str) -> StateResult<Option<InstanceState>> {
        self.get_json(INSTANCE_STATES, instance_id)
    }

    pub fn delete_instance_state(&self, instance_id: &str) -> StateResult<bool> {
        self.remove_key(INSTANCE_STATES, instance_id)
    }

    // ── Operation log ──────────────────────────────────────────────

    /// Insert or update an operation record.
    pub fn put_operation(&self, op: &OperationRecord) -> StateResult<()> {
        self.put_json(OPERATIONS, &op.table_key(), op)
    }

    pub fn get_operation(
        &self,
        instance_id: &str,
        operation_id: &str,
    ) -> StateResult<Option<OperationRecord>> {
        self.get_json(OPERATIONS, &operation_key(instance_id, operation_id))
    }

    /// List every operation recorded for an instance, oldest first.
    ///
    /// The key prefix also matches ids that merely start with
    /// `{instance_id}:`, so records are checked against the decoded id.
    pub fn list_operations_for_instance(
        &self,
        instance_id: &str,
    ) -> StateResult<Vec<OperationRecord>> {
        let mut ops: Vec<OperationRecord> = self
            .list_json::<OperationRecord>(OPERATIONS, &format!("{instance_id}:"))?
            .into_iter()
            .filter(|op| op.instance_id == instance_id)
            .collect();
        ops.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.operation_id.cmp(&b.operation_id))
        });
        Ok(ops)
    }

    /// Delete the operation log of an instance. Returns number deleted.
    pub fn delete_operations_for_instance(&self, instance_id: &str) -> StateResult<u32> {
        let prefix = format!("{instance_id}:");
        // Collect keys in a read transaction first.
        let keys: Vec<String> = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(OPERATIONS).map_err(map_err!(Table))?;
            table
                .iter()
                .map_err(map_err!(Read))?
                .filter_map(|entry| {
                    let (key, value) = entry.ok()?;
                    let k = key.value().to_string();
                    if !k.starts_with(&prefix) {
                        return None;
                    }
                    let op: OperationRecord = serde_json::from_slice(value.value()).ok()?;
                    (op.instance_id == instance_id).then_some(k)
                })
                .collect()
        };
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count = keys.len() as u32;
        {
            let mut table = txn.open_table(OPERATIONS).map_err(map_err!(Table))?;
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(count)
    }

    // ── Faults ─────────────────────────────────────────────────────

    /// Record the latest fault of an instance, replacing any older one.
    pub fn put_fault(&self, fault: &InstanceFault) -> StateResult<()> {
        self.put_json(FAULTS, &fault.instance_id, fault)
    }

    pub fn get_fault(&self, instance_id: &str) -> StateResult<Option<InstanceFault>> {
        self.get_json(FAULTS, instance_id)
    }

    pub fn delete_fault(&self, instance_id: &str) -> StateResult<bool> {
        self.remove_key(FAULTS, instance_id)
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn put_json<T: Serialize>(&self, def: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let value = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, def: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Every value whose key starts with `prefix`, in key order.
    fn list_json<T: DeserializeOwned>(&self, def: JsonTable, prefix: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                let item: T =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(item);
            }
        }
        Ok(results)
    }

    fn remove_key(&self, def: JsonTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::Barrier;

    fn test_record(instance_id: &str) -> PlacementRecord {
        PlacementRecord::new(
            instance_id,
            Flavor::new("m1.small", ResourceShape::new(1, 512, 1)),
            "cirros",
            ConstraintSet::default(),
        )
    }

    fn test_host(id: &str) -> HostInfo {
        HostInfo {
            id: id.to_string(),
            aggregates: BTreeSet::new(),
            capacity: ResourceShape::new(8, 16384, 100),
            used: ResourceShape::default(),
            forced_down: false,
            updated_at: 1000,
        }
    }

    fn test_operation(instance_id: &str, operation_id: &str, created_at: u64) -> OperationRecord {
        OperationRecord {
            operation_id: operation_id.to_string(),
            instance_id: instance_id.to_string(),
            kind: OperationKind::Resize,
            source_host: Some("host1".to_string()),
            dest_host: None,
            status: OperationStatus::Accepted,
            created_at,
            updated_at: created_at,
        }
    }

    // ── Placement records ──────────────────────────────────────────

    #[test]
    fn create_with_version_zero() {
        let store = StateStore::open_in_memory().unwrap();

        let stored = store
            .compare_and_swap("inst-1", 0, &test_record("inst-1"))
            .unwrap();
        assert_eq!(stored.version, 1);
        assert!(stored.created_at > 0);

        let retrieved = store.get_record("inst-1").unwrap();
        assert_eq!(retrieved, Some(stored));
    }

    #[test]
    fn create_twice_conflicts() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .compare_and_swap("inst-1", 0, &test_record("inst-1"))
            .unwrap();

        let err = store
            .compare_and_swap("inst-1", 0, &test_record("inst-1"))
            .unwrap_err();
        assert!(matches!(
            err,
            StateError::Conflict {
                expected: 0,
                actual: 1,
                ..
            }
        ));
    }

    #[test]
    fn update_bumps_version_and_keeps_created_at() {
        let store = StateStore::open_in_memory().unwrap();
        let v1 = store
            .compare_and_swap("inst-1", 0, &test_record("inst-1"))
            .unwrap();

        let mut next = v1.clone();
        next.current_host = Some("host1".to_string());
        let v2 = store.compare_and_swap("inst-1", v1.version, &next).unwrap();

        assert_eq!(v2.version, 2);
        assert_eq!(v2.created_at, v1.created_at);
        assert_eq!(v2.current_host.as_deref(), Some("host1"));
    }

    #[test]
    fn stale_version_is_rejected_and_leaves_record_untouched() {
        let store = StateStore::open_in_memory().unwrap();
        let v1 = store
            .compare_and_swap("inst-1", 0, &test_record("inst-1"))
            .unwrap();
        let v2 = store.compare_and_swap("inst-1", 1, &v1).unwrap();

        let mut stale = v1.clone();
        stale.current_host = Some("elsewhere".to_string());
        let err = store.compare_and_swap("inst-1", 1, &stale).unwrap_err();
        assert!(matches!(err, StateError::Conflict { actual: 2, .. }));

        assert_eq!(store.get_record("inst-1").unwrap(), Some(v2));
    }

    #[test]
    fn missing_record_conflicts_on_nonzero_version() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store
            .compare_and_swap("inst-1", 3, &test_record("inst-1"))
            .unwrap_err();
        assert!(matches!(err, StateError::Conflict { actual: 0, .. }));
    }

    #[test]
    fn mismatched_key_is_rejected() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store
            .compare_and_swap("inst-2", 0, &test_record("inst-1"))
            .unwrap_err();
        assert!(matches!(err, StateError::Write(_)));
    }

    #[test]
    fn concurrent_swaps_with_same_version_have_one_winner() {
        let store = StateStore::open_in_memory().unwrap();
        let base = store
            .compare_and_swap("inst-1", 0, &test_record("inst-1"))
            .unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = ["host-a", "host-b"]
            .into_iter()
            .map(|host| {
                let store = store.clone();
                let barrier = barrier.clone();
                let expected = base.version;
                let mut next = base.clone();
                next.current_host = Some(host.to_string());
                std::thread::spawn(move || {
                    barrier.wait();
                    store.compare_and_swap("inst-1", expected, &next)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(StateError::Conflict { .. })))
            .count();
        assert_eq!(winners, 1);
        assert_eq!(conflicts, 1);
        assert_eq!(store.require_record("inst-1").unwrap().version, 2);
    }

    #[test]
    fn require_record_reports_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(matches!(
            store.require_record("ghost"),
            Err(StateError::NotFound(_))
        ));
    }

    #[test]
    fn delete_record_checks_version() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .compare_and_swap("inst-1", 0, &test_record("inst-1"))
            .unwrap();

        assert!(matches!(
            store.delete_record("inst-1", 7),
            Err(StateError::Conflict { .. })
        ));
        store.delete_record("inst-1", 1).unwrap();
        assert!(store.get_record("inst-1").unwrap().is_none());
        assert!(matches!(
            store.delete_record("inst-1", 1),
            Err(StateError::NotFound(_))
        ));
    }

    #[test]
    fn list_records_returns_all() {
        let store = StateStore::open_in_memory().unwrap();
        for id in ["a", "b", "c"] {
            store.compare_and_swap(id, 0, &test_record(id)).unwrap();
        }
        assert_eq!(store.list_records().unwrap().len(), 3);
    }

    // ── Hosts ──────────────────────────────────────────────────────

    #[test]
    fn host_put_get_list_delete() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_host(&test_host("host2")).unwrap();
        store.put_host(&test_host("host1")).unwrap();

        assert_eq!(store.get_host("host1").unwrap(), Some(test_host("host1")));
        let ids: Vec<String> = store
            .list_hosts()
            .unwrap()
            .into_iter()
            .map(|h| h.id)
            .collect();
        assert_eq!(ids, vec!["host1", "host2"]);

        assert!(store.delete_host("host1").unwrap());
        assert!(!store.delete_host("host1").unwrap());
    }

    #[test]
    fn update_host_applies_closure() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_host(&test_host("host1")).unwrap();

        let claimed = store
            .update_host("host1", |h| {
                h.used = h.used.saturating_add(&ResourceShape::new(2, 2048, 20));
                h.free()
            })
            .unwrap();
        assert_eq!(claimed, Some(ResourceShape::new(6, 14336, 80)));
        assert_eq!(
            store.get_host("host1").unwrap().unwrap().used,
            ResourceShape::new(2, 2048, 20)
        );

        assert_eq!(store.update_host("ghost", |h| h.forced_down = true).unwrap(), None);
    }

    // ── Lifecycle state ────────────────────────────────────────────

    #[test]
    fn instance_state_roundtrip() {
        let store = StateStore::open_in_memory().unwrap();
        let state = InstanceState {
            instance_id: "inst-1".to_string(),
            lifecycle: LifecycleState::AwaitingConfirm {
                operation: OperationKind::ColdMigrate,
                source_host: "host1".to_string(),
                previous_flavor: Flavor::new("m1.small", ResourceShape::new(1, 512, 1)),
            },
            operation_id: Some("op-1".to_string()),
            updated_at: 1000,
        };
        store.put_instance_state(&state).unwrap();
        assert_eq!(store.get_instance_state("inst-1").unwrap(), Some(state));
        assert!(store.delete_instance_state("inst-1").unwrap());
        assert!(store.get_instance_state("inst-1").unwrap().is_none());
    }

    // ── Operation log ──────────────────────────────────────────────

    #[test]
    fn operations_are_scoped_by_instance_prefix() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_operation(&test_operation("inst-1", "op-2", 20)).unwrap();
        store.put_operation(&test_operation("inst-1", "op-1", 10)).unwrap();
        store.put_operation(&test_operation("inst-10", "op-3", 5)).unwrap();

        let ops = store.list_operations_for_instance("inst-1").unwrap();
        let ids: Vec<&str> = ops.iter().map(|o| o.operation_id.as_str()).collect();
        assert_eq!(ids, vec!["op-1", "op-2"]);

        let mut done = test_operation("inst-1", "op-1", 10);
        done.status = OperationStatus::Completed;
        store.put_operation(&done).unwrap();
        assert_eq!(
            store.get_operation("inst-1", "op-1").unwrap().unwrap().status,
            OperationStatus::Completed
        );

        assert_eq!(store.delete_operations_for_instance("inst-1").unwrap(), 2);
        assert_eq!(store.list_operations_for_instance("inst-10").unwrap().len(), 1);
    }

    #[test]
    fn operations_of_colon_prefixed_ids_stay_separate() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_operation(&test_operation("a", "op-1", 10)).unwrap();
        store.put_operation(&test_operation("a:b", "op-2", 20)).unwrap();

        let listed: Vec<(String, String)> = store
            .list_operations_for_instance("a")
            .unwrap()
            .into_iter()
            .map(|op| (op.instance_id, op.operation_id))
            .collect();
        assert_eq!(listed, vec![("a".to_string(), "op-1".to_string())]);

        assert_eq!(store.delete_operations_for_instance("a").unwrap(), 1);
        let remaining = store.list_operations_for_instance("a:b").unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].operation_id, "op-2");
        assert!(store.list_operations_for_instance("a").unwrap().is_empty());
    }

    // ── Faults ─────────────────────────────────────────────────────

    #[test]
    fn fault_replaces_previous() {
        let store = StateStore::open_in_memory().unwrap();
        let mut fault = InstanceFault {
            instance_id: "inst-1".to_string(),
            operation_id: "op-1".to_string(),
            kind: OperationKind::Evacuate,
            message: "No valid host was found".to_string(),
            filter_stage: Some("availability".to_string()),
            constraints: Some(ConstraintSet::default().exclude_host("host1")),
            created_at: 1000,
        };
        store.put_fault(&fault).unwrap();

        fault.operation_id = "op-2".to_string();
        store.put_fault(&fault).unwrap();

        assert_eq!(
            store.get_fault("inst-1").unwrap().unwrap().operation_id,
            "op-2"
        );
        assert!(store.delete_fault("inst-1").unwrap());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store
                .compare_and_swap("inst-1", 0, &test_record("inst-1"))
                .unwrap();
            store.put_host(&test_host("host1")).unwrap();
        }

        // Reopen the same database file.
        let store = StateStore::open(&db_path).unwrap();
        assert_eq!(store.require_record("inst-1").unwrap().version, 1);
        assert!(store.get_host("host1").unwrap().is_some());
    }

    // ── Edge cases ─────────────────────────────────────────────────

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list_records().unwrap().is_empty());
        assert!(store.list_hosts().unwrap().is_empty());
        assert!(store.list_operations_for_instance("any").unwrap().is_empty());
        assert!(store.get_fault("any").unwrap().is_none());
        assert!(!store.delete_host("nope").unwrap());
        assert!(!store.delete_instance_state("nope").unwrap());
        assert_eq!(store.delete_operations_for_instance("nope").unwrap(), 0);
    }
}
