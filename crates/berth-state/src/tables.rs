//! redb table definitions for the berth state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Placement records keyed by `{instance_id}`.
pub const RECORDS: JsonTable = TableDefinition::new("placement_records");

/// Host inventory keyed by `{host_id}`.
pub const HOSTS: JsonTable = TableDefinition::new("hosts");

/// Lifecycle state keyed by `{instance_id}`.
pub const INSTANCE_STATES: JsonTable = TableDefinition::new("instance_states");

/// Operation log keyed by `{instance_id}:{operation_id}`.
pub const OPERATIONS: JsonTable = TableDefinition::new("operations");

/// Latest fault keyed by `{instance_id}`.
pub const FAULTS: JsonTable = TableDefinition::new("faults");

/// Shape shared by every table: string keys, JSON values.
pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;
