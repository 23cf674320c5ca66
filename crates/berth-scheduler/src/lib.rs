//! berth-scheduler: operation scoping and the instance lifecycle.
//!
//! Takes lifecycle requests (build, resize, migrate, evacuate, unshelve),
//! scopes their constraints, runs placement and drives the compute agent.
//!
//! # Architecture
//!
//! ```text
//! Coordinator
//!   ├── StateStore (placement records via CAS, lifecycle, operation log, faults)
//!   ├── OperationScopeManager
//!   │     ├── durable constraints (from the record, committed back)
//!   │     └── transient overlay (per operation, always discarded)
//!   ├── HostStateSource (point-in-time host snapshot)
//!   └── ComputeAgent (executes moves under a timeout)
//! ```

pub mod agent;
pub mod coordinator;
pub mod error;
pub mod intent;
pub mod lifecycle;
pub mod scope;

pub use agent::{AgentFuture, ComputeAgent, HostStateSource, MoveOutcome, MoveRequest};
pub use coordinator::{Accepted, Coordinator, CoordinatorConfig, OperationHandle, OperationOutcome};
pub use error::{SchedulerError, SchedulerResult};
pub use intent::{OperationIntent, OperationParams};
pub use scope::{OperationScope, OperationScopeManager, ScopePolicy};
