//! berth-cluster: the host side of placement.
//!
//! Concrete collaborators for the scheduler's agent interfaces.
//!
//! # Architecture
//!
//! ```text
//! HostInventory (StateStore `hosts` table)
//!   ├── register / remove / force-down hosts
//!   ├── claim / release capacity (one write transaction per change)
//!   └── HostStateSource: snapshot for the filter pipeline
//!
//! SimulatedAgent (ComputeAgent)
//!   ├── claims capacity on the target, releases it on the source
//!   ├── reports CapacityConflict when the target filled up meanwhile
//!   └── injected failures and delays for testing
//! ```

pub mod agent;
pub mod inventory;

pub use agent::SimulatedAgent;
pub use inventory::{Claim, HostInventory};
