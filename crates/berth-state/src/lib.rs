//! berth-state: embedded state store for berth.
//!
//! Backed by [redb](https://docs.rs/redb), holds one placement record per
//! instance plus the host inventory, lifecycle state, operation log and
//! faults.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Placement records are written only through [`StateStore::compare_and_swap`],
//! which checks the stored version inside a single write transaction.
//! Operation log keys (`{instance_id}:{operation_id}`) support prefix scans.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{StateStore, epoch_secs};
pub use types::*;
