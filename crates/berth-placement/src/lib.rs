//! berth host filter pipeline.
//!
//! Pure placement decisions: given candidate hosts, a merged constraint
//! set and a point-in-time live snapshot, pick one host or report which
//! filter stage emptied the candidate set. Nothing here mutates its
//! inputs or touches the state store.
//!
//! # Components
//!
//! - **`snapshot`**: Candidate hosts and the live capacity/availability view
//! - **`filters`**: Ordered filter stages and `select`
//! - **`weigher`**: Pluggable weighing and deterministic ranking
//! - **`convert`**: Type conversions from state store types

pub mod convert;
pub mod filters;
pub mod snapshot;
pub mod weigher;

pub use convert::{candidate_from_host, live_from_host, snapshot_from_hosts};
pub use filters::{Exhaustion, FilterStage, SelectedHost, Selection, StageReport, select};
pub use snapshot::{HostCandidate, HostLiveState, HostSnapshot, LiveState};
pub use weigher::{ResourceWeigher, WeighedHost, Weigher, WeightMultipliers, rank};
