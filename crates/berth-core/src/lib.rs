//! berth-core: configuration shared by the berth crates.

pub mod config;
pub mod duration;

pub use config::{BerthConfig, SchedulerConfig, StoreConfig, WeightsConfig};
pub use duration::{DurationParseError, parse_duration};
