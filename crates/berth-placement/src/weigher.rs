//! Host weighing for placement decisions.
//!
//! Every host that survives filtering gets a weight; the best weight wins.
//! Ranking is deterministic: weight descending, then host ID ascending.

use berth_state::{HostId, ResourceShape};
use serde::Serialize;

use crate::snapshot::{HostLiveState, LiveState};

/// Scores an eligible host. Higher is better.
pub trait Weigher: Send + Sync {
    fn name(&self) -> &str;

    fn weigh(&self, host: &HostLiveState, request: &ResourceShape) -> f64;
}

/// Per-resource multipliers for [`ResourceWeigher`].
///
/// Positive values prefer hosts left with more free capacity (spread),
/// negative values prefer hosts left fuller (pack).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WeightMultipliers {
    pub ram: f64,
    pub cpu: f64,
    pub disk: f64,
}

impl Default for WeightMultipliers {
    fn default() -> Self {
        Self {
            ram: 1.0,
            cpu: 0.0,
            disk: 0.0,
        }
    }
}

/// Weighs hosts by the fraction of each resource still free after placement.
#[derive(Debug, Clone, Default)]
pub struct ResourceWeigher {
    multipliers: WeightMultipliers,
}

impl ResourceWeigher {
    pub fn new(multipliers: WeightMultipliers) -> Self {
        Self { multipliers }
    }

    /// Most free RAM first.
    pub fn spread() -> Self {
        Self::default()
    }

    /// Fullest host first (bin-packing).
    pub fn pack() -> Self {
        Self::new(WeightMultipliers {
            ram: -1.0,
            cpu: -1.0,
            disk: 0.0,
        })
    }

    pub fn multipliers(&self) -> WeightMultipliers {
        self.multipliers
    }
}

impl Weigher for ResourceWeigher {
    fn name(&self) -> &str {
        "resource"
    }

    fn weigh(&self, host: &HostLiveState, request: &ResourceShape) -> f64 {
        let after = host.free.saturating_sub(request);
        let m = &self.multipliers;
        m.ram * fraction(after.memory_mb, host.capacity.memory_mb)
            + m.cpu * fraction(u64::from(after.vcpus), u64::from(host.capacity.vcpus))
            + m.disk * fraction(after.disk_gb, host.capacity.disk_gb)
    }
}

fn fraction(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// A host and the weight it received.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeighedHost {
    pub host_id: HostId,
    pub weight: f64,
}

/// Weigh `hosts` and sort them best first. Hosts absent from `live` are skipped.
pub fn rank<'a>(
    hosts: impl IntoIterator<Item = &'a str>,
    live: &LiveState,
    request: &ResourceShape,
    weigher: &dyn Weigher,
) -> Vec<WeighedHost> {
    let mut ranked: Vec<WeighedHost> = hosts
        .into_iter()
        .filter_map(|id| {
            live.get(id).map(|state| WeighedHost {
                host_id: id.to_string(),
                weight: weigher.weigh(state, request),
            })
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.weight
            .total_cmp(&a.weight)
            .then_with(|| a.host_id.cmp(&b.host_id))
    });
    ranked
}
