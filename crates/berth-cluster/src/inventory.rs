//! Host inventory: registered compute hosts and their capacity.
//!
//! Hosts are persisted to the `StateStore`. Capacity claims and releases
//! go through `StateStore::update_host`, so two concurrent claims on one
//! host are serialized and the second sees the first one's usage.

use std::collections::BTreeSet;

use berth_placement::{HostSnapshot, snapshot_from_hosts};
use berth_scheduler::HostStateSource;
use berth_state::*;
use tracing::{debug, info, warn};

/// Result of a capacity claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    Claimed,
    Insufficient { free: ResourceShape },
    HostDown,
    UnknownHost,
}

/// Store-backed registry of compute hosts.
#[derive(Clone)]
pub struct HostInventory {
    state: StateStore,
}

impl HostInventory {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }

    /// Register a host, or update the aggregates and capacity of a known one.
    ///
    /// Re-registering keeps current usage and the force-down flag.
    pub fn register_host(
        &self,
        host_id: &str,
        aggregates: BTreeSet<AggregateId>,
        capacity: ResourceShape,
    ) -> StateResult<HostInfo> {
        let host = match self.state.get_host(host_id)? {
            Some(mut existing) => {
                existing.aggregates = aggregates;
                existing.capacity = capacity;
                existing.updated_at = epoch_secs();
                existing
            }
            None => HostInfo {
                id: host_id.to_string(),
                aggregates,
                capacity,
                used: ResourceShape::default(),
                forced_down: false,
                updated_at: epoch_secs(),
            },
        };
        self.state.put_host(&host)?;
        info!(host = %host_id, capacity = %capacity, aggregates = ?host.aggregates, "host registered");
        Ok(host)
    }

    pub fn remove_host(&self, host_id: &str) -> StateResult<bool> {
        let existed = self.state.delete_host(host_id)?;
        if existed {
            info!(host = %host_id, "host removed");
        }
        Ok(existed)
    }

    /// Set or clear the force-down flag. Returns false for an unknown host.
    pub fn force_down(&self, host_id: &str, down: bool) -> StateResult<bool> {
        let updated = self
            .state
            .update_host(host_id, |host| host.forced_down = down)?;
        match updated {
            Some(()) => {
                if down {
                    warn!(host = %host_id, "host forced down");
                } else {
                    info!(host = %host_id, "host back in service");
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Reserve `resources` on a host if it is up and has room.
    pub fn claim(&self, host_id: &str, resources: &ResourceShape) -> StateResult<Claim> {
        let claim = self.state.update_host(host_id, |host| {
            if host.forced_down {
                return Claim::HostDown;
            }
            let free = host.free();
            if !resources.fits_within(&free) {
                return Claim::Insufficient { free };
            }
            host.used = host.used.saturating_add(resources);
            Claim::Claimed
        })?;
        let claim = claim.unwrap_or(Claim::UnknownHost);
        debug!(host = %host_id, request = %resources, ?claim, "capacity claim");
        Ok(claim)
    }

    /// Give back `resources` on a host. Returns false for an unknown host.
    pub fn release(&self, host_id: &str, resources: &ResourceShape) -> StateResult<bool> {
        let released = self.state.update_host(host_id, |host| {
            host.used = host.used.saturating_sub(resources);
        })?;
        debug!(host = %host_id, request = %resources, known = released.is_some(), "capacity released");
        Ok(released.is_some())
    }

    pub fn get_host(&self, host_id: &str) -> StateResult<Option<HostInfo>> {
        self.state.get_host(host_id)
    }

    pub fn list_hosts(&self) -> StateResult<Vec<HostInfo>> {
        self.state.list_hosts()
    }
}

impl HostStateSource for HostInventory {
    fn snapshot(&self) -> anyhow::Result<HostSnapshot> {
        let hosts = self.state.list_hosts()?;
        Ok(snapshot_from_hosts(&hosts))
    }
}
