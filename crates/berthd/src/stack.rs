//! Wiring of the berth subsystems over one state store.

use std::path::Path;
use std::sync::Arc;

use berth_cluster::{HostInventory, SimulatedAgent};
use berth_core::{BerthConfig, SchedulerConfig};
use berth_scheduler::{Coordinator, CoordinatorConfig};
use berth_state::StateStore;
use tracing::info;

pub struct Stack {
    pub inventory: HostInventory,
    pub coordinator: Coordinator,
}

impl Stack {
    /// Open the on-disk store. `data_dir` takes precedence over `store.path`.
    pub fn open(config: &BerthConfig, data_dir: Option<&Path>) -> anyhow::Result<Self> {
        let db_path = match data_dir {
            Some(dir) => dir.join("berth.redb"),
            None => config.store.path.clone(),
        };
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = StateStore::open(&db_path)?;
        info!(path = ?db_path, "state store opened");
        Self::with_store(store, &config.scheduler)
    }

    pub fn in_memory(scheduler: &SchedulerConfig) -> anyhow::Result<Self> {
        Self::with_store(StateStore::open_in_memory()?, scheduler)
    }

    fn with_store(store: StateStore, scheduler: &SchedulerConfig) -> anyhow::Result<Self> {
        let config = CoordinatorConfig::try_from(scheduler)?;
        let inventory = HostInventory::new(store.clone());
        let agent = Arc::new(SimulatedAgent::new(inventory.clone()));
        let coordinator = Coordinator::new(
            store,
            agent,
            Arc::new(inventory.clone()),
            config,
        );
        Ok(Self {
            inventory,
            coordinator,
        })
    }
}
