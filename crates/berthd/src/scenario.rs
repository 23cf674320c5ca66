//! Resize followed by evacuate on two hosts.
//!
//! The resize has to exclude the instance's own host while it picks a
//! target. If that exclusion leaked into the stored constraints, the later
//! evacuate would find the only surviving host excluded and fail. This
//! replays the sequence end to end against an in-memory store.

use std::collections::BTreeSet;

use berth_core::SchedulerConfig;
use berth_scheduler::OperationParams;
use berth_state::{Flavor, LifecycleState, OperationKind, ResourceShape};
use serde_json::json;
use tracing::info;

use crate::stack::Stack;

const INSTANCE: &str = "vm";

pub async fn run(config: &SchedulerConfig, json: bool) -> anyhow::Result<()> {
    let stack = Stack::in_memory(config)?;
    let host_shape = ResourceShape::new(4, 4096, 40);
    for host in ["host1", "host2"] {
        stack
            .inventory
            .register_host(host, BTreeSet::new(), host_shape)?;
    }
    let coordinator = &stack.coordinator;

    let built = coordinator
        .run(
            INSTANCE,
            OperationKind::Build,
            OperationParams::new()
                .with_flavor(Flavor::new("flavor1", ResourceShape::new(1, 1024, 10)))
                .with_image("cirros")
                .force_target("host1"),
        )
        .await?;
    info!(host = %built.dest_host, "built");

    let resized = coordinator
        .run(
            INSTANCE,
            OperationKind::Resize,
            OperationParams::new()
                .with_flavor(Flavor::new("flavor2", ResourceShape::new(2, 2048, 20))),
        )
        .await?;
    if matches!(resized.lifecycle, LifecycleState::AwaitingConfirm { .. }) {
        coordinator.confirm_resize(INSTANCE).await?;
    }
    let durable = resized.record.constraint_set.excluded_hosts.clone();
    info!(host = %resized.dest_host, excluded_hosts = ?durable, "resized");
    if !durable.is_empty() {
        anyhow::bail!("resize left durable exclusions behind: {durable:?}");
    }

    coordinator.force_down(&resized.dest_host, true).await?;
    let evacuated = coordinator
        .run(INSTANCE, OperationKind::Evacuate, OperationParams::new())
        .await?;
    if evacuated.dest_host != built.dest_host {
        anyhow::bail!(
            "evacuate landed on {}, expected {}",
            evacuated.dest_host,
            built.dest_host
        );
    }

    if json {
        let report = json!({
            "build": built.dest_host,
            "resize": resized.dest_host,
            "durable_excluded_hosts": durable,
            "evacuate": evacuated.dest_host,
            "record": evacuated.record,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("build     -> {}", built.dest_host);
        println!(
            "resize    -> {} (durable excluded_hosts: {:?})",
            resized.dest_host, durable
        );
        println!("force-down {}", resized.dest_host);
        println!("evacuate  -> {}", evacuated.dest_host);
        println!("ok: evacuate was not blocked by the resize exclusion");
    }
    Ok(())
}
