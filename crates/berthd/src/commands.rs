//! Subcommand handlers.

use std::collections::BTreeSet;

use anyhow::Context;
use berth_scheduler::{OperationOutcome, OperationParams};
use berth_state::{OperationKind, PlacementRecord};
use serde::Serialize;

use crate::stack::Stack;
use crate::{HostAction, InstanceAction};

pub async fn host(stack: &Stack, action: HostAction, json: bool) -> anyhow::Result<()> {
    match action {
        HostAction::Add {
            id,
            capacity,
            aggregates,
        } => {
            let aggregates: BTreeSet<String> = aggregates.into_iter().collect();
            let host = stack
                .inventory
                .register_host(&id, aggregates, capacity.shape())?;
            if json {
                print_json(&host)?;
            } else {
                println!("host {} registered with {}", host.id, host.capacity);
            }
        }
        HostAction::Remove { id } => {
            if !stack.inventory.remove_host(&id)? {
                anyhow::bail!("host {id} is not registered");
            }
            println!("host {id} removed");
        }
        HostAction::List => {
            let hosts = stack.inventory.list_hosts()?;
            if json {
                print_json(&hosts)?;
            } else if hosts.is_empty() {
                println!("no hosts registered");
            } else {
                println!("{:<16} {:<6} {:<28} {:<28} AGGREGATES", "HOST", "STATE", "CAPACITY", "FREE");
                for host in hosts {
                    let state = if host.forced_down { "down" } else { "up" };
                    let aggregates: Vec<&str> = host.aggregates.iter().map(String::as_str).collect();
                    println!(
                        "{:<16} {:<6} {:<28} {:<28} {}",
                        host.id,
                        state,
                        host.capacity.to_string(),
                        host.free().to_string(),
                        aggregates.join(",")
                    );
                }
            }
        }
        HostAction::ForceDown { id } => {
            stack.coordinator.force_down(&id, true).await?;
            println!("host {id} forced down");
        }
        HostAction::ForceUp { id } => {
            stack.coordinator.force_down(&id, false).await?;
            println!("host {id} back in service");
        }
    }
    Ok(())
}

pub async fn instance(stack: &Stack, action: InstanceAction, json: bool) -> anyhow::Result<()> {
    let coordinator = &stack.coordinator;
    match action {
        InstanceAction::Build {
            id,
            flavor,
            image,
            host,
            constraints,
        } => {
            let mut params = OperationParams::new()
                .with_flavor(flavor.flavor())
                .with_image(image)
                .with_constraints(constraints.constraint_set());
            if let Some(host) = host {
                params = params.force_target(host);
            }
            let outcome = coordinator.run(&id, OperationKind::Build, params).await?;
            print_outcome(&outcome, json)?;
        }
        InstanceAction::Resize { id, flavor } => {
            let params = OperationParams::new().with_flavor(flavor.flavor());
            let outcome = coordinator.run(&id, OperationKind::Resize, params).await?;
            print_outcome(&outcome, json)?;
        }
        InstanceAction::Migrate { id, host } => {
            let outcome = coordinator
                .run(&id, OperationKind::ColdMigrate, targeted(host))
                .await?;
            print_outcome(&outcome, json)?;
        }
        InstanceAction::LiveMigrate { id, host } => {
            let outcome = coordinator
                .run(&id, OperationKind::LiveMigrate, targeted(host))
                .await?;
            print_outcome(&outcome, json)?;
        }
        InstanceAction::Evacuate { id, host } => {
            let outcome = coordinator
                .run(&id, OperationKind::Evacuate, targeted(host))
                .await?;
            print_outcome(&outcome, json)?;
        }
        InstanceAction::Unshelve { id, host } => {
            let outcome = coordinator
                .run(&id, OperationKind::Unshelve, targeted(host))
                .await?;
            print_outcome(&outcome, json)?;
        }
        InstanceAction::Shelve { id } => {
            let record = coordinator.shelve_offload(&id).await?;
            print_record("shelved", &record, json)?;
        }
        InstanceAction::ConfirmResize { id } => {
            let record = coordinator.confirm_resize(&id).await?;
            print_record("move confirmed", &record, json)?;
        }
        InstanceAction::RevertResize { id } => {
            let record = coordinator.revert_resize(&id).await?;
            print_record("move reverted", &record, json)?;
        }
        InstanceAction::Delete { id } => {
            coordinator.delete(&id).await?;
            println!("instance {id} deleted");
        }
        InstanceAction::SetConstraints { id, constraints } => {
            let record = coordinator
                .set_constraints(&id, constraints.constraint_set())
                .await?;
            print_record("constraints replaced", &record, json)?;
        }
        InstanceAction::Show { id } => show(stack, &id, json).await?,
    }
    Ok(())
}

fn targeted(host: Option<String>) -> OperationParams {
    match host {
        Some(host) => OperationParams::new().force_target(host),
        None => OperationParams::new(),
    }
}

#[derive(Serialize)]
struct InstanceView {
    record: PlacementRecord,
    lifecycle: Option<berth_state::LifecycleState>,
    fault: Option<berth_state::InstanceFault>,
    operations: Vec<berth_state::OperationRecord>,
}

async fn show(stack: &Stack, instance_id: &str, json: bool) -> anyhow::Result<()> {
    let coordinator = &stack.coordinator;
    let record = coordinator
        .record(instance_id)?
        .with_context(|| format!("instance {instance_id} not found"))?;
    let view = InstanceView {
        lifecycle: coordinator.lifecycle(instance_id).await?,
        fault: coordinator.fault(instance_id)?,
        operations: coordinator.operations(instance_id)?,
        record,
    };
    if json {
        return print_json(&view);
    }

    let record = &view.record;
    println!("instance:    {}", record.instance_id);
    println!("host:        {}", record.current_host.as_deref().unwrap_or("-"));
    println!("flavor:      {} ({})", record.flavor.id, record.flavor.resources);
    println!("image:       {}", record.image_ref);
    println!(
        "lifecycle:   {}",
        view.lifecycle.as_ref().map(|l| l.label()).unwrap_or_else(|| "-".to_string())
    );
    println!("version:     {}", record.version);
    println!("constraints: {:?}", record.constraint_set);
    if let Some(fault) = &view.fault {
        println!(
            "fault:       {} during {} (stage {})",
            fault.message,
            fault.kind,
            fault.filter_stage.as_deref().unwrap_or("-")
        );
    }
    for op in &view.operations {
        println!(
            "  {} {:<13} {:?} -> {:?} {:?}",
            op.operation_id, op.kind.as_str(), op.source_host, op.dest_host, op.status
        );
    }
    Ok(())
}

fn print_outcome(outcome: &OperationOutcome, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(outcome);
    }
    println!(
        "{} of {} landed on {} (from {}, {} attempt(s)), now {}",
        outcome.kind,
        outcome.instance_id,
        outcome.dest_host,
        outcome.source_host.as_deref().unwrap_or("-"),
        outcome.attempts,
        outcome.lifecycle.label()
    );
    Ok(())
}

fn print_record(what: &str, record: &PlacementRecord, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(record);
    }
    println!(
        "{}: {} on {} (version {})",
        what,
        record.instance_id,
        record.current_host.as_deref().unwrap_or("-"),
        record.version
    );
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
