use ansi_term::Colour::{Green, Yellow};
use anyhow::Result;
use clap::{Args, Subcommand};
use std::time::Duration;
use tracing::{info, warn};
use vmctl_common::inventory::SnapshotTree;
use vmctl_common::{
    find_snapshot, PowerState, PropertyCollector, TaskHandle, TaskWaiter, VmSummary,
};

use crate::client::EndpointClient;

/// vmctl subcommands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Power on virtual machines
    #[command(name = "poweron")]
    PowerOn(VmArgs),
    /// Power off virtual machines
    #[command(name = "poweroff")]
    PowerOff(VmArgs),
    /// Revert virtual machines to a named snapshot
    Revert(RevertArgs),
    /// List virtual machines and their snapshots
    List,
}

/// Per-invocation settings shared by all commands
#[derive(Debug, Clone, Copy, Default)]
pub struct WaitOptions {
    /// Deadline for each wait on submitted tasks
    pub timeout: Option<Duration>,
}

impl Commands {
    pub async fn execute(self, client: &EndpointClient, options: WaitOptions) -> Result<()> {
        match self {
            Commands::PowerOn(args) => cmd_power(client, args, PowerState::PoweredOn, options).await,
            Commands::PowerOff(args) => {
                cmd_power(client, args, PowerState::PoweredOff, options).await
            }
            Commands::Revert(args) => cmd_revert(client, args, options).await,
            Commands::List => cmd_list(client).await,
        }
    }
}

/// Arguments for the `poweron` and `poweroff` commands
#[derive(Debug, Args)]
pub struct VmArgs {
    /// Names of the virtual machines (repeatable)
    #[clap(short = 'v', long = "vm", alias = "vmname", value_name = "NAME", required = true)]
    pub vms: Vec<String>,
}

/// Arguments for the `revert` command
#[derive(Debug, Args)]
pub struct RevertArgs {
    /// Names of the virtual machines (repeatable)
    #[clap(short = 'v', long = "vm", alias = "vmname", value_name = "NAME", required = true)]
    pub vms: Vec<String>,

    /// Name of the snapshot to revert to
    #[clap(short = 's', long, value_name = "SNAPSHOT")]
    pub snapshot: String,
}

/// Power every named VM into `target`, skipping those already there
pub async fn cmd_power(
    client: &EndpointClient,
    args: VmArgs,
    target: PowerState,
    options: WaitOptions,
) -> Result<()> {
    let label = match target {
        PowerState::PoweredOn => "ON",
        _ => "OFF",
    };
    let vms = select_vms(client.list_vms().await?, &args.vms)?;

    let mut tasks: Vec<TaskHandle> = Vec::new();
    for vm in &vms {
        if vm.power_state == target {
            println!("{} already {}", vm.name, label);
            continue;
        }
        println!("Powering {} {}", label.to_lowercase(), vm.name);
        let submitted = match target {
            PowerState::PoweredOn => client.power_on(&vm.vm).await,
            _ => client.power_off(&vm.vm).await,
        };
        match submitted {
            Ok(task) => {
                info!("Submitted {} for {}", task, vm.name);
                tasks.push(task);
            }
            Err(e) => return Err(settle_after_failed_submit(client, tasks, options, e).await),
        }
    }

    if tasks.is_empty() {
        return Ok(());
    }

    TaskWaiter::new(client)
        .with_timeout(options.timeout)
        .wait_for_all(tasks)
        .await?;
    println!(
        "{}",
        Green.paint(format!("Virtual Machine(s) have been powered {} successfully", label))
    );
    Ok(())
}

/// Revert every named VM that has the snapshot, then wait for all reverts together
pub async fn cmd_revert(client: &EndpointClient, args: RevertArgs, options: WaitOptions) -> Result<()> {
    let vms = select_vms(client.list_vms().await?, &args.vms)?;

    let mut tasks: Vec<TaskHandle> = Vec::new();
    for vm in &vms {
        match find_snapshot(&vm.snapshots, &args.snapshot) {
            Some(snapshot) => {
                println!("Reverting {} to snapshot {}", vm.name, snapshot.name);
                match client.revert_to_snapshot(&snapshot.snapshot).await {
                    Ok(task) => tasks.push(task),
                    Err(e) => {
                        return Err(settle_after_failed_submit(client, tasks, options, e).await)
                    }
                }
            }
            None => info!("{} has no snapshot named {}", vm.name, args.snapshot),
        }
    }

    if tasks.is_empty() {
        anyhow::bail!("Snapshot *{}* not found", args.snapshot);
    }

    TaskWaiter::new(client)
        .with_timeout(options.timeout)
        .wait_for_all(tasks)
        .await?;
    println!("{}", Green.paint("Done reverting"));
    Ok(())
}

pub async fn cmd_list(client: &EndpointClient) -> Result<()> {
    for vm in client.list_vms().await? {
        println!("{} ({}) {}", vm.name, vm.vm, vm.power_state.label());
        for root in &vm.snapshots {
            print_snapshot(root, 1);
        }
    }
    Ok(())
}

fn print_snapshot(node: &SnapshotTree, depth: usize) {
    println!(
        "{}- {} [{}]",
        "  ".repeat(depth),
        node.name,
        node.power_state.label()
    );
    for child in &node.children {
        print_snapshot(child, depth + 1);
    }
}

/// Wait on the tasks submitted before `cause`, then hand `cause` back.
///
/// The outcome of those tasks is reported but never replaces `cause`.
async fn settle_after_failed_submit<C: PropertyCollector>(
    collector: &C,
    submitted: Vec<TaskHandle>,
    options: WaitOptions,
    cause: anyhow::Error,
) -> anyhow::Error {
    if submitted.is_empty() {
        return cause;
    }

    warn!(
        "Submission failed, waiting on {} task(s) already submitted",
        submitted.len()
    );
    let outcome = TaskWaiter::new(collector)
        .with_timeout(options.timeout)
        .wait_for_all(submitted.iter().cloned())
        .await;
    match outcome {
        Ok(()) => eprintln!(
            "{}",
            Yellow.paint(format!(
                "{} task(s) submitted before the failure completed",
                submitted.len()
            ))
        ),
        Err(e) => eprintln!(
            "{}",
            Yellow.paint(format!("Tasks submitted before the failure did not complete: {}", e))
        ),
    }
    cause
}

/// Keep the VMs whose names were requested; fail if none match
pub fn select_vms(all: Vec<VmSummary>, names: &[String]) -> Result<Vec<VmSummary>> {
    for name in names {
        if !all.iter().any(|vm| &vm.name == name) {
            eprintln!("{}", Yellow.paint(format!("VM {} was not found", name)));
        }
    }

    let selected: Vec<VmSummary> = all
        .into_iter()
        .filter(|vm| names.contains(&vm.name))
        .collect();
    if selected.is_empty() {
        anyhow::bail!("VM specified was not found");
    }
    Ok(selected)
}
