// vmctl-sim/src/inventory.rs
// Virtual machines and snapshot trees held by the simulated endpoint
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use vmctl_common::config::{SnapshotSeed, VmSeed};
use vmctl_common::inventory::SnapshotWalk;
use vmctl_common::{MethodFault, ObjectRef, PowerState, SnapshotTree, VmSummary};

/// Effect a task applies to the inventory when it completes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskAction {
    PowerOn { vm: ObjectRef },
    PowerOff { vm: ObjectRef },
    Revert { vm: ObjectRef, snapshot: ObjectRef },
}

impl TaskAction {
    pub fn description(&self) -> &'static str {
        match self {
            TaskAction::PowerOn { .. } => "VirtualMachine.powerOn",
            TaskAction::PowerOff { .. } => "VirtualMachine.powerOff",
            TaskAction::Revert { .. } => "VirtualMachineSnapshot.revert",
        }
    }

    /// Object the task is reported against
    pub fn entity(&self) -> &ObjectRef {
        match self {
            TaskAction::PowerOn { vm } | TaskAction::PowerOff { vm } => vm,
            TaskAction::Revert { snapshot, .. } => snapshot,
        }
    }
}

/// Owner of a snapshot, as resolved by [`Inventory::snapshot_owner`]
#[derive(Debug, Clone)]
pub struct SnapshotOwner {
    pub vm: ObjectRef,
    pub vm_name: String,
    pub snapshot_name: String,
}

/// All VMs known to the endpoint, keyed by reference
pub struct Inventory {
    vms: RwLock<BTreeMap<ObjectRef, VmSummary>>,
}

impl Inventory {
    /// Build the inventory, assigning `vm-N` and `snapshot-N` references in seed order
    pub fn from_seeds(seeds: &[VmSeed]) -> Self {
        let mut snapshot_ids = 0u64;
        let vms = seeds
            .iter()
            .enumerate()
            .map(|(i, seed)| {
                let vm = ObjectRef::new(format!("vm-{}", i + 1));
                let summary = VmSummary {
                    vm: vm.clone(),
                    name: seed.name.clone(),
                    power_state: seed.power_state,
                    snapshots: seed
                        .snapshots
                        .iter()
                        .map(|s| build_tree(s, &mut snapshot_ids))
                        .collect(),
                };
                (vm, summary)
            })
            .collect();
        Self {
            vms: RwLock::new(vms),
        }
    }

    pub async fn vm_count(&self) -> usize {
        self.vms.read().await.len()
    }

    pub async fn list(&self) -> Vec<VmSummary> {
        self.vms.read().await.values().cloned().collect()
    }

    pub async fn vm(&self, vm: &ObjectRef) -> Option<VmSummary> {
        self.vms.read().await.get(vm).cloned()
    }

    /// Find the VM whose snapshot tree contains `snapshot`
    pub async fn snapshot_owner(&self, snapshot: &ObjectRef) -> Option<SnapshotOwner> {
        let vms = self.vms.read().await;
        vms.values().find_map(|summary| {
            SnapshotWalk::forest(&summary.snapshots)
                .find(|node| &node.snapshot == snapshot)
                .map(|node| SnapshotOwner {
                    vm: summary.vm.clone(),
                    vm_name: summary.name.clone(),
                    snapshot_name: node.name.clone(),
                })
        })
    }

    /// Apply a completed task's effect, or return the fault the task ends with
    pub async fn apply(&self, action: &TaskAction) -> Result<(), MethodFault> {
        let mut vms = self.vms.write().await;
        match action {
            TaskAction::PowerOn { vm } => {
                let summary = vms.get_mut(vm).ok_or_else(|| not_found(vm))?;
                if summary.power_state == PowerState::PoweredOn {
                    return Err(invalid_power_state("Powered on"));
                }
                summary.power_state = PowerState::PoweredOn;
            }
            TaskAction::PowerOff { vm } => {
                let summary = vms.get_mut(vm).ok_or_else(|| not_found(vm))?;
                if summary.power_state == PowerState::PoweredOff {
                    return Err(invalid_power_state("Powered off"));
                }
                summary.power_state = PowerState::PoweredOff;
            }
            TaskAction::Revert { vm, snapshot } => {
                let summary = vms.get_mut(vm).ok_or_else(|| not_found(vm))?;
                let recorded = SnapshotWalk::forest(&summary.snapshots)
                    .find(|node| &node.snapshot == snapshot)
                    .map(|node| node.power_state)
                    .ok_or_else(|| not_found(snapshot))?;
                summary.power_state = recorded;
            }
        }
        Ok(())
    }
}

fn build_tree(seed: &SnapshotSeed, next_id: &mut u64) -> SnapshotTree {
    *next_id += 1;
    let snapshot = ObjectRef::new(format!("snapshot-{}", next_id));
    SnapshotTree {
        snapshot,
        name: seed.name.clone(),
        description: seed.description.clone(),
        power_state: seed.power_state,
        children: seed
            .children
            .iter()
            .map(|child| build_tree(child, next_id))
            .collect(),
    }
}

fn not_found(obj: &ObjectRef) -> MethodFault {
    MethodFault::new(
        "ManagedObjectNotFound",
        format!("The object '{}' has already been deleted or has not been completely created", obj),
    )
}

fn invalid_power_state(current: &str) -> MethodFault {
    MethodFault::new(
        "InvalidPowerState",
        format!(
            "The attempted operation cannot be performed in the current state ({}).",
            current
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmctl_common::SimConfig;

    fn inventory() -> Inventory {
        Inventory::from_seeds(&SimConfig::default_inventory())
    }

    #[tokio::test]
    async fn test_references_follow_seed_order() {
        let inv = inventory();
        let vms = inv.list().await;
        assert_eq!(vms.len(), 2);
        assert_eq!(vms[0].vm, ObjectRef::new("vm-1"));
        assert_eq!(vms[0].name, "web-01");
        assert_eq!(vms[0].snapshots[0].snapshot, ObjectRef::new("snapshot-1"));
        assert_eq!(vms[0].snapshots[0].children[0].snapshot, ObjectRef::new("snapshot-2"));
    }

    #[tokio::test]
    async fn test_power_on_twice_faults() {
        let inv = inventory();
        let vm = ObjectRef::new("vm-2");

        assert!(inv.apply(&TaskAction::PowerOn { vm: vm.clone() }).await.is_ok());
        assert_eq!(inv.vm(&vm).await.unwrap().power_state, PowerState::PoweredOn);

        let fault = inv.apply(&TaskAction::PowerOn { vm }).await.unwrap_err();
        assert_eq!(fault.fault_type, "InvalidPowerState");
        assert!(fault.msg.contains("Powered on"));
    }

    #[tokio::test]
    async fn test_power_off_powered_off_faults() {
        let inv = inventory();
        let fault = inv
            .apply(&TaskAction::PowerOff { vm: ObjectRef::new("vm-2") })
            .await
            .unwrap_err();
        assert_eq!(fault.fault_type, "InvalidPowerState");
    }

    #[tokio::test]
    async fn test_revert_restores_recorded_power_state() {
        let inv = inventory();
        let vm = ObjectRef::new("vm-1");

        inv.apply(&TaskAction::Revert {
            vm: vm.clone(),
            snapshot: ObjectRef::new("snapshot-1"),
        })
        .await
        .unwrap();
        assert_eq!(inv.vm(&vm).await.unwrap().power_state, PowerState::PoweredOff);

        let fault = inv
            .apply(&TaskAction::Revert {
                vm,
                snapshot: ObjectRef::new("snapshot-99"),
            })
            .await
            .unwrap_err();
        assert_eq!(fault.fault_type, "ManagedObjectNotFound");
    }

    #[tokio::test]
    async fn test_snapshot_owner_finds_nested_snapshot() {
        let inv = inventory();
        let owner = inv.snapshot_owner(&ObjectRef::new("snapshot-2")).await.unwrap();
        assert_eq!(owner.vm, ObjectRef::new("vm-1"));
        assert_eq!(owner.vm_name, "web-01");
        assert_eq!(owner.snapshot_name, "patched");
        assert!(inv.snapshot_owner(&ObjectRef::new("snapshot-3")).await.is_none());
    }

    #[test]
    fn test_task_action_entity() {
        let action = TaskAction::Revert {
            vm: ObjectRef::new("vm-1"),
            snapshot: ObjectRef::new("snapshot-2"),
        };
        assert_eq!(action.entity(), &ObjectRef::new("snapshot-2"));
        assert_eq!(action.description(), "VirtualMachineSnapshot.revert");
    }
}
