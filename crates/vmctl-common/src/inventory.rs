use serde::{Deserialize, Serialize};

use crate::types::ObjectRef;

/// Power state of a virtual machine
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PowerState {
    PoweredOn,
    PoweredOff,
    Suspended,
}

impl PowerState {
    pub fn label(self) -> &'static str {
        match self {
            PowerState::PoweredOn => "poweredOn",
            PowerState::PoweredOff => "poweredOff",
            PowerState::Suspended => "suspended",
        }
    }
}

/// One node of a VM's snapshot tree
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotTree {
    /// Reference passed to `RevertToSnapshot`
    pub snapshot: ObjectRef,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Power state the VM had when the snapshot was taken
    pub power_state: PowerState,
    #[serde(default)]
    pub children: Vec<SnapshotTree>,
}

impl SnapshotTree {
    /// Iterate over this node and all descendants, depth first
    pub fn walk(&self) -> SnapshotWalk<'_> {
        SnapshotWalk { stack: vec![self] }
    }
}

/// Depth-first iterator over a snapshot forest
#[derive(Debug)]
pub struct SnapshotWalk<'a> {
    stack: Vec<&'a SnapshotTree>,
}

impl<'a> SnapshotWalk<'a> {
    /// Walk every tree in `roots`, in order
    pub fn forest(roots: &'a [SnapshotTree]) -> Self {
        Self {
            stack: roots.iter().rev().collect(),
        }
    }
}

impl<'a> Iterator for SnapshotWalk<'a> {
    type Item = &'a SnapshotTree;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

/// Find the first snapshot named `name` anywhere under `roots`
pub fn find_snapshot<'a>(roots: &'a [SnapshotTree], name: &str) -> Option<&'a SnapshotTree> {
    SnapshotWalk::forest(roots).find(|node| node.name == name)
}

/// Inventory entry returned by `ListVms`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VmSummary {
    pub vm: ObjectRef,
    pub name: String,
    pub power_state: PowerState,
    /// Root snapshots; empty when the VM has none
    #[serde(default)]
    pub snapshots: Vec<SnapshotTree>,
}
