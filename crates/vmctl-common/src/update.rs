//! Change-notification data model: filters, cursors and update batches.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{MethodFault, TaskHandle, TaskInfo, TaskState};

/// Coarse property holding the whole [`TaskInfo`]
pub const INFO: &str = "info";
/// Fine-grained property holding only the [`TaskState`]
pub const INFO_STATE: &str = "info.state";
/// Progress property; published by endpoints but not a state field
pub const INFO_PROGRESS: &str = "info.progress";

/// Opaque cursor meaning "everything up to here has been observed"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle of a registered change-notification filter
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterId(String);

impl FilterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Scope of a filter: which tasks, which properties
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub objects: Vec<TaskHandle>,
    pub path_set: Vec<String>,
}

impl FilterSpec {
    /// Filter on the state-relevant properties of `tasks`
    pub fn for_tasks<'a>(tasks: impl IntoIterator<Item = &'a TaskHandle>) -> Self {
        Self {
            objects: tasks.into_iter().cloned().collect(),
            path_set: vec![INFO.to_string(), INFO_STATE.to_string()],
        }
    }

    pub fn watches(&self, task: &TaskHandle) -> bool {
        self.objects.contains(task)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Add,
    Remove,
    Assign,
}

/// One property change of one object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyChange {
    /// Property path, e.g. `info` or `info.state`
    pub name: String,
    pub op: ChangeOp,
    pub val: serde_json::Value,
}

/// State carried by a recognized change record
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedState {
    pub state: TaskState,
    /// Present only when the record carried a full `info` with an error
    pub fault: Option<MethodFault>,
}

impl PropertyChange {
    pub fn assign(name: impl Into<String>, val: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            op: ChangeOp::Assign,
            val,
        }
    }

    /// Decode the task state if this record is one of the state fields.
    ///
    /// Returns `Ok(None)` for any other property. A state field whose
    /// value does not decode is an error.
    pub fn observed_state(&self) -> Result<Option<ObservedState>, serde_json::Error> {
        match self.name.as_str() {
            INFO => {
                let info: TaskInfo = serde_json::from_value(self.val.clone())?;
                Ok(Some(ObservedState {
                    state: info.state,
                    fault: info.error,
                }))
            }
            INFO_STATE => {
                let state: TaskState = serde_json::from_value(self.val.clone())?;
                Ok(Some(ObservedState { state, fault: None }))
            }
            _ => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectUpdateKind {
    /// Object entered the filter (initial snapshot)
    Enter,
    Modify,
    Leave,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectUpdate {
    pub obj: TaskHandle,
    pub kind: ObjectUpdateKind,
    #[serde(default)]
    pub change_set: Vec<PropertyChange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterUpdate {
    pub filter: FilterId,
    #[serde(default)]
    pub object_set: Vec<ObjectUpdate>,
}

/// One batch returned by `WaitForUpdates`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateSet {
    /// Cursor to pass to the next `WaitForUpdates`
    pub version: Version,
    #[serde(default)]
    pub filter_set: Vec<FilterUpdate>,
}

impl UpdateSet {
    /// All object updates in the batch, across filters
    pub fn object_updates(&self) -> impl Iterator<Item = &ObjectUpdate> {
        self.filter_set.iter().flat_map(|f| f.object_set.iter())
    }
}
