use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque reference to one in-flight remote operation (e.g. `task-17`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskHandle(String);

impl TaskHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque reference to a managed inventory object (VM or snapshot)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectRef(String);

impl ObjectRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a remote task
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Queued on the endpoint, not started yet
    Pending,
    /// Executing
    Running,
    /// Finished successfully
    Success,
    /// Finished with a fault
    Error,
}

impl TaskState {
    /// Success and Error are terminal; a task never leaves them
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Success | TaskState::Error)
    }
}

/// Remote error payload, carried verbatim from the endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MethodFault {
    /// Fault class name (e.g. `InvalidPowerState`)
    pub fault_type: String,
    /// Human-readable message
    pub msg: String,
}

impl MethodFault {
    pub fn new(fault_type: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            fault_type: fault_type.into(),
            msg: msg.into(),
        }
    }
}

impl fmt::Display for MethodFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.fault_type, self.msg)
    }
}

/// Full task record as published by the endpoint under the `info` property
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskInfo {
    /// Handle of the task this record describes
    pub key: TaskHandle,
    /// Operation name (e.g. `VirtualMachine.powerOn`)
    pub description: String,
    /// Object the task operates on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<ObjectRef>,
    /// Display name of the entity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_name: Option<String>,
    /// Current state
    pub state: TaskState,
    /// Completion percentage while running
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    /// Fault, set only when `state` is Error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<MethodFault>,
    pub queue_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complete_time: Option<DateTime<Utc>>,
}

impl TaskInfo {
    /// Create a freshly queued task record
    pub fn queued(key: TaskHandle, description: impl Into<String>) -> Self {
        Self {
            key,
            description: description.into(),
            entity: None,
            entity_name: None,
            state: TaskState::Pending,
            progress: None,
            error: None,
            queue_time: Utc::now(),
            start_time: None,
            complete_time: None,
        }
    }
}
