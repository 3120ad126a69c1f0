// Error types
pub mod error;
pub use error::{EndpointError, ErrorCode, TaskError};

// Core data types
pub mod types;
pub use types::{MethodFault, ObjectRef, TaskHandle, TaskInfo, TaskState};

// Inventory and snapshot trees
pub mod inventory;
pub use inventory::{find_snapshot, PowerState, SnapshotTree, VmSummary};

// Change notifications
pub mod update;
pub use update::{FilterId, FilterSpec, ObjectUpdate, PropertyChange, UpdateSet, Version};

// Task completion tracking
pub mod waiter;
pub use waiter::{ActiveTaskSet, PropertyCollector, TaskWaiter};

// Endpoint configuration
pub mod config;
pub use config::{ChangeGranularity, SimConfig};

// Wire protocol
pub mod protocol;
pub use protocol::{Envelope, Request, Response};
