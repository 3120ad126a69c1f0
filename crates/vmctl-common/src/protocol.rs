use crate::error::{EndpointError, ErrorCode};
use crate::types::{ObjectRef, TaskHandle};
use crate::update::{FilterId, FilterSpec, Version};
use serde::{Deserialize, Serialize};

/// Maximum frame size accepted on either side of the connection
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16MB

/// Requests sent from the client to the management endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Open a session
    Login { user: String, password: String },
    /// Close the calling session
    Logout,
    /// Query endpoint identity
    About,
    /// List virtual machines with their snapshot trees
    ListVms,
    /// Submit a power-on task
    PowerOn { vm: ObjectRef },
    /// Submit a power-off task
    PowerOff { vm: ObjectRef },
    /// Submit a revert-to-snapshot task
    RevertToSnapshot { snapshot: ObjectRef },
    /// Register a change-notification filter
    CreateFilter { spec: FilterSpec },
    /// Block until the filter has changes newer than `version`
    WaitForUpdates {
        filter: FilterId,
        #[serde(skip_serializing_if = "Option::is_none")]
        version: Option<Version>,
    },
    /// Release a filter
    DestroyFilter { filter: FilterId },
    /// Fetch the full record of a task
    TaskInfo { task: TaskHandle },
}

impl Request {
    /// Whether the endpoint accepts this request without a session
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Request::Login { .. } | Request::About)
    }
}

/// A request together with the session it runs under
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    pub request: Request,
}

impl Envelope {
    pub fn new(session: Option<String>, request: Request) -> Self {
        Self { session, request }
    }
}

/// Responses sent from the endpoint back to the client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    /// Successful response with data payload
    Success {
        /// Response data (JSON value)
        data: serde_json::Value,
    },
    /// Error response
    Error {
        /// Error code (e.g., "E001", "E003")
        code: String,
        /// Error message
        message: String,
    },
}

impl Response {
    /// Create a success response with data
    pub fn success(data: serde_json::Value) -> Self {
        Self::Success { data }
    }

    /// Create an error response from EndpointError
    pub fn error(err: &EndpointError) -> Self {
        Self::Error {
            code: err.code.code().to_string(),
            message: err.message.clone(),
        }
    }

    /// Unwrap the payload, turning an error response back into an EndpointError
    pub fn into_result(self) -> Result<serde_json::Value, EndpointError> {
        match self {
            Response::Success { data } => Ok(data),
            Response::Error { code, message } => {
                let code = ErrorCode::from_code(&code).unwrap_or(ErrorCode::E008);
                Err(EndpointError::new(code, message))
            }
        }
    }
}

/// Endpoint identity returned by `About`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AboutInfo {
    pub name: String,
    pub version: String,
    /// Number of registered VMs
    pub vm_count: usize,
}

/// Payload of a successful `Login`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub session: String,
}

/// Payload of a task-submitting request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSubmitted {
    pub task: TaskHandle,
}
