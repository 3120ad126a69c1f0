use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::types::{MethodFault, TaskHandle};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ErrorCode {
    #[error("E001: Not authenticated or session expired")]
    E001,
    #[error("E002: Invalid login")]
    E002,
    #[error("E003: Managed object not found")]
    E003,
    #[error("E004: Invalid filter spec")]
    E004,
    #[error("E005: Filter not found")]
    E005,
    #[error("E006: Invalid version token")]
    E006,
    #[error("E007: Endpoint unreachable")]
    E007,
    #[error("E008: Invalid request")]
    E008,
}

impl ErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorCode::E001 => "E001",
            ErrorCode::E002 => "E002",
            ErrorCode::E003 => "E003",
            ErrorCode::E004 => "E004",
            ErrorCode::E005 => "E005",
            ErrorCode::E006 => "E006",
            ErrorCode::E007 => "E007",
            ErrorCode::E008 => "E008",
        }
    }

    /// Parse a wire code such as `"E003"`
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "E001" => Some(ErrorCode::E001),
            "E002" => Some(ErrorCode::E002),
            "E003" => Some(ErrorCode::E003),
            "E004" => Some(ErrorCode::E004),
            "E005" => Some(ErrorCode::E005),
            "E006" => Some(ErrorCode::E006),
            "E007" => Some(ErrorCode::E007),
            "E008" => Some(ErrorCode::E008),
            _ => None,
        }
    }
}

/// Error reported by the management endpoint for a single call
#[derive(Debug, Clone, Error)]
pub struct EndpointError {
    pub code: ErrorCode,
    pub message: String,
}

impl EndpointError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_authenticated(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::E001, message)
    }

    pub fn invalid_login(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::E002, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::E003, message)
    }

    pub fn invalid_filter(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::E004, message)
    }

    pub fn filter_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::E005, message)
    }

    pub fn invalid_version(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::E006, message)
    }

    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::E007, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::E008, message)
    }
}

impl fmt::Display for EndpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Outcome of waiting on a set of remote tasks
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    /// The endpoint reported a terminal error state for a task
    #[error("task {task} failed: {fault}")]
    RemoteTaskFailed { task: TaskHandle, fault: MethodFault },
    /// The notification channel could not be established or was lost
    #[error("connection failure: {0}")]
    ConnectionFailure(String),
    /// The wait deadline elapsed before every task finished
    #[error("tasks did not complete within {0:?}")]
    Timeout(Duration),
}

impl TaskError {
    /// Wrap a transport error, keeping its full context chain
    pub fn connection(err: anyhow::Error) -> Self {
        TaskError::ConnectionFailure(format!("{:#}", err))
    }
}
