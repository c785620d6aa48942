//! Error types for the simulation kernel.
//!
//! `DesError` covers contract violations detected by the kernel. They are
//! programmer errors and always fail fast at the call site. `ProcessError` is
//! what a process body returns: either a kernel error it chose to propagate
//! or a failure of its own logic, which the environment routes to whoever
//! waits on the process.

use std::fmt;

use thiserror::Error;

use crate::process::ProcessId;
use crate::resource::{RequestId, ResourceId};
use crate::time::SimTime;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DesError {
    #[error("invalid delay {delay}: timeouts must be finite and non-negative")]
    InvalidDelay { delay: f64 },

    #[error("invalid time {value}: simulated time must be finite")]
    InvalidTime { value: f64 },

    #[error("invalid capacity {capacity}: a resource needs at least one unit")]
    InvalidCapacity { capacity: usize },

    #[error("request {request} was already released")]
    DoubleRelease { request: RequestId },

    #[error("request {request} is not held from resource {resource}")]
    ReleaseOfUnownedRequest {
        request: RequestId,
        resource: ResourceId,
    },

    #[error("request {0} is unknown or no longer open")]
    UnknownRequest(RequestId),

    #[error("request {request} is owned by {owner}, not {process}")]
    NotRequestOwner {
        request: RequestId,
        owner: ProcessId,
        process: ProcessId,
    },

    #[error("resource {0} belongs to a different environment")]
    ForeignResource(ResourceId),

    #[error("process {0} not found")]
    UnknownProcess(ProcessId),

    #[error("process {0} cannot wait for its own completion")]
    SelfJoin(ProcessId),

    #[error("cannot run until {until}: the clock is already at {now}")]
    UntilInPast { until: SimTime, now: SimTime },

    #[error("unhandled process failure: {0}")]
    UnhandledProcessFailure(ProcessFailure),
}

/// Why a process stopped without finishing.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureCause {
    Error(String),
    Cancelled,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::Error(message) => write!(f, "failed: {}", message),
            FailureCause::Cancelled => write!(f, "was cancelled"),
        }
    }
}

/// A process that terminated in the `Failed` state.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{name} ({process}) {cause}")]
pub struct ProcessFailure {
    pub process: ProcessId,
    pub name: String,
    pub cause: FailureCause,
}

impl ProcessFailure {
    pub fn is_cancelled(&self) -> bool {
        self.cause == FailureCause::Cancelled
    }
}

/// Error returned from `Process::resume`.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// A kernel contract violation. Halts the run whatever the failure policy.
    #[error(transparent)]
    Kernel(#[from] DesError),

    /// The process's own logic failed.
    #[error("{0}")]
    Failed(String),
}

impl ProcessError {
    pub fn failed(message: impl Into<String>) -> ProcessError {
        ProcessError::Failed(message.into())
    }
}

impl From<ProcessFailure> for ProcessError {
    fn from(failure: ProcessFailure) -> Self {
        ProcessError::Failed(failure.to_string())
    }
}
