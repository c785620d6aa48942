//! Processes: cooperatively scheduled state machines.
//!
//! A process is resumed by the environment with a [`Wake`] describing why it
//! was woken, runs until its next suspension point, and returns a [`Step`]
//! saying how it wants to suspend. The process keeps its own continuation
//! point in its fields, so it picks up exactly where it left off.

use std::fmt;

use crate::environment::Context;
use crate::error::{DesError, ProcessError, ProcessFailure};
use crate::resource::{Request, RequestId};
use crate::time::{Delay, SimTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(u64);

impl ProcessId {
    #[inline]
    pub(crate) fn new(raw: u64) -> Self {
        ProcessId(raw)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// What a suspended process is waiting for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Suspension {
    Timeout { until: SimTime },
    Acquire(RequestId),
    Join(ProcessId),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProcessState {
    /// A resume event is pending.
    Scheduled,
    Running,
    Suspended(Suspension),
    Finished,
    Failed,
}

impl ProcessState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Finished | ProcessState::Failed)
    }
}

/// Result of a child process, delivered to processes that join it.
pub type Outcome = Result<(), ProcessFailure>;

/// Why a process is being resumed.
#[derive(Debug, Clone, PartialEq)]
pub enum Wake {
    Start,
    Timeout,
    Granted(RequestId),
    Joined { child: ProcessId, outcome: Outcome },
}

/// How a process suspends itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    Timeout(Delay),
    Acquire(RequestId),
    Join(ProcessId),
    Done,
}

impl Step {
    /// Suspend for `delay` units of simulated time.
    pub fn timeout(delay: f64) -> Result<Step, DesError> {
        Ok(Step::Timeout(Delay::new(delay)?))
    }

    /// Suspend until `request` is granted. Resumes at once (through the event
    /// queue) if it already is.
    pub fn acquire(request: &Request) -> Step {
        Step::Acquire(request.id())
    }

    pub fn join(child: ProcessId) -> Step {
        Step::Join(child)
    }
}

pub trait Process {
    fn resume(&mut self, ctx: &mut Context<'_>, wake: Wake) -> Result<Step, ProcessError>;

    fn name(&self) -> &str {
        "process"
    }
}

/// A process backed by a closure. See [`from_fn`].
pub struct FnProcess<F> {
    name: String,
    f: F,
}

impl<F> FnProcess<F> {
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<F> Process for FnProcess<F>
where
    F: FnMut(&mut Context<'_>, Wake) -> Result<Step, ProcessError>,
{
    fn resume(&mut self, ctx: &mut Context<'_>, wake: Wake) -> Result<Step, ProcessError> {
        (self.f)(ctx, wake)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Turn a closure into a process. State that must survive between steps
/// lives in the closure's captures.
pub fn from_fn<F>(f: F) -> FnProcess<F>
where
    F: FnMut(&mut Context<'_>, Wake) -> Result<Step, ProcessError>,
{
    FnProcess {
        name: String::from("process"),
        f,
    }
}
