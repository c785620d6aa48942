//! Optional record of what the environment delivered to which process.

use std::fmt;

use crate::process::{ProcessId, Wake};
use crate::time::SimTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceKind {
    Start,
    Timeout,
    Granted,
    Joined,
    Finished,
    Failed,
    Cancelled,
}

impl From<&Wake> for TraceKind {
    fn from(wake: &Wake) -> Self {
        match wake {
            Wake::Start => TraceKind::Start,
            Wake::Timeout => TraceKind::Timeout,
            Wake::Granted(_) => TraceKind::Granted,
            Wake::Joined { .. } => TraceKind::Joined,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceEntry {
    pub time: SimTime,
    pub process: ProcessId,
    pub kind: TraceKind,
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {:?}", self.time, self.process, self.kind)
    }
}
