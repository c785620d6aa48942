//! A small discrete-event simulation kernel.
//!
//! Processes are explicit state machines resumed by an [`Environment`] in
//! `(time, sequence)` order. They suspend on a timeout, on a [`Resource`]
//! request or on another process's completion. Everything runs on a single
//! thread, so a fixed sequence of calls (and a fixed random seed in the
//! client) replays identically.
//!
//! ```rust
//! use des::{Environment, Request, Resource, Step, Wake, from_fn};
//!
//! let mut env = Environment::new();
//! let machine = Resource::new(&env, 1).unwrap();
//!
//! for _ in 0..2 {
//!     let machine = machine.clone();
//!     let mut _held: Option<Request> = None;
//!     env.process(from_fn(move |ctx, wake| match wake {
//!         Wake::Start => {
//!             let request = ctx.request(&machine)?;
//!             let step = Step::acquire(&request);
//!             _held = Some(request);
//!             Ok(step)
//!         }
//!         Wake::Granted(_) => Ok(ctx.timeout(5.0)?),
//!         _ => Ok(Step::Done), // dropping `_held` returns the unit
//!     }));
//! }
//!
//! env.run(None).unwrap();
//! assert_eq!(env.now().value(), 10.0);
//! assert_eq!(machine.in_use(), 0);
//! ```

pub mod environment;
pub mod error;
pub mod event;
pub mod parallel;
pub mod process;
pub mod resource;
pub mod time;
pub mod trace;

pub use environment::{Context, Environment, FailurePolicy, RunStats, SimConfig};
pub use error::{DesError, FailureCause, ProcessError, ProcessFailure};
pub use event::{Event, EventQueue, Sequence};
pub use process::{
    FnProcess, Outcome, Process, ProcessId, ProcessState, Step, Suspension, Wake, from_fn,
};
pub use resource::{Request, RequestId, Resource, ResourceId, ResourceStats};
pub use time::{Delay, SimTime};
pub use trace::{TraceEntry, TraceKind};
