//! The environment owns the clock and the event queue and drives processes.
//!
//! Everything runs on one thread. A process is taken out of the process
//! table while it runs, so its body never aliases kernel state, and the
//! shared `Core` is only borrowed for the short stretches in which the
//! kernel or a `Context`/`Request` method touches it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, trace, warn};

use crate::error::{DesError, FailureCause, ProcessError, ProcessFailure};
use crate::event::{Event, EventQueue};
use crate::process::{Outcome, Process, ProcessId, ProcessState, Step, Suspension, Wake};
use crate::resource::{Request, RequestId, RequestRecord, Resource, ResourceState};
use crate::time::SimTime;
use crate::trace::{TraceEntry, TraceKind};

/// What `run` does with a failed process that nobody is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Stop the run and return `DesError::UnhandledProcessFailure`.
    #[default]
    Halt,
    /// Log the failure at `warn` and keep going.
    LogAndContinue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    pub initial_time: f64,
    pub failure_policy: FailurePolicy,
    /// Keep a `(time, process, kind)` record of every delivered wake-up.
    pub record_trace: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            initial_time: 0.0,
            failure_policy: FailurePolicy::Halt,
            record_trace: false,
        }
    }
}

/// Counters accumulated over every `step`/`run` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunStats {
    pub events_processed: u64,
    /// Wake-ups popped for processes that had already been cancelled.
    pub stale_events: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct Wakeup {
    process: ProcessId,
    wake: Wake,
}

/// Kernel state shared with resources and request guards.
pub(crate) struct Core {
    pub(crate) now: SimTime,
    queue: EventQueue<Wakeup>,
    pub(crate) states: HashMap<ProcessId, ProcessState>,
    failures: HashMap<ProcessId, ProcessFailure>,
    joiners: HashMap<ProcessId, Vec<ProcessId>>,
    next_process: u64,
    pub(crate) resources: Vec<ResourceState>,
    pub(crate) requests: HashMap<RequestId, RequestRecord>,
    pub(crate) next_request: u64,
}

impl Core {
    fn new(now: SimTime) -> Core {
        Core {
            now,
            queue: EventQueue::new(),
            states: HashMap::new(),
            failures: HashMap::new(),
            joiners: HashMap::new(),
            next_process: 0,
            resources: Vec::new(),
            requests: HashMap::new(),
            next_request: 0,
        }
    }

    /// Allocate a process id and schedule its first resumption at `now`.
    fn register(&mut self) -> ProcessId {
        let process = ProcessId::new(self.next_process);
        self.next_process += 1;
        self.states.insert(process, ProcessState::Scheduled);
        let now = self.now;
        self.queue.schedule(
            now,
            Wakeup {
                process,
                wake: Wake::Start,
            },
        );
        process
    }

    pub(crate) fn wake_at(&mut self, at: SimTime, process: ProcessId, wake: Wake) {
        self.queue.schedule(at, Wakeup { process, wake });
        if let Some(state @ ProcessState::Suspended(_)) = self.states.get_mut(&process) {
            *state = ProcessState::Scheduled;
        }
    }

    /// Terminated processes leave the state table. A stored failure marks a
    /// failed one; any other id below the allocation counter has finished.
    fn state(&self, process: ProcessId) -> Option<ProcessState> {
        match self.states.get(&process) {
            Some(state) => Some(*state),
            None if self.failures.contains_key(&process) => Some(ProcessState::Failed),
            None if process.raw() < self.next_process => Some(ProcessState::Finished),
            None => None,
        }
    }

    /// Resume every process still suspended on `child` with its outcome.
    /// Returns how many were woken.
    fn notify_joiners(&mut self, child: ProcessId, outcome: &Outcome) -> usize {
        let now = self.now;
        let waiting = ProcessState::Suspended(Suspension::Join(child));
        let mut woken = 0;
        for joiner in self.joiners.remove(&child).unwrap_or_default() {
            if self.states.get(&joiner) != Some(&waiting) {
                continue;
            }
            self.wake_at(
                now,
                joiner,
                Wake::Joined {
                    child,
                    outcome: outcome.clone(),
                },
            );
            woken += 1;
        }
        woken
    }

    /// Move a terminated process out of the state table, keeping only its
    /// failure if it has one.
    fn retire(&mut self, process: ProcessId, outcome: &Outcome) {
        self.states.remove(&process);
        if let Err(failure) = outcome {
            self.failures.insert(process, failure.clone());
        }
    }

    fn advance(&mut self) -> Option<Event<Wakeup>> {
        let event = self.queue.pop_next()?;
        debug_assert!(event.time >= self.now, "event queue went back in time");
        self.now = event.time;
        Some(event)
    }
}

struct Slot {
    name: String,
    body: Box<dyn Process>,
}

impl Slot {
    fn new<P: Process + 'static>(process: P) -> Slot {
        Slot {
            name: process.name().to_string(),
            body: Box::new(process),
        }
    }
}

/// Handle given to a process while it runs.
pub struct Context<'a> {
    core: &'a Rc<RefCell<Core>>,
    process: ProcessId,
    spawned: &'a mut Vec<(ProcessId, Slot)>,
    cancelled: &'a mut Vec<ProcessId>,
}

impl Context<'_> {
    pub fn now(&self) -> SimTime {
        self.core.borrow().now
    }

    /// The running process.
    pub fn id(&self) -> ProcessId {
        self.process
    }

    pub fn timeout(&self, delay: f64) -> Result<Step, DesError> {
        Step::timeout(delay)
    }

    /// Register a child process. It starts at the current time, after every
    /// event already queued for this instant.
    pub fn spawn<P: Process + 'static>(&mut self, process: P) -> ProcessId {
        let child = self.core.borrow_mut().register();
        debug!(parent = %self.process, %child, name = process.name(), "spawned");
        self.spawned.push((child, Slot::new(process)));
        child
    }

    pub fn join(&self, child: ProcessId) -> Step {
        Step::join(child)
    }

    /// Ask `resource` for one unit on behalf of the running process. The
    /// returned guard gives the unit back (or leaves the queue) when dropped.
    pub fn request(&self, resource: &Resource) -> Result<Request, DesError> {
        resource.open(self.core, self.process)
    }

    /// Cancel `process` once the current step returns.
    pub fn cancel(&mut self, process: ProcessId) {
        self.cancelled.push(process);
    }

    pub fn state(&self, process: ProcessId) -> Option<ProcessState> {
        self.core.borrow().state(process)
    }
}

pub struct Environment {
    core: Rc<RefCell<Core>>,
    processes: HashMap<ProcessId, Slot>,
    config: SimConfig,
    stats: RunStats,
    trace: Option<Vec<TraceEntry>>,
}

impl Environment {
    pub fn new() -> Environment {
        Environment::build(SimConfig::default(), SimTime::ZERO)
    }

    pub fn with_initial_time(initial_time: f64) -> Result<Environment, DesError> {
        Environment::with_config(SimConfig {
            initial_time,
            ..SimConfig::default()
        })
    }

    pub fn with_config(config: SimConfig) -> Result<Environment, DesError> {
        let now = SimTime::new(config.initial_time)?;
        Ok(Environment::build(config, now))
    }

    fn build(config: SimConfig, now: SimTime) -> Environment {
        let trace = config.record_trace.then(Vec::new);
        Environment {
            core: Rc::new(RefCell::new(Core::new(now))),
            processes: HashMap::new(),
            config,
            stats: RunStats::default(),
            trace,
        }
    }

    pub(crate) fn core(&self) -> &Rc<RefCell<Core>> {
        &self.core
    }

    pub fn now(&self) -> SimTime {
        self.core.borrow().now
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn stats(&self) -> RunStats {
        self.stats
    }

    /// Recorded wake-ups, empty unless `record_trace` is set.
    pub fn trace(&self) -> &[TraceEntry] {
        self.trace.as_deref().unwrap_or(&[])
    }

    /// Register a process and schedule its first resumption at `now`.
    pub fn process<P: Process + 'static>(&mut self, process: P) -> ProcessId {
        let id = self.core.borrow_mut().register();
        debug!(process = %id, name = process.name(), "registered");
        self.processes.insert(id, Slot::new(process));
        id
    }

    pub fn state(&self, process: ProcessId) -> Option<ProcessState> {
        self.core.borrow().state(process)
    }

    /// Number of processes that have not terminated.
    pub fn active_processes(&self) -> usize {
        self.processes.len()
    }

    /// Time of the next pending event.
    pub fn peek(&self) -> Option<SimTime> {
        self.core.borrow().queue.peek_time()
    }

    /// Tear a process down. Any request it holds is released and any queued
    /// request leaves its wait queue. Processes waiting on it are resumed
    /// with a cancellation failure. Cancelling a terminated process is a no-op.
    pub fn cancel(&mut self, process: ProcessId) -> Result<(), DesError> {
        let Some(slot) = self.processes.remove(&process) else {
            return match self.state(process) {
                Some(_) => Ok(()),
                None => Err(DesError::UnknownProcess(process)),
            };
        };
        debug!(%process, name = %slot.name, now = %self.now(), "cancelling");
        let name = slot.name.clone();
        drop(slot);
        self.core.borrow_mut().joiners.retain(|_, waiting| {
            waiting.retain(|joiner| *joiner != process);
            !waiting.is_empty()
        });
        self.terminate(
            process,
            Err(ProcessFailure {
                process,
                name,
                cause: FailureCause::Cancelled,
            }),
        )
    }

    /// Process the next event. Returns its time, or `None` if the queue is empty.
    pub fn step(&mut self) -> Result<Option<SimTime>, DesError> {
        let next = self.core.borrow_mut().advance();
        match next {
            None => Ok(None),
            Some(event) => {
                self.dispatch(event.payload)?;
                Ok(Some(event.time))
            }
        }
    }

    /// Process events until the queue is empty or the next event lies beyond
    /// `until`. With a limit the clock ends at `until`.
    pub fn run(&mut self, until: impl Into<Option<f64>>) -> Result<(), DesError> {
        let until = match until.into() {
            Some(value) => {
                let until = SimTime::new(value)?;
                let now = self.now();
                if until < now {
                    return Err(DesError::UntilInPast { until, now });
                }
                Some(until)
            }
            None => None,
        };
        debug!(now = %self.now(), ?until, "run started");

        while let Some(next) = self.peek() {
            if until.is_some_and(|limit| next > limit) {
                break;
            }
            self.step()?;
        }

        if let Some(limit) = until {
            self.core.borrow_mut().now = limit;
        }
        debug!(
            now = %self.now(),
            events = self.stats.events_processed,
            active = self.processes.len(),
            "run finished"
        );
        Ok(())
    }

    fn dispatch(&mut self, wakeup: Wakeup) -> Result<(), DesError> {
        let Wakeup { process, wake } = wakeup;
        let Some(mut slot) = self.processes.remove(&process) else {
            trace!(%process, "skipping wake-up for a process that is gone");
            self.stats.stale_events += 1;
            return Ok(());
        };
        self.stats.events_processed += 1;

        let now = {
            let mut core = self.core.borrow_mut();
            core.states.insert(process, ProcessState::Running);
            core.now
        };
        trace!(%now, %process, name = %slot.name, ?wake, "resuming");
        self.record(process, TraceKind::from(&wake));

        let mut spawned = Vec::new();
        let mut cancelled = Vec::new();
        let result = {
            let mut ctx = Context {
                core: &self.core,
                process,
                spawned: &mut spawned,
                cancelled: &mut cancelled,
            };
            slot.body.resume(&mut ctx, wake)
        };

        // bodies are dropped before any bookkeeping so held requests go back first
        let mut outcome = match result {
            Ok(step) => match self.park(process, step) {
                Ok(true) => {
                    self.processes.insert(process, slot);
                    Ok(())
                }
                Ok(false) => {
                    drop(slot);
                    self.terminate(process, Ok(()))
                }
                Err(e) => {
                    let name = slot.name.clone();
                    drop(slot);
                    self.abort(process, name, e)
                }
            },
            Err(ProcessError::Kernel(e)) => {
                let name = slot.name.clone();
                drop(slot);
                self.abort(process, name, e)
            }
            Err(ProcessError::Failed(message)) => {
                let name = slot.name.clone();
                drop(slot);
                self.terminate(
                    process,
                    Err(ProcessFailure {
                        process,
                        name,
                        cause: FailureCause::Error(message),
                    }),
                )
            }
        };

        for (child, child_slot) in spawned {
            self.processes.insert(child, child_slot);
        }
        for target in cancelled {
            let cancelled = self.cancel(target);
            if outcome.is_ok() {
                outcome = cancelled;
            }
        }
        outcome
    }

    /// Record the suspension a process asked for. Returns `false` when the
    /// process is done.
    fn park(&mut self, process: ProcessId, step: Step) -> Result<bool, DesError> {
        let mut core = self.core.borrow_mut();
        let now = core.now;
        let state = match step {
            Step::Done => return Ok(false),
            Step::Timeout(delay) => {
                let until = now.after(delay)?;
                core.wake_at(until, process, Wake::Timeout);
                ProcessState::Suspended(Suspension::Timeout { until })
            }
            Step::Acquire(request) => {
                let record = core
                    .requests
                    .get(&request)
                    .ok_or(DesError::UnknownRequest(request))?;
                if record.owner != process {
                    return Err(DesError::NotRequestOwner {
                        request,
                        owner: record.owner,
                        process,
                    });
                }
                if record.is_granted() {
                    core.wake_at(now, process, Wake::Granted(request));
                    ProcessState::Scheduled
                } else {
                    ProcessState::Suspended(Suspension::Acquire(request))
                }
            }
            Step::Join(child) => {
                if child == process {
                    return Err(DesError::SelfJoin(process));
                }
                match core.state(child) {
                    None => return Err(DesError::UnknownProcess(child)),
                    Some(state) if state.is_terminal() => {
                        let outcome = core.failures.get(&child).cloned().map_or(Ok(()), Err);
                        core.wake_at(now, process, Wake::Joined { child, outcome });
                        ProcessState::Scheduled
                    }
                    Some(_) => {
                        core.joiners.entry(child).or_default().push(process);
                        ProcessState::Suspended(Suspension::Join(child))
                    }
                }
            }
        };
        core.states.insert(process, state);
        Ok(true)
    }

    /// Move a process into a terminal state and resume everything joined on it.
    fn terminate(&mut self, process: ProcessId, outcome: Outcome) -> Result<(), DesError> {
        let waiting = {
            let mut core = self.core.borrow_mut();
            let waiting = core.notify_joiners(process, &outcome);
            core.retire(process, &outcome);
            waiting
        };

        let kind = match &outcome {
            Ok(()) => TraceKind::Finished,
            Err(failure) if failure.is_cancelled() => TraceKind::Cancelled,
            Err(_) => TraceKind::Failed,
        };
        self.record(process, kind);

        match outcome {
            Ok(()) => {
                trace!(%process, "finished");
                Ok(())
            }
            Err(failure) if failure.is_cancelled() || waiting > 0 => {
                debug!(%failure, waiting, "process stopped");
                Ok(())
            }
            Err(failure) => match self.config.failure_policy {
                FailurePolicy::Halt => Err(DesError::UnhandledProcessFailure(failure)),
                FailurePolicy::LogAndContinue => {
                    warn!(%failure, now = %self.now(), "process failed with nobody waiting on it");
                    Ok(())
                }
            },
        }
    }

    /// A process broke a kernel contract. Its joiners see it fail and the run
    /// stops with `error`.
    fn abort(&mut self, process: ProcessId, name: String, error: DesError) -> Result<(), DesError> {
        {
            let outcome = Err(ProcessFailure {
                process,
                name,
                cause: FailureCause::Error(error.to_string()),
            });
            let mut core = self.core.borrow_mut();
            core.notify_joiners(process, &outcome);
            core.retire(process, &outcome);
        }
        self.record(process, TraceKind::Failed);
        debug!(%process, %error, "kernel contract violated");
        Err(error)
    }

    fn record(&mut self, process: ProcessId, kind: TraceKind) {
        if let Some(trace) = self.trace.as_mut() {
            let time = self.core.borrow().now;
            trace.push(TraceEntry {
                time,
                process,
                kind,
            });
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}
