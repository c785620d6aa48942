// End-to-end behaviour of the kernel: environment, processes and resources
// driven together through the public API.

use std::cell::RefCell;
use std::rc::Rc;

use des::{
    Context, DesError, Environment, FailurePolicy, ProcessError, ProcessId, ProcessState, Request,
    Resource, SimConfig, Step, TraceEntry, Wake, from_fn,
};
use proptest::prelude::*;

type Log = Rc<RefCell<Vec<(f64, usize)>>>;

/// Holder that requests one unit as soon as it starts, keeps it for `hold`
/// and records `(time, label)` when it is granted and when it leaves.
struct Holder {
    label: usize,
    machine: Resource,
    hold: f64,
    request: Option<Request>,
    granted: Log,
    finished: Log,
}

impl Holder {
    fn new(label: usize, machine: &Resource, hold: f64, granted: &Log, finished: &Log) -> Holder {
        Holder {
            label,
            machine: machine.clone(),
            hold,
            request: None,
            granted: granted.clone(),
            finished: finished.clone(),
        }
    }
}

impl des::Process for Holder {
    fn resume(&mut self, ctx: &mut Context<'_>, wake: Wake) -> Result<Step, ProcessError> {
        match wake {
            Wake::Start => {
                let request = ctx.request(&self.machine)?;
                let step = Step::acquire(&request);
                self.request = Some(request);
                Ok(step)
            }
            Wake::Granted(_) => {
                self.granted.borrow_mut().push((ctx.now().value(), self.label));
                Ok(ctx.timeout(self.hold)?)
            }
            Wake::Timeout => {
                if let Some(mut request) = self.request.take() {
                    request.release()?;
                }
                self.finished.borrow_mut().push((ctx.now().value(), self.label));
                Ok(Step::Done)
            }
            Wake::Joined { .. } => Err(ProcessError::failed("holder never joins")),
        }
    }

    fn name(&self) -> &str {
        "holder"
    }
}

fn logs() -> (Log, Log) {
    (Rc::new(RefCell::new(Vec::new())), Rc::new(RefCell::new(Vec::new())))
}

#[test]
fn given_capacity_one_when_four_hold_for_five_then_they_finish_in_turn() {
    // GIVEN: one machine and four processes that all want it at t=0
    let mut env = Environment::new();
    let machine = Resource::new(&env, 1).unwrap();
    let (granted, finished) = logs();
    for label in 0..4 {
        env.process(Holder::new(label, &machine, 5.0, &granted, &finished));
    }

    // WHEN: the simulation runs until t=25
    env.run(25.0).unwrap();

    // THEN: each finishes five units after the previous one, no overlap
    assert_eq!(
        *finished.borrow(),
        vec![(5.0, 0), (10.0, 1), (15.0, 2), (20.0, 3)]
    );
    assert_eq!(
        *granted.borrow(),
        vec![(0.0, 0), (5.0, 1), (10.0, 2), (15.0, 3)]
    );
    assert_eq!(env.now().value(), 25.0);
    assert_eq!(machine.in_use(), 0);
}

#[test]
fn given_capacity_two_when_two_hold_for_three_then_both_finish_at_three() {
    let mut env = Environment::new();
    let machine = Resource::new(&env, 2).unwrap();
    let (granted, finished) = logs();
    env.process(Holder::new(0, &machine, 3.0, &granted, &finished));
    env.process(Holder::new(1, &machine, 3.0, &granted, &finished));

    env.run(None).unwrap();

    assert_eq!(*finished.borrow(), vec![(3.0, 0), (3.0, 1)]);
    assert_eq!(machine.stats().peak_queue_len, 0);
    assert_eq!(machine.stats().total_wait, 0.0);
}

#[test]
fn given_staggered_arrivals_when_capacity_is_one_then_grants_are_fifo() {
    // GIVEN: arrivals at t = 0, 1, 2, 3, 4 each wanting the machine for 10
    let mut env = Environment::new();
    let machine = Resource::new(&env, 1).unwrap();
    let (granted, finished) = logs();
    for label in 0..5 {
        let machine = machine.clone();
        let granted = granted.clone();
        let finished = finished.clone();
        env.process(from_fn(move |ctx, wake| match wake {
            Wake::Start => Ok(ctx.timeout(label as f64)?),
            _ => {
                ctx.spawn(Holder::new(label, &machine, 10.0, &granted, &finished));
                Ok(Step::Done)
            }
        }));
    }

    // WHEN
    env.run(None).unwrap();

    // THEN: grant order equals arrival order, one holder at a time
    assert_eq!(
        *granted.borrow(),
        vec![(0.0, 0), (10.0, 1), (20.0, 2), (30.0, 3), (40.0, 4)]
    );
    assert_eq!(machine.stats().total_wait, 10.0 - 1.0 + 20.0 - 2.0 + 30.0 - 3.0 + 40.0 - 4.0);
}

#[test]
fn given_same_time_event_when_zero_timeout_then_resumes_after_it() {
    // GIVEN: A and B both start at t=0; A immediately waits zero time
    let order = Rc::new(RefCell::new(Vec::new()));
    let mut env = Environment::new();
    let a_log = order.clone();
    env.process(from_fn(move |ctx, wake| {
        a_log.borrow_mut().push((ctx.now().value(), "a", wake.clone()));
        match wake {
            Wake::Start => Ok(ctx.timeout(0.0)?),
            _ => Ok(Step::Done),
        }
    }));
    let b_log = order.clone();
    env.process(from_fn(move |ctx, wake| {
        b_log.borrow_mut().push((ctx.now().value(), "b", wake));
        Ok(Step::Done)
    }));

    // WHEN
    env.run(None).unwrap();

    // THEN: same virtual time, but A's zero timeout comes after B's start
    assert_eq!(
        *order.borrow(),
        vec![
            (0.0, "a", Wake::Start),
            (0.0, "b", Wake::Start),
            (0.0, "a", Wake::Timeout),
        ]
    );
}

#[test]
fn given_queued_waiter_when_cancelled_then_next_waiter_gets_the_unit() {
    // GIVEN: holder 0 owns the machine, holders 1..=3 are queued
    let mut env = Environment::new();
    let machine = Resource::new(&env, 1).unwrap();
    let (granted, finished) = logs();
    let ids: Vec<ProcessId> = (0..4)
        .map(|label| env.process(Holder::new(label, &machine, 5.0, &granted, &finished)))
        .collect();
    env.run(1.0).unwrap();
    assert_eq!(machine.queue_len(), 3);

    // WHEN: waiter 2 is cancelled before it was ever granted
    env.cancel(ids[2]).unwrap();

    // THEN: it left the queue without touching capacity
    assert_eq!(machine.queue_len(), 2);
    assert_eq!(machine.in_use(), 1);
    assert_eq!(machine.stats().withdrawals, 1);
    assert_eq!(env.state(ids[2]), Some(ProcessState::Failed));

    // THEN: grants skip straight from 1 to 3
    env.run(None).unwrap();
    let order: Vec<usize> = granted.borrow().iter().map(|(_, label)| *label).collect();
    assert_eq!(order, vec![0, 1, 3]);
    assert_eq!(*finished.borrow(), vec![(5.0, 0), (10.0, 1), (15.0, 3)]);
}

#[test]
fn given_holder_when_cancelled_then_its_unit_is_released() {
    let mut env = Environment::new();
    let machine = Resource::new(&env, 1).unwrap();
    let (granted, finished) = logs();
    let first = env.process(Holder::new(0, &machine, 5.0, &granted, &finished));
    env.process(Holder::new(1, &machine, 5.0, &granted, &finished));
    env.run(2.0).unwrap();

    env.cancel(first).unwrap();

    // the waiter is granted at the cancellation instant
    env.run(None).unwrap();
    assert_eq!(*granted.borrow(), vec![(0.0, 0), (2.0, 1)]);
    assert_eq!(*finished.borrow(), vec![(7.0, 1)]);
    assert_eq!(env.stats().stale_events, 1);
}

#[test]
fn given_holder_when_logic_fails_early_then_capacity_is_restored() {
    // GIVEN: a holder that fails while holding the only unit, and a waiter
    let mut env = Environment::with_config(SimConfig {
        failure_policy: FailurePolicy::LogAndContinue,
        ..SimConfig::default()
    })
    .unwrap();
    let machine = Resource::new(&env, 1).unwrap();
    let resource = machine.clone();
    let mut _held: Option<Request> = None;
    env.process(from_fn(move |ctx, wake| match wake {
        Wake::Start => {
            let request = ctx.request(&resource)?;
            let step = Step::acquire(&request);
            _held = Some(request);
            Ok(step)
        }
        Wake::Granted(_) => Ok(ctx.timeout(2.0)?),
        _ => Err(ProcessError::failed("wash pump broke")),
    }));
    let (granted, finished) = logs();
    env.process(Holder::new(1, &machine, 1.0, &granted, &finished));

    // WHEN
    env.run(None).unwrap();

    // THEN: the failed holder's unit went to the waiter at t=2
    assert_eq!(*granted.borrow(), vec![(2.0, 1)]);
    assert_eq!(machine.in_use(), 0);
}

#[test]
fn given_halt_policy_when_holder_fails_then_run_errors_and_unit_is_back() {
    let mut env = Environment::new();
    let machine = Resource::new(&env, 1).unwrap();
    let resource = machine.clone();
    let mut _held: Option<Request> = None;
    env.process(from_fn(move |ctx, wake| match wake {
        Wake::Start => {
            let request = ctx.request(&resource)?;
            let step = Step::acquire(&request);
            _held = Some(request);
            Ok(step)
        }
        _ => Err(ProcessError::failed("early exit")),
    }));

    let result = env.run(None);

    assert!(matches!(result, Err(DesError::UnhandledProcessFailure(_))));
    assert_eq!(machine.in_use(), 0);
}

#[test]
fn given_cancelled_joiner_when_child_fails_then_failure_is_unhandled() {
    // GIVEN: a parent joined on a child that fails at t=5
    let mut env = Environment::new();
    let child_id = Rc::new(RefCell::new(None));
    let record = child_id.clone();
    let parent = env.process(from_fn(move |ctx, wake| match wake {
        Wake::Start => {
            let child = ctx.spawn(from_fn(|ctx, wake| match wake {
                Wake::Start => Ok(ctx.timeout(5.0)?),
                _ => Err(ProcessError::failed("pump seized")),
            }));
            *record.borrow_mut() = Some(child);
            Ok(ctx.join(child))
        }
        _ => Ok(Step::Done),
    }));
    env.run(1.0).unwrap();

    // WHEN: the parent is cancelled before the child fails
    env.cancel(parent).unwrap();
    let result = env.run(None);

    // THEN: nobody is left waiting, so the failure halts the run
    let child = child_id.borrow().unwrap();
    match result {
        Err(DesError::UnhandledProcessFailure(failure)) => {
            assert_eq!(failure.process, child);
            assert!(!failure.is_cancelled());
        }
        other => panic!("expected an unhandled failure, got {:?}", other),
    }
    assert_eq!(env.state(parent), Some(ProcessState::Failed));
    assert_eq!(env.now().value(), 5.0);
}

/// The carwash-like script used for the determinism check: a generator
/// spawning holders at pseudo-random gaps from a fixed linear congruential
/// sequence.
fn scripted_run(seed: u64) -> Vec<TraceEntry> {
    let mut env = Environment::with_config(SimConfig {
        record_trace: true,
        ..SimConfig::default()
    })
    .unwrap();
    let machine = Resource::new(&env, 2).unwrap();
    let (granted, finished) = logs();
    let mut state = seed;
    let mut label = 0;
    env.process(from_fn(move |ctx, _wake| {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let gap = (state >> 33) as f64 / (1u64 << 31) as f64 * 3.0;
        ctx.spawn(Holder::new(label, &machine, 4.0, &granted, &finished));
        label += 1;
        Ok(ctx.timeout(gap)?)
    }));
    env.run(100.0).unwrap();
    env.trace().to_vec()
}

#[test]
fn given_same_seed_when_run_twice_then_traces_are_identical() {
    let first = scripted_run(42);
    let second = scripted_run(42);
    assert!(!first.is_empty());
    assert_eq!(first, second);

    let other = scripted_run(7);
    assert_ne!(first, other);
}

#[test]
fn given_trace_then_time_never_decreases() {
    let trace = scripted_run(3);
    for pair in trace.windows(2) {
        assert!(pair[0].time <= pair[1].time, "{} then {}", pair[0], pair[1]);
    }
}

#[test]
fn given_process_from_another_environment_when_joined_then_run_fails_fast() {
    let mut stranger = Environment::new();
    let foreign = (0..4)
        .map(|_| stranger.process(from_fn(|_ctx, _wake| Ok(Step::Done))))
        .last()
        .unwrap();

    let mut env = Environment::new();
    env.process(from_fn(move |ctx, _wake| Ok(ctx.join(foreign))));

    assert_eq!(env.run(None), Err(DesError::UnknownProcess(foreign)));
}

proptest! {
    #[test]
    fn capacity_is_never_exceeded(
        capacity in 1usize..4,
        jobs in prop::collection::vec((0u8..10, 1u8..6), 1..30),
    ) {
        let mut env = Environment::new();
        let machine = Resource::new(&env, capacity).unwrap();
        let (granted, finished) = logs();
        for (label, (arrival, hold)) in jobs.iter().enumerate() {
            let machine = machine.clone();
            let granted = granted.clone();
            let finished = finished.clone();
            let arrival = f64::from(*arrival);
            let hold = f64::from(*hold);
            env.process(from_fn(move |ctx, wake| match wake {
                Wake::Start => Ok(ctx.timeout(arrival)?),
                Wake::Timeout => {
                    ctx.spawn(Holder::new(label, &machine, hold, &granted, &finished));
                    Ok(Step::Done)
                }
                _ => Ok(Step::Done),
            }));
        }

        while env.step().unwrap().is_some() {
            let stats = machine.stats();
            prop_assert!(stats.in_use <= capacity);
            prop_assert!(stats.queue_len == 0 || stats.in_use == capacity);
        }

        prop_assert_eq!(finished.borrow().len(), jobs.len());
        prop_assert_eq!(machine.in_use(), 0);
        prop_assert_eq!(machine.stats().grants, jobs.len() as u64);
    }
}
