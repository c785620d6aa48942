//! Parallel execution of independent simulations
//!
//! An [`Environment`](crate::Environment) is single-threaded and never leaves
//! the thread that built it. To use more cores, each scenario builds, runs
//! and summarises its own environment inside a rayon worker and hands back a
//! `Send` summary.
//!
//! # Example: a seed sweep
//!
//! ```rust
//! use des::parallel::{ParallelRunner, simple_progress_reporter};
//! use des::{Environment, Step, Wake, from_fn};
//!
//! let results = ParallelRunner::new(20, |scenario_id| {
//!     let mut env = Environment::new();
//!     let delay = scenario_id as f64;
//!     env.process(from_fn(move |ctx, wake| match wake {
//!         Wake::Start => Ok(ctx.timeout(delay)?),
//!         _ => Ok(Step::Done),
//!     }));
//!     env.run(None)?;
//!     Ok::<f64, des::DesError>(env.now().value())
//! })
//! .progress(simple_progress_reporter(10))
//! .num_threads(4)
//! .run();
//!
//! assert_eq!(results.len(), 20);
//! assert_eq!(results[7].as_ref().ok(), Some(&7.0));
//! ```
//!
//! # Determinism
//!
//! Results come back in `scenario_id` order and are identical across runs as
//! long as the builder derives its seeds from `scenario_id` and scenarios
//! share no mutable state. Thread count and completion order do not matter.
//!
//! # Error Handling
//!
//! The error a scenario returns (a [`DesError`] or a model's own error type)
//! comes back as [`ScenarioError::Simulation`]; a panic is caught and comes
//! back as [`ScenarioError::Panicked`]. Other scenarios keep running.

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use thiserror::Error;
use tracing::warn;

use crate::error::DesError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScenarioError<E = DesError> {
    #[error("simulation failed: {0}")]
    Simulation(E),

    #[error("scenario panicked: {0}")]
    Panicked(String),
}

/// Executes independent scenarios in parallel
///
/// `F` builds and runs one scenario for the given `scenario_id` and returns
/// its summary `S` or its error `E`.
pub struct ParallelRunner<S, E, F>
where
    F: Fn(usize) -> Result<S, E> + Send + Sync,
    S: Send,
    E: Send,
{
    num_scenarios: usize,
    builder: F,
    num_threads: Option<usize>,
    progress_callback: Option<Arc<dyn Fn(usize, usize) + Send + Sync>>,
    _scenario: PhantomData<fn() -> (S, E)>,
}

impl<S, E, F> ParallelRunner<S, E, F>
where
    F: Fn(usize) -> Result<S, E> + Send + Sync,
    S: Send,
    E: Send,
{
    pub fn new(num_scenarios: usize, builder: F) -> Self {
        ParallelRunner {
            num_scenarios,
            builder,
            num_threads: None,
            progress_callback: None,
            _scenario: PhantomData,
        }
    }

    /// Set number of threads (defaults to rayon's global pool)
    pub fn num_threads(mut self, n: usize) -> Self {
        self.num_threads = Some(n);
        self
    }

    /// Set progress callback, called with `(completed, total)` after each scenario
    pub fn progress<P>(mut self, callback: P) -> Self
    where
        P: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(callback));
        self
    }

    /// Execute all scenarios and return results in scenario_id order
    pub fn run(self) -> Vec<Result<S, ScenarioError<E>>> {
        let progress_counter = AtomicUsize::new(0);

        let pool = self.num_threads.and_then(|n| {
            rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build()
                .inspect_err(|e| warn!(threads = n, error = %e, "falling back to the global pool"))
                .ok()
        });

        let execute = || {
            (0..self.num_scenarios)
                .into_par_iter()
                .map(|scenario_id| {
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        (self.builder)(scenario_id)
                    }));

                    let completed = progress_counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Some(ref callback) = self.progress_callback {
                        callback(completed, self.num_scenarios);
                    }

                    match result {
                        Ok(outcome) => outcome.map_err(ScenarioError::Simulation),
                        Err(panic) => Err(ScenarioError::Panicked(panic_message(&*panic))),
                    }
                })
                .collect()
        };

        match pool {
            Some(pool) => pool.install(execute),
            None => execute(),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

/// Run scenarios in parallel with the default pool
pub fn run_parallel<S, E, F>(
    num_scenarios: usize,
    builder: F,
) -> Vec<Result<S, ScenarioError<E>>>
where
    F: Fn(usize) -> Result<S, E> + Send + Sync,
    S: Send,
    E: Send,
{
    ParallelRunner::new(num_scenarios, builder).run()
}

/// Run scenarios in batches of at most `batch_size` to bound peak memory
pub fn run_batched<S, E, F>(
    num_scenarios: usize,
    batch_size: usize,
    builder: F,
) -> Vec<Result<S, ScenarioError<E>>>
where
    F: Fn(usize) -> Result<S, E> + Send + Sync,
    S: Send,
    E: Send,
{
    let mut all_results = Vec::with_capacity(num_scenarios);

    for batch_start in (0..num_scenarios).step_by(batch_size.max(1)) {
        let batch_end = (batch_start + batch_size.max(1)).min(num_scenarios);
        let batch_results = run_parallel(batch_end - batch_start, |local_id| {
            builder(batch_start + local_id)
        });
        all_results.extend(batch_results);
    }

    all_results
}

/// Progress callback that prints every `interval` completed scenarios
pub fn simple_progress_reporter(interval: usize) -> impl Fn(usize, usize) + Send + Sync {
    let interval = interval.max(1);
    move |completed, total| {
        if completed % interval == 0 || completed == total {
            println!("  Completed {}/{} scenarios", completed, total);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Environment, Resource, Step, Wake, from_fn};

    // Two processes share one unit; the scenario reports when the last finishes.
    fn queue_scenario(scenario_id: usize) -> Result<f64, DesError> {
        let mut env = Environment::new();
        let machine = Resource::new(&env, 1)?;
        let hold = 1.0 + scenario_id as f64;
        for _ in 0..2 {
            let machine = machine.clone();
            let mut held = None;
            env.process(from_fn(move |ctx, wake| match wake {
                Wake::Start => {
                    let request = ctx.request(&machine)?;
                    let step = Step::acquire(&request);
                    held = Some(request);
                    Ok(step)
                }
                Wake::Granted(_) => Ok(ctx.timeout(hold)?),
                _ => {
                    drop(held.take());
                    Ok(Step::Done)
                }
            }));
        }
        env.run(None)?;
        Ok(env.now().value())
    }

    #[test]
    fn test_parallel_basic() {
        let results = run_parallel(10, queue_scenario);

        assert_eq!(results.len(), 10);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.as_ref().ok(), Some(&(2.0 * (1.0 + i as f64))));
        }
    }

    #[test]
    fn test_parallel_determinism() {
        let run1 = run_parallel(20, queue_scenario);
        let run2 = run_parallel(20, queue_scenario);
        assert_eq!(run1, run2);
    }

    #[test]
    fn test_parallel_panic_isolation() {
        let results = run_parallel(10, |scenario_id| {
            if scenario_id == 5 {
                panic!("Test panic");
            }
            queue_scenario(scenario_id)
        });

        assert_eq!(results.len(), 10);
        assert_eq!(
            results[5],
            Err(ScenarioError::Panicked("Test panic".to_string()))
        );
        for (i, result) in results.iter().enumerate() {
            if i != 5 {
                assert!(result.is_ok());
            }
        }
    }

    #[test]
    fn test_simulation_errors_are_reported() {
        let results = run_parallel(3, |scenario_id| {
            let mut env = Environment::new();
            env.process(from_fn(move |ctx, _wake| Ok(ctx.timeout(-(scenario_id as f64) - 1.0)?)));
            env.run(None)?;
            Ok::<(), DesError>(())
        });

        assert!(results
            .iter()
            .all(|r| matches!(r, Err(ScenarioError::Simulation(DesError::InvalidDelay { .. })))));
    }

    #[test]
    fn test_model_errors_pass_through() {
        let results = run_parallel(4, |scenario_id| {
            if scenario_id % 2 == 1 {
                return Err(format!("scenario {} rejected", scenario_id));
            }
            Ok(scenario_id)
        });

        assert_eq!(results[0], Ok(0));
        assert_eq!(
            results[1],
            Err(ScenarioError::Simulation("scenario 1 rejected".to_string()))
        );
        assert_eq!(
            results[3].as_ref().unwrap_err().to_string(),
            "simulation failed: scenario 3 rejected"
        );
    }

    #[test]
    fn test_parallel_progress_callback() {
        use std::sync::Mutex;
        let completed = Arc::new(Mutex::new(0));
        let completed_clone = completed.clone();

        ParallelRunner::new(5, queue_scenario)
            .progress(move |count, _total| {
                let mut last = completed_clone.lock().unwrap();
                *last = (*last).max(count);
            })
            .run();

        assert_eq!(*completed.lock().unwrap(), 5);
    }

    #[test]
    fn test_parallel_custom_threads() {
        let results = ParallelRunner::new(8, queue_scenario).num_threads(2).run();

        assert_eq!(results.len(), 8);
        assert!(results.iter().all(|r| r.is_ok()));
    }

    #[test]
    fn test_batched_execution() {
        let results = run_batched(25, 10, queue_scenario);

        assert_eq!(results.len(), 25);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.as_ref().ok(), Some(&(2.0 * (1.0 + i as f64))));
        }
    }

    #[test]
    fn test_empty_scenarios() {
        let results = run_parallel(0, queue_scenario);
        assert!(results.is_empty());
    }

    #[test]
    fn test_simple_progress_reporter() {
        let reporter = simple_progress_reporter(10);
        reporter(10, 100);
        reporter(100, 100);
    }
}
