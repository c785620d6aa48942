//! The carwash model.
//!
//! A carwash has a limited number of washing machines. Cars arrive, queue
//! for a free machine, get washed and leave. A setup process opens the
//! carwash with a few cars already waiting and keeps new cars coming.

use std::cell::RefCell;
use std::rc::Rc;

use des::{
    Context, DesError, Environment, Process, ProcessError, Request, Resource, ResourceStats,
    RunStats, SimTime, Step, Wake,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Exp1;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{ArrivalPattern, CarwashConfig, ConfigError};

#[derive(Debug, Error)]
pub enum CarwashError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Simulation(#[from] DesError),
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WashLog {
    pub cars_arrived: usize,
    pub cars_entered: usize,
    pub cars_washed: usize,
}

/// The machines plus the log shared by every car.
#[derive(Debug, Clone)]
pub struct Carwash {
    machine: Resource,
    wash_time: f64,
    log: Rc<RefCell<WashLog>>,
}

impl Carwash {
    pub fn new(env: &Environment, num_machines: usize, wash_time: f64) -> Result<Carwash, DesError> {
        Ok(Carwash {
            machine: Resource::new(env, num_machines)?,
            wash_time,
            log: Rc::new(RefCell::new(WashLog::default())),
        })
    }

    pub fn machine(&self) -> &Resource {
        &self.machine
    }

    pub fn wash_time(&self) -> f64 {
        self.wash_time
    }

    pub fn log(&self) -> WashLog {
        *self.log.borrow()
    }

    pub fn report(&self, env: &Environment) -> CarwashReport {
        CarwashReport {
            horizon: env.now().value(),
            log: self.log(),
            machine: self.machine.stats(),
            events: env.stats(),
        }
    }
}

/// Summary of one run. Plain data, so it can leave a worker thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CarwashReport {
    pub horizon: f64,
    pub log: WashLog,
    pub machine: ResourceStats,
    pub events: RunStats,
}

impl CarwashReport {
    /// Mean minutes a car queued before getting a machine.
    pub fn mean_wait(&self) -> f64 {
        self.machine.mean_wait()
    }

    /// Cars washed per simulated hour.
    pub fn throughput(&self) -> f64 {
        if self.horizon > 0.0 {
            self.log.cars_washed as f64 * 60.0 / self.horizon
        } else {
            0.0
        }
    }

    pub fn still_queued(&self) -> usize {
        self.machine.queue_len
    }
}

/// The washing itself: holds the car for `wash_time` minutes.
pub struct Wash {
    wash_time: f64,
}

impl Wash {
    pub fn new(wash_time: f64) -> Wash {
        Wash { wash_time }
    }
}

impl Process for Wash {
    fn resume(&mut self, ctx: &mut Context<'_>, wake: Wake) -> Result<Step, ProcessError> {
        match wake {
            Wake::Start => Ok(ctx.timeout(self.wash_time)?),
            _ => Ok(Step::Done),
        }
    }

    fn name(&self) -> &str {
        "wash"
    }
}

/// A car arrives, requests a machine, waits for the wash and leaves. The
/// machine goes back to the carwash when the request guard is dropped.
pub struct Car {
    name: String,
    carwash: Carwash,
    request: Option<Request>,
    arrived: SimTime,
}

impl Car {
    pub fn new(number: usize, carwash: &Carwash) -> Car {
        Car {
            name: format!("Car {number}"),
            carwash: carwash.clone(),
            request: None,
            arrived: SimTime::ZERO,
        }
    }
}

impl Process for Car {
    fn resume(&mut self, ctx: &mut Context<'_>, wake: Wake) -> Result<Step, ProcessError> {
        match wake {
            Wake::Start => {
                debug!(car = %self.name, now = %ctx.now(), "arrives at the carwash");
                self.arrived = ctx.now();
                self.carwash.log.borrow_mut().cars_arrived += 1;
                let request = ctx.request(&self.carwash.machine)?;
                let step = Step::acquire(&request);
                self.request = Some(request);
                Ok(step)
            }
            Wake::Granted(_) => {
                debug!(
                    car = %self.name,
                    waited = ctx.now().since(self.arrived),
                    "enters the carwash"
                );
                self.carwash.log.borrow_mut().cars_entered += 1;
                let wash = ctx.spawn(Wash::new(self.carwash.wash_time));
                Ok(ctx.join(wash))
            }
            Wake::Joined { outcome, .. } => {
                outcome?;
                drop(self.request.take());
                self.carwash.log.borrow_mut().cars_washed += 1;
                debug!(car = %self.name, now = %ctx.now(), "leaves the carwash");
                Ok(Step::Done)
            }
            Wake::Timeout => Err(ProcessError::failed("car woke without waiting on a timer")),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Opens the carwash with `initial_cars` waiting and then spawns a new car
/// after every arrival gap, forever.
pub struct Setup {
    carwash: Carwash,
    initial_cars: usize,
    t_inter: f64,
    arrivals: ArrivalPattern,
    rng: StdRng,
    next_car: usize,
}

impl Setup {
    /// Fails on a config that `CarwashConfig::validate` rejects.
    pub fn new(carwash: Carwash, config: &CarwashConfig) -> Result<Setup, ConfigError> {
        config.validate()?;
        Ok(Setup {
            carwash,
            initial_cars: config.initial_cars,
            t_inter: config.t_inter,
            arrivals: config.arrivals,
            rng: StdRng::seed_from_u64(config.seed),
            next_car: 0,
        })
    }

    fn next_gap(&mut self) -> f64 {
        match self.arrivals {
            ArrivalPattern::Jittered => self.rng.random::<f64>() * self.t_inter,
            ArrivalPattern::Exponential => {
                let unit: f64 = self.rng.sample(Exp1);
                unit * self.t_inter
            }
        }
    }

    fn spawn_car(&mut self, ctx: &mut Context<'_>) {
        ctx.spawn(Car::new(self.next_car, &self.carwash));
        self.next_car += 1;
    }
}

impl Process for Setup {
    fn resume(&mut self, ctx: &mut Context<'_>, wake: Wake) -> Result<Step, ProcessError> {
        match wake {
            Wake::Start => {
                for _ in 0..self.initial_cars {
                    self.spawn_car(ctx);
                }
            }
            _ => self.spawn_car(ctx),
        }
        let gap = self.next_gap();
        Ok(ctx.timeout(gap)?)
    }

    fn name(&self) -> &str {
        "setup"
    }
}

/// Build the carwash, start the setup process and run until `horizon`.
pub fn run_simulation(
    config: &CarwashConfig,
    horizon: f64,
) -> Result<CarwashReport, CarwashError> {
    let mut env = Environment::new();
    let carwash = Carwash::new(&env, config.num_machines, config.wash_time)?;
    env.process(Setup::new(carwash.clone(), config)?);
    env.run(horizon)?;

    let report = carwash.report(&env);
    info!(
        seed = config.seed,
        horizon,
        washed = report.log.cars_washed,
        queued = report.still_queued(),
        events = report.events.events_processed,
        "carwash run finished"
    );
    Ok(report)
}
