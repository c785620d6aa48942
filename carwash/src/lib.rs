//! Carwash model on top of the `des` kernel.
//!
//! Cars queue for a limited number of washing machines. The library exposes
//! the model and its configuration. The binaries run it once (`carwash`),
//! time it over a growing horizon (`benchmark`) or run many seeds in
//! parallel (`sweep`).
//!
//! ```rust
//! use carwash::{CarwashConfig, run_simulation};
//!
//! let report = run_simulation(&CarwashConfig::default(), 60.0).unwrap();
//! assert!(report.log.cars_washed >= 11);
//! assert_eq!(report.machine.in_use, 1);
//! ```

pub mod config;
pub mod logging;
pub mod model;

pub use config::{
    ArrivalPattern, BenchmarkConfig, CarwashConfig, ConfigError, ExperimentConfig, SweepConfig,
    MINUTES_PER_DAY,
};
pub use model::{
    Car, Carwash, CarwashError, CarwashReport, Setup, Wash, WashLog, run_simulation,
};
