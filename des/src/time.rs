//! Virtual time.
//!
//! Simulated time is a finite `f64` that only moves when the environment
//! processes an event. It never observes the wall clock.

use std::cmp::Ordering;
use std::fmt;

use crate::error::DesError;

/// A point on the simulated clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimTime(f64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0.0);

    /// Wrap a raw value. Fails for NaN or infinite input.
    pub fn new(value: f64) -> Result<SimTime, DesError> {
        if !value.is_finite() {
            return Err(DesError::InvalidTime { value });
        }
        // folds -0.0 into 0.0 so equal instants compare equal
        Ok(SimTime(value + 0.0))
    }

    #[inline]
    pub fn value(self) -> f64 {
        self.0
    }

    /// The instant `delay` after `self`.
    pub fn after(self, delay: Delay) -> Result<SimTime, DesError> {
        SimTime::new(self.0 + delay.value())
    }

    /// Elapsed time since `earlier`, clamped at zero.
    pub fn since(self, earlier: SimTime) -> f64 {
        (self.0 - earlier.0).max(0.0)
    }
}

impl PartialEq for SimTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SimTime {}

impl Ord for SimTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for SimTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t={}", self.0)
    }
}

/// A non-negative, finite span of simulated time.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Delay(f64);

impl Delay {
    pub const ZERO: Delay = Delay(0.0);

    pub fn new(delay: f64) -> Result<Delay, DesError> {
        if !delay.is_finite() || delay < 0.0 {
            return Err(DesError::InvalidDelay { delay });
        }
        Ok(Delay(delay + 0.0))
    }

    #[inline]
    pub fn value(self) -> f64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_finite_time() {
        assert!(matches!(
            SimTime::new(f64::NAN),
            Err(DesError::InvalidTime { .. })
        ));
        assert!(SimTime::new(f64::INFINITY).is_err());
    }

    #[test]
    fn negative_zero_equals_zero() {
        let t = SimTime::new(-0.0).unwrap();
        assert_eq!(t, SimTime::ZERO);
    }

    #[test]
    fn ordering() {
        let t1 = SimTime::new(1.5).unwrap();
        let t2 = SimTime::new(2.0).unwrap();
        assert!(t1 < t2);
        assert_eq!(t2.since(t1), 0.5);
        assert_eq!(t1.since(t2), 0.0);
    }

    #[test]
    fn after_adds_delay() {
        let t = SimTime::new(10.0).unwrap();
        let later = t.after(Delay::new(2.5).unwrap()).unwrap();
        assert_eq!(later.value(), 12.5);
    }

    #[test]
    fn delay_must_be_non_negative() {
        assert_eq!(
            Delay::new(-1.0),
            Err(DesError::InvalidDelay { delay: -1.0 })
        );
        assert!(Delay::new(f64::NAN).is_err());
        assert_eq!(Delay::new(0.0).unwrap(), Delay::ZERO);
    }

    #[test]
    fn display() {
        assert_eq!(SimTime::new(42.0).unwrap().to_string(), "t=42");
    }
}
