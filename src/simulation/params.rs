//! Numerical and physical parameters for a propagation run
//!
//! `Parameters` holds runtime settings:
//! - time range and save interval,
//! - error tolerances for the adaptive integrator,
//! - per-interval and per-body step budgets, wall-clock budget,
//! - worker count and the quaternion-norm drift tolerance
//!
//! The few physical constants the model needs live here as well.

use std::time::Duration;

use super::propagator::PropagationError;

/// Speed of light in vacuum (m/s)
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;
/// Vacuum permittivity (F/m)
pub const VACUUM_PERMITTIVITY: f64 = 8.854_187_812_8e-12;
/// Boltzmann constant (J/K)
pub const BOLTZMANN: f64 = 1.380_649e-23;

/// Upper bound on recorded states per body
const MAX_SAVE_POINTS: f64 = u32::MAX as f64;

#[derive(Debug, Clone)]
pub struct Parameters {
    pub t_start: f64, // range start (s)
    pub t_end: f64, // range end (s)
    pub save_interval: f64, // spacing of recorded states (s)
    pub rtol: f64, // relative error tolerance
    pub atol: f64, // absolute error tolerance
    pub max_steps_per_interval: usize, // internal steps allowed between two saves
    pub max_steps_per_body: Option<usize>, // total internal steps allowed for one body
    pub max_wall_time: Option<Duration>, // wall-clock budget for one body
    pub threads: Option<usize>, // worker count, None = available parallelism
    pub norm_tolerance: f64, // allowed | |q| - 1 | before a warning
}

impl Parameters {
    /// Defaults for everything except the time grid.
    pub fn new(time_range: (f64, f64), save_interval: f64) -> Self {
        Self {
            t_start: time_range.0,
            t_end: time_range.1,
            save_interval,
            rtol: 1e-8,
            atol: 1e-10,
            max_steps_per_interval: 10_000,
            max_steps_per_body: None,
            max_wall_time: None,
            threads: None,
            norm_tolerance: 1e-6,
        }
    }

    /// Reject ranges and tolerances the propagator cannot work with.
    pub fn validate(&self) -> Result<(), PropagationError> {
        if !self.t_start.is_finite() || !self.t_end.is_finite() || self.t_start > self.t_end {
            return Err(PropagationError::InvalidTimeRange {
                start: self.t_start,
                end: self.t_end,
            });
        }
        if !self.save_interval.is_finite() || self.save_interval <= 0.0 {
            return Err(PropagationError::InvalidSaveInterval(self.save_interval));
        }
        let samples = (self.t_end - self.t_start) / self.save_interval;
        if !samples.is_finite() || samples > MAX_SAVE_POINTS {
            return Err(PropagationError::InvalidSaveInterval(self.save_interval));
        }
        if !(self.rtol > 0.0) || !(self.atol >= 0.0) {
            return Err(PropagationError::InvalidParameter(format!(
                "tolerances must satisfy rtol > 0 and atol >= 0 (rtol = {}, atol = {})",
                self.rtol, self.atol
            )));
        }
        if self.max_steps_per_interval == 0 {
            return Err(PropagationError::InvalidParameter(
                "max_steps_per_interval must be positive".into(),
            ));
        }
        if self.threads == Some(0) {
            return Err(PropagationError::InvalidParameter("threads must be positive".into()));
        }
        Ok(())
    }
}
