//! Propagation of rigid bodies through a time range under a field
//!
//! Each body is integrated independently:
//! 1. the phase vector `[q, omega]` is taken from the body's initial state,
//!    with the clock at the range start,
//! 2. the Dormand–Prince stepper advances it from one save time to the next,
//! 3. the state at every save time is appended to the body's trajectory,
//! 4. integration stops at the range end, or early when the stepper fails or
//!    a per-body budget runs out. An early stop leaves the trajectory short
//!    and is reported as a [`BodyStatus::Truncated`] outcome.
//!
//! Bodies are fanned out over a rayon pool. Every worker owns the body it is
//! integrating; the field and parameters are shared read-only.

use std::time::{Duration, Instant};

use log::{info, warn};
use nalgebra::Quaternion;
use rayon::prelude::*;
use thiserror::Error;

use super::body::RigidBody;
use super::ensemble::Ensemble;
use super::field::{Field, FieldError};
use super::integrator::{Dopri5, IntegrationError};
use super::params::Parameters;
use super::states::{PhaseVector, State};

#[derive(Debug, Error)]
pub enum PropagationError {
    #[error("Invalid time range [{start:e}, {end:e}] s: need finite start <= end")]
    InvalidTimeRange { start: f64, end: f64 },

    #[error("Save interval must be positive, got {0:e} s")]
    InvalidSaveInterval(f64),

    #[error("Invalid propagation parameter: {0}")]
    InvalidParameter(String),

    #[error("Failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Why a body stopped before the range end.
#[derive(Debug)]
pub enum TruncationReason {
    Integration(IntegrationError<FieldError>),
    StepBudget { max_steps: usize },
    WallClockBudget { budget: Duration },
}

impl std::fmt::Display for TruncationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integration(e) => write!(f, "{e}"),
            Self::StepBudget { max_steps } => write!(f, "step budget of {max_steps} exhausted"),
            Self::WallClockBudget { budget } => {
                write!(f, "wall-clock budget of {:.3} s exhausted", budget.as_secs_f64())
            }
        }
    }
}

#[derive(Debug)]
pub enum BodyStatus {
    Completed,
    Truncated {
        last_time: f64,
        reason: TruncationReason,
    },
}

/// Per-body result of a propagation run.
#[derive(Debug)]
pub struct BodyOutcome {
    pub index: usize,
    pub status: BodyStatus,
    pub steps: usize, // accepted integrator steps
    pub max_norm_drift: f64, // max | |q| - 1 | over recorded states
}

impl BodyOutcome {
    pub fn is_truncated(&self) -> bool {
        matches!(self.status, BodyStatus::Truncated { .. })
    }
}

#[derive(Debug)]
pub struct PropagationReport {
    pub outcomes: Vec<BodyOutcome>, // in ensemble order
    pub elapsed: Duration,
}

impl PropagationReport {
    pub fn truncated(&self) -> impl Iterator<Item = &BodyOutcome> {
        self.outcomes.iter().filter(|o| o.is_truncated())
    }

    pub fn truncated_indices(&self) -> Vec<usize> {
        self.truncated().map(|o| o.index).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.truncated().next().is_none()
    }

    pub fn max_norm_drift(&self) -> f64 {
        self.outcomes.iter().map(|o| o.max_norm_drift).fold(0.0, f64::max)
    }
}

/// Right-hand side of the phase-space ODE for `body` in `field`.
///
/// The field direction is rotated by the inverse orientation, i.e. into the
/// body frame, instead of rotating the body's tensors into the lab frame.
/// The orientation follows `dq/dt = q (0, omega) / 2` with `omega` in the
/// body frame.
pub fn derivative(
    body: &RigidBody,
    field: &Field,
    t: f64,
    y: &PhaseVector,
) -> Result<PhaseVector, FieldError> {
    let state = State::from_phase(y, t);
    let e_body = field.vector_at(t, &state.rotation().inverse())?;
    let alpha = body.acceleration(&e_body, &state);
    let dq = state.orientation * Quaternion::from_imag(state.angular_velocity) * 0.5;

    Ok(PhaseVector::from_column_slice(&[
        dq.w, dq.i, dq.j, dq.k, alpha.x, alpha.y, alpha.z,
    ]))
}

/// Save times after `t_start`: `t_start + k * dt` up to `t_end`, plus
/// `t_end` itself when the range is not a whole number of intervals.
pub fn output_times(t_start: f64, t_end: f64, dt: f64) -> Vec<f64> {
    let span = t_end - t_start;
    if span <= 0.0 {
        return Vec::new();
    }
    let slack = 1e-9 * dt;
    let n = ((span + slack) / dt).floor() as usize;

    let mut times: Vec<f64> = (1..=n).map(|k| t_start + k as f64 * dt).collect();
    match times.last().copied() {
        Some(last) if (last - t_end).abs() <= slack || last > t_end => {
            let end = times.len() - 1;
            times[end] = t_end;
        }
        _ => times.push(t_end),
    }
    times
}

#[derive(Debug, Clone)]
pub struct Propagator {
    params: Parameters,
}

impl Propagator {
    pub fn new(params: Parameters) -> Result<Self, PropagationError> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn parameters(&self) -> &Parameters {
        &self.params
    }

    /// Propagate every body of `ensemble` in `field`. Bodies that stop early
    /// are reported and logged; they never abort the other bodies.
    pub fn run(&self, ensemble: &mut Ensemble, field: &Field) -> Result<PropagationReport, PropagationError> {
        let threads = self
            .params
            .threads
            .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, |n| n.get()));
        let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;

        info!(
            "propagating {} bodies over [{:e}, {:e}] s (save every {:e} s) on {} threads",
            ensemble.len(),
            self.params.t_start,
            self.params.t_end,
            self.params.save_interval,
            threads
        );
        let started = Instant::now();

        let bodies = ensemble.take_bodies();
        let results: Vec<(RigidBody, BodyOutcome)> = pool.install(|| {
            bodies
                .into_par_iter()
                .enumerate()
                .map(|(index, mut body)| {
                    let outcome = self.propagate_indexed(index, &mut body, field);
                    (body, outcome)
                })
                .collect()
        });
        let (bodies, outcomes): (Vec<_>, Vec<_>) = results.into_iter().unzip();
        ensemble.restore_bodies(bodies, field.clone(), self.params.t_start);

        let report = PropagationReport {
            outcomes,
            elapsed: started.elapsed(),
        };
        for outcome in &report.outcomes {
            if let BodyStatus::Truncated { last_time, reason } = &outcome.status {
                warn!(
                    "body {} stopped at t = {:e} s before the range end {:e} s: {}",
                    outcome.index, last_time, self.params.t_end, reason
                );
            }
            if outcome.max_norm_drift > self.params.norm_tolerance {
                warn!(
                    "body {}: quaternion norm drifted by {:e} (tolerance {:e})",
                    outcome.index, outcome.max_norm_drift, self.params.norm_tolerance
                );
            }
        }
        info!(
            "propagation finished in {:.3} s, {} of {} bodies truncated",
            report.elapsed.as_secs_f64(),
            report.truncated().count(),
            report.outcomes.len()
        );

        Ok(report)
    }

    /// Propagate a single body on the calling thread.
    pub fn propagate_body(&self, body: &mut RigidBody, field: &Field) -> BodyOutcome {
        self.propagate_indexed(0, body, field)
    }

    fn propagate_indexed(&self, index: usize, body: &mut RigidBody, field: &Field) -> BodyOutcome {
        let p = &self.params;
        body.restart_at(p.t_start);

        let mut t = p.t_start;
        let mut y = body.initial_state().to_phase();
        let mut solver = Dopri5::new(p.rtol, p.atol, p.max_steps_per_interval);
        let started = Instant::now();
        let mut steps = 0;
        let mut max_norm_drift = body.initial_state().norm_drift();

        let truncated = |reason: TruncationReason, last_time: f64, steps: usize, max_norm_drift: f64| BodyOutcome {
            index,
            status: BodyStatus::Truncated { last_time, reason },
            steps,
            max_norm_drift,
        };

        for t_out in output_times(p.t_start, p.t_end, p.save_interval) {
            let rhs = |t: f64, y: &PhaseVector| derivative(body, field, t, y);
            match solver.integrate(rhs, &mut t, &mut y, t_out) {
                Ok(n) => steps += n,
                Err(e) => {
                    return truncated(TruncationReason::Integration(e), body.last_state().time, steps, max_norm_drift);
                }
            }

            let state = State::from_phase(&y, t_out);
            max_norm_drift = max_norm_drift.max(state.norm_drift());
            body.record(state);

            if let Some(max_steps) = p.max_steps_per_body {
                if steps >= max_steps && t_out < p.t_end {
                    return truncated(TruncationReason::StepBudget { max_steps }, t_out, steps, max_norm_drift);
                }
            }
            if let Some(budget) = p.max_wall_time {
                if started.elapsed() > budget && t_out < p.t_end {
                    return truncated(TruncationReason::WallClockBudget { budget }, t_out, steps, max_norm_drift);
                }
            }
        }

        BodyOutcome {
            index,
            status: BodyStatus::Completed,
            steps,
            max_norm_drift,
        }
    }
}

/// Propagate `ensemble` in `field` over `time_range`, saving every
/// `save_interval`, with default tolerances and budgets.
pub fn propagate(
    ensemble: &mut Ensemble,
    field: &Field,
    time_range: (f64, f64),
    save_interval: f64,
) -> Result<PropagationReport, PropagationError> {
    Propagator::new(Parameters::new(time_range, save_interval))?.run(ensemble, field)
}
