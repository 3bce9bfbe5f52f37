//! Adaptive time integrator for the rigid-body phase-space ODE
//!
//! Embedded Dormand–Prince 5(4) Runge–Kutta pair with local-extrapolation
//! (the 5th order solution is propagated) and the usual PI-free step-size
//! controller. The integrator advances a state to a requested output time
//! exactly, keeping its step size across calls, and gives up with an
//! [`IntegrationError`] instead of silently stopping.

use nalgebra::SVector;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IntegrationError<E> {
    #[error("Exceeded {max_steps} internal steps before reaching t = {t_out:e} s (stopped at {t:e} s)")]
    TooManySteps { max_steps: usize, t: f64, t_out: f64 },

    #[error("Step size underflow at t = {t:e} s (h = {h:e} s)")]
    StepSizeUnderflow { t: f64, h: f64 },

    #[error("Derivative evaluation failed at t = {t:e} s: {source}")]
    Derivative { t: f64, source: E },
}

// Butcher tableau
const C2: f64 = 1.0 / 5.0;
const C3: f64 = 3.0 / 10.0;
const C4: f64 = 4.0 / 5.0;
const C5: f64 = 8.0 / 9.0;

const A21: f64 = 1.0 / 5.0;
const A31: f64 = 3.0 / 40.0;
const A32: f64 = 9.0 / 40.0;
const A41: f64 = 44.0 / 45.0;
const A42: f64 = -56.0 / 15.0;
const A43: f64 = 32.0 / 9.0;
const A51: f64 = 19372.0 / 6561.0;
const A52: f64 = -25360.0 / 2187.0;
const A53: f64 = 64448.0 / 6561.0;
const A54: f64 = -212.0 / 729.0;
const A61: f64 = 9017.0 / 3168.0;
const A62: f64 = -355.0 / 33.0;
const A63: f64 = 46732.0 / 5247.0;
const A64: f64 = 49.0 / 176.0;
const A65: f64 = -5103.0 / 18656.0;
// 5th order weights, also the last stage row (FSAL)
const B1: f64 = 35.0 / 384.0;
const B3: f64 = 500.0 / 1113.0;
const B4: f64 = 125.0 / 192.0;
const B5: f64 = -2187.0 / 6784.0;
const B6: f64 = 11.0 / 84.0;
// difference between 5th and 4th order weights
const E1: f64 = 71.0 / 57600.0;
const E3: f64 = -71.0 / 16695.0;
const E4: f64 = 71.0 / 1920.0;
const E5: f64 = -17253.0 / 339200.0;
const E6: f64 = 22.0 / 525.0;
const E7: f64 = -1.0 / 40.0;

const SAFETY: f64 = 0.9;
const FAC_MIN: f64 = 0.2;
const FAC_MAX: f64 = 10.0;

/// Dormand–Prince 5(4) stepper with error control
/// `|err_i| <= atol + rtol * max(|y_i|, |y_new_i|)` (RMS over components).
#[derive(Debug, Clone)]
pub struct Dopri5 {
    pub rtol: f64,
    pub atol: f64,
    pub max_steps: usize, // per call to `integrate`
    h: Option<f64>, // step carried over between calls
}

impl Dopri5 {
    pub fn new(rtol: f64, atol: f64, max_steps: usize) -> Self {
        Self {
            rtol,
            atol,
            max_steps,
            h: None,
        }
    }

    /// Advance `(t, y)` to `t_out >= t` using `rhs(t, y) = dy/dt`.
    ///
    /// On success `t == t_out` and the number of accepted steps is returned.
    /// On failure `(t, y)` hold the last accepted point.
    pub fn integrate<const N: usize, F, E>(
        &mut self,
        mut rhs: F,
        t: &mut f64,
        y: &mut SVector<f64, N>,
        t_out: f64,
    ) -> Result<usize, IntegrationError<E>>
    where
        F: FnMut(f64, &SVector<f64, N>) -> Result<SVector<f64, N>, E>,
    {
        if t_out <= *t {
            return Ok(0);
        }

        let mut eval = |t: f64, y: &SVector<f64, N>| {
            rhs(t, y).map_err(|source| IntegrationError::Derivative { t, source })
        };

        let mut k1 = eval(*t, y)?;
        let mut h = match self.h {
            Some(h) => h,
            None => self.initial_step(&mut eval, *t, y, &k1, t_out)?,
        };

        let mut accepted = 0;
        let mut attempts = 0;
        while *t < t_out {
            if attempts >= self.max_steps {
                return Err(IntegrationError::TooManySteps {
                    max_steps: self.max_steps,
                    t: *t,
                    t_out,
                });
            }
            attempts += 1;

            let remaining = t_out - *t;
            // land on t_out instead of leaving a sliver behind
            let last = *t + h >= t_out - 1e-12 * remaining;
            let h_step = if last { remaining } else { h };

            let h_min = 16.0 * f64::EPSILON * t.abs().max(t_out.abs());
            if h_step <= h_min {
                return Err(IntegrationError::StepSizeUnderflow { t: *t, h: h_step });
            }

            let y2 = *y + k1 * (A21 * h_step);
            let k2 = eval(*t + C2 * h_step, &y2)?;
            let y3 = *y + (k1 * A31 + k2 * A32) * h_step;
            let k3 = eval(*t + C3 * h_step, &y3)?;
            let y4 = *y + (k1 * A41 + k2 * A42 + k3 * A43) * h_step;
            let k4 = eval(*t + C4 * h_step, &y4)?;
            let y5 = *y + (k1 * A51 + k2 * A52 + k3 * A53 + k4 * A54) * h_step;
            let k5 = eval(*t + C5 * h_step, &y5)?;
            let y6 = *y + (k1 * A61 + k2 * A62 + k3 * A63 + k4 * A64 + k5 * A65) * h_step;
            let t_new = if last { t_out } else { *t + h_step };
            let k6 = eval(t_new, &y6)?;
            let y_new = *y + (k1 * B1 + k3 * B3 + k4 * B4 + k5 * B5 + k6 * B6) * h_step;
            let k7 = eval(t_new, &y_new)?;

            let err_vec = (k1 * E1 + k3 * E3 + k4 * E4 + k5 * E5 + k6 * E6 + k7 * E7) * h_step;
            let err = self.error_norm(&err_vec, y, &y_new);

            if err.is_finite() && err <= 1.0 {
                *t = t_new;
                *y = y_new;
                k1 = k7;
                accepted += 1;

                let factor = if err == 0.0 {
                    FAC_MAX
                } else {
                    (SAFETY * err.powf(-0.2)).clamp(FAC_MIN, FAC_MAX)
                };
                // a shortened final step says nothing about the natural step size
                if !last || h_step >= h {
                    h = h_step * factor;
                }
            } else {
                let factor = if err.is_finite() {
                    (SAFETY * err.powf(-0.2)).clamp(FAC_MIN, 1.0)
                } else {
                    FAC_MIN
                };
                h = h_step * factor;
            }
        }

        self.h = Some(h);
        Ok(accepted)
    }

    fn error_norm<const N: usize>(
        &self,
        err: &SVector<f64, N>,
        y: &SVector<f64, N>,
        y_new: &SVector<f64, N>,
    ) -> f64 {
        let sum: f64 = (0..N)
            .map(|i| {
                let scale = self.atol + self.rtol * y[i].abs().max(y_new[i].abs());
                let r = err[i] / scale;
                r * r
            })
            .sum();
        (sum / N as f64).sqrt()
    }

    /// Starting step guess (Hairer, Nørsett & Wanner, Sec. II.4).
    fn initial_step<const N: usize, G, E>(
        &self,
        eval: &mut G,
        t: f64,
        y: &SVector<f64, N>,
        f0: &SVector<f64, N>,
        t_out: f64,
    ) -> Result<f64, IntegrationError<E>>
    where
        G: FnMut(f64, &SVector<f64, N>) -> Result<SVector<f64, N>, IntegrationError<E>>,
    {
        let span = t_out - t;
        let scaled_norm = |v: &SVector<f64, N>| {
            let sum: f64 = (0..N)
                .map(|i| {
                    let r = v[i] / (self.atol + self.rtol * y[i].abs());
                    r * r
                })
                .sum();
            (sum / N as f64).sqrt()
        };

        let d0 = scaled_norm(y);
        let d1 = scaled_norm(f0);
        let h0 = if d0 < 1e-5 || d1 < 1e-5 {
            1e-6 * span
        } else {
            (0.01 * d0 / d1).min(span)
        };

        let y1 = *y + *f0 * h0;
        let f1 = eval((t + h0).min(t_out), &y1)?;
        let d2 = scaled_norm(&(f1 - *f0)) / h0;

        let h1 = if d1.max(d2) <= 1e-15 {
            (h0 * 1e-3).max(1e-6 * span)
        } else {
            (0.01 / d1.max(d2)).powf(0.2)
        };

        Ok((100.0 * h0).min(h1).min(span))
    }
}
