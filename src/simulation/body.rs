//! Polarizable rigid body: physical properties, trajectory, torque model
//!
//! A [`RigidBody`] carries its principal moments of inertia, its body-frame
//! polarizability tensor and the ordered list of phase-space states recorded
//! so far. The first trajectory entry is the initial condition.
//!
//! # Torque sign convention
//!
//! The field reaching [`RigidBody::acceleration`] is already expressed in the
//! body frame. The induced dipole is `d = P E` and the torque is
//! `tau = s (d x E)`. The sign `s` depends on which body axis the particle's
//! figure axis starts along:
//! - `I_c < I_a`: figure axis along body `z` (prolate rods, linear molecules
//!   with `I = [I, I, 0]`), `s = +1`
//! - otherwise: `s = -1`. This is a bookkeeping convention for bodies set
//!   up along lab `z`, kept for compatibility with existing results; the
//!   physical torque on an induced dipole is `d x E` in any frame.
//!
//! The sign is derived from the inertia once and exposed as
//! [`RigidBody::torque_sign`].

use nalgebra::Matrix3;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use thiserror::Error;

use super::params::BOLTZMANN;
use super::states::{NVec3, State};

#[derive(Debug, Error)]
pub enum BodyError {
    #[error("Invalid principal moments of inertia {0:?}: components must be finite and non-negative")]
    InvalidInertia([f64; 3]),

    #[error("Polarizability tensor must be finite")]
    InvalidPolarizability,

    #[error("Invalid initial state: {0}")]
    InvalidState(String),

    #[error("Temperature must be finite and non-negative, got {0} K")]
    InvalidTemperature(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RigidBody {
    inertia: NVec3, // principal moments (kg m^2)
    polarizability: Matrix3<f64>, // body frame (C m^2 / V)
    trajectory: Vec<State>, // time ordered, [0] = initial condition
}

impl RigidBody {
    /// Build a fresh body from its physical properties and an explicit
    /// initial state.
    pub fn from_physical_properties(
        inertia: NVec3,
        polarizability: Matrix3<f64>,
        initial: State,
    ) -> Result<Self, BodyError> {
        if inertia.iter().any(|i| !i.is_finite() || *i < 0.0) {
            return Err(BodyError::InvalidInertia([inertia.x, inertia.y, inertia.z]));
        }
        if polarizability.iter().any(|p| !p.is_finite()) {
            return Err(BodyError::InvalidPolarizability);
        }
        check_state(&initial)?;

        Ok(Self {
            inertia,
            polarizability,
            trajectory: vec![initial],
        })
    }

    /// Copy this body. `None` keeps the whole trajectory, `Some(state)`
    /// starts the copy over from `state`.
    pub fn clone_with(&self, initial: Option<State>) -> Result<Self, BodyError> {
        match initial {
            None => Ok(self.clone()),
            Some(state) => {
                check_state(&state)?;
                Ok(Self {
                    inertia: self.inertia,
                    polarizability: self.polarizability,
                    trajectory: vec![state],
                })
            }
        }
    }

    pub fn inertia(&self) -> &NVec3 {
        &self.inertia
    }

    pub fn polarizability(&self) -> &Matrix3<f64> {
        &self.polarizability
    }

    pub fn trajectory(&self) -> &[State] {
        &self.trajectory
    }

    pub fn initial_state(&self) -> &State {
        &self.trajectory[0]
    }

    pub fn last_state(&self) -> &State {
        &self.trajectory[self.trajectory.len() - 1]
    }

    /// `+1` when the figure axis is body `z` (`I_c < I_a`), `-1` otherwise.
    pub fn torque_sign(&self) -> f64 {
        if self.inertia.z < self.inertia.x {
            1.0
        } else {
            -1.0
        }
    }

    /// Angular acceleration (body frame) under `field`, which must already be
    /// expressed in the body frame.
    ///
    /// Euler's equations for the principal axes, cyclic in (a, b, c):
    /// `alpha_a = (tau_a - (I_c - I_b) w_b w_c) / I_a`.
    /// An axis with zero moment of inertia gets zero acceleration.
    pub fn acceleration(&self, field: &NVec3, state: &State) -> NVec3 {
        let dipole = self.polarizability * field;
        let torque = self.torque_sign() * dipole.cross(field);
        let i = &self.inertia;
        let w = &state.angular_velocity;

        let euler = |tau: f64, i_a: f64, i_b: f64, i_c: f64, w_b: f64, w_c: f64| {
            if i_a == 0.0 {
                0.0
            } else {
                (tau - (i_c - i_b) * w_b * w_c) / i_a
            }
        };

        NVec3::new(
            euler(torque.x, i.x, i.y, i.z, w.y, w.z),
            euler(torque.y, i.y, i.z, i.x, w.z, w.x),
            euler(torque.z, i.z, i.x, i.y, w.x, w.y),
        )
    }

    /// Draw a random phase-space position at `temperature` (K):
    /// orientation uniform over SO(3), each angular-velocity component
    /// normal with variance `k_B T / I_axis`, exactly zero for axes
    /// with zero moment of inertia.
    pub fn sample_thermal_state<R: Rng + ?Sized>(
        &self,
        temperature: f64,
        time: f64,
        rng: &mut R,
    ) -> Result<State, BodyError> {
        if !temperature.is_finite() || temperature < 0.0 {
            return Err(BodyError::InvalidTemperature(temperature));
        }

        let orientation = uniform_quaternion(&mut *rng);
        let mut omega = NVec3::zeros();
        for axis in 0..3 {
            let z: f64 = StandardNormal.sample(&mut *rng);
            if self.inertia[axis] > 0.0 {
                omega[axis] = z * (BOLTZMANN * temperature / self.inertia[axis]).sqrt();
            }
        }

        Ok(State::new(orientation, omega, time))
    }

    /// Inertia and polarizability tensors rotated into the lab frame for
    /// orientation `state`: `R X R^T` with `R` the body -> lab rotation.
    pub fn lab_frame_tensors(&self, state: &State) -> (Matrix3<f64>, Matrix3<f64>) {
        let r = state.rotation().to_rotation_matrix().into_inner();
        let inertia = r * Matrix3::from_diagonal(&self.inertia) * r.transpose();
        let polarizability = r * self.polarizability * r.transpose();
        (inertia, polarizability)
    }

    /// Drop everything after the initial condition and move it to `time`.
    pub(crate) fn restart_at(&mut self, time: f64) {
        self.trajectory.truncate(1);
        self.trajectory[0].time = time;
    }

    pub(crate) fn record(&mut self, state: State) {
        self.trajectory.push(state);
    }

    /// Rebuild a body from persisted rows without re-running validation on
    /// every row; the properties are still checked.
    pub(crate) fn from_trajectory(
        inertia: NVec3,
        polarizability: Matrix3<f64>,
        trajectory: Vec<State>,
    ) -> Result<Self, BodyError> {
        let first = trajectory
            .first()
            .copied()
            .ok_or_else(|| BodyError::InvalidState("trajectory is empty".into()))?;
        let mut body = Self::from_physical_properties(inertia, polarizability, first)?;
        body.trajectory = trajectory;
        Ok(body)
    }
}

fn check_state(state: &State) -> Result<(), BodyError> {
    if !state.is_finite() {
        return Err(BodyError::InvalidState(format!("non-finite component in {state:?}")));
    }
    if state.orientation.norm() == 0.0 {
        return Err(BodyError::InvalidState("orientation quaternion is zero".into()));
    }
    Ok(())
}

/// Uniformly distributed unit quaternion (Shoemake's subgroup algorithm).
fn uniform_quaternion<R: Rng + ?Sized>(rng: &mut R) -> nalgebra::Quaternion<f64> {
    use std::f64::consts::TAU;

    let u1: f64 = rng.random();
    let u2: f64 = rng.random();
    let u3: f64 = rng.random();
    let a = (1.0 - u1).sqrt();
    let b = u1.sqrt();

    nalgebra::Quaternion::new(
        b * (TAU * u3).cos(),
        a * (TAU * u2).sin(),
        a * (TAU * u2).cos(),
        b * (TAU * u3).sin(),
    )
}
