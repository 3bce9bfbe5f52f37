//! Core state types for the rotational simulation.
//!
//! Defines the phase-space point of a rigid body:
//! - `State` holds orientation quaternion, angular velocity and time
//! - `PhaseVector` is the flat 7-component form handed to the integrator
//!   (`[w, i, j, k, omega_x, omega_y, omega_z]`)

use nalgebra::{Quaternion, SVector, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

pub type NVec3 = Vector3<f64>;
pub type PhaseVector = SVector<f64, 7>;

/// Phase-space position of a rigid body.
///
/// The orientation rotates body-frame vectors into the lab frame. It is kept
/// as a plain quaternion rather than a `UnitQuaternion` because the
/// integrator returns it unnormalized; its norm is the quantity checked for
/// drift (see [`State::norm_drift`]).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub orientation: Quaternion<f64>, // body -> lab rotation
    pub angular_velocity: NVec3, // body frame (rad/s)
    pub time: f64, // seconds
}

impl State {
    pub fn new(orientation: Quaternion<f64>, angular_velocity: NVec3, time: f64) -> Self {
        Self {
            orientation,
            angular_velocity,
            time,
        }
    }

    /// Body axes aligned with the lab axes, not rotating.
    pub fn at_rest(time: f64) -> Self {
        Self {
            orientation: Quaternion::identity(),
            angular_velocity: NVec3::zeros(),
            time,
        }
    }

    /// Normalized orientation, used whenever a rotation is applied.
    pub fn rotation(&self) -> UnitQuaternion<f64> {
        UnitQuaternion::from_quaternion(self.orientation)
    }

    /// Distance of the orientation norm from 1.
    pub fn norm_drift(&self) -> f64 {
        (self.orientation.norm() - 1.0).abs()
    }

    /// Flatten into the integrator layout.
    pub fn to_phase(&self) -> PhaseVector {
        let q = &self.orientation;
        let w = &self.angular_velocity;
        PhaseVector::from_column_slice(&[q.w, q.i, q.j, q.k, w.x, w.y, w.z])
    }

    /// Rebuild a state from the integrator layout at time `time`.
    pub fn from_phase(y: &PhaseVector, time: f64) -> Self {
        Self {
            orientation: Quaternion::new(y[0], y[1], y[2], y[3]),
            angular_velocity: NVec3::new(y[4], y[5], y[6]),
            time,
        }
    }

    /// One persisted table row: `r i j k omega_x omega_y omega_z time`.
    pub fn to_row(&self) -> [f64; 8] {
        let q = &self.orientation;
        let w = &self.angular_velocity;
        [q.w, q.i, q.j, q.k, w.x, w.y, w.z, self.time]
    }

    pub fn from_row(row: &[f64; 8]) -> Self {
        Self {
            orientation: Quaternion::new(row[0], row[1], row[2], row[3]),
            angular_velocity: NVec3::new(row[4], row[5], row[6]),
            time: row[7],
        }
    }

    pub fn is_finite(&self) -> bool {
        self.to_row().iter().all(|x| x.is_finite())
    }
}
