//! Thermal ensemble of identical rigid bodies
//!
//! Every body shares the template's inertia and polarizability; only the
//! initial phase-space position differs. The ensemble also remembers the
//! field it was last propagated in, so that the persisted file describes
//! the whole run.

use std::path::Path;

use nalgebra::Matrix3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::body::{BodyError, RigidBody};
use super::field::Field;
use super::states::NVec3;
use crate::storage::store::{self, StorageError};

#[derive(Debug, Clone)]
pub struct Ensemble {
    bodies: Vec<RigidBody>,
    inertia: NVec3, // shared by all bodies
    polarizability: Matrix3<f64>, // shared by all bodies
    temperature: f64, // K
    reference_time: f64, // time of the initial conditions (s)
    field: Option<Field>, // set by the propagator
}

impl Ensemble {
    /// Sample `size` bodies from `template` at `temperature`, with initial
    /// conditions stamped at `time`.
    pub fn new<R: Rng + ?Sized>(
        size: usize,
        template: &RigidBody,
        temperature: f64,
        time: f64,
        rng: &mut R,
    ) -> Result<Self, BodyError> {
        // checked here as well so that an empty ensemble rejects it too
        if !temperature.is_finite() || temperature < 0.0 {
            return Err(BodyError::InvalidTemperature(temperature));
        }

        let bodies = (0..size)
            .map(|_| {
                let state = template.sample_thermal_state(temperature, time, &mut *rng)?;
                template.clone_with(Some(state))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            bodies,
            inertia: *template.inertia(),
            polarizability: *template.polarizability(),
            temperature,
            reference_time: time,
            field: None,
        })
    }

    /// Same as [`Ensemble::new`] with a `StdRng` seeded from `seed`.
    pub fn seeded(
        size: usize,
        template: &RigidBody,
        temperature: f64,
        time: f64,
        seed: u64,
    ) -> Result<Self, BodyError> {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::new(size, template, temperature, time, &mut rng)
    }

    /// Reassemble an ensemble from already validated parts (used by the store).
    pub(crate) fn from_parts(
        bodies: Vec<RigidBody>,
        inertia: NVec3,
        polarizability: Matrix3<f64>,
        temperature: f64,
        reference_time: f64,
        field: Option<Field>,
    ) -> Self {
        Self {
            bodies,
            inertia,
            polarizability,
            temperature,
            reference_time,
            field,
        }
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RigidBody> {
        self.bodies.iter()
    }

    pub fn bodies(&self) -> &[RigidBody] {
        &self.bodies
    }

    pub fn inertia(&self) -> &NVec3 {
        &self.inertia
    }

    pub fn polarizability(&self) -> &Matrix3<f64> {
        &self.polarizability
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn reference_time(&self) -> f64 {
        self.reference_time
    }

    /// Field of the last propagation, if any.
    pub fn field(&self) -> Option<&Field> {
        self.field.as_ref()
    }

    /// Write all trajectories and the shared metadata to `path`.
    pub fn save(&self, path: &Path) -> Result<(), StorageError> {
        store::save(self, path)
    }

    /// Read an ensemble written by [`Ensemble::save`].
    pub fn load(path: &Path) -> Result<Self, StorageError> {
        store::load(path)
    }

    /// Hand the bodies to the propagator. They come back through
    /// [`Ensemble::restore_bodies`] in the same order.
    pub(crate) fn take_bodies(&mut self) -> Vec<RigidBody> {
        std::mem::take(&mut self.bodies)
    }

    /// `start` is the time the initial conditions were moved to.
    pub(crate) fn restore_bodies(&mut self, bodies: Vec<RigidBody>, field: Field, start: f64) {
        self.bodies = bodies;
        self.field = Some(field);
        self.reference_time = start;
    }
}

impl<'a> IntoIterator for &'a Ensemble {
    type Item = &'a RigidBody;
    type IntoIter = std::slice::Iter<'a, RigidBody>;

    fn into_iter(self) -> Self::IntoIter {
        self.bodies.iter()
    }
}
