//! Build fully-initialized simulation scenarios from configuration
//!
//! Takes a `ScenarioConfig` (YAML-facing) and produces a runtime `Scenario`
//! containing:
//! - propagation parameters (`Parameters`)
//! - the sampled ensemble (`Ensemble`, bodies at `t_start`)
//! - the driving field (`Field`)
//!
//! and runs it through the `Propagator`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use nalgebra::Matrix3;
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;

use crate::configuration::config::{FieldConfig, ScenarioConfig};
use crate::simulation::body::{BodyError, RigidBody};
use crate::simulation::ensemble::Ensemble;
use crate::simulation::field::{Field, FieldError, PeakStrength};
use crate::simulation::params::Parameters;
use crate::simulation::propagator::{PropagationError, PropagationReport, Propagator};
use crate::simulation::states::{NVec3, State};

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error(transparent)]
    Field(#[from] FieldError),

    #[error(transparent)]
    Body(#[from] BodyError),

    #[error(transparent)]
    Propagation(#[from] PropagationError),
}

/// Fully-initialized scenario, ready to run.
#[derive(Debug)]
pub struct Scenario {
    pub parameters: Parameters,
    pub ensemble: Ensemble,
    pub field: Field,
    pub output: PathBuf,
}

impl Scenario {
    /// Build a scenario. Relative paths in `cfg` (field file, output) are
    /// resolved against `base_dir`, normally the scenario file's directory.
    pub fn build_scenario(cfg: ScenarioConfig, base_dir: &Path) -> Result<Self, ScenarioError> {
        // Parameters (runtime) from PropagationConfig
        let p_cfg = &cfg.propagation;
        let mut parameters = Parameters::new((p_cfg.t_start, p_cfg.t_end), p_cfg.save_interval);
        if let Some(rtol) = p_cfg.rtol {
            parameters.rtol = rtol;
        }
        if let Some(atol) = p_cfg.atol {
            parameters.atol = atol;
        }
        if let Some(n) = p_cfg.max_steps_per_interval {
            parameters.max_steps_per_interval = n;
        }
        parameters.max_steps_per_body = p_cfg.max_steps_per_body;
        if let Some(secs) = p_cfg.max_wall_seconds {
            parameters.max_wall_time = Some(Duration::try_from_secs_f64(secs).map_err(|e| {
                PropagationError::InvalidParameter(format!("max_wall_seconds = {secs}: {e}"))
            })?);
        }
        parameters.threads = p_cfg.threads;
        if let Some(tol) = p_cfg.norm_tolerance {
            parameters.norm_tolerance = tol;
        }
        parameters.validate()?;

        let field = build_field(&cfg.field, base_dir)?;

        // Template body: rest state at the range start, replaced by thermal samples
        let b = &cfg.body;
        let p = b.polarizability;
        let template = RigidBody::from_physical_properties(
            NVec3::from(b.inertia),
            Matrix3::new(
                p[0][0], p[0][1], p[0][2],
                p[1][0], p[1][1], p[1][2],
                p[2][0], p[2][1], p[2][2],
            ),
            State::at_rest(parameters.t_start),
        )?;

        let e_cfg = &cfg.ensemble;
        let mut rng = match e_cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let ensemble = Ensemble::new(
            e_cfg.size,
            &template,
            e_cfg.temperature,
            parameters.t_start,
            &mut rng,
        )?;

        debug!(
            "scenario: {} bodies at {} K, field {:?}",
            ensemble.len(),
            ensemble.temperature(),
            field.shape()
        );

        Ok(Self {
            parameters,
            ensemble,
            field,
            output: base_dir.join(&cfg.output.path),
        })
    }

    /// Propagate the ensemble in place.
    pub fn run(&mut self) -> Result<PropagationReport, ScenarioError> {
        let propagator = Propagator::new(self.parameters.clone())?;
        Ok(propagator.run(&mut self.ensemble, &self.field)?)
    }
}

fn build_field(cfg: &FieldConfig, base_dir: &Path) -> Result<Field, FieldError> {
    let (field, direction) = match cfg {
        FieldConfig::Gaussian {
            peak_amplitude,
            peak_intensity,
            fwhm,
            t_peak,
            direction,
        } => {
            let strength = match (peak_amplitude, peak_intensity) {
                (Some(a), None) => PeakStrength::Amplitude(*a),
                (None, Some(i)) => PeakStrength::Intensity(*i),
                _ => return Err(FieldError::AmbiguousStrength),
            };
            (Field::gaussian(strength, *fwhm, *t_peak)?, direction)
        }
        FieldConfig::Tabulated { file, direction } => {
            (Field::from_file(&base_dir.join(file))?, direction)
        }
        FieldConfig::Dc {
            start,
            end,
            value,
            direction,
        } => (Field::window(*start, *end, *value)?, direction),
    };

    match direction {
        Some(d) => field.with_direction(NVec3::from(*d)),
        None => Ok(field),
    }
}
