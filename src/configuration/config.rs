//! Configuration types for loading rotation scenarios from YAML.
//!
//! This module defines a thin, `serde`-deserializable representation of a
//! scenario. A scenario consists of:
//!
//! - [`BodyConfig`]        – principal moments of inertia and polarizability
//! - [`FieldConfig`]       – the driving field (Gaussian pulse, tabulated, dc window)
//! - [`EnsembleConfig`]    – ensemble size, temperature and random seed
//! - [`PropagationConfig`] – time range, save interval, tolerances and budgets
//! - [`OutputConfig`]      – where the propagated ensemble is written
//! - [`ScenarioConfig`]    – top-level wrapper used to load a scenario from YAML
//!
//! # YAML format
//! OCS impulsive alignment, all values in SI units:
//!
//! ```yaml
//! body:
//!   inertia: [1.3793e-45, 1.3793e-45, 0.0]      # kg m^2
//!   polarizability:                               # C m^2 / V
//!     - [4.3118e-40, 0.0, 0.0]
//!     - [0.0, 4.3118e-40, 0.0]
//!     - [0.0, 0.0, 8.3631e-40]
//!
//! field:
//!   kind: gaussian          # or "tabulated" (file) or "dc" (start, end, value)
//!   peak_intensity: 1.0e17  # W/m^2, or peak_amplitude in V/m
//!   fwhm: 500.0e-15
//!   t_peak: 0.0
//!   direction: [0.0, 0.0, 1.0]
//!
//! ensemble:
//!   size: 1000
//!   temperature: 2.0        # K
//!   seed: 42
//!
//! propagation:
//!   t_start: -10.0e-12
//!   t_end: 40.0e-12
//!   save_interval: 250.0e-15
//!   rtol: 1.0e-8
//!   atol: 1.0e-10
//!
//! output:
//!   path: "ocs_impulsive.json"
//! ```
//!
//! The scenario builder then maps this configuration into the runtime types.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Physical properties shared by every body of the ensemble
#[derive(Deserialize, Debug, Clone)]
pub struct BodyConfig {
    pub inertia: [f64; 3], // principal moments of inertia (kg m^2), zero for a linear top axis
    pub polarizability: [[f64; 3]; 3], // body-frame tensor, row major (C m^2 / V)
}

/// Driving field
/// kind: "gaussian" | "tabulated" | "dc"
#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldConfig {
    Gaussian {
        peak_amplitude: Option<f64>, // V/m
        peak_intensity: Option<f64>, // W/m^2
        fwhm: f64, // s
        #[serde(default)]
        t_peak: f64, // s
        direction: Option<[f64; 3]>,
    },
    Tabulated {
        file: PathBuf, // two columns `time value`, relative to the scenario file
        direction: Option<[f64; 3]>,
    },
    Dc {
        start: f64, // s
        end: f64, // s
        value: f64, // V/m
        direction: Option<[f64; 3]>,
    },
}

/// Thermal ensemble
#[derive(Deserialize, Debug, Clone)]
pub struct EnsembleConfig {
    pub size: usize, // number of bodies
    pub temperature: f64, // K
    pub seed: Option<u64>, // fixed seed for reproducible runs, random when absent
}

/// Time grid and integrator settings
#[derive(Deserialize, Debug, Clone)]
pub struct PropagationConfig {
    pub t_start: f64, // s
    pub t_end: f64, // s
    pub save_interval: f64, // s
    pub rtol: Option<f64>,
    pub atol: Option<f64>,
    pub max_steps_per_interval: Option<usize>,
    pub max_steps_per_body: Option<usize>,
    pub max_wall_seconds: Option<f64>, // per body
    pub threads: Option<usize>,
    pub norm_tolerance: Option<f64>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_output_path")]
    pub path: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: default_output_path(),
        }
    }
}

fn default_output_path() -> PathBuf {
    PathBuf::from("ensemble.json")
}

/// Top-level scenario configuration loaded from YAML.
#[derive(Deserialize, Debug, Clone)]
pub struct ScenarioConfig {
    pub body: BodyConfig,
    pub field: FieldConfig,
    pub ensemble: EnsembleConfig,
    pub propagation: PropagationConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl ScenarioConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    pub fn from_yaml_file(path: &Path) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        Ok(serde_yaml::from_reader(reader)?)
    }
}
