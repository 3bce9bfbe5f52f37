pub mod simulation;
pub mod configuration;
pub mod storage;
pub mod benchmark;

pub use simulation::states::{State, NVec3, PhaseVector};
pub use simulation::params::{Parameters, BOLTZMANN, SPEED_OF_LIGHT, VACUUM_PERMITTIVITY};
pub use simulation::field::{Field, FieldError, FieldShape, PeakStrength, intensity_to_amplitude, amplitude_to_intensity};
pub use simulation::body::{RigidBody, BodyError};
pub use simulation::ensemble::Ensemble;
pub use simulation::integrator::{Dopri5, IntegrationError};
pub use simulation::propagator::{propagate, derivative, Propagator, PropagationReport, PropagationError, BodyOutcome, BodyStatus, TruncationReason};
pub use simulation::scenario::{Scenario, ScenarioError};

pub use configuration::config::{ScenarioConfig, BodyConfig, FieldConfig, EnsembleConfig, PropagationConfig, OutputConfig};

pub use storage::store::StorageError;

pub use benchmark::benchmark::bench_propagation;
