pub mod states;
pub mod params;
pub mod field;
pub mod body;
pub mod ensemble;
pub mod integrator;
pub mod propagator;
pub mod scenario;
