use std::time::Instant;

use nalgebra::Matrix3;

use crate::simulation::body::RigidBody;
use crate::simulation::ensemble::Ensemble;
use crate::simulation::field::{Field, PeakStrength};
use crate::simulation::params::Parameters;
use crate::simulation::propagator::Propagator;
use crate::simulation::states::{NVec3, State};

/// OCS-like linear rotor used for timing runs
fn make_template() -> Option<RigidBody> {
    let alpha = 4.3118e-40;
    RigidBody::from_physical_properties(
        NVec3::new(1.3793e-45, 1.3793e-45, 0.0),
        Matrix3::from_diagonal(&NVec3::new(alpha, alpha, 1.9395 * alpha)),
        State::at_rest(-2.0e-12),
    )
    .ok()
}

/// 500 fs pulse at 1e13 W/cm^2 centered at 0
fn make_field() -> Option<Field> {
    Field::gaussian(PeakStrength::Intensity(1.0e17), 500.0e-15, 0.0).ok()
}

/// Milliseconds since `started`, NaN when the timed run failed
fn elapsed_ms<T, E>(started: Instant, result: &Result<T, E>) -> f64 {
    match result {
        Ok(_) => started.elapsed().as_secs_f64() * 1000.0,
        Err(_) => f64::NAN,
    }
}

/// Time ensemble propagation for growing ensemble sizes, once on a single
/// worker and once on all available workers.
/// Paste output directly into a spreadsheet to graph
pub fn bench_propagation() {
    let (Some(template), Some(field)) = (make_template(), make_field()) else {
        println!("bench_propagation: failed to build benchmark body or field");
        return;
    };

    println!("N,serial_ms,parallel_ms,steps_per_body");

    for n in [16, 32, 64, 128, 256, 512] {
        let base = match Ensemble::seeded(n, &template, 2.0, -2.0e-12, 42) {
            Ok(e) => e,
            Err(e) => {
                println!("bench_propagation: {e}");
                return;
            }
        };

        let mut params = Parameters::new((-2.0e-12, 5.0e-12), 100.0e-15);
        params.threads = Some(1);
        let serial = Propagator::new(params.clone());
        params.threads = None;
        let parallel = Propagator::new(params);
        let (Ok(serial), Ok(parallel)) = (serial, parallel) else {
            println!("bench_propagation: invalid benchmark parameters");
            return;
        };

        // Single worker
        let mut ens_serial = base.clone();
        let t0 = Instant::now();
        let report = serial.run(&mut ens_serial, &field);
        let ms_serial = elapsed_ms(t0, &report);

        // All workers
        let mut ens_parallel = base.clone();
        let t1 = Instant::now();
        let ms_parallel = elapsed_ms(t1, &parallel.run(&mut ens_parallel, &field));

        let steps = report
            .map(|r| r.outcomes.iter().map(|o| o.steps).sum::<usize>() as f64 / n as f64)
            .unwrap_or(f64::NAN);

        println!("{},{:.3},{:.3},{:.1}", n, ms_serial, ms_parallel, steps);
    }
}
