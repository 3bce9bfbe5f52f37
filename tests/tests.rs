use rotsim::{
    amplitude_to_intensity, intensity_to_amplitude, propagate, BodyError, BodyStatus, Ensemble,
    Field, FieldError, FieldShape, NVec3, Parameters, PeakStrength, PropagationError, Propagator,
    RigidBody, Scenario, ScenarioConfig, ScenarioError, State, StorageError, TruncationReason,
    BOLTZMANN,
};

use approx::assert_relative_eq;
use nalgebra::{Matrix3, Quaternion, UnitQuaternion};
use rand::rngs::StdRng;
use rand::SeedableRng;

use std::io::Write;
use std::path::Path;
use std::time::Duration;

const OCS_INERTIA: f64 = 1.3793e-45;
const OCS_ALPHA_PERP: f64 = 4.3118e-40;
const OCS_ALPHA_PAR: f64 = 8.3631e-40;

/// OCS-like linear top at rest: figure axis along body z, I_z = 0
pub fn linear_top(time: f64) -> RigidBody {
    RigidBody::from_physical_properties(
        NVec3::new(OCS_INERTIA, OCS_INERTIA, 0.0),
        Matrix3::from_diagonal(&NVec3::new(OCS_ALPHA_PERP, OCS_ALPHA_PERP, OCS_ALPHA_PAR)),
        State::at_rest(time),
    )
    .unwrap()
}

/// Spherical top with an isotropic polarizability
pub fn spherical_top(time: f64) -> RigidBody {
    RigidBody::from_physical_properties(
        NVec3::repeat(OCS_INERTIA),
        Matrix3::from_diagonal(&NVec3::repeat(OCS_ALPHA_PERP)),
        State::at_rest(time),
    )
    .unwrap()
}

/// Asymmetric top, all three moments and polarizabilities distinct
pub fn asymmetric_top(time: f64) -> RigidBody {
    RigidBody::from_physical_properties(
        NVec3::new(1.0e-45, 2.0e-45, 3.0e-45),
        Matrix3::from_diagonal(&NVec3::new(3.0e-40, 4.0e-40, 6.0e-40)),
        State::at_rest(time),
    )
    .unwrap()
}

pub fn zero_field() -> Field {
    Field::gaussian(PeakStrength::Amplitude(0.0), 500.0e-15, 0.0).unwrap()
}

/// 500 fs pulse at 1e12 W/cm^2 peaking at t = 0
pub fn ocs_pulse() -> Field {
    Field::gaussian(PeakStrength::Intensity(1.0e16), 500.0e-15, 0.0).unwrap()
}

fn write_file(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    path
}

fn assert_quaternion_close(a: &Quaternion<f64>, b: &Quaternion<f64>, eps: f64) {
    assert!(
        (a - b).norm() < eps,
        "quaternions differ by {:e}: {:?} vs {:?}",
        (a - b).norm(),
        a,
        b
    );
}

// ==================================================================================
// Field tests
// ==================================================================================

#[test]
fn gaussian_peaks_at_t_peak() {
    let field = Field::gaussian(PeakStrength::Amplitude(2.0e9), 100.0e-15, 50.0e-15).unwrap();
    assert_relative_eq!(field.evaluate(50.0e-15).unwrap(), 2.0e9);
    assert!(field.evaluate(0.0).unwrap() < 2.0e9);
}

#[test]
fn gaussian_is_at_half_maximum_one_half_fwhm_away() {
    let fwhm = 300.0e-15;
    let field = Field::gaussian(PeakStrength::Amplitude(1.0), fwhm, 0.0).unwrap();
    assert_relative_eq!(field.evaluate(0.5 * fwhm).unwrap(), 0.5, max_relative = 1e-12);
    assert_relative_eq!(field.evaluate(-0.5 * fwhm).unwrap(), 0.5, max_relative = 1e-12);
}

#[test]
fn gaussian_from_intensity_matches_amplitude() {
    let intensity = 1.0e17;
    let from_intensity = Field::gaussian(PeakStrength::Intensity(intensity), 1.0e-12, 0.0).unwrap();
    let amplitude = intensity_to_amplitude(intensity);
    // 1e13 W/cm^2 is roughly 8.7 GV/m
    assert!(amplitude > 8.6e9 && amplitude < 8.8e9, "amplitude {amplitude:e}");
    assert_relative_eq!(from_intensity.evaluate(0.0).unwrap(), amplitude);
    assert_relative_eq!(amplitude_to_intensity(amplitude), intensity, max_relative = 1e-12);
}

#[test]
fn gaussian_rejects_bad_width() {
    let result = Field::gaussian(PeakStrength::Amplitude(1.0), 0.0, 0.0);
    assert!(matches!(result, Err(FieldError::InvalidParameter(_))));
    let result = Field::gaussian(PeakStrength::Intensity(-1.0), 1.0, 0.0);
    assert!(matches!(result, Err(FieldError::InvalidParameter(_))));
}

#[test]
fn tabulated_interpolates_linearly() {
    let field = Field::tabulated(vec![(0.0, 0.0), (1.0, 10.0), (3.0, 30.0)]).unwrap();
    assert_relative_eq!(field.evaluate(0.0).unwrap(), 0.0);
    assert_relative_eq!(field.evaluate(0.25).unwrap(), 2.5);
    assert_relative_eq!(field.evaluate(1.0).unwrap(), 10.0);
    assert_relative_eq!(field.evaluate(2.0).unwrap(), 20.0);
    assert_relative_eq!(field.evaluate(3.0).unwrap(), 30.0);
}

#[test]
fn tabulated_fails_outside_samples() {
    let field = Field::tabulated(vec![(0.0, 1.0), (1.0, 2.0)]).unwrap();
    assert!(matches!(field.evaluate(-0.1), Err(FieldError::OutOfDomain { .. })));
    assert!(matches!(field.evaluate(1.1), Err(FieldError::OutOfDomain { .. })));
}

#[test]
fn tabulated_rejects_unsorted_or_short_tables() {
    assert!(Field::tabulated(vec![(0.0, 1.0)]).is_err());
    assert!(Field::tabulated(vec![(0.0, 1.0), (0.0, 2.0)]).is_err());
    assert!(Field::tabulated(vec![(1.0, 1.0), (0.0, 2.0)]).is_err());
}

#[test]
fn field_file_skips_comments_and_blank_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(
        dir.path(),
        "pulse.dat",
        "# time value\n0.0 1.0\n\n1.0e-12 3.0  # peak\n2.0e-12 1.0\n",
    );

    let field = Field::from_file(&path).unwrap();
    assert_relative_eq!(field.evaluate(0.5e-12).unwrap(), 2.0);
    match field.shape() {
        FieldShape::Tabulated { times, .. } => assert_eq!(times.len(), 3),
        other => panic!("expected a tabulated field, got {other:?}"),
    }
}

#[test]
fn field_file_reports_malformed_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "bad.dat", "0.0 1.0\n1.0 abc\n");
    assert!(matches!(
        Field::from_file(&path),
        Err(FieldError::Parse { line: 2, .. })
    ));

    let missing = dir.path().join("missing.dat");
    assert!(matches!(Field::from_file(&missing), Err(FieldError::Io { .. })));
}

#[test]
fn window_is_constant_inside_and_zero_outside() {
    let field = Field::window(1.0, 2.0, 5.0).unwrap();
    assert_eq!(field.evaluate(0.5).unwrap(), 0.0);
    assert_eq!(field.evaluate(1.0).unwrap(), 5.0);
    assert_eq!(field.evaluate(1.5).unwrap(), 5.0);
    assert_eq!(field.evaluate(2.0).unwrap(), 5.0);
    assert_eq!(field.evaluate(2.5).unwrap(), 0.0);
    assert!(Field::window(2.0, 1.0, 5.0).is_err());
}

#[test]
fn field_direction_is_normalized_and_rotated() {
    let field = Field::window(0.0, 1.0, 2.0)
        .unwrap()
        .with_direction(NVec3::new(0.0, 3.0, 0.0))
        .unwrap();
    assert_relative_eq!(*field.direction(), NVec3::y());

    // quarter turn about z takes y to -x
    let rot = UnitQuaternion::from_axis_angle(&NVec3::z_axis(), std::f64::consts::FRAC_PI_2);
    let e = field.vector_at(0.5, &rot).unwrap();
    assert_relative_eq!(e, NVec3::new(-2.0, 0.0, 0.0), epsilon = 1e-12);

    assert!(zero_field().with_direction(NVec3::zeros()).is_err());
}

// ==================================================================================
// Body tests
// ==================================================================================

#[test]
fn body_rejects_invalid_properties() {
    let pol = Matrix3::identity();
    assert!(matches!(
        RigidBody::from_physical_properties(NVec3::new(-1.0, 1.0, 1.0), pol, State::at_rest(0.0)),
        Err(BodyError::InvalidInertia(_))
    ));

    let mut bad_pol = pol;
    bad_pol[(0, 1)] = f64::NAN;
    assert!(matches!(
        RigidBody::from_physical_properties(NVec3::repeat(1.0), bad_pol, State::at_rest(0.0)),
        Err(BodyError::InvalidPolarizability)
    ));

    let zero_q = State::new(Quaternion::new(0.0, 0.0, 0.0, 0.0), NVec3::zeros(), 0.0);
    assert!(matches!(
        RigidBody::from_physical_properties(NVec3::repeat(1.0), pol, zero_q),
        Err(BodyError::InvalidState(_))
    ));
}

#[test]
fn clone_with_new_state_starts_a_fresh_trajectory() {
    let body = linear_top(0.0);
    let state = State::new(Quaternion::new(0.0, 1.0, 0.0, 0.0), NVec3::new(1.0, 2.0, 0.0), 3.0);

    let copy = body.clone_with(Some(state)).unwrap();
    assert_eq!(copy.trajectory().len(), 1);
    assert_eq!(*copy.initial_state(), state);
    assert_eq!(copy.inertia(), body.inertia());
    assert_eq!(copy.polarizability(), body.polarizability());

    let same = body.clone_with(None).unwrap();
    assert_eq!(same, body);
}

#[test]
fn torque_sign_follows_figure_axis() {
    assert_eq!(linear_top(0.0).torque_sign(), 1.0);
    assert_eq!(spherical_top(0.0).torque_sign(), -1.0);
}

#[test]
fn field_along_principal_axis_exerts_no_torque() {
    let body = asymmetric_top(0.0);
    let state = State::at_rest(0.0);
    for axis in [NVec3::x(), NVec3::y(), NVec3::z()] {
        let alpha = body.acceleration(&(axis * 1.0e9), &state);
        assert_eq!(alpha, NVec3::zeros());
    }
}

#[test]
fn tilted_linear_top_is_torqued_about_perpendicular_axis() {
    let body = linear_top(0.0);
    let state = State::at_rest(0.0);
    let e = NVec3::new(1.0, 0.0, 1.0) * 1.0e9;

    let alpha = body.acceleration(&e, &state);
    let expected = (OCS_ALPHA_PAR - OCS_ALPHA_PERP) * 1.0e18 / OCS_INERTIA;
    assert_eq!(alpha.x, 0.0);
    assert_relative_eq!(alpha.y, expected, max_relative = 1e-12);
    // zero moment of inertia about the figure axis
    assert_eq!(alpha.z, 0.0);
}

#[test]
fn free_asymmetric_top_feels_gyroscopic_coupling() {
    let body = asymmetric_top(0.0);
    let state = State::new(Quaternion::identity(), NVec3::new(1.0, 2.0, 3.0), 0.0);
    let alpha = body.acceleration(&NVec3::zeros(), &state);

    let i = body.inertia();
    assert_relative_eq!(alpha.x, -(i.z - i.y) * 2.0 * 3.0 / i.x, max_relative = 1e-12);
    assert_relative_eq!(alpha.y, -(i.x - i.z) * 3.0 * 1.0 / i.y, max_relative = 1e-12);
    assert_relative_eq!(alpha.z, -(i.y - i.x) * 1.0 * 2.0 / i.z, max_relative = 1e-12);
}

#[test]
fn thermal_samples_have_unit_quaternions_and_thermal_spread() {
    let body = linear_top(0.0);
    let temperature = 10.0;
    let mut rng = StdRng::seed_from_u64(2024);

    let n = 20_000;
    let mut sum_sq = NVec3::zeros();
    for _ in 0..n {
        let s = body.sample_thermal_state(temperature, 1.5, &mut rng).unwrap();
        assert_relative_eq!(s.orientation.norm(), 1.0, epsilon = 1e-12);
        assert_eq!(s.time, 1.5);
        assert_eq!(s.angular_velocity.z, 0.0);
        sum_sq += s.angular_velocity.component_mul(&s.angular_velocity);
    }

    let expected = BOLTZMANN * temperature / OCS_INERTIA;
    assert_relative_eq!(sum_sq.x / n as f64, expected, max_relative = 0.05);
    assert_relative_eq!(sum_sq.y / n as f64, expected, max_relative = 0.05);
}

#[test]
fn zero_temperature_samples_are_at_rest() {
    let body = spherical_top(0.0);
    let mut rng = StdRng::seed_from_u64(1);
    let s = body.sample_thermal_state(0.0, 0.0, &mut rng).unwrap();
    assert_eq!(s.angular_velocity, NVec3::zeros());

    assert!(matches!(
        body.sample_thermal_state(-1.0, 0.0, &mut rng),
        Err(BodyError::InvalidTemperature(_))
    ));
}

#[test]
fn lab_frame_tensors_rotate_figure_axis() {
    let body = linear_top(0.0);
    // body z -> lab x
    let rot = UnitQuaternion::from_axis_angle(&NVec3::y_axis(), std::f64::consts::FRAC_PI_2);
    let state = State::new(*rot.quaternion(), NVec3::zeros(), 0.0);

    let (inertia, pol) = body.lab_frame_tensors(&state);
    assert_relative_eq!(pol[(0, 0)], OCS_ALPHA_PAR, max_relative = 1e-12);
    assert_relative_eq!(pol[(2, 2)], OCS_ALPHA_PERP, max_relative = 1e-12);
    assert_relative_eq!(inertia[(0, 0)], 0.0, epsilon = 1e-60);
    assert_relative_eq!(inertia[(2, 2)], OCS_INERTIA, max_relative = 1e-12);
    assert_relative_eq!(pol.trace(), body.polarizability().trace(), max_relative = 1e-12);
}

// ==================================================================================
// Ensemble tests
// ==================================================================================

#[test]
fn ensemble_shares_properties_and_sizes() {
    let template = linear_top(-1.0e-12);
    let ensemble = Ensemble::seeded(25, &template, 2.0, -1.0e-12, 3).unwrap();

    assert_eq!(ensemble.len(), 25);
    assert_eq!(ensemble.iter().count(), 25);
    assert_eq!(ensemble.temperature(), 2.0);
    assert_eq!(ensemble.reference_time(), -1.0e-12);
    assert!(ensemble.field().is_none());
    for body in &ensemble {
        assert_eq!(body.inertia(), template.inertia());
        assert_eq!(body.polarizability(), template.polarizability());
        assert_eq!(body.trajectory().len(), 1);
        assert_eq!(body.initial_state().time, -1.0e-12);
    }
}

#[test]
fn ensemble_sampling_is_reproducible_from_seed() {
    let template = asymmetric_top(0.0);
    let a = Ensemble::seeded(10, &template, 5.0, 0.0, 99).unwrap();
    let b = Ensemble::seeded(10, &template, 5.0, 0.0, 99).unwrap();
    let c = Ensemble::seeded(10, &template, 5.0, 0.0, 100).unwrap();

    assert_eq!(a.bodies(), b.bodies());
    assert_ne!(a.bodies(), c.bodies());
}

#[test]
fn empty_ensemble_is_allowed() {
    let ensemble = Ensemble::seeded(0, &linear_top(0.0), 1.0, 0.0, 0).unwrap();
    assert!(ensemble.is_empty());
    assert!(Ensemble::seeded(0, &linear_top(0.0), f64::NAN, 0.0, 0).is_err());
}

// ==================================================================================
// Storage tests
// ==================================================================================

#[test]
fn saved_ensemble_loads_back_bit_for_bit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("ensemble.json");

    let mut ensemble = Ensemble::seeded(4, &linear_top(-1.0e-12), 2.0, -1.0e-12, 11).unwrap();
    propagate(&mut ensemble, &ocs_pulse(), (-1.0e-12, 1.0e-12), 2.5e-13).unwrap();
    ensemble.save(&path).unwrap();

    let loaded = Ensemble::load(&path).unwrap();
    assert_eq!(loaded.len(), ensemble.len());
    assert_eq!(loaded.inertia(), ensemble.inertia());
    assert_eq!(loaded.polarizability(), ensemble.polarizability());
    assert_eq!(loaded.temperature(), ensemble.temperature());
    assert_eq!(loaded.reference_time(), ensemble.reference_time());
    assert_eq!(loaded.field(), ensemble.field());
    for (a, b) in loaded.iter().zip(ensemble.iter()) {
        assert_eq!(a.trajectory(), b.trajectory());
    }
}

#[test]
fn load_rejects_missing_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(
        dir.path(),
        "broken.json",
        r#"{"tables": [{"name": "body0", "rows": [[1, 0, 0, 0, 0, 0, 0, 0]]}]}"#,
    );
    assert!(matches!(Ensemble::load(&path), Err(StorageError::Format(_))));
}

#[test]
fn load_rejects_body_count_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(
        dir.path(),
        "mismatch.json",
        r#"{
            "metadata": {
                "inertia": [1.0, 1.0, 0.0],
                "polarizability": [[1, 0, 0], [0, 1, 0], [0, 0, 2]],
                "temperature": 1.0,
                "reference_time": 0.0,
                "field": null,
                "bodies": 2,
                "columns": ["r", "i", "j", "k", "omega_x", "omega_y", "omega_z", "time"]
            },
            "tables": [{"name": "body0", "rows": [[1, 0, 0, 0, 0, 0, 0, 0]]}]
        }"#,
    );
    assert!(matches!(Ensemble::load(&path), Err(StorageError::Corrupt(_))));
}

#[test]
fn load_of_missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        Ensemble::load(&dir.path().join("nothing.json")),
        Err(StorageError::Io { .. })
    ));
}

// ==================================================================================
// Propagation tests
// ==================================================================================

#[test]
fn free_linear_top_keeps_spinning_at_constant_rate() {
    let t_end = 1.0e-9;
    let mut ensemble = Ensemble::seeded(8, &linear_top(0.0), 2.0, 0.0, 5).unwrap();
    let report = propagate(&mut ensemble, &zero_field(), (0.0, t_end), 1.0e-10).unwrap();
    assert!(report.is_complete());

    for body in &ensemble {
        let traj = body.trajectory();
        assert_eq!(traj.len(), 11);
        assert_eq!(traj[0].time, 0.0);
        assert_eq!(traj[10].time, t_end);

        let w0 = traj[0].angular_velocity;
        for s in traj {
            assert_relative_eq!(s.angular_velocity, w0, max_relative = 1e-12);
        }
    }
}

#[test]
fn free_rotation_matches_closed_form() {
    let mut params = Parameters::new((0.0, 1.0e-9), 1.0e-10);
    params.rtol = 1e-11;
    params.atol = 1e-13;
    let propagator = Propagator::new(params).unwrap();

    for template in [linear_top(0.0), spherical_top(0.0)] {
        let mut ensemble = Ensemble::seeded(4, &template, 2.0, 0.0, 17).unwrap();
        let report = propagator.run(&mut ensemble, &zero_field()).unwrap();
        assert!(report.is_complete());

        for body in &ensemble {
            let s0 = body.initial_state();
            let q0 = s0.rotation();
            for s in body.trajectory() {
                let expected = q0 * UnitQuaternion::from_scaled_axis(s0.angular_velocity * s.time);
                assert_quaternion_close(&s.orientation, expected.quaternion(), 1e-6);
                assert_relative_eq!(s.angular_velocity, s0.angular_velocity, max_relative = 1e-12);
            }
        }
    }
}

#[test]
fn zero_amplitude_pulse_equals_switched_off_window() {
    let template = linear_top(0.0);
    let mut a = Ensemble::seeded(3, &template, 2.0, 0.0, 8).unwrap();
    let mut b = a.clone();

    propagate(&mut a, &zero_field(), (0.0, 5.0e-11), 1.0e-11).unwrap();
    let off = Field::window(1.0, 2.0, 1.0e9).unwrap();
    propagate(&mut b, &off, (0.0, 5.0e-11), 1.0e-11).unwrap();

    for (x, y) in a.iter().zip(b.iter()) {
        assert_eq!(x.trajectory(), y.trajectory());
    }
}

#[test]
fn pulse_changes_rotation_and_keeps_norm() {
    let mut ensemble = Ensemble::seeded(6, &linear_top(-2.0e-12), 1.0, -2.0e-12, 21).unwrap();
    let field = ocs_pulse();
    let report = propagate(&mut ensemble, &field, (-2.0e-12, 3.0e-12), 1.0e-13).unwrap();

    assert!(report.is_complete());
    assert!(report.max_norm_drift() < 1e-6, "drift {:e}", report.max_norm_drift());
    assert_eq!(ensemble.field(), Some(&field));

    let kicked = ensemble.iter().any(|b| {
        let w0 = b.initial_state().angular_velocity.norm();
        let w1 = b.last_state().angular_velocity.norm();
        (w1 - w0).abs() > 1e-3 * w0.max(1.0)
    });
    assert!(kicked, "pulse left every body unchanged");

    for body in &ensemble {
        assert_eq!(body.trajectory().len(), 51);
        assert!(body.trajectory().iter().all(|s| s.angular_velocity.z == 0.0));
        assert!(body.trajectory().windows(2).all(|w| w[1].time > w[0].time));
    }
}

#[test]
fn repeated_propagation_restarts_from_initial_condition() {
    let mut ensemble = Ensemble::seeded(2, &linear_top(0.0), 2.0, 0.0, 4).unwrap();
    propagate(&mut ensemble, &zero_field(), (0.0, 1.0e-11), 1.0e-12).unwrap();
    let first: Vec<State> = ensemble.bodies()[0].trajectory().to_vec();

    propagate(&mut ensemble, &zero_field(), (0.0, 1.0e-11), 1.0e-12).unwrap();
    assert_eq!(ensemble.bodies()[0].trajectory(), first.as_slice());

    // new range: initial condition moves to the new start
    propagate(&mut ensemble, &zero_field(), (5.0e-12, 1.0e-11), 1.0e-12).unwrap();
    let traj = ensemble.bodies()[0].trajectory();
    assert_eq!(traj[0].time, 5.0e-12);
    assert_eq!(traj[0].orientation, first[0].orientation);
    assert_eq!(traj.len(), 6);
    assert_eq!(ensemble.reference_time(), 5.0e-12);
}

#[test]
fn saved_reference_time_matches_first_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shifted.json");

    let mut ensemble = Ensemble::seeded(3, &linear_top(0.0), 2.0, 0.0, 13).unwrap();
    propagate(&mut ensemble, &zero_field(), (5.0e-12, 1.0e-11), 1.0e-12).unwrap();
    ensemble.save(&path).unwrap();

    let loaded = Ensemble::load(&path).unwrap();
    assert_eq!(loaded.reference_time(), 5.0e-12);
    for body in &loaded {
        assert_eq!(body.initial_state().time, loaded.reference_time());
    }
}

#[test]
fn short_tabulated_field_truncates_bodies() {
    let field = Field::tabulated(vec![(0.0, 1.0e9), (5.0e-13, 1.0e9)]).unwrap();
    let mut ensemble = Ensemble::seeded(3, &linear_top(0.0), 2.0, 0.0, 12).unwrap();

    let report = propagate(&mut ensemble, &field, (0.0, 1.0e-12), 1.0e-13).unwrap();
    assert!(!report.is_complete());
    assert_eq!(report.truncated_indices(), vec![0, 1, 2]);
    assert_eq!(ensemble.len(), 3);

    for (outcome, body) in report.outcomes.iter().zip(ensemble.iter()) {
        match &outcome.status {
            BodyStatus::Truncated { last_time, reason } => {
                assert!(matches!(reason, TruncationReason::Integration(_)));
                assert_eq!(*last_time, body.last_state().time);
                assert!(*last_time <= 5.0e-13);
            }
            BodyStatus::Completed => panic!("body {} should have been truncated", outcome.index),
        }
        assert!(body.trajectory().len() >= 5 && body.trajectory().len() < 11);
    }
}

#[test]
fn truncated_body_does_not_stop_the_others() {
    let propagator = Propagator::new(Parameters::new((0.0, 1.0e-12), 1.0e-13)).unwrap();
    let long = Field::tabulated(vec![(0.0, 1.0e9), (1.0e-12, 1.0e9)]).unwrap();
    let short = Field::tabulated(vec![(0.0, 1.0e9), (3.0e-13, 1.0e9)]).unwrap();

    let mut rng = StdRng::seed_from_u64(31);
    let template = linear_top(0.0);
    let state = template.sample_thermal_state(2.0, 0.0, &mut rng).unwrap();
    let mut a = template.clone_with(Some(state)).unwrap();
    let mut b = template.clone_with(Some(state)).unwrap();

    assert!(propagator.propagate_body(&mut a, &short).is_truncated());
    assert!(!propagator.propagate_body(&mut b, &long).is_truncated());
    assert_eq!(b.trajectory().len(), 11);
    // identical up to the point where the short field ran out
    assert_eq!(a.trajectory()[..3], b.trajectory()[..3]);
}

#[test]
fn step_budget_truncates_body() {
    let mut params = Parameters::new((-1.0e-12, 1.0e-12), 1.0e-13);
    params.max_steps_per_body = Some(1);
    let propagator = Propagator::new(params).unwrap();

    let mut ensemble = Ensemble::seeded(2, &linear_top(-1.0e-12), 2.0, -1.0e-12, 2).unwrap();
    let report = propagator.run(&mut ensemble, &ocs_pulse()).unwrap();

    for outcome in &report.outcomes {
        assert!(matches!(
            outcome.status,
            BodyStatus::Truncated {
                reason: TruncationReason::StepBudget { max_steps: 1 },
                ..
            }
        ));
    }
    assert!(ensemble.iter().all(|b| b.trajectory().len() == 2));
}

#[test]
fn wall_clock_budget_truncates_body() {
    let mut params = Parameters::new((0.0, 1.0e-9), 1.0e-10);
    params.max_wall_time = Some(Duration::ZERO);
    let propagator = Propagator::new(params).unwrap();

    let mut body = linear_top(0.0);
    let outcome = propagator.propagate_body(&mut body, &ocs_pulse());
    assert!(matches!(
        outcome.status,
        BodyStatus::Truncated {
            reason: TruncationReason::WallClockBudget { .. },
            ..
        }
    ));
    assert_eq!(body.trajectory().len(), 2);
}

#[test]
fn report_follows_ensemble_order() {
    let mut params = Parameters::new((0.0, 1.0e-11), 1.0e-12);
    params.threads = Some(3);
    let propagator = Propagator::new(params).unwrap();

    let template = linear_top(0.0);
    let mut ensemble = Ensemble::seeded(17, &template, 2.0, 0.0, 6).unwrap();
    let initial: Vec<State> = ensemble.iter().map(|b| *b.initial_state()).collect();

    let report = propagator.run(&mut ensemble, &zero_field()).unwrap();
    let indices: Vec<usize> = report.outcomes.iter().map(|o| o.index).collect();
    assert_eq!(indices, (0..17).collect::<Vec<_>>());
    for (body, s0) in ensemble.iter().zip(&initial) {
        assert_eq!(body.initial_state(), s0);
    }
}

#[test]
fn invalid_time_grid_is_rejected() {
    let mut ensemble = Ensemble::seeded(1, &linear_top(0.0), 1.0, 0.0, 0).unwrap();
    assert!(matches!(
        propagate(&mut ensemble, &zero_field(), (1.0, 0.0), 0.1),
        Err(PropagationError::InvalidTimeRange { .. })
    ));
    assert!(matches!(
        propagate(&mut ensemble, &zero_field(), (0.0, 1.0), 0.0),
        Err(PropagationError::InvalidSaveInterval(_))
    ));
    assert!(matches!(
        propagate(&mut ensemble, &zero_field(), (0.0, 1.0), -0.1),
        Err(PropagationError::InvalidSaveInterval(_))
    ));
    // too many save points to hold in memory
    assert!(matches!(
        propagate(&mut ensemble, &zero_field(), (0.0, 1.0), 1e-300),
        Err(PropagationError::InvalidSaveInterval(_))
    ));
    assert_eq!(ensemble.len(), 1);
}

#[test]
fn empty_range_keeps_only_initial_state() {
    let mut ensemble = Ensemble::seeded(2, &linear_top(0.0), 1.0, 0.0, 0).unwrap();
    let report = propagate(&mut ensemble, &ocs_pulse(), (3.0e-12, 3.0e-12), 1.0e-13).unwrap();
    assert!(report.is_complete());
    for body in &ensemble {
        assert_eq!(body.trajectory().len(), 1);
        assert_eq!(body.initial_state().time, 3.0e-12);
    }
}

// ==================================================================================
// Scenario tests
// ==================================================================================

const SCENARIO: &str = r#"
body:
  inertia: [1.3793e-45, 1.3793e-45, 0.0]
  polarizability:
    - [4.3118e-40, 0.0, 0.0]
    - [0.0, 4.3118e-40, 0.0]
    - [0.0, 0.0, 8.3631e-40]
field:
  kind: gaussian
  peak_intensity: 1.0e16
  fwhm: 500.0e-15
  direction: [1.0, 0.0, 0.0]
ensemble:
  size: 5
  temperature: 2.0
  seed: 42
propagation:
  t_start: -1.0e-12
  t_end: 1.0e-12
  save_interval: 2.0e-13
output:
  path: out/run.json
"#;

#[test]
fn scenario_builds_and_runs_from_yaml() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = ScenarioConfig::from_yaml_str(SCENARIO).unwrap();
    let mut scenario = Scenario::build_scenario(cfg, dir.path()).unwrap();

    assert_eq!(scenario.ensemble.len(), 5);
    assert_eq!(scenario.output, dir.path().join("out/run.json"));
    assert_relative_eq!(*scenario.field.direction(), NVec3::x());

    let report = scenario.run().unwrap();
    assert!(report.is_complete());
    assert!(scenario.ensemble.iter().all(|b| b.trajectory().len() == 11));

    scenario.ensemble.save(&scenario.output).unwrap();
    let loaded = Ensemble::load(&scenario.output).unwrap();
    assert_eq!(loaded.field(), Some(&scenario.field));
}

#[test]
fn scenario_with_fixed_seed_is_reproducible() {
    let dir = tempfile::tempdir().unwrap();
    let a = Scenario::build_scenario(ScenarioConfig::from_yaml_str(SCENARIO).unwrap(), dir.path()).unwrap();
    let b = Scenario::build_scenario(ScenarioConfig::from_yaml_str(SCENARIO).unwrap(), dir.path()).unwrap();
    assert_eq!(a.ensemble.bodies(), b.ensemble.bodies());
}

#[test]
fn scenario_rejects_both_peak_strengths() {
    let yaml = SCENARIO.replace("peak_intensity: 1.0e16", "peak_intensity: 1.0e16\n  peak_amplitude: 1.0e9");
    let cfg = ScenarioConfig::from_yaml_str(&yaml).unwrap();
    assert!(matches!(
        Scenario::build_scenario(cfg, Path::new(".")),
        Err(ScenarioError::Field(FieldError::AmbiguousStrength))
    ));

    let yaml = SCENARIO.replace("peak_intensity: 1.0e16", "");
    let cfg = ScenarioConfig::from_yaml_str(&yaml).unwrap();
    assert!(matches!(
        Scenario::build_scenario(cfg, Path::new(".")),
        Err(ScenarioError::Field(FieldError::AmbiguousStrength))
    ));
}

#[test]
fn scenario_reads_tabulated_field_next_to_it() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "pulse.dat", "-1.0e-12 0.0\n0.0 1.0e9\n1.0e-12 0.0\n");
    let yaml = SCENARIO.replace(
        "kind: gaussian\n  peak_intensity: 1.0e16\n  fwhm: 500.0e-15",
        "kind: tabulated\n  file: pulse.dat",
    );

    let cfg = ScenarioConfig::from_yaml_str(&yaml).unwrap();
    let mut scenario = Scenario::build_scenario(cfg, dir.path()).unwrap();
    assert_relative_eq!(scenario.field.evaluate(0.5e-12).unwrap(), 0.5e9);
    assert!(scenario.run().unwrap().is_complete());
}

#[test]
fn shipped_scenarios_parse() {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("scenarios");
    for name in ["ocs_impulsive.yaml", "ocs_adiabatic.yaml", "au_nanorod_dc.yaml", "tabulated_pulse.yaml"] {
        let cfg = ScenarioConfig::from_yaml_file(&dir.join(name)).unwrap();
        let mut small = cfg.clone();
        small.ensemble.size = 1;
        Scenario::build_scenario(small, &dir).unwrap();
    }
}
