use std::cell::RefCell;

use cemflow::{
    datatypes::{BeamGeometry, BeamSetup},
    forward::ThreePointBending,
    mesher,
    post_processor::{self, GaussianKde},
    propagation::{perform_prediction, PosteriorPredictive, PropagationMode},
    units::UnitRegistry,
    CemflowError, Result,
};

const PARAMETERS: [f64; 5] = [30.1, 30.2, 30.53, 30.8, 29.6];

#[test]
fn test_cheap_mode_uses_first_three_samples() {
    let calls = RefCell::new(Vec::new());
    let solver = |e: f64, nu: f64| -> Result<f64> {
        calls.borrow_mut().push((e, nu));
        Ok(e * (1.0 + nu))
    };

    let mut pp = PosteriorPredictive::new(solver, 0.2, PARAMETERS.to_vec()).unwrap();
    let summary = pp.run(PropagationMode::Cheap).unwrap();

    assert_eq!(*calls.borrow(), vec![(30.1, 0.2), (30.2, 0.2), (30.53, 0.2)]);
    let samples = pp.samples().unwrap();
    assert_eq!(samples.len(), 3);

    let expected_mean = samples.iter().sum::<f64>() / 3.0;
    let expected_sd = (samples
        .iter()
        .map(|s| (s - expected_mean).powi(2))
        .sum::<f64>()
        / 3.0)
        .sqrt();
    assert!((summary.mean - expected_mean).abs() < 1e-12);
    assert!((summary.std_dev - expected_sd).abs() < 1e-12);
    assert_eq!(summary.count, 3);
}

#[test]
fn test_repeated_runs_are_identical() {
    let solver = |e: f64, nu: f64| -> Result<f64> { Ok(e.sqrt() * nu) };
    let first = perform_prediction(solver, PARAMETERS.to_vec(), 0.2, PropagationMode::Full(5)).unwrap();
    let second = perform_prediction(solver, PARAMETERS.to_vec(), 0.2, PropagationMode::Full(5)).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_failing_solver_aborts_run() {
    let solver = |e: f64, _nu: f64| -> Result<f64> {
        if e > 30.5 {
            Err(CemflowError::Solver("no convergence".to_owned()))
        } else {
            Ok(e)
        }
    };
    let result = perform_prediction(solver, PARAMETERS.to_vec(), 0.2, PropagationMode::Full(4));
    assert!(matches!(result, Err(CemflowError::Propagation { index: 2, .. })));
}

#[test]
fn test_beam_model_prediction() {
    let geometry = BeamGeometry {
        length: 1000.0,
        height: 100.0,
        part_thickness: 100.0,
        elements_x: 20,
        elements_y: 4,
        load_displacement: 1.0,
    };
    let setup = BeamSetup {
        geometry,
        boundary_rules: mesher::three_point_bending_rules(&geometry),
    };
    let solver = ThreePointBending::new(UnitRegistry::new(), setup).unwrap();

    let prediction = perform_prediction(solver, PARAMETERS.to_vec(), 0.2, PropagationMode::Cheap).unwrap();
    assert_eq!(prediction.samples.len(), 3);
    assert!(prediction.samples.iter().all(|s| *s > 0.0));

    // displacement control: stress scales with the modulus
    let ratio = prediction.samples[1] / prediction.samples[0];
    assert!((ratio - 30.2 / 30.1).abs() < 1e-4, "ratio {ratio}");

    let dir = tempfile::tempdir().unwrap();
    let kde = GaussianKde::new(&prediction.samples).unwrap();
    let grid = kde.grid(50, 3.0).unwrap();
    post_processor::samples_csv_output(&prediction.samples, &dir.path().join("samples.csv")).unwrap();
    post_processor::kde_csv_output(&grid, &dir.path().join("kde.csv")).unwrap();

    let kde_csv = std::fs::read_to_string(dir.path().join("kde.csv")).unwrap();
    assert_eq!(kde_csv.lines().count(), 51);
}
