use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regime_gate::calibration::{
    CalibrationConfig, CalibrationMethod, FittedMapping, ProbabilityCalibrator,
    ProbabilityTransform, ReliabilityDiagram,
};
use regime_gate::error::EngineError;

/// Raw scores spread over [0, 1] while the true frequency only spans [0.3, 0.7].
fn overconfident(n: usize, seed: u64) -> (Vec<u8>, Vec<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut y = Vec::with_capacity(n);
    let mut p = Vec::with_capacity(n);
    for _ in 0..n {
        let score: f64 = rng.gen_range(0.0..1.0);
        let truth = 0.3 + 0.4 * score;
        y.push(u8::from(rng.gen_bool(truth)));
        p.push(score);
    }
    (y, p)
}

fn grid() -> Vec<f64> {
    (0..=100).map(|i| i as f64 / 100.0).collect()
}

#[test]
fn platt_reduces_calibration_error() {
    let (y, p) = overconfident(2_000, 3);
    let raw = ReliabilityDiagram::compute(&y, &p, 10);
    let mut cal = ProbabilityCalibrator::new(CalibrationMethod::Platt);
    let diagram = cal.fit(&y, &p).expect("valid data").clone();
    assert!(raw.expected_calibration_error > 0.1);
    assert!(
        diagram.expected_calibration_error < raw.expected_calibration_error / 2.0,
        "ece {} vs raw {}",
        diagram.expected_calibration_error,
        raw.expected_calibration_error
    );
    assert_eq!(cal.expected_calibration_error(), Some(diagram.expected_calibration_error));
    match cal.mapping() {
        Some(FittedMapping::Platt(m)) => assert!(m.a > 0.0),
        other => panic!("unexpected mapping {:?}", other),
    }
}

#[test]
fn isotonic_reduces_calibration_error() {
    let (y, p) = overconfident(2_000, 4);
    let raw = ReliabilityDiagram::compute(&y, &p, 10);
    let mut cal = ProbabilityCalibrator::from_config(&CalibrationConfig {
        method: CalibrationMethod::Isotonic,
        ..CalibrationConfig::default()
    });
    let ece = cal.fit(&y, &p).expect("valid data").expected_calibration_error;
    assert!(ece < raw.expected_calibration_error / 2.0);
    assert!(cal.max_calibration_error().is_some());
}

#[test]
fn calibrated_outputs_are_monotone_and_bounded() {
    let (y, p) = overconfident(500, 9);
    for method in [CalibrationMethod::Platt, CalibrationMethod::Isotonic] {
        let mut cal = ProbabilityCalibrator::new(method);
        cal.fit(&y, &p).expect("valid data");
        let out = cal.transform_batch(&grid());
        for pair in out.windows(2) {
            assert!(pair[1] >= pair[0] - 1e-12, "{:?} not monotone", method);
        }
        assert!(out.iter().all(|v| (0.0..=1.0).contains(v)));
    }
}

#[test]
fn unfitted_calibrator_passes_probabilities_through() {
    let cal = ProbabilityCalibrator::new(CalibrationMethod::Isotonic);
    assert!(!cal.is_fitted());
    assert_eq!(cal.transform(0.37), 0.37);
    assert_eq!(cal.transform_batch(&[0.1, 0.9]), vec![0.1, 0.9]);
    assert!(cal.reliability_diagram().is_none());
    assert!(matches!(
        cal.try_transform(&[0.5]),
        Err(EngineError::NotFitted(_))
    ));
}

#[test]
fn invalid_inputs_are_rejected_without_clobbering_fit() {
    let mut cal = ProbabilityCalibrator::new(CalibrationMethod::Platt);
    assert!(cal.fit(&[0, 1], &[0.2]).is_err());
    assert!(cal.fit(&[0, 2], &[0.2, 0.8]).is_err());
    assert!(cal.fit(&[0, 1], &[0.2, 1.5]).is_err());
    assert!(cal.fit(&[0, 1], &[0.2, f64::NAN]).is_err());
    assert!(!cal.is_fitted());

    let (y, p) = overconfident(200, 1);
    cal.fit(&y, &p).expect("valid data");
    let before = cal.transform(0.8);
    assert!(cal.fit(&[1], &[2.0]).is_err());
    assert_eq!(cal.transform(0.8), before);
}

#[test]
fn try_transform_validates_inputs() {
    let (y, p) = overconfident(200, 2);
    let mut cal = ProbabilityCalibrator::new(CalibrationMethod::Platt);
    cal.fit(&y, &p).expect("valid data");
    assert!(cal.try_transform(&[0.5, -0.1]).is_err());
    let out = cal.try_transform(&[0.0, 1.0]).expect("valid probabilities");
    assert!(out[0] < out[1]);
    assert!(out[0] > 0.2 && out[1] < 0.8);
}

#[test]
fn isotonic_handles_single_class() {
    let mut cal = ProbabilityCalibrator::new(CalibrationMethod::Isotonic);
    cal.fit(&[1, 1, 1], &[0.2, 0.5, 0.9]).expect("valid data");
    assert!(grid().iter().all(|p| cal.transform(*p) == 1.0));
}
