use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regime_gate::calibration::ProbabilityTransform;
use regime_gate::conformal::{ConformalPredictor, PredictionSet};
use regime_gate::error::{EngineError, EngineResult};

/// Class-0 rows score `P(0) = 0.7` and class-1 rows score `P(1) = 0.7`.
fn symmetric_sample(n: usize, rng: &mut StdRng) -> (Vec<u8>, Vec<f64>) {
    let mut y = Vec::with_capacity(n);
    let mut p = Vec::with_capacity(n);
    for _ in 0..n {
        let label = u8::from(rng.gen_bool(0.5));
        y.push(label);
        p.push(if label == 1 { 0.7 } else { 0.3 });
    }
    (y, p)
}

/// Labels drawn from the reported probability, so the scores are honest.
fn honest_sample(n: usize, rng: &mut StdRng) -> (Vec<u8>, Vec<f64>) {
    let mut y = Vec::with_capacity(n);
    let mut p = Vec::with_capacity(n);
    for _ in 0..n {
        let q: f64 = rng.gen_range(0.0..1.0);
        y.push(u8::from(rng.gen_bool(q)));
        p.push(q);
    }
    (y, p)
}

fn coverage(predictor: &ConformalPredictor, y: &[u8], p: &[f64]) -> f64 {
    let results = predictor.predict_with_set(p, None).expect("fitted");
    let covered = results
        .iter()
        .zip(y)
        .filter(|(r, label)| r.prediction_set.contains(**label))
        .count();
    covered as f64 / y.len() as f64
}

struct Failing;

impl ProbabilityTransform for Failing {
    fn try_transform(&self, _probas: &[f64]) -> EngineResult<Vec<f64>> {
        Err(EngineError::Calibration("boom".to_string()))
    }
}

struct Flip;

impl ProbabilityTransform for Flip {
    fn try_transform(&self, probas: &[f64]) -> EngineResult<Vec<f64>> {
        Ok(probas.iter().map(|p| 1.0 - p).collect())
    }
}

#[test]
fn symmetric_scores_meet_coverage_target() {
    let mut rng = StdRng::seed_from_u64(21);
    let (cy, cp) = symmetric_sample(200, &mut rng);
    let mut predictor = ConformalPredictor::new(0.1).expect("alpha");
    let threshold = predictor
        .set_threshold_from_calibration(&cy, &cp, None)
        .expect("valid calibration");
    assert!((threshold - 0.3).abs() < 1e-12);

    let (ty, tp) = symmetric_sample(500, &mut rng);
    assert!(coverage(&predictor, &ty, &tp) >= 0.75);
}

#[test]
fn honest_scores_meet_coverage_target() {
    let mut rng = StdRng::seed_from_u64(22);
    let (cy, cp) = honest_sample(200, &mut rng);
    let mut predictor = ConformalPredictor::new(0.1).expect("alpha");
    predictor
        .set_threshold_from_calibration(&cy, &cp, None)
        .expect("valid calibration");
    let (ty, tp) = honest_sample(2_000, &mut rng);
    let measured = coverage(&predictor, &ty, &tp);
    assert!(measured >= 0.75, "coverage {}", measured);
}

#[test]
fn threshold_uses_finite_sample_quantile() {
    let mut predictor = ConformalPredictor::new(0.5).expect("alpha");
    let threshold = predictor
        .set_threshold_from_calibration(&[1, 1, 1, 1], &[0.9, 0.8, 0.6, 0.5], None)
        .expect("valid calibration");
    // ceil(5 * 0.5) / 4 = 0.75 over scores [0.1, 0.2, 0.4, 0.5].
    assert!((threshold - 0.425).abs() < 1e-12);
    assert_eq!(predictor.threshold(), Some(threshold));
    assert_eq!(predictor.nonconformity_scores().len(), 4);
}

#[test]
fn prediction_sets_are_never_empty() {
    let mut rng = StdRng::seed_from_u64(23);
    for alpha in [0.01, 0.1, 0.3, 0.5, 0.9] {
        for calib in [0.5, 0.99, 0.01] {
            let mut predictor = ConformalPredictor::new(alpha).expect("alpha");
            predictor
                .set_threshold_from_calibration(&[1, 1, 0], &[calib, calib, 1.0 - calib], None)
                .expect("valid calibration");
            let scores: Vec<f64> = (0..200).map(|_| rng.gen_range(0.0..=1.0)).collect();
            for r in predictor.predict_with_set(&scores, None).expect("fitted") {
                assert!(matches!(r.prediction_set.len(), 1 | 2));
                assert_eq!(r.is_ambiguous, r.prediction_set == PredictionSet::Both);
            }
        }
    }
}

#[test]
fn tight_threshold_yields_ambiguous_set() {
    let mut predictor = ConformalPredictor::new(0.1).expect("alpha");
    predictor
        .set_threshold_from_calibration(&[1; 10], &[0.99; 10], None)
        .expect("valid calibration");
    let r = predictor.predict_one(0.5).expect("fitted");
    assert_eq!(r.prediction_set, PredictionSet::Both);
    assert!(r.is_ambiguous);
    assert!((r.confidence - 0.45).abs() < 1e-12);

    let r = predictor.predict_one(0.995).expect("fitted");
    assert_eq!(r.prediction_set, PredictionSet::Class1);
    assert_eq!(r.predicted_class, 1);
    assert!((r.confidence - 0.9).abs() < 1e-12);
    assert!((r.nonconformity_score - 0.005).abs() < 1e-12);
}

#[test]
fn unfitted_predictor_refuses_to_predict() {
    let predictor = ConformalPredictor::new(0.1).expect("alpha");
    assert!(!predictor.is_fitted());
    assert!(matches!(
        predictor.predict_one(0.5),
        Err(EngineError::NotFitted(_))
    ));
}

#[test]
fn invalid_calibration_inputs_are_rejected() {
    let mut predictor = ConformalPredictor::new(0.1).expect("alpha");
    assert!(predictor.set_threshold_from_calibration(&[1, 0], &[0.5], None).is_err());
    assert!(predictor.set_threshold_from_calibration(&[1, 5], &[0.5, 0.5], None).is_err());
    assert!(predictor.set_threshold_from_calibration(&[1, 0], &[0.5, 1.2], None).is_err());
    assert!(predictor.set_threshold_from_calibration(&[], &[], None).is_err());
    assert!(!predictor.is_fitted());
    assert!(predictor.fit_calibration_set(&[vec![1.0]], &[1, 0]).is_err());
    predictor
        .fit_calibration_set(&[vec![1.0], vec![2.0]], &[1, 0])
        .expect("valid rows");
    assert_eq!(predictor.calibration_rows(), 2);
}

#[test]
fn calibrator_is_applied_and_failures_fall_back_to_raw() {
    let mut predictor = ConformalPredictor::new(0.1).expect("alpha");
    predictor
        .set_threshold_from_calibration(&[1; 10], &[0.1; 10], Some(&Flip))
        .expect("valid calibration");
    assert!((predictor.threshold().unwrap_or_default() - 0.1).abs() < 1e-12);

    let flipped = predictor.predict_with_set(&[0.05], Some(&Flip)).expect("fitted");
    assert_eq!(flipped[0].prediction_set, PredictionSet::Class1);
    assert!((flipped[0].calibrated_proba - 0.95).abs() < 1e-12);

    let raw = predictor.predict_with_set(&[0.05], Some(&Failing)).expect("fitted");
    assert_eq!(raw[0].prediction_set, PredictionSet::Class0);
    assert!((raw[0].calibrated_proba - 0.05).abs() < 1e-12);
}
