use std::collections::BTreeMap;

use regime_gate::conformal::{ConformalResult, PredictionSet};
use regime_gate::ensemble::EnsembleMetrics;
use regime_gate::error::EngineError;
use regime_gate::gate::{
    Decision, GateConfig, GateInput, GateReason, ThresholdValue, UncertaintyGate,
};

fn metrics(proba_mean: f64, proba_std: f64, disagreement: f64) -> EnsembleMetrics {
    EnsembleMetrics {
        prediction: u8::from(proba_mean >= 0.5),
        proba_mean,
        proba_std,
        disagreement_score: disagreement,
        individual_probas: BTreeMap::new(),
        votes: BTreeMap::new(),
    }
}

fn ambiguous_result() -> ConformalResult {
    ConformalResult {
        predicted_class: 1,
        prediction_set: PredictionSet::Both,
        confidence: 0.45,
        nonconformity_score: 0.5,
        calibrated_proba: 0.5,
        is_ambiguous: true,
    }
}

fn updates(pairs: &[(&str, ThresholdValue)]) -> BTreeMap<String, ThresholdValue> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

#[test]
fn default_gate_allows_confident_agreement() {
    let gate = UncertaintyGate::default();
    let input = GateInput::default()
        .disagreement(0.2)
        .proba_std(0.1)
        .proba_mean(0.7);
    let d = gate.evaluate(&input);
    assert_eq!(d.decision, Decision::Allow);
    assert_eq!(d.reason, GateReason::Allow);
    assert_eq!(d.reason.as_str(), "allow");
    assert!(d.is_allowed());
    assert!((d.details["global_confidence"] - 0.7).abs() < 1e-12);
}

#[test]
fn default_gate_holds_on_high_disagreement() {
    let gate = UncertaintyGate::default();
    let input = GateInput::default()
        .disagreement(0.3)
        .proba_std(0.1)
        .proba_mean(0.7);
    let d = gate.evaluate(&input);
    assert_eq!(d.decision, Decision::Hold);
    assert_eq!(d.reason.as_str(), "disagreement_high");
    assert_eq!(d.details["disagreement_score"], 0.3);
    assert_eq!(d.details["max_model_disagreement"], 0.25);
}

#[test]
fn first_failing_check_decides_reason() {
    let gate = UncertaintyGate::new(GateConfig {
        max_model_disagreement: 0.15,
        min_global_confidence: 0.6,
        ..GateConfig::default()
    });
    let everything_bad = GateInput::default()
        .disagreement(0.3)
        .ambiguous(true)
        .proba_std(0.5)
        .proba_mean(0.51);
    for _ in 0..10 {
        assert_eq!(
            gate.evaluate(&everything_bad).reason,
            GateReason::DisagreementHigh
        );
    }

    let cases = [
        (
            GateInput::default().ambiguous(true).proba_std(0.5).proba_mean(0.51),
            GateReason::ConformalAmbiguous,
        ),
        (
            GateInput::default().proba_std(0.5).proba_mean(0.51),
            GateReason::ProbaStdHigh,
        ),
        (GateInput::default().proba_mean(0.51), GateReason::ConfidenceLow),
        (GateInput::default().proba_mean(0.2), GateReason::Allow),
    ];
    for (input, expected) in cases {
        assert_eq!(gate.evaluate(&input).reason, expected);
    }
}

#[test]
fn absent_inputs_skip_their_checks() {
    let gate = UncertaintyGate::default();
    let d = gate.evaluate(&GateInput::default());
    assert_eq!(d.decision, Decision::Allow);
    assert!(d.details.is_empty());
}

#[test]
fn non_finite_inputs_hold() {
    let gate = UncertaintyGate::default();
    assert_eq!(
        gate.evaluate(&GateInput::default().disagreement(f64::NAN)).reason,
        GateReason::DisagreementHigh
    );
    assert_eq!(
        gate.evaluate(&GateInput::default().proba_std(f64::INFINITY)).reason,
        GateReason::ProbaStdHigh
    );
    assert_eq!(
        gate.evaluate(&GateInput::default().proba_mean(f64::NAN)).reason,
        GateReason::ConfidenceLow
    );
}

#[test]
fn rich_metrics_feed_the_checks_and_overrides_win() {
    let gate = UncertaintyGate::default();
    let noisy = metrics(0.8, 0.3, 0.0);
    let d = gate.evaluate(&GateInput::default().with_ensemble(noisy.clone()));
    assert_eq!(d.reason, GateReason::ProbaStdHigh);

    let d = gate.evaluate(&GateInput::default().with_ensemble(noisy).proba_std(0.05));
    assert_eq!(d.reason, GateReason::Allow);

    let d = gate.evaluate(
        &GateInput::default()
            .with_ensemble(metrics(0.8, 0.05, 0.0))
            .with_conformal(ambiguous_result()),
    );
    assert_eq!(d.reason, GateReason::ConformalAmbiguous);

    let d = gate.evaluate(
        &GateInput::default()
            .with_conformal(ambiguous_result())
            .ambiguous(false),
    );
    assert_eq!(d.reason, GateReason::Allow);
}

#[test]
fn confidence_is_symmetric_around_half() {
    let gate = UncertaintyGate::default();
    for (p, allowed) in [(0.9, true), (0.1, true), (0.56, true), (0.44, true), (0.5, false), (0.52, false)] {
        let d = gate.evaluate(&GateInput::default().proba_mean(p));
        assert_eq!(d.is_allowed(), allowed, "proba_mean {}", p);
    }
}

#[test]
fn disabled_gate_always_allows() {
    let mut gate = UncertaintyGate::default();
    gate.update_thresholds(&updates(&[("enabled", false.into())]))
        .expect("valid update");
    let d = gate.evaluate(&GateInput::default().disagreement(1.0).proba_mean(0.5));
    assert_eq!(d.decision, Decision::Allow);
    assert_eq!(d.reason, GateReason::Disabled);
}

#[test]
fn threshold_updates_apply_atomically() {
    let mut gate = UncertaintyGate::default();
    gate.update_thresholds(&updates(&[
        ("max_model_disagreement", 0.5.into()),
        ("max_proba_std", 0.2.into()),
    ]))
    .expect("valid update");
    assert_eq!(gate.config().max_model_disagreement, 0.5);
    assert_eq!(gate.config().max_proba_std, 0.2);
    assert_eq!(
        gate.evaluate(&GateInput::default().disagreement(0.3)).reason,
        GateReason::Allow
    );

    let before = *gate.config();
    let err = gate
        .update_thresholds(&updates(&[
            ("min_global_confidence", 0.9.into()),
            ("max_cats", 1.0.into()),
        ]))
        .expect_err("unknown key");
    assert_eq!(err, EngineError::UnknownSetting("max_cats".to_string()));
    assert_eq!(*gate.config(), before);

    for bad in [
        updates(&[("max_proba_std", (-0.1).into())]),
        updates(&[("max_proba_std", f64::NAN.into())]),
        updates(&[("enabled", 1.0.into())]),
        updates(&[("min_global_confidence", true.into())]),
    ] {
        assert!(gate.update_thresholds(&bad).is_err());
        assert_eq!(*gate.config(), before);
    }
}

#[test]
fn threshold_values_deserialize_untagged() {
    let parsed: BTreeMap<String, ThresholdValue> =
        serde_json::from_str(r#"{"enabled": true, "max_proba_std": 0.1}"#).expect("json");
    assert_eq!(parsed["enabled"], ThresholdValue::Bool(true));
    assert_eq!(parsed["max_proba_std"], ThresholdValue::Number(0.1));
    let mut gate = UncertaintyGate::default();
    gate.update_thresholds(&parsed).expect("valid update");
    assert_eq!(gate.config().max_proba_std, 0.1);
}
