use std::fmt;

use serde::{Deserialize, Serialize};

use crate::calibration::ProbabilityTransform;
use crate::error::{ensure_binary_labels, ensure_probabilities, ensure_same_len, EngineError, EngineResult};
use crate::indicator::stats::quantile_linear;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConformalConfig {
    pub enabled: bool,
    pub alpha: f64,
    /// Fraction of labelled rows held out for calibration in the replay CLI.
    pub calibration_fraction: f64,
}

impl Default for ConformalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            alpha: 0.1,
            calibration_fraction: 0.25,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionSet {
    Class0,
    Class1,
    Both,
}

impl PredictionSet {
    pub fn contains(self, class: u8) -> bool {
        match self {
            Self::Class0 => class == 0,
            Self::Class1 => class == 1,
            Self::Both => class <= 1,
        }
    }

    pub fn len(self) -> usize {
        match self {
            Self::Both => 2,
            _ => 1,
        }
    }

    pub fn classes(self) -> &'static [u8] {
        match self {
            Self::Class0 => &[0],
            Self::Class1 => &[1],
            Self::Both => &[0, 1],
        }
    }
}

impl fmt::Display for PredictionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Class0 => f.write_str("{0}"),
            Self::Class1 => f.write_str("{1}"),
            Self::Both => f.write_str("{0,1}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConformalResult {
    pub predicted_class: u8,
    pub prediction_set: PredictionSet,
    pub confidence: f64,
    /// Nonconformity of the predicted class.
    pub nonconformity_score: f64,
    pub calibrated_proba: f64,
    pub is_ambiguous: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConformalState {
    Unfitted,
    ThresholdSet,
}

/// Split conformal predictor over positive-class probabilities.
#[derive(Debug, Clone)]
pub struct ConformalPredictor {
    alpha: f64,
    state: ConformalState,
    threshold: Option<f64>,
    scores: Vec<f64>,
    calibration_rows: usize,
}

impl ConformalPredictor {
    pub fn new(alpha: f64) -> EngineResult<Self> {
        if !(alpha > 0.0 && alpha < 1.0) {
            return Err(EngineError::InvalidParameter(format!(
                "alpha must lie in (0, 1), got {}",
                alpha
            )));
        }
        Ok(Self {
            alpha,
            state: ConformalState::Unfitted,
            threshold: None,
            scores: Vec::new(),
            calibration_rows: 0,
        })
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn threshold(&self) -> Option<f64> {
        self.threshold
    }

    pub fn nonconformity_scores(&self) -> &[f64] {
        &self.scores
    }

    pub fn is_fitted(&self) -> bool {
        self.state == ConformalState::ThresholdSet
    }

    /// Records the calibration rows. The threshold is set separately from the
    /// model's probabilities on those rows.
    pub fn fit_calibration_set(&mut self, x: &[Vec<f64>], y: &[u8]) -> EngineResult<()> {
        ensure_same_len("calibration set", x.len(), y.len())?;
        ensure_binary_labels(y)?;
        self.calibration_rows = x.len();
        Ok(())
    }

    pub fn calibration_rows(&self) -> usize {
        self.calibration_rows
    }

    pub fn set_threshold_from_calibration(
        &mut self,
        y_true: &[u8],
        y_proba: &[f64],
        calibrator: Option<&dyn ProbabilityTransform>,
    ) -> EngineResult<f64> {
        ensure_same_len("calibration probabilities", y_true.len(), y_proba.len())?;
        ensure_binary_labels(y_true)?;
        ensure_probabilities(y_proba)?;

        let probas = apply_calibrator(calibrator, y_proba);
        let scores: Vec<f64> = y_true
            .iter()
            .zip(&probas)
            .map(|(y, p1)| 1.0 - class_probability(*p1, *y))
            .collect();
        let n = scores.len() as f64;
        let level = (((n + 1.0) * (1.0 - self.alpha)).ceil() / n).min(1.0);
        let threshold = quantile_linear(&scores, level).ok_or_else(|| {
            EngineError::InvalidInput("calibration scores are empty".to_string())
        })?;

        self.scores = scores;
        self.threshold = Some(threshold);
        self.state = ConformalState::ThresholdSet;
        tracing::info!(
            alpha = self.alpha,
            samples = y_true.len(),
            quantile = level,
            threshold,
            "Conformal threshold set"
        );
        Ok(threshold)
    }

    pub fn predict_with_set(
        &self,
        y_proba: &[f64],
        calibrator: Option<&dyn ProbabilityTransform>,
    ) -> EngineResult<Vec<ConformalResult>> {
        let threshold = match (self.state, self.threshold) {
            (ConformalState::ThresholdSet, Some(t)) => t,
            _ => return Err(EngineError::NotFitted("conformal predictor")),
        };
        ensure_probabilities(y_proba)?;
        let probas = apply_calibrator(calibrator, y_proba);
        Ok(probas
            .iter()
            .map(|p1| self.classify(*p1, threshold))
            .collect())
    }

    pub fn predict_one(&self, p1: f64) -> EngineResult<ConformalResult> {
        let mut out = self.predict_with_set(&[p1], None)?;
        out.pop()
            .ok_or_else(|| EngineError::InvalidInput("empty prediction".to_string()))
    }

    fn classify(&self, p1: f64, threshold: f64) -> ConformalResult {
        let p0 = 1.0 - p1;
        let include0 = 1.0 - p0 <= threshold;
        let include1 = 1.0 - p1 <= threshold;
        let prediction_set = match (include0, include1) {
            (true, false) => PredictionSet::Class0,
            (false, true) => PredictionSet::Class1,
            _ => PredictionSet::Both,
        };
        let predicted_class = u8::from(p1 >= 0.5);
        let is_ambiguous = prediction_set == PredictionSet::Both;
        ConformalResult {
            predicted_class,
            prediction_set,
            confidence: if is_ambiguous {
                (1.0 - self.alpha) / 2.0
            } else {
                1.0 - self.alpha
            },
            nonconformity_score: 1.0 - class_probability(p1, predicted_class),
            calibrated_proba: p1,
            is_ambiguous,
        }
    }
}

fn class_probability(p1: f64, class: u8) -> f64 {
    if class == 1 {
        p1
    } else {
        1.0 - p1
    }
}

fn apply_calibrator(calibrator: Option<&dyn ProbabilityTransform>, probas: &[f64]) -> Vec<f64> {
    let Some(calibrator) = calibrator else {
        return probas.to_vec();
    };
    match calibrator.try_transform(probas) {
        Ok(out) if out.len() == probas.len() => out,
        Ok(out) => {
            tracing::warn!(
                expected = probas.len(),
                got = out.len(),
                "Calibrator returned wrong length; using raw probabilities"
            );
            probas.to_vec()
        }
        Err(e) => {
            tracing::warn!(error = %e, "Calibration failed; using raw probabilities");
            probas.to_vec()
        }
    }
}
