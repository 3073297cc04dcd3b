pub mod isotonic;
pub mod platt;

use serde::{Deserialize, Serialize};

use crate::error::{ensure_binary_labels, ensure_probabilities, ensure_same_len, EngineError, EngineResult};

pub use isotonic::IsotonicRegression;
pub use platt::PlattScaling;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CalibrationMethod {
    Platt,
    Isotonic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub enabled: bool,
    pub method: CalibrationMethod,
    pub bins: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            method: CalibrationMethod::Platt,
            bins: 10,
        }
    }
}

/// Anything that maps raw positive-class probabilities to adjusted ones.
pub trait ProbabilityTransform {
    fn try_transform(&self, probas: &[f64]) -> EngineResult<Vec<f64>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
    pub mean_predicted: f64,
    pub observed_frequency: f64,
}

impl ReliabilityBin {
    pub fn gap(&self) -> f64 {
        (self.observed_frequency - self.mean_predicted).abs()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityDiagram {
    /// Non-empty bins only, in ascending order.
    pub bins: Vec<ReliabilityBin>,
    pub expected_calibration_error: f64,
    pub max_calibration_error: f64,
}

impl ReliabilityDiagram {
    /// Equal-width binning of `p` over [0, 1]. Inputs must already be validated.
    pub fn compute(y: &[u8], p: &[f64], n_bins: usize) -> Self {
        let n_bins = n_bins.max(1);
        let width = 1.0 / n_bins as f64;
        let mut acc = vec![(0usize, 0.0f64, 0.0f64); n_bins];
        for (yi, pi) in y.iter().zip(p) {
            let idx = ((pi * n_bins as f64) as usize).min(n_bins - 1);
            acc[idx].0 += 1;
            acc[idx].1 += pi;
            acc[idx].2 += f64::from(*yi);
        }
        let bins: Vec<ReliabilityBin> = acc
            .into_iter()
            .enumerate()
            .filter(|(_, (count, _, _))| *count > 0)
            .map(|(i, (count, sum_p, sum_y))| ReliabilityBin {
                lower: i as f64 * width,
                upper: (i + 1) as f64 * width,
                count,
                mean_predicted: sum_p / count as f64,
                observed_frequency: sum_y / count as f64,
            })
            .collect();
        let gaps: Vec<f64> = bins.iter().map(ReliabilityBin::gap).collect();
        let expected_calibration_error = if gaps.is_empty() {
            0.0
        } else {
            gaps.iter().sum::<f64>() / gaps.len() as f64
        };
        let max_calibration_error = gaps.iter().copied().fold(0.0, f64::max);
        Self {
            bins,
            expected_calibration_error,
            max_calibration_error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FittedMapping {
    Platt(PlattScaling),
    Isotonic(IsotonicRegression),
}

impl FittedMapping {
    fn apply(&self, p: f64) -> f64 {
        let out = match self {
            Self::Platt(m) => m.apply(p),
            Self::Isotonic(m) => m.apply(p),
        };
        out.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityCalibrator {
    method: CalibrationMethod,
    bins: usize,
    mapping: Option<FittedMapping>,
    diagram: Option<ReliabilityDiagram>,
}

impl ProbabilityCalibrator {
    pub fn new(method: CalibrationMethod) -> Self {
        Self {
            method,
            bins: 10,
            mapping: None,
            diagram: None,
        }
    }

    pub fn from_config(cfg: &CalibrationConfig) -> Self {
        Self::new(cfg.method).with_bins(cfg.bins)
    }

    pub fn with_bins(mut self, bins: usize) -> Self {
        self.bins = bins.max(1);
        self
    }

    pub fn method(&self) -> CalibrationMethod {
        self.method
    }

    pub fn is_fitted(&self) -> bool {
        self.mapping.is_some()
    }

    pub fn mapping(&self) -> Option<&FittedMapping> {
        self.mapping.as_ref()
    }

    /// Fit the mapping and compute the reliability diagram of the calibrated outputs.
    /// Refitting replaces the previous state only when the new inputs are valid.
    pub fn fit(&mut self, y_true: &[u8], y_proba: &[f64]) -> EngineResult<&ReliabilityDiagram> {
        ensure_same_len("calibration data", y_true.len(), y_proba.len())?;
        ensure_binary_labels(y_true)?;
        ensure_probabilities(y_proba)?;

        let mapping = match self.method {
            CalibrationMethod::Platt => {
                let platt = PlattScaling::fit(y_true, y_proba);
                if !platt.a.is_finite() || !platt.b.is_finite() {
                    return Err(EngineError::Calibration(
                        "platt optimisation diverged".to_string(),
                    ));
                }
                FittedMapping::Platt(platt)
            }
            CalibrationMethod::Isotonic => {
                FittedMapping::Isotonic(IsotonicRegression::fit(y_true, y_proba))
            }
        };
        let calibrated: Vec<f64> = y_proba.iter().map(|p| mapping.apply(*p)).collect();
        let diagram = ReliabilityDiagram::compute(y_true, &calibrated, self.bins);
        tracing::info!(
            method = ?self.method,
            samples = y_true.len(),
            ece = diagram.expected_calibration_error,
            mce = diagram.max_calibration_error,
            "Calibrator fitted"
        );
        self.mapping = Some(mapping);
        Ok(self.diagram.insert(diagram))
    }

    /// Applies the fitted mapping, or returns `p` unchanged when unfitted.
    pub fn transform(&self, p: f64) -> f64 {
        match &self.mapping {
            Some(m) => m.apply(p),
            None => {
                tracing::warn!(method = ?self.method, "Calibrator not fitted; returning raw probability");
                p
            }
        }
    }

    pub fn transform_batch(&self, probas: &[f64]) -> Vec<f64> {
        match &self.mapping {
            Some(m) => probas.iter().map(|p| m.apply(*p)).collect(),
            None => {
                tracing::warn!(method = ?self.method, "Calibrator not fitted; returning raw probabilities");
                probas.to_vec()
            }
        }
    }

    pub fn reliability_diagram(&self) -> Option<&ReliabilityDiagram> {
        self.diagram.as_ref()
    }

    pub fn expected_calibration_error(&self) -> Option<f64> {
        self.diagram.as_ref().map(|d| d.expected_calibration_error)
    }

    pub fn max_calibration_error(&self) -> Option<f64> {
        self.diagram.as_ref().map(|d| d.max_calibration_error)
    }
}

impl ProbabilityTransform for ProbabilityCalibrator {
    fn try_transform(&self, probas: &[f64]) -> EngineResult<Vec<f64>> {
        let mapping = self
            .mapping
            .as_ref()
            .ok_or(EngineError::NotFitted("probability calibrator"))?;
        ensure_probabilities(probas)?;
        Ok(probas.iter().map(|p| mapping.apply(*p)).collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceLevel {
    P95,
    P99,
}

impl ConfidenceLevel {
    pub fn z(self) -> f64 {
        match self {
            Self::P95 => 1.96,
            Self::P99 => 2.576,
        }
    }
}

/// Normal-approximation interval for a binomial proportion. Only meaningful for
/// large `n`; small samples or `p` near 0/1 give intervals that are too narrow.
pub fn confidence_interval(p: f64, n: usize, level: ConfidenceLevel) -> (f64, f64) {
    if n == 0 || !p.is_finite() {
        return (0.0, 1.0);
    }
    let p = p.clamp(0.0, 1.0);
    let se = (p * (1.0 - p) / n as f64).sqrt();
    let half = level.z() * se;
    ((p - half).max(0.0), (p + half).min(1.0))
}
