use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::conformal::ConformalResult;
use crate::ensemble::EnsembleMetrics;
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub enabled: bool,
    pub max_model_disagreement: f64,
    pub max_proba_std: f64,
    pub min_global_confidence: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_model_disagreement: 0.25,
            max_proba_std: 0.15,
            min_global_confidence: 0.55,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Allow,
    Hold,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "ALLOW",
            Self::Hold => "HOLD",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateReason {
    Disabled,
    DisagreementHigh,
    ConformalAmbiguous,
    ProbaStdHigh,
    ConfidenceLow,
    Allow,
}

impl GateReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::DisagreementHigh => "disagreement_high",
            Self::ConformalAmbiguous => "conformal_ambiguous",
            Self::ProbaStdHigh => "proba_std_high",
            Self::ConfidenceLow => "confidence_low",
            Self::Allow => "allow",
        }
    }
}

impl fmt::Display for GateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    pub decision: Decision,
    pub reason: GateReason,
    pub details: BTreeMap<String, f64>,
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        self.decision == Decision::Allow
    }
}

/// Everything the gate may look at. Rich metrics are optional; explicit overrides win
/// over values derived from them when both are present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GateInput {
    pub ensemble: Option<EnsembleMetrics>,
    pub conformal: Option<ConformalResult>,
    pub disagreement_score: Option<f64>,
    pub proba_std: Option<f64>,
    pub proba_mean: Option<f64>,
    pub is_ambiguous: Option<bool>,
}

/// Flattened view after overrides have been merged.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResolvedGateInput {
    pub disagreement_score: Option<f64>,
    pub proba_std: Option<f64>,
    pub proba_mean: Option<f64>,
    pub is_ambiguous: Option<bool>,
}

impl GateInput {
    pub fn with_ensemble(mut self, metrics: EnsembleMetrics) -> Self {
        self.ensemble = Some(metrics);
        self
    }

    pub fn with_conformal(mut self, result: ConformalResult) -> Self {
        self.conformal = Some(result);
        self
    }

    pub fn disagreement(mut self, value: f64) -> Self {
        self.disagreement_score = Some(value);
        self
    }

    pub fn proba_std(mut self, value: f64) -> Self {
        self.proba_std = Some(value);
        self
    }

    pub fn proba_mean(mut self, value: f64) -> Self {
        self.proba_mean = Some(value);
        self
    }

    pub fn ambiguous(mut self, value: bool) -> Self {
        self.is_ambiguous = Some(value);
        self
    }

    pub fn resolve(&self) -> ResolvedGateInput {
        let ens = self.ensemble.as_ref();
        ResolvedGateInput {
            disagreement_score: self
                .disagreement_score
                .or_else(|| ens.map(|m| m.disagreement_score)),
            proba_std: self.proba_std.or_else(|| ens.map(|m| m.proba_std)),
            proba_mean: self.proba_mean.or_else(|| ens.map(|m| m.proba_mean)),
            is_ambiguous: self
                .is_ambiguous
                .or_else(|| self.conformal.as_ref().map(|c| c.is_ambiguous)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThresholdValue {
    Bool(bool),
    Number(f64),
}

impl From<bool> for ThresholdValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for ThresholdValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

#[derive(Debug, Clone, Default)]
pub struct UncertaintyGate {
    cfg: GateConfig,
}

impl UncertaintyGate {
    pub fn new(cfg: GateConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &GateConfig {
        &self.cfg
    }

    /// Checks run in a fixed order and the first failure decides the reason.
    /// Absent inputs skip their check; non-finite inputs fail it.
    pub fn evaluate(&self, input: &GateInput) -> GateDecision {
        let cfg = &self.cfg;
        if !cfg.enabled {
            return decision(Decision::Allow, GateReason::Disabled, BTreeMap::new());
        }
        let r = input.resolve();

        if let Some(d) = r.disagreement_score {
            if !d.is_finite() || d > cfg.max_model_disagreement {
                return hold(
                    GateReason::DisagreementHigh,
                    details(&[
                        ("disagreement_score", d),
                        ("max_model_disagreement", cfg.max_model_disagreement),
                    ]),
                );
            }
        }

        if r.is_ambiguous == Some(true) {
            return hold(GateReason::ConformalAmbiguous, BTreeMap::new());
        }

        if let Some(s) = r.proba_std {
            if !s.is_finite() || s > cfg.max_proba_std {
                return hold(
                    GateReason::ProbaStdHigh,
                    details(&[("proba_std", s), ("max_proba_std", cfg.max_proba_std)]),
                );
            }
        }

        if let Some(p) = r.proba_mean {
            let confidence = p.max(1.0 - p);
            if !confidence.is_finite() || confidence < cfg.min_global_confidence {
                return hold(
                    GateReason::ConfidenceLow,
                    details(&[
                        ("global_confidence", confidence),
                        ("min_global_confidence", cfg.min_global_confidence),
                    ]),
                );
            }
        }

        let mut out = BTreeMap::new();
        if let Some(p) = r.proba_mean {
            out.insert("global_confidence".to_string(), p.max(1.0 - p));
        }
        decision(Decision::Allow, GateReason::Allow, out)
    }

    /// Applies all updates or none. Only the four known settings are accepted.
    pub fn update_thresholds(
        &mut self,
        updates: &BTreeMap<String, ThresholdValue>,
    ) -> EngineResult<()> {
        let mut next = self.cfg;
        for (key, value) in updates {
            match (key.as_str(), *value) {
                ("enabled", ThresholdValue::Bool(b)) => next.enabled = b,
                ("max_model_disagreement", ThresholdValue::Number(v)) => {
                    next.max_model_disagreement = non_negative(key, v)?
                }
                ("max_proba_std", ThresholdValue::Number(v)) => {
                    next.max_proba_std = non_negative(key, v)?
                }
                ("min_global_confidence", ThresholdValue::Number(v)) => {
                    next.min_global_confidence = non_negative(key, v)?
                }
                ("enabled", _)
                | ("max_model_disagreement", _)
                | ("max_proba_std", _)
                | ("min_global_confidence", _) => {
                    return Err(EngineError::InvalidParameter(format!(
                        "wrong value type for '{}'",
                        key
                    )))
                }
                _ => return Err(EngineError::UnknownSetting(key.clone())),
            }
        }
        tracing::info!(
            enabled = next.enabled,
            max_model_disagreement = next.max_model_disagreement,
            max_proba_std = next.max_proba_std,
            min_global_confidence = next.min_global_confidence,
            "Gate thresholds updated"
        );
        self.cfg = next;
        Ok(())
    }
}

fn non_negative(key: &str, v: f64) -> EngineResult<f64> {
    if v.is_finite() && v >= 0.0 {
        Ok(v)
    } else {
        Err(EngineError::InvalidParameter(format!(
            "'{}' must be finite and >= 0, got {}",
            key, v
        )))
    }
}

fn details(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

fn hold(reason: GateReason, details: BTreeMap<String, f64>) -> GateDecision {
    tracing::debug!(reason = %reason, "Gate hold");
    decision(Decision::Hold, reason, details)
}

fn decision(decision: Decision, reason: GateReason, details: BTreeMap<String, f64>) -> GateDecision {
    GateDecision {
        decision,
        reason,
        details,
    }
}
