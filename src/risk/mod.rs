use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::model::Regime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskReasonCode {
    #[serde(rename = "risk.nominal")]
    Nominal,
    #[serde(rename = "risk.regime_block")]
    RegimeBlock,
    #[serde(rename = "risk.regime")]
    Regime,
    #[serde(rename = "risk.transition")]
    Transition,
    #[serde(rename = "risk.uncertainty")]
    Uncertainty,
    #[serde(rename = "risk.drawdown")]
    Drawdown,
    #[serde(rename = "risk.volatility")]
    Volatility,
}

impl RiskReasonCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nominal => "risk.nominal",
            Self::RegimeBlock => "risk.regime_block",
            Self::Regime => "risk.regime",
            Self::Transition => "risk.transition",
            Self::Uncertainty => "risk.uncertainty",
            Self::Drawdown => "risk.drawdown",
            Self::Volatility => "risk.volatility",
        }
    }
}

/// Per-regime multipliers on the base risk fraction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeFactors {
    pub range: f64,
    pub trend_up: f64,
    pub trend_down: f64,
    pub exhaustion: f64,
    pub high_vol: f64,
    /// Must stay 0; CHAOTIC is a hard block whatever the table says.
    pub chaotic: f64,
    pub unknown: f64,
}

impl Default for RegimeFactors {
    fn default() -> Self {
        Self {
            range: 1.0,
            trend_up: 1.0,
            trend_down: 1.0,
            exhaustion: 0.8,
            high_vol: 0.7,
            chaotic: 0.0,
            unknown: 0.6,
        }
    }
}

impl RegimeFactors {
    pub fn get(&self, regime: Regime) -> f64 {
        match regime {
            Regime::Range => self.range,
            Regime::TrendUp => self.trend_up,
            Regime::TrendDown => self.trend_down,
            Regime::Exhaustion => self.exhaustion,
            Regime::HighVol => self.high_vol,
            Regime::Chaotic => 0.0,
            Regime::Unknown => self.unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskAdapterConfig {
    /// Fraction of balance risked per trade before adaptation.
    pub base_risk: f64,
    pub regime_factors: RegimeFactors,
    pub transition_weight: f64,
    pub uncertainty_weight: f64,
    pub max_drawdown: f64,
    pub volatility_threshold: f64,
    pub min_volatility_factor: f64,
    pub lot_step: f64,
}

impl Default for RiskAdapterConfig {
    fn default() -> Self {
        Self {
            base_risk: 0.01,
            regime_factors: RegimeFactors::default(),
            transition_weight: 0.5,
            uncertainty_weight: 0.5,
            max_drawdown: 0.2,
            volatility_threshold: 0.02,
            min_volatility_factor: 0.25,
            lot_step: 0.001,
        }
    }
}

impl RiskAdapterConfig {
    pub fn validate(&self) -> EngineResult<()> {
        let unit = |name: &str, v: f64| {
            if v.is_finite() && (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(EngineError::InvalidParameter(format!(
                    "{} must lie in [0, 1], got {}",
                    name, v
                )))
            }
        };
        let positive = |name: &str, v: f64| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(EngineError::InvalidParameter(format!(
                    "{} must be > 0, got {}",
                    name, v
                )))
            }
        };
        unit("base_risk", self.base_risk)?;
        unit("transition_weight", self.transition_weight)?;
        unit("uncertainty_weight", self.uncertainty_weight)?;
        unit("min_volatility_factor", self.min_volatility_factor)?;
        for regime in Regime::ALL {
            unit(regime.as_str(), self.regime_factors.get(regime))?;
        }
        if self.regime_factors.chaotic != 0.0 {
            return Err(EngineError::InvalidParameter(format!(
                "regime_factors.chaotic must be 0, got {}",
                self.regime_factors.chaotic
            )));
        }
        positive("max_drawdown", self.max_drawdown)?;
        positive("volatility_threshold", self.volatility_threshold)?;
        positive("lot_step", self.lot_step)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskInputs {
    pub transition_strength: f64,
    pub ensemble_uncertainty: f64,
    pub recent_drawdown: f64,
    pub volatility: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskFactors {
    pub regime: f64,
    pub transition: f64,
    pub uncertainty: f64,
    pub drawdown: f64,
    pub volatility: f64,
}

impl RiskFactors {
    pub fn product(&self) -> f64 {
        (self.regime * self.transition * self.uncertainty * self.drawdown * self.volatility)
            .clamp(0.0, 1.0)
    }

    /// Smallest factor below 1, with a zero regime factor reported as a block.
    pub fn dominant_reason(&self) -> RiskReasonCode {
        if self.regime <= 0.0 {
            return RiskReasonCode::RegimeBlock;
        }
        let candidates = [
            (RiskReasonCode::Regime, self.regime),
            (RiskReasonCode::Transition, self.transition),
            (RiskReasonCode::Uncertainty, self.uncertainty),
            (RiskReasonCode::Drawdown, self.drawdown),
            (RiskReasonCode::Volatility, self.volatility),
        ];
        candidates
            .into_iter()
            .filter(|(_, f)| *f < 1.0)
            .fold(None, |best: Option<(RiskReasonCode, f64)>, cur| match best {
                Some(b) if b.1 <= cur.1 => Some(b),
                _ => Some(cur),
            })
            .map(|(code, _)| code)
            .unwrap_or(RiskReasonCode::Nominal)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAdjustment {
    pub time: DateTime<Utc>,
    pub symbol: String,
    pub original_risk: f64,
    pub adjusted_risk: f64,
    pub risk_factor: f64,
    pub reason: RiskReasonCode,
    pub regime: Regime,
    pub transition_strength: f64,
    pub ensemble_uncertainty: f64,
    pub recent_drawdown: f64,
    pub volatility: Option<f64>,
    pub factors: RiskFactors,
}

pub fn transition_penalty(strength: f64, weight: f64) -> f64 {
    linear_penalty(strength, weight)
}

pub fn uncertainty_penalty(uncertainty: f64, weight: f64) -> f64 {
    linear_penalty(uncertainty, weight)
}

fn linear_penalty(stressor: f64, weight: f64) -> f64 {
    let s = if stressor.is_finite() {
        stressor.clamp(0.0, 1.0)
    } else {
        1.0
    };
    (1.0 - weight * s).clamp(0.0, 1.0)
}

pub fn drawdown_penalty(drawdown: f64, max_drawdown: f64) -> f64 {
    if !drawdown.is_finite() || max_drawdown <= 0.0 {
        return 0.0;
    }
    (1.0 - drawdown.abs() / max_drawdown).clamp(0.0, 1.0)
}

pub fn volatility_penalty(volatility: Option<f64>, threshold: f64, floor: f64) -> f64 {
    match volatility {
        None => 1.0,
        Some(v) if !v.is_finite() => floor,
        Some(v) if v <= threshold => 1.0,
        Some(v) => (threshold / v).clamp(floor, 1.0),
    }
}

pub(crate) fn floor_to_step(value: f64, step: f64) -> f64 {
    if !value.is_finite() || !step.is_finite() || step <= 0.0 {
        return 0.0;
    }
    let units = (value / step + 1e-9).floor();
    let floored = units * step;
    if floored < 0.0 {
        0.0
    } else {
        floored
    }
}

/// Scales the base risk fraction by regime and stress penalties, per symbol.
#[derive(Debug, Clone)]
pub struct DynamicRiskAdapter {
    cfg: RiskAdapterConfig,
    current: HashMap<String, RiskAdjustment>,
    history: Vec<RiskAdjustment>,
}

impl DynamicRiskAdapter {
    pub fn new(cfg: RiskAdapterConfig) -> EngineResult<Self> {
        cfg.validate()?;
        Ok(Self {
            cfg,
            current: HashMap::new(),
            history: Vec::new(),
        })
    }

    pub fn config(&self) -> &RiskAdapterConfig {
        &self.cfg
    }

    pub fn factors(&self, regime: Regime, inputs: &RiskInputs) -> RiskFactors {
        RiskFactors {
            regime: self.cfg.regime_factors.get(regime).clamp(0.0, 1.0),
            transition: transition_penalty(inputs.transition_strength, self.cfg.transition_weight),
            uncertainty: uncertainty_penalty(
                inputs.ensemble_uncertainty,
                self.cfg.uncertainty_weight,
            ),
            drawdown: drawdown_penalty(inputs.recent_drawdown, self.cfg.max_drawdown),
            volatility: volatility_penalty(
                inputs.volatility,
                self.cfg.volatility_threshold,
                self.cfg.min_volatility_factor,
            ),
        }
    }

    pub fn adapt_risk(
        &mut self,
        symbol: &str,
        regime: Regime,
        inputs: RiskInputs,
        now: DateTime<Utc>,
    ) -> RiskAdjustment {
        let factors = self.factors(regime, &inputs);
        let risk_factor = factors.product();
        let original_risk = self.cfg.base_risk;
        let adjusted_risk = (original_risk * risk_factor).clamp(0.0, original_risk);
        let adjustment = RiskAdjustment {
            time: now,
            symbol: symbol.to_string(),
            original_risk,
            adjusted_risk,
            risk_factor,
            reason: factors.dominant_reason(),
            regime,
            transition_strength: inputs.transition_strength,
            ensemble_uncertainty: inputs.ensemble_uncertainty,
            recent_drawdown: inputs.recent_drawdown,
            volatility: inputs.volatility,
            factors,
        };
        if adjustment.reason == RiskReasonCode::RegimeBlock {
            tracing::info!(symbol, regime = %regime, "Risk blocked by regime");
        } else {
            tracing::debug!(
                symbol,
                regime = %regime,
                risk_factor,
                reason = adjustment.reason.as_str(),
                "Risk adapted"
            );
        }
        self.current.insert(symbol.to_string(), adjustment.clone());
        self.history.push(adjustment.clone());
        adjustment
    }

    /// Latest adjusted risk for `symbol`, or the base risk if it has none yet.
    pub fn get_current_risk(&self, symbol: &str) -> f64 {
        self.current
            .get(symbol)
            .map(|a| a.adjusted_risk)
            .unwrap_or(self.cfg.base_risk)
    }

    pub fn last_adjustment(&self, symbol: &str) -> Option<&RiskAdjustment> {
        self.current.get(symbol)
    }

    /// Units to trade so that a stop `stop_distance` away loses `balance * risk`.
    pub fn get_position_size(
        &self,
        symbol: &str,
        balance: f64,
        stop_distance: f64,
        value_per_unit: f64,
    ) -> f64 {
        let risk = self.get_current_risk(symbol);
        if risk <= 0.0
            || !balance.is_finite()
            || balance <= 0.0
            || !stop_distance.is_finite()
            || stop_distance <= 0.0
            || !value_per_unit.is_finite()
            || value_per_unit <= 0.0
        {
            return 0.0;
        }
        floor_to_step(balance * risk / (stop_distance * value_per_unit), self.cfg.lot_step)
    }

    pub fn reset_for_symbol(&mut self, symbol: &str) -> bool {
        self.current.remove(symbol).is_some()
    }

    pub fn tracked_symbols(&self) -> impl Iterator<Item = &str> {
        self.current.keys().map(String::as_str)
    }

    pub fn history(&self) -> &[RiskAdjustment] {
        &self.history
    }

    pub fn history_for<'a>(&'a self, symbol: &'a str) -> impl Iterator<Item = &'a RiskAdjustment> {
        self.history.iter().filter(move |a| a.symbol == symbol)
    }

    /// Hands the accumulated history to the caller and starts a new one.
    pub fn take_history(&mut self) -> Vec<RiskAdjustment> {
        std::mem::take(&mut self.history)
    }
}
