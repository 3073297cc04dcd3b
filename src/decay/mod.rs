pub mod trades;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::Regime;

pub use trades::{sample_weights, weighted_trade_stats, HistoricalTrade, WeightedTradeStats};

/// Bars in the new regime after which the regime discount halves again.
pub const REGIME_DURATION_HALF_LIFE: f64 = 50.0;
pub const MIN_PERFORMANCE_FACTOR: f64 = 0.3;
pub const MIN_CATALYST_FACTOR: f64 = 0.3;
const CATALYST_BASE: f64 = 0.9;
const MS_PER_DAY: f64 = 86_400_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    pub half_life_days: f64,
    pub regime_change_decay: f64,
    /// Current/previous win-rate ratio below which performance decay applies.
    pub performance_threshold: f64,
    /// Volatility (in the caller's units, e.g. ATR %) above which catalyst decay applies.
    pub volatility_threshold: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            half_life_days: 30.0,
            regime_change_decay: 0.5,
            performance_threshold: 0.7,
            volatility_threshold: 2.0,
        }
    }
}

/// Where "now" stands when weighting history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayContext {
    pub now: DateTime<Utc>,
    pub current_regime: Regime,
    pub bars_in_regime: f64,
    pub current_win_rate: Option<f64>,
    pub previous_win_rate: Option<f64>,
    pub volatility: Option<f64>,
}

impl DecayContext {
    pub fn at(now: DateTime<Utc>, current_regime: Regime) -> Self {
        Self {
            now,
            current_regime,
            bars_in_regime: 0.0,
            current_win_rate: None,
            previous_win_rate: None,
            volatility: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecayBreakdown {
    pub temporal: f64,
    pub regime: f64,
    pub performance: f64,
    pub catalyst: f64,
    pub combined: f64,
}

/// Stateless staleness weights; 1.0 means full weight.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct KnowledgeDecayPolicy {
    cfg: DecayConfig,
}

impl KnowledgeDecayPolicy {
    pub fn new(cfg: DecayConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &DecayConfig {
        &self.cfg
    }

    pub fn temporal_decay(&self, sample_time: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        let age_days = (now - sample_time).num_milliseconds() as f64 / MS_PER_DAY;
        if age_days <= 0.0 || self.cfg.half_life_days <= 0.0 {
            return 1.0;
        }
        0.5f64.powf(age_days / self.cfg.half_life_days).clamp(0.0, 1.0)
    }

    pub fn regime_decay(&self, sample_regime: Regime, current: Regime, bars_in_regime: f64) -> f64 {
        if sample_regime == current {
            return 1.0;
        }
        let duration = if bars_in_regime.is_finite() {
            bars_in_regime.max(0.0)
        } else {
            0.0
        };
        (self.cfg.regime_change_decay * 0.5f64.powf(duration / REGIME_DURATION_HALF_LIFE))
            .clamp(0.0, 1.0)
    }

    pub fn performance_decay(&self, current_win_rate: f64, previous_win_rate: f64) -> f64 {
        if !current_win_rate.is_finite() || !previous_win_rate.is_finite() || previous_win_rate <= 0.0
        {
            return 1.0;
        }
        let ratio = current_win_rate / previous_win_rate;
        if ratio < self.cfg.performance_threshold {
            ratio.clamp(MIN_PERFORMANCE_FACTOR, 1.0)
        } else {
            1.0
        }
    }

    pub fn catalyst_decay(&self, volatility: f64) -> f64 {
        if !volatility.is_finite() {
            return MIN_CATALYST_FACTOR;
        }
        if volatility <= self.cfg.volatility_threshold {
            return 1.0;
        }
        CATALYST_BASE
            .powf(volatility - self.cfg.volatility_threshold)
            .clamp(MIN_CATALYST_FACTOR, 1.0)
    }

    /// All four factors and their exact product for one historical sample.
    pub fn combined_decay(
        &self,
        sample_time: DateTime<Utc>,
        sample_regime: Regime,
        ctx: &DecayContext,
    ) -> DecayBreakdown {
        let temporal = self.temporal_decay(sample_time, ctx.now);
        let regime = self.regime_decay(sample_regime, ctx.current_regime, ctx.bars_in_regime);
        let performance = match (ctx.current_win_rate, ctx.previous_win_rate) {
            (Some(cur), Some(prev)) => self.performance_decay(cur, prev),
            _ => 1.0,
        };
        let catalyst = ctx.volatility.map_or(1.0, |v| self.catalyst_decay(v));
        DecayBreakdown {
            temporal,
            regime,
            performance,
            catalyst,
            combined: temporal * regime * performance * catalyst,
        }
    }
}
