use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calibration::{ProbabilityCalibrator, ProbabilityTransform};
use crate::config::{timeframe_duration, Config};
use crate::conformal::{ConformalPredictor, ConformalResult};
use crate::decay::{DecayContext, KnowledgeDecayPolicy};
use crate::ensemble::{EnsembleEngine, EnsembleMetrics};
use crate::error::{EngineError, EngineResult};
use crate::gate::{GateDecision, GateInput, UncertaintyGate};
use crate::model::{Candle, Regime};
use crate::regime::{
    ChangeEvent, RegimeChangeConfig, RegimeChangeDetector, RegimeTransitionMachine,
    RegimeTransitionRecord, TransitionConfig,
};
use crate::risk::{DynamicRiskAdapter, RiskAdjustment, RiskInputs};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub symbol: String,
    pub timeframe: String,
    /// Candles kept per stream for regime classification.
    pub candle_window: usize,
    pub account_balance: f64,
    /// Stop distance as a multiple of the latest true range.
    pub stop_range_multiple: f64,
    pub value_per_unit: f64,
    /// Lagged returns per feature row in the replay CLI.
    pub feature_lags: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            timeframe: "1m".to_string(),
            candle_window: 100,
            account_balance: 10_000.0,
            stop_range_multiple: 2.0,
            value_per_unit: 1.0,
            feature_lags: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamKey {
    pub symbol: String,
    pub timeframe: String,
}

impl StreamKey {
    pub fn new(symbol: &str, timeframe: &str) -> Self {
        Self {
            symbol: symbol.trim().to_ascii_uppercase(),
            timeframe: timeframe.trim().to_string(),
        }
    }

    pub fn bar_length(&self) -> anyhow::Result<Duration> {
        timeframe_duration(&self.timeframe)
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.symbol, self.timeframe)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleOutcome {
    pub regime: Regime,
    pub change_event: Option<ChangeEvent>,
    pub transition: Option<RegimeTransitionRecord>,
    /// Whole bars skipped between the previous candle and this one.
    pub missed_bars: u64,
}

/// Caller-side facts for one decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionContext {
    pub now: DateTime<Utc>,
    pub balance: f64,
    pub stop_distance: f64,
    pub value_per_unit: f64,
    pub recent_drawdown: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: Uuid,
    pub time: DateTime<Utc>,
    pub stream: StreamKey,
    pub regime: Regime,
    pub ensemble: EnsembleMetrics,
    pub conformal: Option<ConformalResult>,
    pub gate: GateDecision,
    pub risk: Option<RiskAdjustment>,
    pub position_size: f64,
}

#[derive(Debug)]
struct StreamState {
    change: RegimeChangeDetector,
    transition: RegimeTransitionMachine,
    candles: VecDeque<Candle>,
    last_change: Option<ChangeEvent>,
    bars_in_regime: u64,
    bar: Duration,
    missed_bars: u64,
}

impl StreamState {
    fn new(
        key: &StreamKey,
        bar: Duration,
        change: &RegimeChangeConfig,
        transition: &TransitionConfig,
    ) -> Self {
        Self {
            change: RegimeChangeDetector::new(&key.symbol, change.clone()),
            transition: RegimeTransitionMachine::new(&key.symbol, transition.clone()),
            candles: VecDeque::new(),
            last_change: None,
            bars_in_regime: 0,
            bar,
            missed_bars: 0,
        }
    }

    fn transition_strength(&self, now: DateTime<Utc>) -> f64 {
        match &self.last_change {
            Some(ev) if self.transition.is_in_transition(now) => ev.confidence,
            Some(ev) => ev.combined_strength,
            None => 0.0,
        }
    }
}

/// Owns per-stream detectors and runs the decision pipeline:
/// ensemble -> conformal -> gate -> risk adapter -> position size.
pub struct DecisionEngine {
    settings: EngineSettings,
    change_cfg: RegimeChangeConfig,
    transition_cfg: TransitionConfig,
    streams: HashMap<StreamKey, StreamState>,
    ensemble: Option<Arc<EnsembleEngine>>,
    conformal: Option<Arc<ConformalPredictor>>,
    calibrator: Option<Arc<ProbabilityCalibrator>>,
    gate: UncertaintyGate,
    risk: DynamicRiskAdapter,
    decay: KnowledgeDecayPolicy,
}

impl DecisionEngine {
    pub fn from_config(cfg: &Config) -> EngineResult<Self> {
        Ok(Self {
            settings: cfg.engine.clone(),
            change_cfg: cfg.regime.clone(),
            transition_cfg: cfg.transition.clone(),
            streams: HashMap::new(),
            ensemble: None,
            conformal: None,
            calibrator: None,
            gate: UncertaintyGate::new(cfg.gate),
            risk: DynamicRiskAdapter::new(cfg.risk)?,
            decay: KnowledgeDecayPolicy::new(cfg.decay),
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn install_ensemble(&mut self, ensemble: Arc<EnsembleEngine>) -> EngineResult<()> {
        if !ensemble.is_fitted() {
            return Err(EngineError::NotFitted("ensemble"));
        }
        self.ensemble = Some(ensemble);
        Ok(())
    }

    pub fn install_conformal(&mut self, conformal: Arc<ConformalPredictor>) -> EngineResult<()> {
        if !conformal.is_fitted() {
            return Err(EngineError::NotFitted("conformal predictor"));
        }
        self.conformal = Some(conformal);
        Ok(())
    }

    pub fn install_calibrator(&mut self, calibrator: Arc<ProbabilityCalibrator>) {
        self.calibrator = Some(calibrator);
    }

    pub fn gate_mut(&mut self) -> &mut UncertaintyGate {
        &mut self.gate
    }

    pub fn risk_adapter(&self) -> &DynamicRiskAdapter {
        &self.risk
    }

    pub fn decay_policy(&self) -> &KnowledgeDecayPolicy {
        &self.decay
    }

    /// Total bars skipped on the stream since it was first seen or reset.
    pub fn missed_bars(&self, key: &StreamKey) -> u64 {
        self.streams.get(key).map(|s| s.missed_bars).unwrap_or(0)
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn regime(&self, key: &StreamKey) -> Option<Regime> {
        self.streams.get(key).map(|s| s.transition.current_regime())
    }

    pub fn transitions(&self, key: &StreamKey) -> Vec<RegimeTransitionRecord> {
        self.streams
            .get(key)
            .map(|s| s.transition.history().cloned().collect())
            .unwrap_or_default()
    }

    /// Drops all state for the stream and the symbol's risk state.
    pub fn reset_stream(&mut self, key: &StreamKey) -> bool {
        let removed = self.streams.remove(key).is_some();
        if !self.streams.keys().any(|k| k.symbol == key.symbol) {
            self.risk.reset_for_symbol(&key.symbol);
        }
        removed
    }

    pub fn on_candle(&mut self, key: &StreamKey, candle: Candle) -> EngineResult<CandleOutcome> {
        if !candle.is_valid() {
            return Err(EngineError::InvalidInput(format!(
                "invalid candle for {} at {}",
                key, candle.time
            )));
        }
        let state = match self.streams.entry(key.clone()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                let bar = key.bar_length().map_err(|err| {
                    EngineError::InvalidInput(format!("stream {}: {:#}", key, err))
                })?;
                e.insert(StreamState::new(
                    key,
                    bar,
                    &self.change_cfg,
                    &self.transition_cfg,
                ))
            }
        };

        let now = candle.time;
        let mut missed_bars = 0;
        if let Some(prev) = state.candles.back() {
            if now <= prev.time {
                return Err(EngineError::InvalidInput(format!(
                    "candle for {} at {} is not after {}",
                    key, now, prev.time
                )));
            }
            let bar_ms = state.bar.num_milliseconds().max(1);
            let skipped = ((now - prev.time).num_milliseconds() - 1) / bar_ms;
            if skipped > 0 {
                missed_bars = skipped as u64;
                state.missed_bars += missed_bars;
                tracing::warn!(
                    stream = %key,
                    previous = %prev.time,
                    current = %now,
                    missed_bars,
                    "Candle gap"
                );
            }
        }
        let change_event = state.change.update(now, candle.close);
        if let Some(ev) = &change_event {
            state.last_change = Some(ev.clone());
        }

        state.candles.push_back(candle);
        while state.candles.len() > self.settings.candle_window.max(1) {
            let _ = state.candles.pop_front();
        }
        let window: Vec<Candle> = state.candles.iter().cloned().collect();
        let transition = state.transition.update_from_candles(now, &window);
        if transition.is_some() {
            state.bars_in_regime = 0;
        } else {
            state.bars_in_regime += 1;
        }

        Ok(CandleOutcome {
            regime: state.transition.current_regime(),
            change_event,
            transition,
            missed_bars,
        })
    }

    /// Decay context for weighting history against the stream's current regime.
    pub fn decay_context(&self, key: &StreamKey, now: DateTime<Utc>) -> DecayContext {
        let mut ctx = DecayContext::at(now, Regime::Unknown);
        if let Some(state) = self.streams.get(key) {
            ctx.current_regime = state.transition.current_regime();
            ctx.bars_in_regime = state.bars_in_regime as f64;
        }
        ctx
    }

    pub fn decide(
        &mut self,
        key: &StreamKey,
        features: &[f64],
        ctx: DecisionContext,
    ) -> EngineResult<DecisionRecord> {
        let ensemble = self
            .ensemble
            .as_ref()
            .ok_or(EngineError::NotFitted("ensemble"))?;
        let metrics = ensemble.predict_with_metrics(features)?;

        let conformal = match &self.conformal {
            Some(cp) => {
                let calibrator = self
                    .calibrator
                    .as_deref()
                    .map(|c| c as &dyn ProbabilityTransform);
                cp.predict_with_set(&[metrics.proba_mean], calibrator)?.pop()
            }
            None => None,
        };

        let mut input = GateInput::default().with_ensemble(metrics.clone());
        if let Some(c) = &conformal {
            input = input.with_conformal(c.clone());
        }
        let gate = self.gate.evaluate(&input);

        let (regime, transition_strength, volatility) = match self.streams.get(key) {
            Some(state) => (
                state.transition.current_regime(),
                state.transition_strength(ctx.now),
                state.change.last_volatility(),
            ),
            None => (Regime::Unknown, 0.0, None),
        };

        let (risk, position_size) = if gate.is_allowed() {
            let inputs = RiskInputs {
                transition_strength,
                ensemble_uncertainty: (2.0 * metrics.proba_std).min(1.0),
                recent_drawdown: ctx.recent_drawdown,
                volatility,
            };
            let adj = self.risk.adapt_risk(&key.symbol, regime, inputs, ctx.now);
            let size = self.risk.get_position_size(
                &key.symbol,
                ctx.balance,
                ctx.stop_distance,
                ctx.value_per_unit,
            );
            (Some(adj), size)
        } else {
            (None, 0.0)
        };

        let record = DecisionRecord {
            id: Uuid::new_v4(),
            time: ctx.now,
            stream: key.clone(),
            regime,
            ensemble: metrics,
            conformal,
            gate,
            risk,
            position_size,
        };
        tracing::info!(
            stream = %key,
            decision = %record.gate.decision,
            reason = %record.gate.reason,
            regime = %record.regime,
            size = record.position_size,
            "Decision"
        );
        Ok(record)
    }
}
