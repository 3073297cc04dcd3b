use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::indicator::stats::{
    efficiency_ratio, linear_slope, mean, percentile_rank, population_std, simple_returns,
};
use crate::model::{Candle, CandleColumns, Regime};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitionConfig {
    pub min_bars: usize,
    /// Least-squares slope per bar, relative to mean price.
    pub trend_slope_threshold: f64,
    pub trend_efficiency: f64,
    pub high_vol_percentile: f64,
    pub high_vol_atr_ratio: f64,
    pub chaotic_percentile: f64,
    pub chaotic_atr_ratio: f64,
    pub chaotic_efficiency: f64,
    pub exhaustion_lookback: usize,
    pub exhaustion_volume_ratio: f64,
    /// `None` treats any recorded transition as "in transition".
    pub transition_window_minutes: Option<i64>,
    pub min_confidence: f64,
    pub max_history: usize,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            min_bars: 20,
            trend_slope_threshold: 0.0005,
            trend_efficiency: 0.35,
            high_vol_percentile: 0.8,
            high_vol_atr_ratio: 1.3,
            chaotic_percentile: 0.95,
            chaotic_atr_ratio: 1.8,
            chaotic_efficiency: 0.2,
            exhaustion_lookback: 3,
            exhaustion_volume_ratio: 1.8,
            transition_window_minutes: Some(30),
            min_confidence: 0.0,
            max_history: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeTransitionRecord {
    pub time: DateTime<Utc>,
    pub symbol: String,
    pub from_regime: Regime,
    pub to_regime: Regime,
    pub confidence: f64,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegimeAssessment {
    pub regime: Regime,
    pub confidence: f64,
    pub reasons: Vec<String>,
}

/// Regimes that may directly follow `from`. A trend cannot flip to the opposite trend
/// without passing through exhaustion, range or high volatility first, and chaos only
/// de-escalates through high volatility or range.
pub fn valid_transitions(from: Regime) -> &'static [Regime] {
    use Regime::*;
    match from {
        Range => &[TrendUp, TrendDown, HighVol, Chaotic, Unknown],
        TrendUp => &[Exhaustion, Range, HighVol, Chaotic, Unknown],
        TrendDown => &[Exhaustion, Range, HighVol, Chaotic, Unknown],
        Exhaustion => &[Range, TrendUp, TrendDown, HighVol, Chaotic, Unknown],
        HighVol => &[Range, TrendUp, TrendDown, Exhaustion, Chaotic, Unknown],
        Chaotic => &[HighVol, Range, Unknown],
        Unknown => &[Range, TrendUp, TrendDown, Exhaustion, HighVol, Chaotic],
    }
}

pub fn is_valid_transition(from: Regime, to: Regime) -> bool {
    valid_transitions(from).contains(&to)
}

#[derive(Debug, Clone)]
pub struct RegimeTransitionMachine {
    symbol: String,
    cfg: TransitionConfig,
    current: Regime,
    confidence: f64,
    history: VecDeque<RegimeTransitionRecord>,
}

impl RegimeTransitionMachine {
    pub fn new(symbol: &str, cfg: TransitionConfig) -> Self {
        Self {
            symbol: symbol.to_string(),
            cfg,
            current: Regime::Unknown,
            confidence: 0.0,
            history: VecDeque::new(),
        }
    }

    pub fn current_regime(&self) -> Regime {
        self.current
    }

    pub fn current_confidence(&self) -> f64 {
        self.confidence
    }

    pub fn history(&self) -> impl Iterator<Item = &RegimeTransitionRecord> {
        self.history.iter()
    }

    pub fn detect_regime(
        &self,
        closes: &[f64],
        highs: &[f64],
        lows: &[f64],
        volumes: &[f64],
    ) -> RegimeAssessment {
        classify(&self.cfg, closes, highs, lows, volumes)
    }

    /// Classify the window and commit the result when it is a permitted transition.
    /// Returns the committed transition, if any.
    pub fn update_regime(
        &mut self,
        now: DateTime<Utc>,
        closes: &[f64],
        highs: &[f64],
        lows: &[f64],
        volumes: &[f64],
    ) -> Option<RegimeTransitionRecord> {
        let assessment = self.detect_regime(closes, highs, lows, volumes);
        if assessment.regime == self.current {
            self.confidence = assessment.confidence;
            return None;
        }
        if assessment.confidence < self.cfg.min_confidence {
            return None;
        }
        if !is_valid_transition(self.current, assessment.regime) {
            tracing::debug!(
                symbol = %self.symbol,
                from = %self.current,
                to = %assessment.regime,
                "Rejected transition not in table"
            );
            return None;
        }

        let record = RegimeTransitionRecord {
            time: now,
            symbol: self.symbol.clone(),
            from_regime: self.current,
            to_regime: assessment.regime,
            confidence: assessment.confidence,
            reasons: assessment.reasons,
        };
        tracing::info!(
            symbol = %self.symbol,
            from = %record.from_regime,
            to = %record.to_regime,
            confidence = record.confidence,
            "Regime transition"
        );
        self.current = record.to_regime;
        self.confidence = record.confidence;
        self.history.push_back(record.clone());
        while self.history.len() > self.cfg.max_history.max(1) {
            let _ = self.history.pop_front();
        }
        Some(record)
    }

    pub fn update_from_candles(
        &mut self,
        now: DateTime<Utc>,
        candles: &[Candle],
    ) -> Option<RegimeTransitionRecord> {
        let cols: CandleColumns = candles.iter().collect();
        self.update_regime(now, &cols.closes, &cols.highs, &cols.lows, &cols.volumes)
    }

    pub fn is_in_transition(&self, now: DateTime<Utc>) -> bool {
        let Some(last) = self.history.back() else {
            return false;
        };
        match self.cfg.transition_window_minutes {
            Some(minutes) => last.time >= now - Duration::minutes(minutes),
            None => true,
        }
    }

    pub fn get_recent_transitions(
        &self,
        minutes: i64,
        now: DateTime<Utc>,
    ) -> Vec<&RegimeTransitionRecord> {
        let cutoff = now - Duration::minutes(minutes);
        self.history.iter().filter(|r| r.time >= cutoff).collect()
    }

    pub fn reset(&mut self) {
        self.current = Regime::Unknown;
        self.confidence = 0.0;
        self.history.clear();
    }
}

fn classify(
    cfg: &TransitionConfig,
    closes: &[f64],
    highs: &[f64],
    lows: &[f64],
    volumes: &[f64],
) -> RegimeAssessment {
    let n = closes.len();
    if n < cfg.min_bars.max(5) || closes.iter().any(|p| !p.is_finite() || *p <= 0.0) {
        return RegimeAssessment {
            regime: Regime::Unknown,
            confidence: 0.0,
            reasons: vec![format!("insufficient history ({} bars)", n)],
        };
    }

    let returns = simple_returns(closes);
    let sub = (n / 4).max(5).min(returns.len());
    let rolling_vols: Vec<f64> = returns
        .windows(sub)
        .map(population_std)
        .collect();
    let current_vol = rolling_vols.last().copied().unwrap_or(0.0);
    let vol_pct = percentile_rank(&rolling_vols, current_vol);
    let atr_ratio = range_expansion(closes, highs, lows, &returns, sub);

    let avg_price = mean(closes);
    let slope = linear_slope(closes) / avg_price;
    let er = efficiency_ratio(closes);

    if vol_pct >= cfg.chaotic_percentile
        && atr_ratio >= cfg.chaotic_atr_ratio
        && er < cfg.chaotic_efficiency
    {
        return RegimeAssessment {
            regime: Regime::Chaotic,
            confidence: margin_confidence(atr_ratio / cfg.chaotic_atr_ratio - 1.0),
            reasons: vec![
                format!("volatility percentile {:.2}", vol_pct),
                format!("range expansion {:.2}x", atr_ratio),
                format!("efficiency {:.2} < {:.2}", er, cfg.chaotic_efficiency),
            ],
        };
    }

    if let Some(assessment) = exhaustion(cfg, closes, volumes) {
        return assessment;
    }

    if vol_pct >= cfg.high_vol_percentile && atr_ratio >= cfg.high_vol_atr_ratio {
        return RegimeAssessment {
            regime: Regime::HighVol,
            confidence: margin_confidence(atr_ratio / cfg.high_vol_atr_ratio - 1.0),
            reasons: vec![
                format!("volatility percentile {:.2}", vol_pct),
                format!("range expansion {:.2}x", atr_ratio),
            ],
        };
    }

    if er >= cfg.trend_efficiency && slope.abs() >= cfg.trend_slope_threshold {
        let regime = if slope > 0.0 {
            Regime::TrendUp
        } else {
            Regime::TrendDown
        };
        let margin = (er - cfg.trend_efficiency) / (1.0 - cfg.trend_efficiency).max(1e-9);
        return RegimeAssessment {
            regime,
            confidence: margin_confidence(margin),
            reasons: vec![
                format!("efficiency {:.2} >= {:.2}", er, cfg.trend_efficiency),
                format!("slope {:+.5}/bar", slope),
            ],
        };
    }

    let range_margin = 1.0 - er / cfg.trend_efficiency.max(1e-9);
    RegimeAssessment {
        regime: Regime::Range,
        confidence: margin_confidence(range_margin),
        reasons: vec![
            format!("efficiency {:.2} < {:.2}", er, cfg.trend_efficiency),
            format!("slope {:+.5}/bar", slope),
        ],
    }
}

/// Recent average true range relative to the whole window. Falls back to absolute
/// returns when highs/lows do not line up with closes.
fn range_expansion(closes: &[f64], highs: &[f64], lows: &[f64], returns: &[f64], sub: usize) -> f64 {
    let ranges: Vec<f64> = if highs.len() == closes.len() && lows.len() == closes.len() {
        (0..closes.len())
            .map(|i| {
                let hl = highs[i] - lows[i];
                let tr = if i == 0 {
                    hl
                } else {
                    hl.max((highs[i] - closes[i - 1]).abs())
                        .max((lows[i] - closes[i - 1]).abs())
                };
                tr / closes[i]
            })
            .collect()
    } else {
        returns.iter().map(|r| r.abs()).collect()
    };
    let overall = mean(&ranges);
    if overall <= f64::EPSILON {
        return 1.0;
    }
    let recent = mean(&ranges[ranges.len().saturating_sub(sub)..]);
    recent / overall
}

fn exhaustion(cfg: &TransitionConfig, closes: &[f64], volumes: &[f64]) -> Option<RegimeAssessment> {
    let k = cfg.exhaustion_lookback.max(1);
    let n = closes.len();
    if volumes.len() != n || n <= k + 5 {
        return None;
    }
    let prior = &closes[..n - k];
    let prior_slope = linear_slope(prior) / mean(prior);
    let prior_er = efficiency_ratio(prior);
    if prior_er < cfg.trend_efficiency || prior_slope.abs() < cfg.trend_slope_threshold {
        return None;
    }
    let recent_move = closes[n - 1] - closes[n - 1 - k];
    if recent_move == 0.0 || recent_move.signum() == prior_slope.signum() {
        return None;
    }
    let prior_volume = mean(&volumes[..n - k]);
    if prior_volume <= f64::EPSILON {
        return None;
    }
    let volume_ratio = mean(&volumes[n - k..]) / prior_volume;
    if volume_ratio < cfg.exhaustion_volume_ratio {
        return None;
    }
    Some(RegimeAssessment {
        regime: Regime::Exhaustion,
        confidence: margin_confidence(volume_ratio / cfg.exhaustion_volume_ratio - 1.0),
        reasons: vec![
            format!("prior trend efficiency {:.2}", prior_er),
            format!("reversal over last {} bars", k),
            format!("volume spike {:.2}x", volume_ratio),
        ],
    })
}

fn margin_confidence(margin: f64) -> f64 {
    if !margin.is_finite() {
        return 0.5;
    }
    (0.5 + 0.5 * margin.clamp(0.0, 1.0)).clamp(0.0, 1.0)
}
