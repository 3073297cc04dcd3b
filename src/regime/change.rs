use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::changepoint::{BocpdConfig, BocpdDetector, CusumConfig, CusumDetector, CusumUpdate};
use crate::indicator::stats::population_std;

/// Volatility is less noisy than raw returns, slope is noisier.
const VOLATILITY_THRESHOLD_MULT: f64 = 0.8;
const SLOPE_THRESHOLD_MULT: f64 = 1.2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeChangeConfig {
    pub base_threshold: f64,
    pub drift: f64,
    /// Lookback for the volatility and slope metrics.
    pub window: usize,
    pub min_history: usize,
    pub bocpd: BocpdConfig,
    pub bocpd_change_threshold: f64,
    pub change_confidence_threshold: f64,
}

impl Default for RegimeChangeConfig {
    fn default() -> Self {
        Self {
            base_threshold: 5.0,
            drift: 0.5,
            window: 20,
            min_history: 20,
            bocpd: BocpdConfig::default(),
            bocpd_change_threshold: 0.5,
            change_confidence_threshold: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeMetric {
    Return,
    Volatility,
    Slope,
}

impl ChangeMetric {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Return => "return",
            Self::Volatility => "volatility",
            Self::Slope => "slope",
        }
    }
}

impl fmt::Display for ChangeMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub time: DateTime<Utc>,
    pub symbol: String,
    pub change_detected: bool,
    /// Strongest of the three CUSUM strengths.
    pub cusum_strength: f64,
    pub bocpd_probability: f64,
    pub metric_changed: ChangeMetric,
    /// Mean of the three CUSUM strengths.
    pub combined_strength: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy)]
struct MetricPoint {
    ret: f64,
    volatility: f64,
    slope: f64,
}

/// Per-symbol change detector: CUSUM on return, volatility and slope plus BOCPD on volatility.
#[derive(Debug, Clone)]
pub struct RegimeChangeDetector {
    symbol: String,
    cfg: RegimeChangeConfig,
    prices: VecDeque<f64>,
    return_cusum: CusumDetector,
    volatility_cusum: CusumDetector,
    slope_cusum: CusumDetector,
    bocpd: BocpdDetector,
    fitted: bool,
    last_volatility: Option<f64>,
    last_event: Option<ChangeEvent>,
}

impl RegimeChangeDetector {
    pub fn new(symbol: &str, cfg: RegimeChangeConfig) -> Self {
        let mut cfg = cfg;
        cfg.window = cfg.window.max(3);
        cfg.min_history = cfg.min_history.max(3);
        let cusum = |mult: f64| {
            CusumDetector::new(CusumConfig {
                threshold: cfg.base_threshold * mult,
                drift: cfg.drift,
            })
        };
        Self {
            symbol: symbol.to_string(),
            return_cusum: cusum(1.0),
            volatility_cusum: cusum(VOLATILITY_THRESHOLD_MULT),
            slope_cusum: cusum(SLOPE_THRESHOLD_MULT),
            bocpd: BocpdDetector::new(cfg.bocpd),
            prices: VecDeque::with_capacity(cfg.window.max(cfg.min_history) + 1),
            cfg,
            fitted: false,
            last_volatility: None,
            last_event: None,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Feed one price. Returns an event once `min_history` prices are buffered and the
    /// combined confidence clears `change_confidence_threshold`.
    pub fn update(&mut self, time: DateTime<Utc>, price: f64) -> Option<ChangeEvent> {
        if !price.is_finite() || price <= 0.0 {
            tracing::debug!(symbol = %self.symbol, price, "Ignoring invalid price");
            return None;
        }
        self.prices.push_back(price);
        let cap = self.cfg.window.max(self.cfg.min_history) + 1;
        while self.prices.len() > cap {
            let _ = self.prices.pop_front();
        }
        if self.prices.len() < self.cfg.min_history {
            return None;
        }

        let latest = if self.fitted {
            self.latest_metrics()
        } else {
            self.fit_baseline()
        };
        self.last_volatility = Some(latest.volatility);

        let ret = self.return_cusum.update(latest.ret);
        let vol = self.volatility_cusum.update(latest.volatility);
        let slope = self.slope_cusum.update(latest.slope);
        let bocpd = self.bocpd.update(latest.volatility);

        let event = self.build_event(time, [ret, vol, slope], bocpd.change_probability);
        if event.confidence < self.cfg.change_confidence_threshold {
            return None;
        }
        if event.change_detected {
            tracing::info!(
                symbol = %self.symbol,
                metric = %event.metric_changed,
                confidence = event.confidence,
                bocpd = event.bocpd_probability,
                "Regime change detected"
            );
        }
        self.last_event = Some(event.clone());
        Some(event)
    }

    pub fn last_volatility(&self) -> Option<f64> {
        self.last_volatility
    }

    pub fn last_event(&self) -> Option<&ChangeEvent> {
        self.last_event.as_ref()
    }

    pub fn history_len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_ready(&self) -> bool {
        self.fitted
    }

    pub fn reset(&mut self) {
        *self = Self::new(&self.symbol, self.cfg.clone());
    }

    fn build_event(
        &self,
        time: DateTime<Utc>,
        updates: [CusumUpdate; 3],
        bocpd_probability: f64,
    ) -> ChangeEvent {
        const METRICS: [ChangeMetric; 3] = [
            ChangeMetric::Return,
            ChangeMetric::Volatility,
            ChangeMetric::Slope,
        ];
        let mut best = 0;
        for (i, u) in updates.iter().enumerate().skip(1) {
            if u.strength > updates[best].strength {
                best = i;
            }
        }
        let combined_strength = updates.iter().map(|u| u.strength).sum::<f64>() / 3.0;
        let change_detected = updates.iter().any(|u| u.changed)
            || bocpd_probability > self.cfg.bocpd_change_threshold;
        ChangeEvent {
            time,
            symbol: self.symbol.clone(),
            change_detected,
            cusum_strength: updates[best].strength,
            bocpd_probability,
            metric_changed: METRICS[best],
            combined_strength,
            confidence: ((combined_strength + bocpd_probability) / 2.0).clamp(0.0, 1.0),
        }
    }

    /// Fit the CUSUM references and warm BOCPD on the buffered history, then hand back
    /// the newest metric point for the regular update path.
    fn fit_baseline(&mut self) -> MetricPoint {
        let prices: Vec<f64> = self.prices.iter().copied().collect();
        let series = metric_series(&prices, self.cfg.window);
        let (latest, baseline) = match series.split_last() {
            Some((last, rest)) => (*last, rest),
            None => (
                MetricPoint {
                    ret: 0.0,
                    volatility: 0.0,
                    slope: 0.0,
                },
                &[][..],
            ),
        };
        let returns: Vec<f64> = baseline.iter().map(|m| m.ret).collect();
        let vols: Vec<f64> = baseline.iter().map(|m| m.volatility).collect();
        let slopes: Vec<f64> = baseline.iter().map(|m| m.slope).collect();
        self.return_cusum.fit(&returns);
        self.volatility_cusum.fit(&vols);
        self.slope_cusum.fit(&slopes);
        for v in &vols {
            let _ = self.bocpd.update(*v);
        }
        self.fitted = true;
        tracing::debug!(
            symbol = %self.symbol,
            baseline = baseline.len(),
            "Change detector baseline fitted"
        );
        latest
    }

    fn latest_metrics(&self) -> MetricPoint {
        let prices: Vec<f64> = self.prices.iter().copied().collect();
        metric_at(&prices, prices.len() - 1, self.cfg.window)
    }
}

fn metric_series(prices: &[f64], window: usize) -> Vec<MetricPoint> {
    (1..prices.len()).map(|j| metric_at(prices, j, window)).collect()
}

/// Metrics at price index `j` (>= 1), using only prices up to and including `j`.
fn metric_at(prices: &[f64], j: usize, window: usize) -> MetricPoint {
    let prev = prices[j - 1];
    let ret = if prev.abs() > f64::EPSILON {
        (prices[j] - prev) / prev
    } else {
        0.0
    };

    let ret_start = (j + 1).saturating_sub(window).max(1);
    let window_returns: Vec<f64> = (ret_start..=j)
        .map(|k| {
            let p0 = prices[k - 1];
            if p0.abs() > f64::EPSILON {
                (prices[k] - p0) / p0
            } else {
                0.0
            }
        })
        .collect();
    let volatility = population_std(&window_returns);

    let slope_start = (j + 1).saturating_sub(window);
    let first = prices[slope_start];
    let span = (j - slope_start) as f64;
    let slope = if span > 0.0 && first.abs() > f64::EPSILON {
        (prices[j] - first) / (first * span)
    } else {
        0.0
    };

    MetricPoint {
        ret,
        volatility,
        slope,
    }
}
