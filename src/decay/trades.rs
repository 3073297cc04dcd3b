use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::Regime;

use super::{DecayContext, KnowledgeDecayPolicy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalTrade {
    pub time: DateTime<Utc>,
    pub regime: Regime,
    pub pnl: f64,
    #[serde(default)]
    pub holding_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightedTradeStats {
    /// Sum of decay weights.
    pub n_eff: f64,
    pub weighted_wins: f64,
    pub weighted_losses: f64,
    pub win_rate: f64,
    pub avg_pnl: f64,
    pub avg_holding_ms: f64,
}

/// Aggregates trades with the combined decay factor as weight. Flat trades count
/// towards `n_eff` but neither wins nor losses.
pub fn weighted_trade_stats(
    trades: &[HistoricalTrade],
    policy: &KnowledgeDecayPolicy,
    ctx: &DecayContext,
) -> WeightedTradeStats {
    let mut out = WeightedTradeStats::default();
    let mut pnl_sum = 0.0;
    let mut holding_sum = 0.0;
    for t in trades {
        let w = policy.combined_decay(t.time, t.regime, ctx).combined;
        out.n_eff += w;
        pnl_sum += w * t.pnl;
        holding_sum += w * t.holding_ms as f64;
        if t.pnl > 0.0 {
            out.weighted_wins += w;
        } else if t.pnl < 0.0 {
            out.weighted_losses += w;
        }
    }
    if out.n_eff > f64::EPSILON {
        out.avg_pnl = pnl_sum / out.n_eff;
        out.avg_holding_ms = holding_sum / out.n_eff;
    }
    let decided = out.weighted_wins + out.weighted_losses;
    if decided > f64::EPSILON {
        out.win_rate = out.weighted_wins / decided;
    }
    out
}

/// Per-row training weights for samples observed at `(time, regime)`.
pub fn sample_weights(
    samples: &[(DateTime<Utc>, Regime)],
    policy: &KnowledgeDecayPolicy,
    ctx: &DecayContext,
) -> Vec<f64> {
    samples
        .iter()
        .map(|(time, regime)| policy.combined_decay(*time, *regime, ctx).combined)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn recent_trades_dominate() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).single().expect("valid time");
        let trades = vec![
            HistoricalTrade {
                time: now - Duration::days(90),
                regime: Regime::Range,
                pnl: -1.0,
                holding_ms: 0,
            },
            HistoricalTrade {
                time: now,
                regime: Regime::Range,
                pnl: 1.0,
                holding_ms: 0,
            },
        ];
        let policy = KnowledgeDecayPolicy::default();
        let stats = weighted_trade_stats(&trades, &policy, &DecayContext::at(now, Regime::Range));
        assert!((stats.n_eff - 1.125).abs() < 1e-9);
        assert!((stats.win_rate - 1.0 / 1.125).abs() < 1e-9);
        assert!(stats.avg_pnl > 0.0);
    }
}
