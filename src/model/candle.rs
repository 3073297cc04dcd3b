use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

impl Candle {
    pub fn is_bullish(&self) -> bool {
        self.close >= self.open
    }

    /// High-low range, widened to include a gap from the previous close.
    pub fn true_range(&self, prev_close: Option<f64>) -> f64 {
        let hl = self.high - self.low;
        match prev_close {
            Some(pc) => hl.max((self.high - pc).abs()).max((self.low - pc).abs()),
            None => hl,
        }
    }

    pub fn is_valid(&self) -> bool {
        [self.open, self.high, self.low, self.close, self.volume]
            .iter()
            .all(|v| v.is_finite())
            && self.close > 0.0
            && self.high >= self.low
    }
}

/// Column view over a candle window, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct CandleColumns {
    pub closes: Vec<f64>,
    pub highs: Vec<f64>,
    pub lows: Vec<f64>,
    pub volumes: Vec<f64>,
}

impl<'a> FromIterator<&'a Candle> for CandleColumns {
    fn from_iter<I: IntoIterator<Item = &'a Candle>>(iter: I) -> Self {
        let mut out = CandleColumns::default();
        for c in iter {
            out.closes.push(c.close);
            out.highs.push(c.high);
            out.lows.push(c.low);
            out.volumes.push(c.volume);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            time: Utc.timestamp_millis_opt(60_000).unwrap(),
            open,
            high,
            low,
            close,
            volume: 10.0,
        }
    }

    #[test]
    fn bullish_and_bearish() {
        assert!(candle(100.0, 105.0, 95.0, 102.0).is_bullish());
        assert!(!candle(100.0, 105.0, 90.0, 95.0).is_bullish());
    }

    #[test]
    fn true_range_includes_gap() {
        let c = candle(110.0, 112.0, 108.0, 111.0);
        assert!((c.true_range(None) - 4.0).abs() < f64::EPSILON);
        assert!((c.true_range(Some(100.0)) - 12.0).abs() < f64::EPSILON);
    }

    #[test]
    fn columns_preserve_order() {
        let candles = vec![
            candle(1.0, 2.0, 0.5, 1.5),
            candle(1.5, 3.0, 1.0, 2.5),
        ];
        let cols: CandleColumns = candles.iter().collect();
        assert_eq!(cols.closes, vec![1.5, 2.5]);
        assert_eq!(cols.highs, vec![2.0, 3.0]);
        assert_eq!(cols.volumes.len(), 2);
    }

    #[test]
    fn rejects_non_positive_close() {
        assert!(!candle(1.0, 1.0, 1.0, 0.0).is_valid());
        assert!(candle(1.0, 1.0, 1.0, 1.0).is_valid());
    }
}
