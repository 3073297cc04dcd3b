use std::io::BufRead;

use anyhow::{Context, Result};

use crate::model::Candle;

/// Reads one JSON candle per line; blank lines are skipped.
pub fn read_candles_jsonl<R: BufRead>(reader: R) -> Result<Vec<Candle>> {
    let mut out = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", i + 1))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let candle: Candle = serde_json::from_str(trimmed)
            .with_context(|| format!("invalid candle on line {}", i + 1))?;
        out.push(candle);
    }
    Ok(out)
}

/// The `lags` most recent simple returns ending at close `t`, oldest first.
/// `None` until `t >= lags`.
pub fn lagged_returns(closes: &[f64], t: usize, lags: usize) -> Option<Vec<f64>> {
    if lags == 0 || t < lags || t >= closes.len() {
        return None;
    }
    let row: Vec<f64> = (t + 1 - lags..=t)
        .map(|k| {
            let prev = closes[k - 1];
            if prev.abs() > f64::EPSILON {
                (closes[k] - prev) / prev
            } else {
                0.0
            }
        })
        .collect();
    Some(row)
}

/// Feature rows with next-bar direction labels for every `t` in `range` that has both
/// enough history and a following close.
pub fn labelled_rows(
    closes: &[f64],
    range: std::ops::Range<usize>,
    lags: usize,
) -> (Vec<usize>, Vec<Vec<f64>>, Vec<u8>) {
    let mut idx = Vec::new();
    let mut x = Vec::new();
    let mut y = Vec::new();
    for t in range {
        if t + 1 >= closes.len() {
            break;
        }
        if let Some(row) = lagged_returns(closes, t, lags) {
            idx.push(t);
            x.push(row);
            y.push(u8::from(closes[t + 1] > closes[t]));
        }
    }
    (idx, x, y)
}

/// Fractional decline from the running peak of `closes`.
pub fn drawdown_from_peak(closes: &[f64]) -> f64 {
    let Some(last) = closes.last() else {
        return 0.0;
    };
    let peak = closes.iter().copied().fold(f64::MIN, f64::max);
    if peak <= 0.0 {
        0.0
    } else {
        ((peak - last) / peak).max(0.0)
    }
}
