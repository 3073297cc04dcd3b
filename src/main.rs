use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;

use regime_gate::calibration::{ProbabilityCalibrator, ProbabilityTransform};
use regime_gate::config::Config;
use regime_gate::conformal::ConformalPredictor;
use regime_gate::decay::sample_weights;
use regime_gate::engine::{DecisionContext, DecisionEngine, DecisionRecord, StreamKey};
use regime_gate::ensemble::EnsembleEngine;
use regime_gate::model::{Candle, Regime};
use regime_gate::regime::{ChangeEvent, RegimeTransitionRecord};
use regime_gate::replay::{drawdown_from_peak, labelled_rows, lagged_returns, read_candles_jsonl};

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ReplayLine<'a> {
    Change(&'a ChangeEvent),
    Transition(&'a RegimeTransitionRecord),
    Training {
        train_rows: usize,
        calibration_rows: usize,
        model_weights: &'a [f64],
        ece: Option<f64>,
        conformal_threshold: Option<f64>,
    },
    Decision(&'a DecisionRecord),
}

fn emit(line: &ReplayLine<'_>) -> Result<()> {
    println!("{}", serde_json::to_string(line).context("failed to encode output line")?);
    Ok(())
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let (config, candles_path) = match args.as_slice() {
        [_, config_path, candles] => (Config::load_from(Path::new(config_path))?, candles.clone()),
        [_, candles] => (Config::load()?, candles.clone()),
        _ => bail!("usage: regime-gate [config.toml] <candles.jsonl>"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                config
                    .logging
                    .level
                    .parse()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
            }),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .json()
        .init();

    let file = File::open(&candles_path).with_context(|| format!("failed to open {}", candles_path))?;
    let candles = read_candles_jsonl(BufReader::new(file))?;
    tracing::info!(
        symbol = %config.engine.symbol,
        timeframe = %config.engine.timeframe,
        candles = candles.len(),
        "Starting regime-gate replay"
    );
    run_replay(&config, &candles)
}

fn run_replay(config: &Config, candles: &[Candle]) -> Result<()> {
    let lags = config.engine.feature_lags.max(1);
    let warmup = candles.len() / 2;
    if warmup < config.transition.min_bars.max(lags + 10) {
        bail!(
            "need at least {} candles, got {}",
            2 * config.transition.min_bars.max(lags + 10),
            candles.len()
        );
    }

    let key = StreamKey::new(&config.engine.symbol, &config.engine.timeframe);
    let mut engine = DecisionEngine::from_config(config)?;
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let mut regimes: Vec<Regime> = Vec::with_capacity(candles.len());

    for candle in &candles[..warmup] {
        let outcome = engine.on_candle(&key, candle.clone())?;
        report_outcome(outcome.change_event.as_ref(), outcome.transition.as_ref())?;
        regimes.push(outcome.regime);
    }

    // Rows up to warmup - 1 so labels never look past the warmup slice.
    let (idx, x, y) = labelled_rows(&closes[..warmup], 0..warmup, lags);
    let calib_len = ((idx.len() as f64) * config.conformal.calibration_fraction).round() as usize;
    let split = idx.len().saturating_sub(calib_len.max(1));
    if split < 10 {
        bail!("not enough labelled rows to train ({} rows)", idx.len());
    }

    let now = candles[warmup - 1].time;
    let ctx = engine.decay_context(&key, now);
    let stamps: Vec<_> = idx[..split]
        .iter()
        .map(|t| (candles[*t].time, regimes[*t]))
        .collect();
    let weights = sample_weights(&stamps, engine.decay_policy(), &ctx);

    let mut ensemble = EnsembleEngine::from_config(&config.ensemble)?;
    ensemble.fit_weighted(&x[..split], &y[..split], &weights)?;
    let calib_probas = ensemble.predict_proba(&x[split..])?;

    let calibrator = if config.calibration.enabled {
        let mut calibrator = ProbabilityCalibrator::from_config(&config.calibration);
        calibrator.fit(&y[split..], &calib_probas)?;
        Some(Arc::new(calibrator))
    } else {
        None
    };

    let mut conformal_threshold = None;
    if config.conformal.enabled {
        let mut conformal = ConformalPredictor::new(config.conformal.alpha)?;
        conformal.fit_calibration_set(&x[split..], &y[split..])?;
        let threshold = conformal.set_threshold_from_calibration(
            &y[split..],
            &calib_probas,
            calibrator
                .as_deref()
                .map(|c| c as &dyn ProbabilityTransform),
        )?;
        conformal_threshold = Some(threshold);
        engine.install_conformal(Arc::new(conformal))?;
    }
    emit(&ReplayLine::Training {
        train_rows: split,
        calibration_rows: idx.len() - split,
        model_weights: ensemble.weights(),
        ece: calibrator
            .as_ref()
            .and_then(|c| c.expected_calibration_error()),
        conformal_threshold,
    })?;
    if let Some(calibrator) = calibrator {
        engine.install_calibrator(calibrator);
    }
    engine.install_ensemble(Arc::new(ensemble))?;

    let mut summary: BTreeMap<&'static str, usize> = BTreeMap::new();
    for t in warmup..candles.len() {
        let candle = candles[t].clone();
        let outcome = engine.on_candle(&key, candle.clone())?;
        report_outcome(outcome.change_event.as_ref(), outcome.transition.as_ref())?;

        let Some(features) = lagged_returns(&closes, t, lags) else {
            continue;
        };
        let stop_distance =
            config.engine.stop_range_multiple * candle.true_range(Some(closes[t - 1]));
        let window_start = t.saturating_sub(config.engine.candle_window);
        let ctx = DecisionContext {
            now: candle.time,
            balance: config.engine.account_balance,
            stop_distance,
            value_per_unit: config.engine.value_per_unit,
            recent_drawdown: drawdown_from_peak(&closes[window_start..=t]),
        };
        let record = engine.decide(&key, &features, ctx)?;
        *summary.entry(record.gate.reason.as_str()).or_default() += 1;
        emit(&ReplayLine::Decision(&record))?;
    }

    tracing::info!(summary = ?summary, "Replay finished");
    Ok(())
}

fn report_outcome(
    change: Option<&ChangeEvent>,
    transition: Option<&RegimeTransitionRecord>,
) -> Result<()> {
    if let Some(ev) = change.filter(|ev| ev.change_detected) {
        emit(&ReplayLine::Change(ev))?;
    }
    if let Some(tr) = transition {
        emit(&ReplayLine::Transition(tr))?;
    }
    Ok(())
}
