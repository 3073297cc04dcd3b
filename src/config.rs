use anyhow::{bail, Context, Result};
use chrono::Duration;
use serde::Deserialize;
use std::path::Path;

use crate::calibration::CalibrationConfig;
use crate::conformal::ConformalConfig;
use crate::decay::DecayConfig;
use crate::engine::EngineSettings;
use crate::ensemble::EnsembleConfig;
use crate::gate::GateConfig;
use crate::regime::{RegimeChangeConfig, TransitionConfig};
use crate::risk::RiskAdapterConfig;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
pub const CONFIG_PATH_ENV: &str = "REGIME_GATE_CONFIG";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub regime: RegimeChangeConfig,
    #[serde(default)]
    pub transition: TransitionConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub ensemble: EnsembleConfig,
    #[serde(default)]
    pub conformal: ConformalConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub risk: RiskAdapterConfig,
    #[serde(default)]
    pub decay: DecayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Bar length for a timeframe label such as "30s", "5m", "4h", "1d" or "1w".
pub fn timeframe_duration(label: &str) -> Result<Duration> {
    let label = label.trim();
    let Some(unit) = label.chars().last() else {
        bail!("timeframe is empty");
    };
    let count: i64 = label[..label.len() - unit.len_utf8()]
        .parse()
        .with_context(|| format!("timeframe '{}' must start with a bar count", label))?;
    if count <= 0 {
        bail!("timeframe '{}' must have a positive bar count", label);
    }
    let bar = match unit {
        's' => Duration::try_seconds(count),
        'm' => Duration::try_minutes(count),
        'h' => Duration::try_hours(count),
        'd' => Duration::try_days(count),
        'w' => Duration::try_weeks(count),
        other => bail!("timeframe '{}' has unknown unit '{}' (use s/m/h/d/w)", label, other),
    };
    bar.with_context(|| format!("timeframe '{}' is out of range", label))
}

impl Config {
    /// Loads `.env`, then the file named by `REGIME_GATE_CONFIG` or `config/default.toml`.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        Self::from_toml_str(&config_str)
            .with_context(|| format!("failed to load {}", config_path.display()))
    }

    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml_str).context("failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        timeframe_duration(&self.engine.timeframe).context("engine.timeframe is invalid")?;
        if self.engine.candle_window < self.transition.min_bars {
            bail!(
                "engine.candle_window ({}) must be >= transition.min_bars ({})",
                self.engine.candle_window,
                self.transition.min_bars
            );
        }
        if !(self.conformal.alpha > 0.0 && self.conformal.alpha < 1.0) {
            bail!("conformal.alpha must lie in (0, 1), got {}", self.conformal.alpha);
        }
        if !(self.conformal.calibration_fraction > 0.0 && self.conformal.calibration_fraction < 1.0)
        {
            bail!(
                "conformal.calibration_fraction must lie in (0, 1), got {}",
                self.conformal.calibration_fraction
            );
        }
        if self.ensemble.models.is_empty() {
            bail!("ensemble.models must not be empty");
        }
        self.risk.validate().context("risk section is invalid")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationMethod;
    use crate::ensemble::{ClassifierKind, VotingMode};

    #[test]
    fn parse_full_toml() {
        let toml_str = r#"
[engine]
symbol = "ETHUSDT"
timeframe = "5m"
candle_window = 120

[regime]
base_threshold = 4.0

[transition]
min_bars = 30
transition_window_minutes = 15

[calibration]
method = "ISOTONIC"

[ensemble.voting]
mode = "WEIGHTED"
weights = [0.5, 0.5]

[[ensemble.models]]
id = "lr"
kind = "logistic"
epochs = 100

[[ensemble.models]]
id = "gb"
kind = "gradient-boosting"
max_depth = 2

[gate]
max_model_disagreement = 0.3

[risk.regime_factors]
high_vol = 0.5

[logging]
level = "debug"
"#;
        let config = Config::from_toml_str(toml_str).unwrap();
        assert_eq!(config.engine.symbol, "ETHUSDT");
        assert_eq!(config.engine.candle_window, 120);
        assert!((config.regime.base_threshold - 4.0).abs() < f64::EPSILON);
        assert_eq!(config.regime.min_history, 20);
        assert_eq!(config.transition.min_bars, 30);
        assert_eq!(config.transition.transition_window_minutes, Some(15));
        assert_eq!(config.calibration.method, CalibrationMethod::Isotonic);
        assert_eq!(
            config.ensemble.voting,
            VotingMode::Weighted {
                weights: Some(vec![0.5, 0.5])
            }
        );
        assert_eq!(config.ensemble.models.len(), 2);
        assert_eq!(config.ensemble.models[1].config.kind, ClassifierKind::GradientBoosting);
        assert_eq!(config.ensemble.models[0].config.epochs, 100);
        assert!((config.gate.max_model_disagreement - 0.3).abs() < f64::EPSILON);
        assert!((config.gate.max_proba_std - 0.15).abs() < f64::EPSILON);
        assert!((config.risk.regime_factors.high_vol - 0.5).abs() < f64::EPSILON);
        assert!((config.risk.regime_factors.chaotic - 0.0).abs() < f64::EPSILON);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn empty_toml_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.engine.timeframe, "1m");
        assert_eq!(config.ensemble.models.len(), 3);
        assert_eq!(config.ensemble.voting, VotingMode::Soft);
        assert!((config.conformal.alpha - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn rejects_invalid_sections() {
        assert!(Config::from_toml_str("[conformal]\nalpha = 1.0\n").is_err());
        assert!(Config::from_toml_str("[engine]\ntimeframe = \"1x\"\n").is_err());
        assert!(Config::from_toml_str("[risk]\nbase_risk = 2.0\n").is_err());
        assert!(Config::from_toml_str("[engine]\ncandle_window = 5\n").is_err());
    }

    #[test]
    fn timeframe_labels_map_to_bar_length() {
        assert_eq!(timeframe_duration("1m").unwrap(), Duration::minutes(1));
        assert_eq!(timeframe_duration(" 4h ").unwrap(), Duration::hours(4));
        assert_eq!(timeframe_duration("1w").unwrap(), Duration::days(7));
    }

    #[test]
    fn malformed_timeframes_are_rejected() {
        for label in ["", "m", "0m", "-1m", "1x", "1M", "99999999999999w"] {
            assert!(timeframe_duration(label).is_err(), "accepted {:?}", label);
        }
    }
}
