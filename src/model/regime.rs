use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Regime {
    Range,
    TrendUp,
    TrendDown,
    Exhaustion,
    HighVol,
    Chaotic,
    Unknown,
}

impl Regime {
    pub const ALL: [Regime; 7] = [
        Regime::Range,
        Regime::TrendUp,
        Regime::TrendDown,
        Regime::Exhaustion,
        Regime::HighVol,
        Regime::Chaotic,
        Regime::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Range => "RANGE",
            Self::TrendUp => "TREND_UP",
            Self::TrendDown => "TREND_DOWN",
            Self::Exhaustion => "EXHAUSTION",
            Self::HighVol => "HIGH_VOL",
            Self::Chaotic => "CHAOTIC",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn is_trending(self) -> bool {
        matches!(self, Self::TrendUp | Self::TrendDown)
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Regime {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Regime::ALL
            .into_iter()
            .find(|r| r.as_str() == normalized)
            .ok_or_else(|| EngineError::InvalidInput(format!("unknown regime '{}'", s)))
    }
}
