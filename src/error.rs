use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not fitted: {0}")]
    NotFitted(&'static str),

    #[error("unknown setting '{0}'")]
    UnknownSetting(String),

    #[error("calibration error: {0}")]
    Calibration(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

pub(crate) fn ensure_binary_labels(y: &[u8]) -> EngineResult<()> {
    if let Some(bad) = y.iter().find(|v| **v > 1) {
        return Err(EngineError::InvalidInput(format!(
            "labels must be 0 or 1, got {}",
            bad
        )));
    }
    Ok(())
}

pub(crate) fn ensure_probabilities(p: &[f64]) -> EngineResult<()> {
    if let Some(bad) = p.iter().find(|v| !v.is_finite() || **v < 0.0 || **v > 1.0) {
        return Err(EngineError::InvalidInput(format!(
            "probabilities must lie in [0, 1], got {}",
            bad
        )));
    }
    Ok(())
}

pub(crate) fn ensure_same_len(what: &str, a: usize, b: usize) -> EngineResult<()> {
    if a == 0 || b == 0 {
        return Err(EngineError::InvalidInput(format!("{} is empty", what)));
    }
    if a != b {
        return Err(EngineError::InvalidInput(format!(
            "{} length mismatch ({} vs {})",
            what, a, b
        )));
    }
    Ok(())
}
