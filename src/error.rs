//! Error taxonomy for the engine.
//!
//! Only malformed input surfaces here. Quality judgments (low confidence,
//! poisoning anomalies, weak calibration) are returned as result fields.

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },

    #[error("Empty input: {what}")]
    EmptyInput { what: String },

    #[error("Non-finite value in {context} at component {index}")]
    NonFinite { context: String, index: usize },

    #[error("Challenge {id} expired at {expired_at_ms} (now {now_ms})")]
    ChallengeExpired {
        id: Uuid,
        expired_at_ms: u64,
        now_ms: u64,
    },

    #[error("Challenge mismatch: {reason}")]
    ChallengeMismatch { reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },
}

impl EngineError {
    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        EngineError::InvalidConfig {
            reason: reason.into(),
        }
    }

    pub(crate) fn dimension(context: impl Into<String>, expected: usize, actual: usize) -> Self {
        EngineError::DimensionMismatch {
            context: context.into(),
            expected,
            actual,
        }
    }

    pub(crate) fn empty(what: impl Into<String>) -> Self {
        EngineError::EmptyInput { what: what.into() }
    }

    /// Reject `values` if any component is NaN or infinite.
    pub(crate) fn check_finite(context: impl Into<String>, values: &[f32]) -> Result<()> {
        match values.iter().position(|x| !x.is_finite()) {
            Some(index) => Err(EngineError::NonFinite {
                context: context.into(),
                index,
            }),
            None => Ok(()),
        }
    }

    pub(crate) fn serialization(reason: impl Into<String>) -> Self {
        EngineError::Serialization {
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::serialization(err.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::dimension("align input", 128, 64);
        let msg = err.to_string();
        assert!(msg.contains("align input"));
        assert!(msg.contains("128"));
        assert!(msg.contains("64"));
    }

    #[test]
    fn test_check_finite_reports_first_bad_component() {
        assert!(EngineError::check_finite("v", &[1.0, 2.0]).is_ok());
        let err = EngineError::check_finite("v", &[1.0, f32::INFINITY, f32::NAN]).unwrap_err();
        assert_eq!(
            err,
            EngineError::NonFinite {
                context: "v".to_string(),
                index: 1
            }
        );
    }

    #[test]
    fn test_json_error_maps_to_serialization() {
        let bad: std::result::Result<Vec<f32>, _> = serde_json::from_str("{not json");
        let err: EngineError = bad.unwrap_err().into();
        assert!(matches!(err, EngineError::Serialization { .. }));
    }
}
