// Error taxonomy for the fix pipeline
//
// Validator rejections are not errors; see `validator::RejectReason`.

use thiserror::Error;

/// A tracking policy that cannot be made active
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
    #[error("policy name must not be empty")]
    EmptyName,

    #[error("{field} must be a finite value > 0 (got {value})")]
    NonPositive { field: &'static str, value: f64 },

    #[error("unknown tracking preset: {0}")]
    UnknownPreset(String),
}

/// A payload from the transport that could not be turned into fixes
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("empty payload")]
    Empty,

    #[error("invalid payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("fix #{sequence} rejected: {reason}")]
    InvalidFix { sequence: u64, reason: String },
}

/// Outcome of a failed send on one delivery tier
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("peer not reachable")]
    Unreachable,

    #[error("send timed out")]
    Timeout,

    #[error("transient send failure: {0}")]
    Transient(String),

    #[error("permanent send failure: {0}")]
    Permanent(String),

    #[error("channel closed")]
    Closed,
}

impl SendError {
    /// Whether a later attempt with the same payload might succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, SendError::Timeout | SendError::Transient(_) | SendError::Unreachable)
    }
}

/// Relay lifecycle failures
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay has been shut down")]
    Stopped,

    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(SendError::Timeout.is_retryable());
        assert!(SendError::Unreachable.is_retryable());
        assert!(SendError::Transient("busy".into()).is_retryable());
        assert!(!SendError::Permanent("rejected".into()).is_retryable());
        assert!(!SendError::Closed.is_retryable());
    }

    #[test]
    fn test_policy_error_message() {
        let err = PolicyError::NonPositive { field: "max_fix_staleness_seconds", value: 0.0 };
        assert_eq!(err.to_string(), "max_fix_staleness_seconds must be a finite value > 0 (got 0)");
    }
}
