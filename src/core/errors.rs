use std::time::Duration;

/// Failures of a single reasoning-service call. Every variant is recoverable by the
/// calling component's own fallback.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    #[error("reasoning service unavailable: {reason}")]
    Transient { reason: String },

    #[error("reasoning service timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("reasoning service rate limited")]
    RateLimited,

    #[error("malformed reasoning response: {reason}")]
    Malformed { reason: String },
}

impl ServiceError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
        }
    }
}

/// Exceptional outcomes of a matching call. Low confidence and empty candidate sets are
/// reported through `MatchOutcome`, not here.
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error("candidate supply failed: {reason}")]
    CandidateSupply { reason: String },
}
