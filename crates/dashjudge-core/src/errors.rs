use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct ConfigError(pub String);

/// Normalized failure of a generation or judge completion call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("provider error: {0}")]
    Unknown(String),
}

impl ProviderError {
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Timeout(_) => "timeout",
            ProviderError::RateLimited { .. } => "rate_limit",
            ProviderError::Auth(_) => "auth",
            ProviderError::InvalidResponse(_) => "invalid_response",
            ProviderError::Unknown(_) => "unknown",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout(_) | ProviderError::RateLimited { .. }
        )
    }

    /// Maps an HTTP status and body to the normalized taxonomy.
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 | 403 => ProviderError::Auth(format!("HTTP {}: {}", status, body)),
            408 | 504 => ProviderError::Timeout(Duration::ZERO),
            429 => ProviderError::RateLimited { retry_after: None },
            _ => ProviderError::Unknown(format!("HTTP {}: {}", status, body)),
        }
    }
}

/// Run-level failures. These end the whole run with status `failed`.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("no active test cases")]
    NoActiveTestCases,

    #[error("run {0} not found")]
    RunNotFound(i64),

    #[error("run {id} is {status}; expected pending")]
    NotPending { id: i64, status: String },

    #[error("prompt '{id}' (version {version}) not found")]
    PromptNotFound { id: String, version: String },

    #[error("prompt '{id}' has role {actual}, expected {expected}")]
    PromptRoleMismatch {
        id: String,
        actual: &'static str,
        expected: &'static str,
    },

    #[error("model '{0}' is not configured")]
    ModelNotFound(String),

    #[error("no judge {0} configured for this run")]
    JudgeNotConfigured(&'static str),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<anyhow::Error> for RunError {
    fn from(e: anyhow::Error) -> Self {
        RunError::Storage(format!("{:#}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ProviderError::Timeout(Duration::from_secs(3)).is_retryable());
        assert!(ProviderError::RateLimited { retry_after: None }.is_retryable());
        assert!(!ProviderError::Auth("bad key".into()).is_retryable());
        assert!(!ProviderError::InvalidResponse("empty".into()).is_retryable());
        assert!(!ProviderError::Unknown("boom".into()).is_retryable());
    }

    #[test]
    fn test_from_status() {
        assert_eq!(ProviderError::from_status(401, "").kind(), "auth");
        assert_eq!(ProviderError::from_status(429, "slow down").kind(), "rate_limit");
        assert_eq!(ProviderError::from_status(504, "").kind(), "timeout");
        assert_eq!(ProviderError::from_status(500, "oops").kind(), "unknown");
    }
}
