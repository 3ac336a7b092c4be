//! Error taxonomy for the copy-trade pipeline.
//!
//! Each variant maps to a distinct propagation policy:
//! - `DataUnavailable`: skip the affected leader for this cycle, never fatal.
//! - `Retryable`: retry with backoff up to the configured attempt budget.
//! - `Fatal`: abort the affected signal only, no retry.
//! - `RiskHalt`: stop the orchestrator; resuming requires operator action.
//! - `StaleData`: discard silently (but log): sequence regressions and
//!   signals past the follow window.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CopyError {
    /// Both upstream providers failed for one call.
    #[error("no data source available: {0}")]
    DataUnavailable(String),

    /// Transient failure (timeout, rate limit, 5xx). Safe to retry.
    #[error("retryable: {0}")]
    Retryable(String),

    /// Venue rejection or invalid parameters. Do not retry.
    #[error("fatal: {0}")]
    Fatal(String),

    /// A risk limit was breached. The orchestrator must stop.
    #[error("risk halt: {0}")]
    RiskHalt(String),

    /// Out-of-order or expired data, discarded.
    #[error("stale data: {0}")]
    StaleData(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl CopyError {
    /// Whether the execution engine should retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CopyError::Retryable(_))
    }

    /// Classify an HTTP status into the retry taxonomy.
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        if status.as_u16() == 429 || status.is_server_error() {
            CopyError::Retryable(format!("{status}: {body}"))
        } else {
            CopyError::Fatal(format!("{status}: {body}"))
        }
    }
}

impl From<reqwest::Error> for CopyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            CopyError::Retryable(err.to_string())
        } else if err.is_decode() {
            CopyError::Fatal(format!("malformed response: {err}"))
        } else {
            CopyError::Retryable(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, CopyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        let rate_limited =
            CopyError::from_status(reqwest::StatusCode::TOO_MANY_REQUESTS, String::new());
        assert!(rate_limited.is_retryable());

        let server_err =
            CopyError::from_status(reqwest::StatusCode::BAD_GATEWAY, String::new());
        assert!(server_err.is_retryable());

        let rejected = CopyError::from_status(reqwest::StatusCode::BAD_REQUEST, String::new());
        assert!(!rejected.is_retryable());
    }
}
