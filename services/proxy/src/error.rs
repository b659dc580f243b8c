//! Error types surfaced to connection handlers.

use std::time::Duration;

use thiserror::Error;

/// Why an Acquire did not yield a backend connection.
///
/// Cloneable because one failed startup is reported to every acquirer that
/// was queued behind it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcquireError {
    /// The control plane refused or failed the start command.
    #[error("start_failure: {0}")]
    StartFailure(String),

    /// The backend never became reachable within the startup window.
    #[error("poll_timeout: backend not reachable within {0:?}")]
    PollTimeout(Duration),

    /// The backend was believed ready but the dial failed.
    #[error("dial_failure: {0}")]
    DialFailure(String),

    /// The caller's deadline elapsed while waiting.
    #[error("acquire_cancelled: no connection within {0:?}")]
    Cancelled(Duration),

    /// The route controller is no longer running.
    #[error("controller stopped")]
    ControllerStopped,
}

impl AcquireError {
    /// Get the standardized reason code for this error.
    pub fn reason_code(&self) -> &'static str {
        match self {
            AcquireError::StartFailure(_) => "start_failure",
            AcquireError::PollTimeout(_) => "poll_timeout",
            AcquireError::DialFailure(_) => "dial_failure",
            AcquireError::Cancelled(_) => "acquire_cancelled",
            AcquireError::ControllerStopped => "controller_stopped",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes_match_display_prefix() {
        let errors = [
            AcquireError::StartFailure("crafty down".into()),
            AcquireError::PollTimeout(Duration::from_secs(120)),
            AcquireError::DialFailure("connection refused".into()),
            AcquireError::Cancelled(Duration::from_secs(1)),
        ];

        for err in errors {
            assert!(
                err.to_string().starts_with(err.reason_code()),
                "{} should start with {}",
                err,
                err.reason_code()
            );
        }
    }
}
