//! Error types for the Crafty client.

use thiserror::Error;

/// Errors returned by [`crate::CraftyClient`].
#[derive(Debug, Error)]
pub enum CraftyError {
    /// The request could not be sent or the body could not be decoded.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Crafty answered with a non-success status.
    #[error("crafty returned {status} for {endpoint}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// The login call succeeded at the HTTP level but yielded no token.
    #[error("authorization failed: {0}")]
    Login(String),

    /// No server registered in Crafty listens on the requested port.
    #[error("no such server on port {0}")]
    NoSuchServer(u16),
}

impl CraftyError {
    /// Short, stable identifier for logs.
    pub fn reason_code(&self) -> &'static str {
        match self {
            CraftyError::Http(_) => "http_failed",
            CraftyError::Status { .. } => "bad_status",
            CraftyError::Login(_) => "authorization_failed",
            CraftyError::NoSuchServer(_) => "no_such_server",
        }
    }
}
