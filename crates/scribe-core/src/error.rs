//! Error types shared across the workspace

use thiserror::Error;

/// Failure talking to the chat completion endpoint
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("chat API HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("failed to decode chat response: {0}")]
    Decode(String),

    #[error("chat response contained no choices")]
    EmptyResponse,
}

impl ApiError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Http { status, .. } => *status == 429 || (500..600).contains(status),
            ApiError::Request(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ApiError::Decode(_) => false,
            ApiError::EmptyResponse => true,
        }
    }
}

/// Startup configuration problems
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} environment variable not set. Set your API key: export {var}='your-key-here'")]
    MissingApiKey { var: String },

    #[error("compression threshold ({threshold}) must be below the token limit ({limit})")]
    InvalidThreshold { threshold: usize, limit: usize },

    #[error("{field} must be greater than zero")]
    ZeroValue { field: &'static str },
}
