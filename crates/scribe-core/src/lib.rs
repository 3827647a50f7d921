//! scribe-core: Shared library for the scribe writing agent
//!
//! Provides:
//! - Configuration loading (scribe.toml)
//! - OpenAI-compatible chat wire types
//! - Chat completion client with retry
//! - Error types

pub mod client;
pub mod config;
pub mod error;
pub mod message;
pub mod retry;

pub use client::{parse_completion, ChatBackend, ChatClient};
pub use config::{mask_key, Config};
pub use error::{ApiError, ConfigError};
pub use message::{
    ChatMessage, ChatRequest, ChatResponse, FunctionCall, FunctionDefinition, Role, ToolCall,
    ToolDefinition, Usage,
};
pub use retry::RetryConfig;
