//! Context window management
//!
//! - **Tokenizer**: token counting using tiktoken, with a character fallback
//! - **TokenTracker**: running estimate of the request size against the limits
//! - **Compressor**: summarization request and the summary entry that
//!   replaces the conversation
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut tracker = TokenTracker::new(Tokenizer::new(), ContextLimits::default())
//!     .with_base_text(&system_prompt);
//!
//! tracker.observe(conversation.messages());
//! if tracker.should_compress() {
//!     // summarize and replace the history
//! }
//! ```

pub mod compressor;
pub mod tokenizer;
pub mod tracker;

pub use compressor::{Compressor, WorkspaceSnapshot};
pub use tokenizer::Tokenizer;
pub use tracker::{ContextLimits, TokenTracker};
