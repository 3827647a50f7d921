//! Token usage tracking against the context window

use scribe_core::ChatMessage;

use super::tokenizer::Tokenizer;

/// Fixed cost of role/formatting tokens per message
pub const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Hard limit and compression trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextLimits {
    pub token_limit: usize,
    pub compression_threshold: usize,
}

impl ContextLimits {
    pub fn new(token_limit: usize, compression_threshold: usize) -> Self {
        Self {
            token_limit,
            compression_threshold,
        }
    }
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self::new(200_000, 180_000)
    }
}

/// Estimates conversation size and decides when to compress
#[derive(Debug, Clone)]
pub struct TokenTracker {
    tokenizer: Tokenizer,
    limits: ContextLimits,
    /// Tokens sent with every request regardless of history (system prompt, tool schemas)
    base_tokens: usize,
    current: usize,
}

impl TokenTracker {
    pub fn new(tokenizer: Tokenizer, limits: ContextLimits) -> Self {
        Self {
            tokenizer,
            limits,
            base_tokens: 0,
            current: 0,
        }
    }

    /// Account for a fixed preamble (system prompt, tool definitions)
    pub fn with_base_text(mut self, preamble: &str) -> Self {
        self.base_tokens = self.tokenizer.count_tokens(preamble) + MESSAGE_OVERHEAD_TOKENS;
        self.current = self.base_tokens;
        self
    }

    pub fn limits(&self) -> ContextLimits {
        self.limits
    }

    pub fn base_tokens(&self) -> usize {
        self.base_tokens
    }

    /// Estimate tokens for a single message
    pub fn message_tokens(&self, message: &ChatMessage) -> usize {
        let calls: usize = message
            .requested_tools()
            .iter()
            .map(|c| {
                self.tokenizer.count_tokens(&c.function.name)
                    + self.tokenizer.count_tokens(&c.function.arguments)
            })
            .sum();

        self.tokenizer.count_tokens(&message.content) + calls + MESSAGE_OVERHEAD_TOKENS
    }

    /// Estimate tokens for the whole request without recording it
    pub fn estimate(&self, messages: &[ChatMessage]) -> usize {
        self.base_tokens + messages.iter().map(|m| self.message_tokens(m)).sum::<usize>()
    }

    /// Re-count the conversation and remember the result
    pub fn observe(&mut self, messages: &[ChatMessage]) -> usize {
        self.current = self.estimate(messages);
        self.current
    }

    /// Last observed count and its share of the hard limit (percent)
    pub fn usage(&self) -> (usize, f32) {
        let pct = if self.limits.token_limit == 0 {
            100.0
        } else {
            self.current as f32 / self.limits.token_limit as f32 * 100.0
        };
        (self.current, pct)
    }

    pub fn should_compress(&self) -> bool {
        self.current >= self.limits.compression_threshold
    }

    /// Tokens left before the compression trigger
    pub fn headroom(&self) -> usize {
        self.limits.compression_threshold.saturating_sub(self.current)
    }
}
