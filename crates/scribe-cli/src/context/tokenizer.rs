//! Token counting using tiktoken
//!
//! Hosted models rarely publish their tokenizer; cl100k_base is close enough
//! for budget decisions. When the encoder cannot be built the count falls
//! back to characters / 4.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tiktoken_rs::{cl100k_base, CoreBPE};

/// Fallback estimate when the encoder is unavailable
const FALLBACK_CHARS_PER_TOKEN: usize = 4;

static CL100K_TOKENIZER: Lazy<Mutex<Option<CoreBPE>>> = Lazy::new(|| Mutex::new(cl100k_base().ok()));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenizerType {
    /// GPT-4 family encoding, the approximation used for every model
    Cl100kBase,
    /// Character-count estimate
    Fallback,
}

#[derive(Debug, Clone, Copy)]
pub struct Tokenizer {
    tokenizer_type: TokenizerType,
}

impl Tokenizer {
    /// cl100k_base for every model, or the char estimate if it fails to load
    pub fn new() -> Self {
        if CL100K_TOKENIZER.lock().is_some() {
            Self::with_type(TokenizerType::Cl100kBase)
        } else {
            Self::with_type(TokenizerType::Fallback)
        }
    }

    pub fn with_type(tokenizer_type: TokenizerType) -> Self {
        Self { tokenizer_type }
    }

    pub fn tokenizer_type(&self) -> TokenizerType {
        self.tokenizer_type
    }

    /// Count tokens in the given text
    pub fn count_tokens(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        match self.tokenizer_type {
            TokenizerType::Cl100kBase => {
                let guard = CL100K_TOKENIZER.lock();
                match *guard {
                    Some(ref bpe) => bpe.encode_with_special_tokens(text).len(),
                    None => fallback_count(text),
                }
            }
            TokenizerType::Fallback => fallback_count(text),
        }
    }

    /// Truncate text to fit within a token limit, keeping the beginning
    pub fn truncate_to_tokens(&self, text: &str, max_tokens: usize) -> String {
        match self.tokenizer_type {
            TokenizerType::Cl100kBase => {
                let guard = CL100K_TOKENIZER.lock();
                if let Some(ref bpe) = *guard {
                    let tokens = bpe.encode_with_special_tokens(text);
                    if tokens.len() <= max_tokens {
                        return text.to_string();
                    }
                    match bpe.decode(tokens[..max_tokens].to_vec()) {
                        Ok(decoded) => decoded,
                        Err(_) => fallback_truncate(text, max_tokens),
                    }
                } else {
                    fallback_truncate(text, max_tokens)
                }
            }
            TokenizerType::Fallback => fallback_truncate(text, max_tokens),
        }
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

fn fallback_count(text: &str) -> usize {
    text.chars().count() / FALLBACK_CHARS_PER_TOKEN
}

fn fallback_truncate(text: &str, max_tokens: usize) -> String {
    text.chars()
        .take(max_tokens * FALLBACK_CHARS_PER_TOKEN)
        .collect()
}
