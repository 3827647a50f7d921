//! Conversation compression
//!
//! Builds the one-shot summarization request, and the summary entry that
//! replaces the conversation once the model (or the fallback) has answered.

use std::fmt::Write as _;

use scribe_core::{ApiError, ChatBackend, ChatMessage, ChatRequest, Role, Usage};
use tracing::debug;

use super::tokenizer::Tokenizer;
use super::tracker::{ContextLimits, MESSAGE_OVERHEAD_TOKENS};
use crate::conversation::{CompletedCalls, SUMMARY_HEADER};

pub const SUMMARY_SYSTEM_PROMPT: &str = "You are summarizing the working history of an autonomous writing agent \
so it can continue after its context is cleared. Write a dense, factual summary covering: the user's original \
request and any constraints, the project name and every file written so far with what each contains, the current \
state of the work (what is finished, what is partially written and where it stopped), style and continuity notes \
(characters, settings, tone, plot threads), and the concrete next steps. Do not invent progress. Do not write new \
story content.";

const TOOL_ARGUMENT_PREVIEW_CHARS: usize = 600;
const FALLBACK_LAST_TEXT_CHARS: usize = 2000;

/// Everything besides the transcript that goes into a summary entry
#[derive(Debug, Clone, Default)]
pub struct WorkspaceSnapshot {
    pub project: Option<String>,
    /// Content files of the active project with their sizes
    pub files: Vec<(String, u64)>,
}

impl WorkspaceSnapshot {
    fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Active project: {}", self.project.as_deref().unwrap_or("(none)"));
        if self.files.is_empty() {
            out.push_str("Files written: (none)\n");
        } else {
            out.push_str("Files written:\n");
            for (name, size) in &self.files {
                let _ = writeln!(out, "- {} ({} bytes)", name, size);
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Compressor {
    tokenizer: Tokenizer,
    limits: ContextLimits,
    max_summary_tokens: usize,
}

impl Compressor {
    pub fn new(tokenizer: Tokenizer, limits: ContextLimits, max_summary_tokens: usize) -> Self {
        Self {
            tokenizer,
            limits,
            max_summary_tokens,
        }
    }

    /// Token budget for the model-written summary
    pub fn summary_budget(&self, base_tokens: usize) -> usize {
        let room = self.limits.compression_threshold.saturating_sub(base_tokens) / 2;
        self.max_summary_tokens.min(room).max(1)
    }

    /// Render messages oldest to newest, dropping the oldest until the text fits `budget`
    pub fn render_transcript(&self, messages: &[ChatMessage], budget: usize) -> String {
        let mut kept: Vec<String> = Vec::new();
        let mut used = 0usize;

        for msg in messages.iter().rev() {
            let block = render_message(msg);
            let cost = self.tokenizer.count_tokens(&block);
            if used + cost > budget {
                break;
            }
            used += cost;
            kept.push(block);
        }

        let dropped = messages.len() - kept.len();
        kept.reverse();

        let mut out = String::new();
        if dropped > 0 {
            let _ = writeln!(out, "({} earlier messages omitted)\n", dropped);
        }
        out.push_str(&kept.join("\n"));
        out
    }

    /// The tool-less summarization request
    pub fn build_request(
        &self,
        model: &str,
        messages: &[ChatMessage],
        base_tokens: usize,
        temperature: Option<f32>,
    ) -> ChatRequest {
        let summary_budget = self.summary_budget(base_tokens);
        let fixed = self.tokenizer.count_tokens(SUMMARY_SYSTEM_PROMPT) + 2 * MESSAGE_OVERHEAD_TOKENS;
        let transcript_budget = self
            .limits
            .compression_threshold
            .saturating_sub(fixed + summary_budget);

        let transcript = self.render_transcript(messages, transcript_budget);
        let prompt = format!(
            "Summarize the following conversation history.\n\n{}\n\nEnd of history. Write the summary now.",
            transcript
        );

        ChatRequest::new(
            model,
            vec![ChatMessage::system(SUMMARY_SYSTEM_PROMPT), ChatMessage::user(prompt)],
        )
        .with_temperature(temperature)
        .with_max_tokens(u32::try_from(summary_budget).ok())
    }

    /// Ask the model for a summary, returning it with the reported usage
    pub async fn summarize<B: ChatBackend + ?Sized>(
        &self,
        backend: &B,
        request: &ChatRequest,
    ) -> Result<(String, Option<Usage>), ApiError> {
        let response = backend.complete(request).await?;
        let text = response.message.content.trim().to_string();
        if text.is_empty() {
            return Err(ApiError::EmptyResponse);
        }
        Ok((text, response.usage))
    }

    /// Summary built without the model
    pub fn fallback_summary(&self, messages: &[ChatMessage], completed: &CompletedCalls) -> String {
        let mut out = String::from(
            "The model summary was unavailable; this record was assembled from the history.\n\n",
        );

        if let Some(first) = messages.iter().find(|m| m.role == Role::User) {
            let _ = writeln!(out, "Original request:\n{}\n", truncate_chars(&first.content, FALLBACK_LAST_TEXT_CHARS));
        }
        let _ = writeln!(out, "Completed actions:\n{}", completed.render());

        let last = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant && !m.content.trim().is_empty());
        if let Some(msg) = last {
            let _ = writeln!(
                out,
                "Last assistant message:\n{}",
                truncate_chars(msg.content.trim(), FALLBACK_LAST_TEXT_CHARS)
            );
        }
        out
    }

    /// The single message that replaces the conversation
    ///
    /// Always fits under the compression threshold together with `base_tokens`.
    pub fn summary_entry(
        &self,
        summary: &str,
        snapshot: &WorkspaceSnapshot,
        completed: &CompletedCalls,
        base_tokens: usize,
    ) -> String {
        let summary = self
            .tokenizer
            .truncate_to_tokens(summary.trim(), self.summary_budget(base_tokens));

        let entry = format!(
            "{}\n\n{}\nCompleted actions (already done, do not repeat):\n{}\n## Summary\n\n{}\n\n\
Continue the work from where it left off.",
            SUMMARY_HEADER,
            snapshot.render(),
            completed.render(),
            summary
        );

        let allowed = self
            .limits
            .compression_threshold
            .saturating_sub(base_tokens + MESSAGE_OVERHEAD_TOKENS + 1);
        self.fit(entry, allowed)
    }

    fn fit(&self, text: String, allowed: usize) -> String {
        let mut text = text;
        let mut target = allowed;
        while self.tokenizer.count_tokens(&text) > allowed && target > 0 {
            debug!(tokens = self.tokenizer.count_tokens(&text), allowed, "Truncating summary entry");
            text = self.tokenizer.truncate_to_tokens(&text, target);
            target = target * 9 / 10;
        }
        if self.tokenizer.count_tokens(&text) > allowed {
            text.clear();
        }
        text
    }
}

fn render_message(msg: &ChatMessage) -> String {
    let mut out = String::new();
    let label = match msg.role {
        Role::Tool => format!("tool result ({})", msg.tool_call_id.as_deref().unwrap_or("?")),
        other => other.to_string(),
    };
    let _ = writeln!(out, "### {}", label);
    if !msg.content.trim().is_empty() {
        let _ = writeln!(out, "{}", msg.content.trim());
    }
    for call in msg.requested_tools() {
        let _ = writeln!(
            out,
            "[called {}({})]",
            call.function.name,
            truncate_chars(&call.function.arguments, TOOL_ARGUMENT_PREVIEW_CHARS)
        );
    }
    out
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
