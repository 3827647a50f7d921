//! Live conversation state
//!
//! Holds the message history sent to the model each turn (the system prompt
//! is kept outside and prepended per request) and the ledger of side
//! effects that already happened.

use scribe_core::{ChatMessage, Role, ToolCall};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Marker opening a compressed summary entry
pub const SUMMARY_HEADER: &str = "[CONTEXT SUMMARY]";

/// A side-effecting tool call that succeeded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedCall {
    /// Stable digest of tool name + canonical arguments
    pub signature: String,
    /// What the call acted on, e.g. `file:story/chapter_01.md`
    #[serde(default)]
    pub target: String,
    pub tool: String,
    /// Short human description, e.g. `create chapter_01.md in story`
    pub description: String,
    /// Result text returned to the model the first time
    pub result: String,
}

/// Ledger of completed calls
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompletedCalls {
    calls: Vec<CompletedCall>,
}

impl CompletedCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signature for a tool call: sha256 over the name and canonical JSON arguments
    pub fn signature(name: &str, arguments: &serde_json::Value) -> String {
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(canonical_json(arguments).as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Most recent successful call on `target`
    pub fn latest_for(&self, target: &str) -> Option<&CompletedCall> {
        self.calls.iter().rev().find(|c| c.target == target)
    }

    pub fn record(&mut self, call: CompletedCall) {
        self.calls.push(call);
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Markdown bullet list of completed actions
    pub fn render(&self) -> String {
        if self.is_empty() {
            return "- (none yet)\n".to_string();
        }
        self.calls
            .iter()
            .map(|c| format!("- {}: {}\n", c.tool, c.description))
            .collect()
    }
}

/// JSON text with object keys sorted at every level
fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", serde_json::Value::String(k.clone()), canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        serde_json::Value::Array(items) => {
            let items: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        other => other.to_string(),
    }
}

/// Ordered dialogue history
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
    completed: CompletedCalls,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a first user message
    pub fn with_prompt(prompt: impl Into<String>) -> Self {
        let mut conversation = Self::new();
        conversation.push_user(prompt);
        conversation
    }

    /// Rebuild from persisted state
    pub fn restore(messages: Vec<ChatMessage>, completed: CompletedCalls) -> Self {
        let mut conversation = Self { messages, completed };
        conversation.drop_dangling_tool_calls();
        conversation
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>, tool_calls: Vec<ToolCall>) {
        self.messages
            .push(ChatMessage::assistant_with_tools(content, tool_calls));
    }

    pub fn push_tool_result(&mut self, tool_call_id: impl Into<String>, content: impl Into<String>) {
        self.messages
            .push(ChatMessage::tool_result(tool_call_id, content));
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Messages with the system prompt prepended, ready for a request
    pub fn messages_with_system(&self, system_prompt: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.messages.len() + 1);
        messages.push(ChatMessage::system(system_prompt));
        messages.extend(self.messages.iter().cloned());
        messages
    }

    pub fn completed(&self) -> &CompletedCalls {
        &self.completed
    }

    pub fn completed_mut(&mut self) -> &mut CompletedCalls {
        &mut self.completed
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Replace the whole history with one summary entry. The ledger is kept.
    pub fn replace_with_summary(&mut self, summary_entry: impl Into<String>) {
        self.messages.clear();
        self.messages.push(ChatMessage::user(summary_entry));
    }

    /// Remove a trailing assistant turn whose tool calls never got results
    fn drop_dangling_tool_calls(&mut self) {
        let Some(idx) = self
            .messages
            .iter()
            .rposition(|m| m.role == Role::Assistant && !m.requested_tools().is_empty())
        else {
            return;
        };

        let answered = self.messages[idx + 1..]
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect::<Vec<_>>();

        let complete = self.messages[idx]
            .requested_tools()
            .iter()
            .all(|c| answered.contains(&c.id.as_str()));

        if !complete {
            self.messages.truncate(idx);
        }
    }
}
