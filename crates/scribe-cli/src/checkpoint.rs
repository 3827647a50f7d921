//! Checkpoint persistence
//!
//! A checkpoint is a markdown file a person can read, with the machine state
//! needed for `run --recover` appended as a fenced JSON block.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use scribe_core::ChatMessage;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::conversation::{CompletedCalls, Conversation};

/// File name prefix shared by every checkpoint
pub const CHECKPOINT_PREFIX: &str = ".context_summary_";

/// Version of the JSON state block
pub const CHECKPOINT_VERSION: u32 = 1;

const STATE_MARKER: &str = "<!-- scribe-checkpoint -->";
const STATE_FENCE: &str = "```json\n";
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%6f";
const RECENT_MESSAGES: usize = 8;
const RECENT_MESSAGE_CHARS: usize = 400;
const MAX_COLLISIONS: usize = 1000;

pub fn is_checkpoint_file(name: &str) -> bool {
    name.starts_with(CHECKPOINT_PREFIX)
}

/// Why a checkpoint was written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointReason {
    Interval,
    Compression,
    Interrupted,
    BudgetExceeded,
    TransportFailure,
}

impl std::fmt::Display for CheckpointReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Interval => "interval",
            Self::Compression => "compression",
            Self::Interrupted => "interrupted",
            Self::BudgetExceeded => "budget exceeded",
            Self::TransportFailure => "transport failure",
        };
        f.write_str(s)
    }
}

/// Everything needed to resume a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub reason: CheckpointReason,
    pub model: String,
    pub project: Option<String>,
    pub iteration: usize,
    pub summary: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub completed: CompletedCalls,
}

impl Checkpoint {
    /// Snapshot the live conversation
    pub fn capture(
        reason: CheckpointReason,
        model: impl Into<String>,
        project: Option<&str>,
        iteration: usize,
        summary: impl Into<String>,
        conversation: &Conversation,
    ) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            created_at: Utc::now(),
            reason,
            model: model.into(),
            project: project.map(str::to_string),
            iteration,
            summary: summary.into(),
            messages: conversation.messages().to_vec(),
            completed: conversation.completed().clone(),
        }
    }

    pub fn file_stem(&self) -> String {
        format!("{}{}", CHECKPOINT_PREFIX, self.created_at.format(TIMESTAMP_FORMAT))
    }

    /// Markdown document with the state block at the end
    pub fn render(&self) -> Result<String> {
        let mut out = String::new();
        let _ = writeln!(out, "# Context Checkpoint\n");
        let _ = writeln!(out, "- **Created:** {}", self.created_at.to_rfc3339());
        let _ = writeln!(out, "- **Reason:** {}", self.reason);
        let _ = writeln!(out, "- **Model:** {}", self.model);
        let _ = writeln!(out, "- **Project:** {}", self.project.as_deref().unwrap_or("(none)"));
        let _ = writeln!(out, "- **Iteration:** {}\n", self.iteration);

        let _ = writeln!(out, "## Summary\n");
        let summary = self.summary.trim();
        let _ = writeln!(out, "{}\n", if summary.is_empty() { "(no summary)" } else { summary });

        let _ = writeln!(out, "## Completed Actions\n");
        let _ = writeln!(out, "{}", self.completed.render());

        let _ = writeln!(out, "## Recent Messages\n");
        let start = self.messages.len().saturating_sub(RECENT_MESSAGES);
        for msg in &self.messages[start..] {
            let tools: Vec<&str> = msg
                .requested_tools()
                .iter()
                .map(|t| t.function.name.as_str())
                .collect();
            let text = truncate_chars(msg.content.trim(), RECENT_MESSAGE_CHARS).replace('\n', " ");
            if tools.is_empty() {
                let _ = writeln!(out, "- **{}:** {}", msg.role, text);
            } else {
                let _ = writeln!(out, "- **{}:** {} [tools: {}]", msg.role, text, tools.join(", "));
            }
        }

        let state = serde_json::to_string_pretty(self).context("Failed to serialize checkpoint")?;
        let _ = write!(out, "\n{}\n{}{}\n```\n", STATE_MARKER, STATE_FENCE, state);
        Ok(out)
    }

    /// Extract the state block, if the document has one
    pub fn parse(text: &str) -> Option<Result<Self>> {
        let opening = format!("{}\n{}", STATE_MARKER, STATE_FENCE);
        let start = text.rfind(&opening)? + opening.len();
        let body = &text[start..];
        let end = body.find("\n```").unwrap_or(body.len());
        Some(serde_json::from_str(&body[..end]).context("Failed to parse checkpoint state"))
    }
}

/// The result of loading a recovery file
#[derive(Debug, Clone, PartialEq)]
pub enum Recovered {
    /// A checkpoint written by scribe
    State(Box<Checkpoint>),
    /// Any other text; resumed from as a plain summary
    Text(String),
}

/// One row of `scribe checkpoints`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointEntry {
    pub path: PathBuf,
    pub project: Option<String>,
    stamp: String,
    collision: usize,
}

impl CheckpointEntry {
    fn from_path(path: PathBuf, project: Option<String>) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let rest = name.strip_prefix(CHECKPOINT_PREFIX)?.strip_suffix(".md")?;
        let (stamp, collision) = match rest.split_once('-') {
            Some((stamp, n)) => (stamp, n.parse().ok()?),
            None => (rest, 0),
        };
        Some(Self {
            stamp: stamp.to_string(),
            collision,
            path,
            project,
        })
    }

    /// Creation time for display, falling back to the raw file stamp
    pub fn created_label(&self) -> String {
        let s = self.stamp.as_str();
        let b = s.as_bytes();
        let well_formed = b.len() >= 15
            && b[8] == b'_'
            && b[..8].iter().chain(&b[9..15]).all(u8::is_ascii_digit);
        if !well_formed {
            return self.stamp.clone();
        }
        format!(
            "{}-{}-{} {}:{}:{}",
            &s[0..4],
            &s[4..6],
            &s[6..8],
            &s[9..11],
            &s[11..13],
            &s[13..15]
        )
    }
}

/// Reads and writes checkpoints under the output root
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    output_root: PathBuf,
}

impl CheckpointStore {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
        }
    }

    /// Write a checkpoint into `dir`, never replacing an existing file
    pub fn save(&self, checkpoint: &Checkpoint, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create checkpoint directory {}", dir.display()))?;

        let content = checkpoint.render()?;
        let stem = checkpoint.file_stem();

        for n in 0..MAX_COLLISIONS {
            let name = if n == 0 {
                format!("{}.md", stem)
            } else {
                format!("{}-{}.md", stem, n)
            };
            let path = dir.join(name);

            let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to create {}", path.display()))
                }
            };
            file.write_all(content.as_bytes())
                .with_context(|| format!("Failed to write {}", path.display()))?;

            info!(
                path = %path.display(),
                reason = %checkpoint.reason,
                messages = checkpoint.messages.len(),
                "Saved checkpoint"
            );
            return Ok(path);
        }

        anyhow::bail!("Too many checkpoints named {} in {}", stem, dir.display())
    }

    /// Load a recovery file
    pub fn load(&self, path: &Path) -> Result<Recovered> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read recovery file {}", path.display()))?;

        match Checkpoint::parse(&text) {
            Some(Ok(checkpoint)) => {
                if checkpoint.version > CHECKPOINT_VERSION {
                    warn!(
                        version = checkpoint.version,
                        "Checkpoint was written by a newer version"
                    );
                }
                debug!(
                    path = %path.display(),
                    messages = checkpoint.messages.len(),
                    completed = checkpoint.completed.len(),
                    "Loaded checkpoint state"
                );
                Ok(Recovered::State(Box::new(checkpoint)))
            }
            Some(Err(e)) => {
                warn!(path = %path.display(), error = %e, "Unreadable checkpoint state, using text");
                Ok(Recovered::Text(text))
            }
            None => Ok(Recovered::Text(text)),
        }
    }

    /// Checkpoints newest first, optionally for a single project
    pub fn list(&self, project: Option<&str>) -> Result<Vec<CheckpointEntry>> {
        let mut entries = Vec::new();

        match project {
            Some(name) => {
                let dir = self.output_root.join(name);
                if !dir.is_dir() {
                    anyhow::bail!("Project not found: {}", dir.display());
                }
                collect(&dir, Some(name), &mut entries);
            }
            None => {
                collect(&self.output_root, None, &mut entries);
                if let Ok(dirs) = fs::read_dir(&self.output_root) {
                    for entry in dirs.filter_map(|e| e.ok()) {
                        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                            let name = entry.file_name().to_string_lossy().into_owned();
                            collect(&entry.path(), Some(&name), &mut entries);
                        }
                    }
                }
            }
        }

        entries.sort_by(|a, b| (&b.stamp, b.collision).cmp(&(&a.stamp, a.collision)));
        Ok(entries)
    }
}

fn collect(dir: &Path, project: Option<&str>, out: &mut Vec<CheckpointEntry>) {
    let Ok(read) = fs::read_dir(dir) else {
        return;
    };
    for entry in read.filter_map(|e| e.ok()) {
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        if !is_file || !is_checkpoint_file(&entry.file_name().to_string_lossy()) {
            continue;
        }
        if let Some(e) = CheckpointEntry::from_path(entry.path(), project.map(str::to_string)) {
            out.push(e);
        }
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
