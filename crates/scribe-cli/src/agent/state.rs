//! Agent configuration and run state

use std::path::PathBuf;

use scribe_core::{Config, ToolCall, Usage};

use crate::context::ContextLimits;
use crate::error::AgentError;

/// Configuration for the agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub model: String,
    /// Iterations allowed for this run
    pub max_iterations: usize,
    /// Write a checkpoint every N iterations (0 disables)
    pub checkpoint_interval: usize,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub limits: ContextLimits,
    pub max_summary_tokens: usize,
    /// Directory holding one folder per project
    pub output_root: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl AgentConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.api.model.clone(),
            max_iterations: config.agent.max_iterations,
            checkpoint_interval: config.agent.checkpoint_interval,
            temperature: config.api.temperature,
            max_tokens: config.api.max_tokens,
            limits: ContextLimits::new(
                config.context.token_limit,
                config.context.compression_threshold,
            ),
            max_summary_tokens: config.context.max_summary_tokens,
            output_root: config.output.root.clone(),
        }
    }
}

#[cfg(test)]
impl AgentConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_checkpoint_interval(mut self, interval: usize) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    pub fn with_limits(mut self, limits: ContextLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_output_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_root = dir.into();
        self
    }
}

/// Where the loop is
#[derive(Debug)]
pub enum Phase {
    /// Between iterations: check interrupt, budget and context size
    Running,
    /// Request in flight
    AwaitingModel,
    /// The model asked for these calls, to run in order
    ExecutingTools(Vec<ToolCall>),
    Compressing,
    Done,
    Failed(AgentError),
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::AwaitingModel => "awaiting_model",
            Self::ExecutingTools(_) => "executing_tools",
            Self::Compressing => "compressing",
            Self::Done => "done",
            Self::Failed(_) => "failed",
        }
    }
}

/// Token usage accumulated from API responses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApiUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub calls: u64,
}

impl ApiUsage {
    pub fn record(&mut self, usage: Option<Usage>) {
        self.calls += 1;
        if let Some(u) = usage {
            self.prompt_tokens += u.prompt_tokens;
            self.completion_tokens += u.completion_tokens;
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn summary(&self) -> String {
        format!(
            "{} calls, {} prompt + {} completion = {} tokens",
            self.calls,
            self.prompt_tokens,
            self.completion_tokens,
            self.total_tokens()
        )
    }
}

/// Counters that live for the whole run
#[derive(Debug, Default)]
pub struct AgentState {
    /// Iterations completed (tool rounds)
    pub iteration: usize,
    /// Iteration at which this run started (non-zero only for cumulative recovery)
    pub start_iteration: usize,
    pub api_usage: ApiUsage,
    /// Compression requested through the tool
    pub compress_requested: bool,
    /// Set after a compression until the next model reply
    pub just_compressed: bool,
    pub compressions: usize,
    pub checkpoints: Vec<PathBuf>,
    pub final_response: Option<String>,
}

impl AgentState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(iteration: usize) -> Self {
        Self {
            iteration,
            start_iteration: iteration,
            ..Self::default()
        }
    }

    /// Iterations spent in this process
    pub fn iterations_this_run(&self) -> usize {
        self.iteration - self.start_iteration
    }
}

/// Summary of a completed run
#[derive(Debug)]
pub struct RunReport {
    pub iterations: usize,
    /// Iterations spent in this process
    pub run_iterations: usize,
    pub final_response: Option<String>,
    pub api_usage: ApiUsage,
    pub compressions: usize,
    pub checkpoints: Vec<PathBuf>,
    pub project: Option<String>,
}
