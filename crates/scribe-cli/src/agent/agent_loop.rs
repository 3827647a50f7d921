//! Agent loop implementation

use std::path::PathBuf;

use scribe_core::{ChatBackend, ChatRequest, ToolCall};
use tracing::{debug, info, instrument, warn};

use crate::checkpoint::{Checkpoint, CheckpointReason, CheckpointStore, Recovered};
use crate::context::{Compressor, TokenTracker, Tokenizer, WorkspaceSnapshot};
use crate::conversation::Conversation;
use crate::error::AgentError;
use crate::interrupt::InterruptFlag;
use crate::progress::{StatusLine, UsageMeter};
use crate::tools::{ToolRegistry, Workspace};

use super::prompt::{recovered_context, resume_message, system_prompt};
use super::state::{AgentConfig, AgentState, Phase, RunReport};

/// Drives the conversation with the model until it stops calling tools
pub struct AgentLoop<B: ChatBackend> {
    backend: B,
    config: AgentConfig,
    registry: ToolRegistry,
    workspace: Workspace,
    store: CheckpointStore,
    tracker: TokenTracker,
    compressor: Compressor,
    system_prompt: String,
    status: StatusLine,
    interrupt: InterruptFlag,
}

impl<B: ChatBackend> AgentLoop<B> {
    pub fn new(backend: B, config: AgentConfig) -> Self {
        let registry = ToolRegistry::new();
        let system_prompt = system_prompt();
        let tokenizer = Tokenizer::new();
        debug!(tokenizer = ?tokenizer.tokenizer_type(), "Token estimation");

        // Tool schemas travel with every request, so they count toward the base
        let schemas = serde_json::to_string(&registry.definitions()).unwrap_or_default();
        let tracker = TokenTracker::new(tokenizer, config.limits)
            .with_base_text(&format!("{}\n{}", system_prompt, schemas));
        let compressor = Compressor::new(tokenizer, config.limits, config.max_summary_tokens);

        Self {
            backend,
            registry,
            workspace: Workspace::new(&config.output_root),
            store: CheckpointStore::new(&config.output_root),
            tracker,
            compressor,
            system_prompt,
            status: StatusLine::new(),
            interrupt: InterruptFlag::new(),
            config,
        }
    }

    pub fn with_status(mut self, status: StatusLine) -> Self {
        self.status = status;
        self
    }

    pub fn with_interrupt(mut self, interrupt: InterruptFlag) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn tracker(&self) -> &TokenTracker {
        &self.tracker
    }

    /// Fresh run from a user prompt
    pub async fn run_prompt(&mut self, prompt: &str) -> Result<RunReport, AgentError> {
        self.run(Conversation::with_prompt(prompt), AgentState::new()).await
    }

    /// Continue from a loaded recovery file
    pub async fn run_recovered(
        &mut self,
        recovered: Recovered,
        cumulative_iterations: bool,
    ) -> Result<RunReport, AgentError> {
        let (conversation, state) = self.resume(recovered, cumulative_iterations);
        self.run(conversation, state).await
    }

    /// Rebuild the conversation and counters from a recovery file
    pub fn resume(&mut self, recovered: Recovered, cumulative_iterations: bool) -> (Conversation, AgentState) {
        match recovered {
            Recovered::State(checkpoint) => {
                let checkpoint = *checkpoint;
                if let Some(ref project) = checkpoint.project {
                    if self.workspace.reactivate(project) {
                        info!(project = %project, "Reactivated project from checkpoint");
                    } else {
                        warn!(project = %project, "Checkpoint project directory is missing");
                    }
                }

                let mut conversation = Conversation::restore(checkpoint.messages, checkpoint.completed);
                conversation.push_user(resume_message(self.workspace.active_project()));

                let state = if cumulative_iterations {
                    AgentState::starting_at(checkpoint.iteration)
                } else {
                    AgentState::new()
                };

                self.status.info(format!(
                    "Restored {} messages and {} completed actions",
                    conversation.len() - 1,
                    conversation.completed().len()
                ));
                (conversation, state)
            }
            Recovered::Text(text) => {
                self.status.info("Recovering from a plain summary file");
                (Conversation::with_prompt(recovered_context(&text)), AgentState::new())
            }
        }
    }

    /// Run the loop to completion
    #[instrument(skip_all, fields(model = %self.config.model))]
    pub async fn run(
        &mut self,
        mut conversation: Conversation,
        mut state: AgentState,
    ) -> Result<RunReport, AgentError> {
        info!(
            max_iterations = self.config.max_iterations,
            token_limit = self.config.limits.token_limit,
            compression_threshold = self.config.limits.compression_threshold,
            "Starting agent loop"
        );

        let mut phase = Phase::Running;
        loop {
            debug!(phase = phase.name(), iteration = state.iteration, "Phase");
            phase = match phase {
                Phase::Running => self.check_boundary(&conversation, &mut state),
                Phase::AwaitingModel => self.await_model(&mut conversation, &mut state).await,
                Phase::ExecutingTools(calls) => self.execute_tools(calls, &mut conversation, &mut state),
                Phase::Compressing => self.compress(&mut conversation, &mut state).await,
                Phase::Done => break,
                Phase::Failed(e) => {
                    self.status.error(e.to_string());
                    if let Some(path) = e.checkpoint() {
                        self.status.info(format!("To resume: scribe run --recover {}", path.display()));
                    }
                    warn!(error = %e, iterations = state.iteration, "Agent loop failed");
                    return Err(e);
                }
            };
        }

        info!(
            iterations = state.iteration,
            prompt_tokens = state.api_usage.prompt_tokens,
            completion_tokens = state.api_usage.completion_tokens,
            compressions = state.compressions,
            "Agent loop completed"
        );

        Ok(RunReport {
            iterations: state.iteration,
            run_iterations: state.iterations_this_run(),
            final_response: state.final_response,
            api_usage: state.api_usage,
            compressions: state.compressions,
            checkpoints: state.checkpoints,
            project: self.workspace.active_project().map(str::to_string),
        })
    }

    /// `Running`: interrupt, budget and context size are checked here only
    fn check_boundary(&mut self, conversation: &Conversation, state: &mut AgentState) -> Phase {
        if self.interrupt.is_raised() {
            self.status.warning("Interrupted, saving checkpoint");
            let checkpoint = self.save_checkpoint(CheckpointReason::Interrupted, conversation, state, None);
            return Phase::Failed(AgentError::Interrupted { checkpoint });
        }

        if state.iteration >= self.config.max_iterations {
            self.status.warning(format!(
                "Reached maximum of {} iterations, saving checkpoint",
                self.config.max_iterations
            ));
            let checkpoint = self.save_checkpoint(CheckpointReason::BudgetExceeded, conversation, state, None);
            return Phase::Failed(AgentError::BudgetExceeded {
                max_iterations: self.config.max_iterations,
                checkpoint,
            });
        }

        self.tracker.observe(conversation.messages());
        let (tokens, percent) = self.tracker.usage();
        let limits = self.tracker.limits();
        debug!(tokens, percent, headroom = self.tracker.headroom(), "Observed context size");

        let over = self.tracker.should_compress();
        if (over || state.compress_requested) && !state.just_compressed {
            if over {
                self.status.warning(format!(
                    "Approaching token limit ({} >= {}), compressing context",
                    tokens, limits.compression_threshold
                ));
            }
            return Phase::Compressing;
        }
        if over {
            warn!(tokens, "Context still over threshold right after compression");
        }

        self.status.iteration(state.iteration + 1, self.config.max_iterations);
        self.status.usage(&UsageMeter::new(tokens, limits.token_limit, limits.compression_threshold));
        Phase::AwaitingModel
    }

    /// `AwaitingModel`: one request with tools
    async fn await_model(&mut self, conversation: &mut Conversation, state: &mut AgentState) -> Phase {
        let request = ChatRequest::new(
            self.config.model.clone(),
            conversation.messages_with_system(&self.system_prompt),
        )
        .with_tools(self.registry.definitions())
        .with_temperature(self.config.temperature)
        .with_max_tokens(self.config.max_tokens);

        let mut spinner = self.status.spinner(format!("Waiting for {}...", self.config.model));
        let result = self.backend.complete(&request).await;
        if let Some(ref mut s) = spinner {
            s.stop().await;
        }
        state.just_compressed = false;

        let response = match result {
            Ok(response) => response,
            Err(source) => {
                warn!(error = %source, "Model request failed");
                let checkpoint = self.save_checkpoint(CheckpointReason::TransportFailure, conversation, state, None);
                return Phase::Failed(AgentError::Transport { source, checkpoint });
            }
        };

        state.api_usage.record(response.usage);
        if let Some(ref reason) = response.finish_reason {
            debug!(finish_reason = %reason, "Model replied");
        }

        let content = response.message.content;
        let mut calls = response.message.tool_calls.unwrap_or_default();
        self.status.model_text(&content);

        if calls.is_empty() {
            conversation.push_assistant(content.clone(), Vec::new());
            self.status.success("Done");
            state.final_response = Some(content);
            return Phase::Done;
        }

        assign_missing_ids(&mut calls, state.iteration);
        conversation.push_assistant(content, calls.clone());
        Phase::ExecutingTools(calls)
    }

    /// `ExecutingTools`: strictly in order, each result appended before the next runs
    fn execute_tools(
        &mut self,
        calls: Vec<ToolCall>,
        conversation: &mut Conversation,
        state: &mut AgentState,
    ) -> Phase {
        debug!(tool_count = calls.len(), "Processing tool calls");

        for call in &calls {
            let outcome = self
                .registry
                .dispatch(call, &mut self.workspace, conversation.completed_mut());
            if outcome.requests_compression() {
                state.compress_requested = true;
            }

            let shown = outcome.result();
            self.status.tool(&call.function.name, shown.success, &shown.output);
            let result = outcome.into_result();
            conversation.push_tool_result(call.id.clone(), result.output);
        }

        state.iteration += 1;

        let interval = self.config.checkpoint_interval;
        if interval > 0 && state.iteration % interval == 0 {
            self.status.status(format!("Periodic checkpoint (iteration {})", state.iteration));
            self.save_checkpoint(CheckpointReason::Interval, conversation, state, None);
        }

        Phase::Running
    }

    /// `Compressing`: summarize, replace the history, checkpoint
    async fn compress(&mut self, conversation: &mut Conversation, state: &mut AgentState) -> Phase {
        state.compress_requested = false;
        let before = self.tracker.observe(conversation.messages());
        let base = self.tracker.base_tokens();

        let request = self.compressor.build_request(
            &self.config.model,
            conversation.messages(),
            base,
            self.config.temperature,
        );

        let mut spinner = self.status.spinner("Summarizing context...");
        let result = self.compressor.summarize(&self.backend, &request).await;
        if let Some(ref mut s) = spinner {
            s.stop().await;
        }

        let summary = match result {
            Ok((text, usage)) => {
                state.api_usage.record(usage);
                text
            }
            Err(e) => {
                warn!(error = %e, "Summarization failed, using fallback summary");
                self.status.warning(format!("Summarization failed ({}), using fallback summary", e));
                self.compressor
                    .fallback_summary(conversation.messages(), conversation.completed())
            }
        };

        let project = self.workspace.active_project().map(str::to_string);
        let files = project
            .as_deref()
            .map(|p| self.workspace.list_content_files(p))
            .unwrap_or_default();
        let snapshot = WorkspaceSnapshot { project, files };

        let entry = self
            .compressor
            .summary_entry(&summary, &snapshot, conversation.completed(), base);
        conversation.replace_with_summary(entry);
        state.compressions += 1;
        state.just_compressed = true;

        let after = self.tracker.observe(conversation.messages());
        info!(before, after, "Compressed context");
        self.status.success(format!("Context compressed: {} -> {} tokens", before, after));

        self.save_checkpoint(CheckpointReason::Compression, conversation, state, Some(summary));
        Phase::Running
    }

    /// Write a checkpoint into the active project (or the output root)
    ///
    /// A failed write is reported but never ends the run.
    fn save_checkpoint(
        &mut self,
        reason: CheckpointReason,
        conversation: &Conversation,
        state: &mut AgentState,
        summary: Option<String>,
    ) -> Option<PathBuf> {
        let summary = summary.unwrap_or_else(|| {
            self.compressor
                .fallback_summary(conversation.messages(), conversation.completed())
        });
        let checkpoint = Checkpoint::capture(
            reason,
            self.config.model.clone(),
            self.workspace.active_project(),
            state.iteration,
            summary,
            conversation,
        );

        match self.store.save(&checkpoint, &self.workspace.checkpoint_dir()) {
            Ok(path) => {
                self.status.success(format!("Checkpoint saved: {}", path.display()));
                state.checkpoints.push(path.clone());
                Some(path)
            }
            Err(e) => {
                warn!(error = %e, reason = %reason, "Failed to save checkpoint");
                self.status.warning(format!("Could not save checkpoint: {:#}", e));
                None
            }
        }
    }
}

/// Tool results must reference a call id; some providers omit them
fn assign_missing_ids(calls: &mut [ToolCall], iteration: usize) {
    for (idx, call) in calls.iter_mut().enumerate() {
        if call.id.trim().is_empty() {
            call.id = format!("call_{}_{}", iteration + 1, idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CHECKPOINT_PREFIX;
    use crate::context::ContextLimits;
    use crate::conversation::SUMMARY_HEADER;
    use crate::tools::{COMPRESS_CONTEXT, CREATE_PROJECT, WRITE_FILE};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use scribe_core::{ApiError, ChatMessage, ChatResponse, Role, Usage};
    use std::collections::VecDeque;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    type Reply = Result<ChatResponse, ApiError>;

    /// Serves tool-enabled requests from `replies` and summarization
    /// (tool-less) requests from `summaries`
    struct ScriptedBackend {
        replies: Mutex<VecDeque<Reply>>,
        summaries: Mutex<VecDeque<Reply>>,
        requests: Arc<Mutex<Vec<ChatRequest>>>,
        interrupt_after: Option<(usize, InterruptFlag)>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<Reply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                summaries: Mutex::new(VecDeque::new()),
                requests: Arc::new(Mutex::new(Vec::new())),
                interrupt_after: None,
            }
        }

        fn with_summaries(self, summaries: Vec<Reply>) -> Self {
            *self.summaries.lock() = summaries.into();
            self
        }

        fn interrupting_after(mut self, replies: usize, flag: InterruptFlag) -> Self {
            self.interrupt_after = Some((replies, flag));
            self
        }

        fn requests(&self) -> Arc<Mutex<Vec<ChatRequest>>> {
            Arc::clone(&self.requests)
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, ApiError> {
            let served = {
                let mut log = self.requests.lock();
                log.push(request.clone());
                log.iter().filter(|r| r.tools.is_some()).count()
            };

            if request.tools.is_none() {
                return self
                    .summaries
                    .lock()
                    .pop_front()
                    .unwrap_or_else(|| Ok(text("Summary: chapter one is drafted, chapter two is next.")));
            }

            if let Some((after, flag)) = &self.interrupt_after {
                if served >= *after {
                    flag.raise();
                }
            }
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(text("All done.")))
        }
    }

    fn usage() -> Option<Usage> {
        Some(Usage {
            prompt_tokens: 100,
            completion_tokens: 10,
            total_tokens: 110,
        })
    }

    fn text(content: &str) -> ChatResponse {
        ChatResponse {
            message: ChatMessage::assistant(content),
            finish_reason: Some("stop".into()),
            usage: usage(),
        }
    }

    fn tools(calls: Vec<ToolCall>) -> ChatResponse {
        ChatResponse {
            message: ChatMessage::assistant_with_tools("", calls),
            finish_reason: Some("tool_calls".into()),
            usage: usage(),
        }
    }

    fn create_project(id: &str, name: &str) -> ToolCall {
        ToolCall::new(id, CREATE_PROJECT, format!(r#"{{"project_name":"{}"}}"#, name))
    }

    fn write(id: &str, filename: &str, content: &str, mode: &str) -> ToolCall {
        let args = serde_json::json!({"filename": filename, "content": content, "mode": mode});
        ToolCall::new(id, WRITE_FILE, args.to_string())
    }

    fn config(root: &std::path::Path) -> AgentConfig {
        AgentConfig::default()
            .with_output_root(root)
            .with_max_iterations(10)
    }

    fn agent(backend: ScriptedBackend, config: AgentConfig) -> AgentLoop<ScriptedBackend> {
        AgentLoop::new(backend, config).with_status(StatusLine::quiet())
    }

    fn last_tool_result(request: &ChatRequest) -> &ChatMessage {
        request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Tool)
            .unwrap()
    }

    fn checkpoints_in(dir: &std::path::Path) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(CHECKPOINT_PREFIX))
                    .unwrap_or(false)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_two_chapter_story() {
        let temp = TempDir::new().unwrap();
        let backend = ScriptedBackend::new(vec![
            Ok(tools(vec![create_project("c1", "Two Chapters")])),
            Ok(tools(vec![
                write("c2", "chapter_01.md", "The first chapter.", "create"),
                write("c3", "chapter_02", "The second chapter.", "create"),
            ])),
            Ok(text("Both chapters are written.")),
        ]);
        let requests = backend.requests();

        let report = agent(backend, config(temp.path())).run_prompt("Write a two-chapter story").await.unwrap();

        let project = temp.path().join("two_chapters");
        assert_eq!(fs::read_to_string(project.join("chapter_01.md")).unwrap(), "The first chapter.");
        assert_eq!(fs::read_to_string(project.join("chapter_02.md")).unwrap(), "The second chapter.");
        assert_eq!(report.iterations, 2);
        assert_eq!(report.final_response.as_deref(), Some("Both chapters are written."));
        assert_eq!(report.project.as_deref(), Some("two_chapters"));
        assert_eq!(report.api_usage.calls, 3);
        assert!(report.checkpoints.is_empty());

        let requests = requests.lock();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].messages[0].role, Role::System);
        assert_eq!(requests[0].tools.as_ref().map(|t| t.len()), Some(3));
        // Results come back in call order
        let last = &requests[2].messages;
        let n = last.len();
        assert_eq!(last[n - 2].tool_call_id.as_deref(), Some("c2"));
        assert_eq!(last[n - 1].tool_call_id.as_deref(), Some("c3"));
    }

    #[tokio::test]
    async fn test_create_conflict_is_reported_to_model() {
        let temp = TempDir::new().unwrap();
        let backend = ScriptedBackend::new(vec![
            Ok(tools(vec![create_project("c1", "story")])),
            Ok(tools(vec![write("c2", "chapter_01.md", "Original", "create")])),
            Ok(tools(vec![write("c3", "chapter_01.md", "Replacement", "create")])),
            Ok(text("Done.")),
        ]);
        let requests = backend.requests();

        let report = agent(backend, config(temp.path())).run_prompt("story").await.unwrap();

        assert_eq!(report.iterations, 3);
        assert_eq!(
            fs::read_to_string(temp.path().join("story/chapter_01.md")).unwrap(),
            "Original"
        );
        let requests = requests.lock();
        let result = last_tool_result(&requests[3]);
        assert!(result.content.starts_with("Error: "));
        assert!(result.content.contains("already exists"));
    }

    #[tokio::test]
    async fn test_compression_when_threshold_crossed() {
        let temp = TempDir::new().unwrap();
        let big = "word ".repeat(5000);
        let backend = ScriptedBackend::new(vec![
            Ok(tools(vec![create_project("c1", "epic")])),
            Ok(tools(vec![write("c2", "big.md", &big, "create")])),
            Ok(text("Finished.")),
        ]);
        let requests = backend.requests();

        let cfg = config(temp.path()).with_limits(ContextLimits::new(6000, 4000));
        let mut agent = agent(backend, cfg);
        let report = agent.run_prompt("Write an epic").await.unwrap();

        assert_eq!(report.compressions, 1);
        assert!(agent.tracker().usage().0 < 4000);
        assert_eq!(checkpoints_in(&temp.path().join("epic")).len(), 1);

        let requests = requests.lock();
        let summarize = requests.iter().find(|r| r.tools.is_none()).unwrap();
        assert_eq!(summarize.messages.len(), 2);

        let after = requests.last().unwrap();
        assert!(after.tools.is_some());
        assert_eq!(after.messages.len(), 2);
        assert!(after.messages[1].content.starts_with(SUMMARY_HEADER));
        assert!(after.messages[1].content.contains("big.md"));
        assert!(after.messages[1].content.contains("chapter one is drafted"));
    }

    #[tokio::test]
    async fn test_compress_context_tool_triggers_compression() {
        let temp = TempDir::new().unwrap();
        let backend = ScriptedBackend::new(vec![
            Ok(tools(vec![create_project("c1", "story")])),
            Ok(tools(vec![ToolCall::new("c2", COMPRESS_CONTEXT, "{}")])),
            Ok(text("Done.")),
        ]);

        let report = agent(backend, config(temp.path())).run_prompt("story").await.unwrap();
        assert_eq!(report.compressions, 1);
        assert_eq!(report.checkpoints.len(), 1);
        assert!(report.checkpoints[0].starts_with(temp.path().join("story")));
    }

    #[tokio::test]
    async fn test_summarization_failure_uses_fallback() {
        let temp = TempDir::new().unwrap();
        let backend = ScriptedBackend::new(vec![
            Ok(tools(vec![ToolCall::new("c1", COMPRESS_CONTEXT, "")])),
            Ok(text("Done.")),
        ])
        .with_summaries(vec![Err(ApiError::Http {
            status: 500,
            body: "boom".into(),
        })]);
        let requests = backend.requests();

        let report = agent(backend, config(temp.path())).run_prompt("Write a poem").await.unwrap();
        assert_eq!(report.compressions, 1);

        let requests = requests.lock();
        let entry = &requests.last().unwrap().messages[1].content;
        assert!(entry.contains("model summary was unavailable"));
        assert!(entry.contains("Write a poem"));
    }

    #[tokio::test]
    async fn test_budget_exceeded_writes_checkpoint() {
        let temp = TempDir::new().unwrap();
        let backend = ScriptedBackend::new(vec![
            Ok(tools(vec![create_project("c1", "story")])),
            Ok(tools(vec![write("c2", "notes.md", "one\n", "append")])),
            Ok(tools(vec![write("c3", "notes.md", "two\n", "append")])),
        ]);

        let cfg = config(temp.path()).with_max_iterations(2);
        let err = agent(backend, cfg).run_prompt("story").await.unwrap_err();

        assert!(matches!(err, AgentError::BudgetExceeded { max_iterations: 2, .. }));
        assert_eq!(err.exit_code(), 2);
        let checkpoint = err.checkpoint().unwrap();
        assert!(checkpoint.starts_with(temp.path().join("story")));
        assert_eq!(fs::read_to_string(temp.path().join("story/notes.md")).unwrap(), "one\n");
    }

    #[tokio::test]
    async fn test_interrupt_at_iteration_boundary() {
        let temp = TempDir::new().unwrap();
        let flag = InterruptFlag::new();
        let backend = ScriptedBackend::new(vec![
            Ok(tools(vec![create_project("c1", "story")])),
            Ok(tools(vec![write("c2", "a.md", "never written", "create")])),
        ])
        .interrupting_after(1, flag.clone());

        let err = agent(backend, config(temp.path()))
            .with_interrupt(flag)
            .run_prompt("story")
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Interrupted { .. }));
        assert_eq!(err.exit_code(), 130);
        // The in-flight reply was still executed before stopping
        assert!(temp.path().join("story").is_dir());
        assert!(!temp.path().join("story/a.md").exists());
        assert_eq!(checkpoints_in(&temp.path().join("story")).len(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_writes_checkpoint() {
        let temp = TempDir::new().unwrap();
        let backend = ScriptedBackend::new(vec![Err(ApiError::Http {
            status: 401,
            body: "unauthorized".into(),
        })]);

        let err = agent(backend, config(temp.path())).run_prompt("story").await.unwrap_err();
        assert!(matches!(err, AgentError::Transport { .. }));
        assert_eq!(err.exit_code(), 1);
        // No project yet, so the checkpoint lands in the output root
        assert_eq!(err.checkpoint().unwrap().parent(), Some(temp.path()));
    }

    #[tokio::test]
    async fn test_recovery_does_not_repeat_completed_calls() {
        let temp = TempDir::new().unwrap();
        let chapter = write("c2", "chapter_01.md", "Chapter one.", "create");

        let first = ScriptedBackend::new(vec![
            Ok(tools(vec![create_project("c1", "story")])),
            Ok(tools(vec![chapter.clone()])),
        ]);
        let cfg = config(temp.path()).with_max_iterations(2);
        let err = agent(first, cfg.clone()).run_prompt("story").await.unwrap_err();
        let checkpoint = err.checkpoint().unwrap().clone();

        let recovered = CheckpointStore::new(temp.path()).load(&checkpoint).unwrap();
        assert!(matches!(recovered, Recovered::State(_)));

        // The model repeats the last call after resuming
        let mut repeated = chapter.clone();
        repeated.id = "c9".into();
        let second = ScriptedBackend::new(vec![Ok(tools(vec![repeated])), Ok(text("Done."))]);
        let requests = second.requests();

        let mut resumed = agent(second, cfg);
        let report = resumed.run_recovered(recovered, false).await.unwrap();

        assert_eq!(report.iterations, 1);
        assert_eq!(resumed.workspace().active_project(), Some("story"));
        assert_eq!(
            fs::read_to_string(temp.path().join("story/chapter_01.md")).unwrap(),
            "Chapter one."
        );

        let requests = requests.lock();
        let first_request = &requests[0].messages;
        assert!(first_request.last().unwrap().content.contains("has been restored"));
        let result = last_tool_result(&requests[1]);
        assert!(result.content.starts_with("Skipped:"));
    }

    #[tokio::test]
    async fn test_cumulative_iterations_continue_counter() {
        let temp = TempDir::new().unwrap();
        let first = ScriptedBackend::new(vec![
            Ok(tools(vec![create_project("c1", "story")])),
            Ok(tools(vec![write("c2", "a.md", "a", "create")])),
        ]);
        let cfg = config(temp.path()).with_max_iterations(2);
        let err = agent(first, cfg).run_prompt("story").await.unwrap_err();
        let recovered = CheckpointStore::new(temp.path())
            .load(err.checkpoint().unwrap())
            .unwrap();

        let second = ScriptedBackend::new(vec![Ok(tools(vec![write("c3", "b.md", "b", "create")]))]);
        let cfg = config(temp.path()).with_max_iterations(3);
        let err = agent(second, cfg).run_recovered(recovered, true).await.unwrap_err();

        assert!(matches!(err, AgentError::BudgetExceeded { max_iterations: 3, .. }));
        assert!(temp.path().join("story/b.md").exists());
    }

    #[tokio::test]
    async fn test_recovery_from_plain_text() {
        let temp = TempDir::new().unwrap();
        let backend = ScriptedBackend::new(vec![Ok(text("Continuing."))]);
        let requests = backend.requests();

        let recovered = Recovered::Text("Chapters 1-3 are done.".into());
        agent(backend, config(temp.path()))
            .run_recovered(recovered, false)
            .await
            .unwrap();

        let requests = requests.lock();
        let first_user = &requests[0].messages[1];
        assert!(first_user.content.starts_with("[RECOVERED CONTEXT]"));
        assert!(first_user.content.contains("Chapters 1-3 are done."));
    }

    #[tokio::test]
    async fn test_periodic_checkpoint() {
        let temp = TempDir::new().unwrap();
        let backend = ScriptedBackend::new(vec![
            Ok(tools(vec![create_project("c1", "story")])),
            Ok(tools(vec![write("c2", "a.md", "a", "create")])),
            Ok(text("Done.")),
        ]);

        let cfg = config(temp.path()).with_checkpoint_interval(1);
        let report = agent(backend, cfg).run_prompt("story").await.unwrap();
        assert_eq!(report.checkpoints.len(), 2);
        assert_eq!(checkpoints_in(&temp.path().join("story")).len(), 2);
    }

    #[test]
    fn test_assign_missing_ids() {
        let mut calls = vec![
            ToolCall::new("", CREATE_PROJECT, "{}"),
            ToolCall::new("keep", CREATE_PROJECT, "{}"),
        ];
        assign_missing_ids(&mut calls, 4);
        assert_eq!(calls[0].id, "call_5_0");
        assert_eq!(calls[1].id, "keep");
    }
}
