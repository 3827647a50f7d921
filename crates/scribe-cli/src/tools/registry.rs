//! Tool registry: definitions for the model and dispatch of its calls

use scribe_core::{ToolCall, ToolDefinition};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::builtin::{compress_context, create_project, write_file};
use super::workspace::{sanitize_project_name, Workspace};
use super::{
    parse_arguments, CreateProjectArgs, ParameterSchema, ToolError, ToolInvocation, ToolResult,
    COMPRESS_CONTEXT, CREATE_PROJECT, WRITE_FILE,
};
use crate::conversation::{CompletedCall, CompletedCalls};

/// What happened when a call was dispatched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    /// The tool ran (successfully or not)
    Executed(ToolResult),
    /// The same call was the last one to succeed on its target; nothing was touched
    Skipped(ToolResult),
    /// The model asked for compression at the next boundary
    CompressRequested(ToolResult),
}

impl ToolOutcome {
    pub fn result(&self) -> &ToolResult {
        match self {
            Self::Executed(r) | Self::Skipped(r) | Self::CompressRequested(r) => r,
        }
    }

    pub fn into_result(self) -> ToolResult {
        match self {
            Self::Executed(r) | Self::Skipped(r) | Self::CompressRequested(r) => r,
        }
    }

    pub fn requests_compression(&self) -> bool {
        matches!(self, Self::CompressRequested(_))
    }
}

/// The closed set of tools offered to the model
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    definitions: Vec<ToolDefinition>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        let definitions = vec![
            definition(CREATE_PROJECT, create_project::DESCRIPTION, create_project::parameters()),
            definition(WRITE_FILE, write_file::DESCRIPTION, write_file::parameters()),
            definition(COMPRESS_CONTEXT, compress_context::DESCRIPTION, compress_context::parameters()),
        ];
        Self { definitions }
    }

    /// Tool definitions for the chat request
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.definitions.clone()
    }

    /// Run one tool call from the model
    ///
    /// Failures never escape: they become unsuccessful results the model can
    /// read and react to.
    #[instrument(skip(self, workspace, ledger), fields(tool = %call.function.name))]
    pub fn dispatch(
        &self,
        call: &ToolCall,
        workspace: &mut Workspace,
        ledger: &mut CompletedCalls,
    ) -> ToolOutcome {
        let name = call.function.name.as_str();
        debug!(id = %call.id, "Dispatching tool call");

        let invocation = match ToolInvocation::parse(name, &call.function.arguments) {
            Ok(invocation) => invocation,
            Err(e) => {
                warn!(tool = name, error = %e, "Rejected tool call");
                return ToolOutcome::Executed(ToolResult::error(&e));
            }
        };

        if !invocation.has_side_effects() {
            return ToolOutcome::CompressRequested(ToolResult::success(compress_context::SCHEDULED));
        }

        let signature = match call_signature(&invocation, &call.function.arguments, workspace) {
            Ok(sig) => sig,
            Err(e) => return ToolOutcome::Executed(ToolResult::error(&e)),
        };

        // Unresolvable targets fall through and fail inside the tool
        let target = call_target(&invocation, workspace);
        if let Some(ref target) = target {
            if let Some(previous) = ledger.latest_for(target).filter(|c| c.signature == signature) {
                info!(tool = name, target = %target, "Skipping repeated call: {}", previous.description);
                let output = format!(
                    "Skipped: this exact call already succeeded earlier and was not repeated. Original result: {}",
                    previous.result
                );
                if let ToolInvocation::CreateProject(args) = &invocation {
                    reactivate(args, workspace);
                }
                return ToolOutcome::Skipped(ToolResult::failure(output));
            }
        }

        let result = match execute(&invocation, workspace) {
            Ok(output) => ToolResult::success(output),
            Err(e) => {
                debug!(tool = name, error = %e, "Tool returned an error");
                ToolResult::error(&e)
            }
        };

        if let (true, Some(target)) = (result.success, target) {
            ledger.record(CompletedCall {
                signature,
                target,
                tool: name.to_string(),
                description: invocation.describe(),
                result: result.output.clone(),
            });
        }

        ToolOutcome::Executed(result)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn definition(name: &str, description: &str, parameters: ParameterSchema) -> ToolDefinition {
    let parameters = serde_json::to_value(parameters).unwrap_or_else(|_| Value::Object(Default::default()));
    ToolDefinition::function(name, description, parameters)
}

fn execute(invocation: &ToolInvocation, workspace: &mut Workspace) -> Result<String, ToolError> {
    match invocation {
        ToolInvocation::CreateProject(args) => create_project::execute(args, workspace),
        ToolInvocation::WriteFile(args) => write_file::execute(args, workspace),
        ToolInvocation::CompressContext => Ok(compress_context::SCHEDULED.to_string()),
    }
}

/// What a side-effecting call acts on: the project directory, or the
/// resolved file path inside its project
fn call_target(invocation: &ToolInvocation, workspace: &Workspace) -> Option<String> {
    match invocation {
        ToolInvocation::CreateProject(args) => {
            sanitize_project_name(&args.project_name).map(|name| format!("project:{}", name))
        }
        ToolInvocation::WriteFile(args) => {
            let (project, _) = workspace.resolve_project(args.project.as_deref()).ok()?;
            let filename = write_file::validate_filename(&args.filename).ok()?;
            Some(format!("file:{}/{}", project, filename))
        }
        ToolInvocation::CompressContext => None,
    }
}

/// A skipped `create_project` still switches to that project
fn reactivate(args: &CreateProjectArgs, workspace: &mut Workspace) {
    if let Some(name) = sanitize_project_name(&args.project_name) {
        workspace.reactivate(&name);
    }
}

/// Ledger signature with an implicit target project made explicit, so the
/// same write aimed at two different active projects is not conflated
fn call_signature(
    invocation: &ToolInvocation,
    arguments: &str,
    workspace: &Workspace,
) -> Result<String, ToolError> {
    let mut args = parse_arguments(arguments)?;
    if let (ToolInvocation::WriteFile(w), Value::Object(map)) = (invocation, &mut args) {
        if w.project.is_none() {
            if let Some(active) = workspace.active_project() {
                map.insert("project".to_string(), Value::String(active.to_string()));
            }
        }
    }
    Ok(CompletedCalls::signature(invocation.name(), &args))
}
