//! Tools the writing agent can call
//!
//! The set is closed: every tool is a variant of [`ToolInvocation`], parsed
//! from the model's `(name, arguments)` pair and dispatched by the registry
//! with an exhaustive match.

pub mod builtin;
pub mod registry;
pub mod workspace;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

pub use registry::ToolRegistry;
pub use workspace::Workspace;

pub const CREATE_PROJECT: &str = "create_project";
pub const WRITE_FILE: &str = "write_file";
pub const COMPRESS_CONTEXT: &str = "compress_context";

/// Errors reported back to the model as tool results
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{0} already exists")]
    AlreadyExists(PathBuf),

    #[error("invalid project '{0}': create it with create_project first")]
    InvalidProject(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    #[error("filesystem error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ToolError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ToolError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result of tool execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    /// Text sent back to the model
    pub output: String,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn error(error: &ToolError) -> Self {
        Self {
            success: false,
            output: format!("Error: {}", error),
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

/// How `write_file` treats an existing target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// New file only; fails if it exists
    Create,
    /// Add to the end; creates the file if absent
    Append,
    /// Replace the whole file
    Overwrite,
}

impl WriteMode {
    pub const ALL: [WriteMode; 3] = [WriteMode::Create, WriteMode::Append, WriteMode::Overwrite];

    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMode::Create => "create",
            WriteMode::Append => "append",
            WriteMode::Overwrite => "overwrite",
        }
    }
}

impl std::fmt::Display for WriteMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreateProjectArgs {
    pub project_name: String,
    #[serde(default)]
    pub exist_ok: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WriteFileArgs {
    /// Defaults to the active project
    #[serde(default)]
    pub project: Option<String>,
    pub filename: String,
    pub content: String,
    pub mode: WriteMode,
}

/// A parsed tool call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolInvocation {
    CreateProject(CreateProjectArgs),
    WriteFile(WriteFileArgs),
    CompressContext,
}

impl ToolInvocation {
    /// Parse the model's tool name and JSON-encoded arguments
    pub fn parse(name: &str, arguments: &str) -> Result<Self, ToolError> {
        let args = parse_arguments(arguments)?;
        match name {
            CREATE_PROJECT => Ok(Self::CreateProject(from_args(args)?)),
            WRITE_FILE => Ok(Self::WriteFile(from_args(args)?)),
            COMPRESS_CONTEXT => Ok(Self::CompressContext),
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateProject(_) => CREATE_PROJECT,
            Self::WriteFile(_) => WRITE_FILE,
            Self::CompressContext => COMPRESS_CONTEXT,
        }
    }

    /// Whether the call changes the filesystem (and so belongs in the ledger)
    pub fn has_side_effects(&self) -> bool {
        !matches!(self, Self::CompressContext)
    }

    /// One-line description for logs and the completed-action ledger
    pub fn describe(&self) -> String {
        match self {
            Self::CreateProject(args) => format!("project '{}'", args.project_name),
            Self::WriteFile(args) => {
                let words = args.content.split_whitespace().count();
                match args.project {
                    Some(ref p) => format!("{} {} in '{}' ({} words)", args.mode, args.filename, p, words),
                    None => format!("{} {} ({} words)", args.mode, args.filename, words),
                }
            }
            Self::CompressContext => "compress context".to_string(),
        }
    }
}

/// Decode the argument string; empty means no arguments
pub fn parse_arguments(arguments: &str) -> Result<Value, ToolError> {
    if arguments.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(arguments)
        .map_err(|e| ToolError::InvalidArguments(format!("arguments are not valid JSON: {}", e)))
}

fn from_args<T: serde::de::DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

/// Schema for a tool parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterProperty {
    #[serde(rename = "type")]
    pub param_type: String,
    pub description: String,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParameterProperty {
    pub fn string(description: impl Into<String>) -> Self {
        Self {
            param_type: "string".to_string(),
            description: description.into(),
            enum_values: None,
            default: None,
        }
    }

    pub fn boolean(description: impl Into<String>) -> Self {
        Self {
            param_type: "boolean".to_string(),
            description: description.into(),
            enum_values: None,
            default: None,
        }
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_enum(mut self, values: Vec<String>) -> Self {
        self.enum_values = Some(values);
        self
    }
}

/// Schema describing tool parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    pub properties: BTreeMap<String, ParameterProperty>,
    #[serde(default)]
    pub required: Vec<String>,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self {
            schema_type: "object".to_string(),
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, prop: ParameterProperty) -> Self {
        self.properties.insert(name.into(), prop);
        self
    }

    pub fn with_required(mut self, name: impl Into<String>, prop: ParameterProperty) -> Self {
        let name = name.into();
        self.properties.insert(name.clone(), prop);
        self.required.push(name);
        self
    }
}

impl Default for ParameterSchema {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_create_project() {
        let call = ToolInvocation::parse(CREATE_PROJECT, r#"{"project_name": "Star Tales"}"#).unwrap();
        assert_eq!(
            call,
            ToolInvocation::CreateProject(CreateProjectArgs {
                project_name: "Star Tales".into(),
                exist_ok: false,
            })
        );
        assert!(call.has_side_effects());
    }

    #[test]
    fn test_parse_write_file_modes() {
        for mode in WriteMode::ALL {
            let args = format!(
                r#"{{"filename": "chapter_01.md", "content": "Once", "mode": "{}"}}"#,
                mode
            );
            match ToolInvocation::parse(WRITE_FILE, &args).unwrap() {
                ToolInvocation::WriteFile(w) => {
                    assert_eq!(w.mode, mode);
                    assert!(w.project.is_none());
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn test_parse_rejects_bad_mode() {
        let err = ToolInvocation::parse(
            WRITE_FILE,
            r#"{"filename": "a.md", "content": "x", "mode": "truncate"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn test_parse_compress_with_empty_arguments() {
        let call = ToolInvocation::parse(COMPRESS_CONTEXT, "").unwrap();
        assert_eq!(call, ToolInvocation::CompressContext);
        assert!(!call.has_side_effects());
    }

    #[test]
    fn test_parse_unknown_and_malformed() {
        assert!(matches!(
            ToolInvocation::parse("delete_everything", "{}"),
            Err(ToolError::UnknownTool(_))
        ));
        assert!(matches!(
            ToolInvocation::parse(CREATE_PROJECT, "{not json"),
            Err(ToolError::InvalidArguments(_))
        ));
        assert!(matches!(
            ToolInvocation::parse(CREATE_PROJECT, "{}"),
            Err(ToolError::InvalidArguments(_))
        ));
    }

    #[test]
    fn test_error_result_text() {
        let result = ToolResult::error(&ToolError::InvalidProject("ghost".into()));
        assert!(!result.success);
        assert!(result.output.starts_with("Error: invalid project 'ghost'"));
    }

    #[test]
    fn test_schema_serialization() {
        let schema = ParameterSchema::new()
            .with_required("mode", ParameterProperty::string("mode").with_enum(vec!["create".into()]))
            .with_property("exist_ok", ParameterProperty::boolean("reuse").with_default(Value::Bool(false)));
        let value = serde_json::to_value(&schema).unwrap();
        assert_eq!(value["type"], "object");
        assert_eq!(value["properties"]["mode"]["enum"][0], "create");
        assert_eq!(value["required"][0], "mode");
        assert_eq!(value["properties"]["exist_ok"]["default"], false);
    }
}
