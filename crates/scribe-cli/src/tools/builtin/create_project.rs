//! Project creation tool

use std::fs;
use std::io::ErrorKind;

use crate::tools::workspace::{sanitize_project_name, Workspace};
use crate::tools::{CreateProjectArgs, ParameterProperty, ParameterSchema, ToolError};

pub const DESCRIPTION: &str = "Creates a new project folder in the output directory with a sanitized name. \
Call this first, before writing any files. Only one project is active at a time; \
the newly created project becomes the active one.";

pub fn parameters() -> ParameterSchema {
    ParameterSchema::new()
        .with_required(
            "project_name",
            ParameterProperty::string(
                "The name for the project folder (sanitized for filesystem compatibility)",
            ),
        )
        .with_property(
            "exist_ok",
            ParameterProperty::boolean(
                "Reuse the folder if it already exists instead of failing (default: false)",
            )
            .with_default(serde_json::Value::Bool(false)),
        )
}

/// Create the project directory and make it active
pub fn execute(args: &CreateProjectArgs, workspace: &mut Workspace) -> Result<String, ToolError> {
    let name = sanitize_project_name(&args.project_name).ok_or_else(|| {
        ToolError::InvalidArguments(format!(
            "project name '{}' has no usable characters",
            args.project_name
        ))
    })?;

    fs::create_dir_all(workspace.output_root())
        .map_err(|e| ToolError::io(workspace.output_root(), e))?;

    let dir = workspace.project_dir(&name);
    let reused = match fs::create_dir(&dir) {
        Ok(()) => false,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            if !args.exist_ok || !dir.is_dir() {
                return Err(ToolError::AlreadyExists(dir));
            }
            true
        }
        Err(e) => return Err(ToolError::io(&dir, e)),
    };

    workspace.set_active_project(&name);

    Ok(if reused {
        format!("Project '{}' already existed and is now active: {}", name, dir.display())
    } else {
        format!("Created project '{}' at {}", name, dir.display())
    })
}
