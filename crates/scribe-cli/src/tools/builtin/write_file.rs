//! Markdown file writing tool

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;

use crate::checkpoint::is_checkpoint_file;
use crate::tools::workspace::Workspace;
use crate::tools::{ParameterProperty, ParameterSchema, ToolError, WriteFileArgs, WriteMode};

pub const DESCRIPTION: &str = "Writes content to a markdown file in a project folder (the active project unless \
'project' is given). Modes: 'create' makes a new file and fails if it exists, 'append' adds to the end \
(creating the file if needed), 'overwrite' replaces the entire file.";

pub fn parameters() -> ParameterSchema {
    ParameterSchema::new()
        .with_required(
            "filename",
            ParameterProperty::string("The markdown file name, e.g. chapter_01.md (.md is added if missing)"),
        )
        .with_required("content", ParameterProperty::string("The content to write to the file"))
        .with_required(
            "mode",
            ParameterProperty::string(
                "'create' for new files, 'append' to add to the end, 'overwrite' to replace",
            )
            .with_enum(WriteMode::ALL.iter().map(|m| m.as_str().to_string()).collect()),
        )
        .with_property(
            "project",
            ParameterProperty::string("Project folder to write into (default: the active project)"),
        )
}

/// Write the file according to its mode
pub fn execute(args: &WriteFileArgs, workspace: &Workspace) -> Result<String, ToolError> {
    let (project, dir) = workspace.resolve_project(args.project.as_deref())?;
    let filename = validate_filename(&args.filename)?;
    let path = dir.join(&filename);

    match args.mode {
        WriteMode::Create => {
            let mut file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .map_err(|e| match e.kind() {
                    ErrorKind::AlreadyExists => ToolError::AlreadyExists(path.clone()),
                    _ => ToolError::io(&path, e),
                })?;
            file.write_all(args.content.as_bytes())
                .map_err(|e| ToolError::io(&path, e))?;
        }
        WriteMode::Append => {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| ToolError::io(&path, e))?;
            file.write_all(args.content.as_bytes())
                .map_err(|e| ToolError::io(&path, e))?;
        }
        WriteMode::Overwrite => {
            fs::write(&path, &args.content).map_err(|e| ToolError::io(&path, e))?;
        }
    }

    let verb = match args.mode {
        WriteMode::Create => "Created",
        WriteMode::Append => "Appended to",
        WriteMode::Overwrite => "Overwrote",
    };
    let words = args.content.split_whitespace().count();
    let total = file_size(&path);

    Ok(format!(
        "{} {}/{} ({} bytes, {} words written; file is now {} bytes)",
        verb,
        project,
        filename,
        args.content.len(),
        words,
        total
    ))
}

/// Accept a bare markdown file name; add `.md` when no extension is given
pub fn validate_filename(raw: &str) -> Result<String, ToolError> {
    let name = raw.trim();
    let invalid = |why: &str| ToolError::InvalidArguments(format!("filename '{}' {}", raw, why));

    if name.is_empty() {
        return Err(invalid("is empty"));
    }
    if name.contains('/') || name.contains('\\') || name.contains("..") || name.contains('\0') {
        return Err(invalid("must be a plain file name inside the project"));
    }
    if name.starts_with('.') || is_checkpoint_file(name) {
        return Err(invalid("must not be hidden"));
    }

    match Path::new(name).extension().and_then(|e| e.to_str()) {
        None => Ok(format!("{}.md", name)),
        Some(ext) if ext.eq_ignore_ascii_case("md") => Ok(name.to_string()),
        Some(_) => Err(invalid("must be a markdown (.md) file")),
    }
}

fn file_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Workspace) {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("story")).unwrap();
        let mut ws = Workspace::new(temp.path());
        ws.set_active_project("story");
        (temp, ws)
    }

    fn args(filename: &str, content: &str, mode: WriteMode) -> WriteFileArgs {
        WriteFileArgs {
            project: None,
            filename: filename.to_string(),
            content: content.to_string(),
            mode,
        }
    }

    #[test]
    fn test_create_then_create_fails_without_modifying() {
        let (temp, ws) = setup();
        let path = temp.path().join("story/chapter_01.md");

        let msg = execute(&args("chapter_01.md", "First draft", WriteMode::Create), &ws).unwrap();
        assert!(msg.starts_with("Created story/chapter_01.md"));

        let err = execute(&args("chapter_01.md", "Replacement", WriteMode::Create), &ws).unwrap_err();
        assert!(matches!(err, ToolError::AlreadyExists(_)));
        assert_eq!(fs::read_to_string(&path).unwrap(), "First draft");
    }

    #[test]
    fn test_append_creates_when_absent() {
        let (temp, ws) = setup();
        execute(&args("notes.md", "line1\n", WriteMode::Append), &ws).unwrap();
        execute(&args("notes.md", "line2\n", WriteMode::Append), &ws).unwrap();
        assert_eq!(
            fs::read_to_string(temp.path().join("story/notes.md")).unwrap(),
            "line1\nline2\n"
        );
    }

    #[test]
    fn test_overwrite_is_idempotent() {
        let (temp, ws) = setup();
        let path = temp.path().join("story/readme.md");
        fs::write(&path, "old contents that are longer").unwrap();

        execute(&args("readme.md", "# Title", WriteMode::Overwrite), &ws).unwrap();
        let first = fs::read(&path).unwrap();
        execute(&args("readme.md", "# Title", WriteMode::Overwrite), &ws).unwrap();
        let second = fs::read(&path).unwrap();

        assert_eq!(first, b"# Title");
        assert_eq!(first, second);
    }

    #[test]
    fn test_requires_existing_project() {
        let temp = TempDir::new().unwrap();
        let ws = Workspace::new(temp.path());
        let err = execute(&args("a.md", "x", WriteMode::Create), &ws).unwrap_err();
        assert!(matches!(err, ToolError::InvalidProject(_)));

        let mut explicit = args("a.md", "x", WriteMode::Create);
        explicit.project = Some("missing".into());
        let err = execute(&explicit, &ws).unwrap_err();
        assert!(matches!(err, ToolError::InvalidProject(ref p) if p == "missing"));
    }

    #[test]
    fn test_explicit_project_overrides_active() {
        let (temp, ws) = setup();
        fs::create_dir_all(temp.path().join("other")).unwrap();
        let mut a = args("x.md", "hello", WriteMode::Create);
        a.project = Some("other".into());
        execute(&a, &ws).unwrap();
        assert!(temp.path().join("other/x.md").exists());
        assert!(!temp.path().join("story/x.md").exists());
    }

    #[test]
    fn test_validate_filename() {
        assert_eq!(validate_filename("chapter_01.md").unwrap(), "chapter_01.md");
        assert_eq!(validate_filename("chapter_02").unwrap(), "chapter_02.md");
        assert_eq!(validate_filename("README.MD").unwrap(), "README.MD");
        assert!(validate_filename("../escape.md").is_err());
        assert!(validate_filename("sub/dir.md").is_err());
        assert!(validate_filename(".context_summary_x.md").is_err());
        assert!(validate_filename(".hidden.md").is_err());
        assert!(validate_filename("script.sh").is_err());
        assert!(validate_filename("   ").is_err());
    }
}
