//! Output root and active-project bookkeeping shared by the tools

use std::fs;
use std::path::{Path, PathBuf};

use crate::checkpoint::is_checkpoint_file;

use super::ToolError;

const MAX_PROJECT_NAME_LEN: usize = 64;

/// Where projects live and which one is currently active
#[derive(Debug, Clone)]
pub struct Workspace {
    output_root: PathBuf,
    active_project: Option<String>,
}

impl Workspace {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            active_project: None,
        }
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn active_project(&self) -> Option<&str> {
        self.active_project.as_deref()
    }

    pub fn set_active_project(&mut self, name: impl Into<String>) {
        self.active_project = Some(name.into());
    }

    pub fn project_dir(&self, name: &str) -> PathBuf {
        self.output_root.join(name)
    }

    /// Directory of the active project, or the output root if none
    pub fn checkpoint_dir(&self) -> PathBuf {
        match self.active_project {
            Some(ref name) if self.project_dir(name).is_dir() => self.project_dir(name),
            _ => self.output_root.clone(),
        }
    }

    /// Activate a project restored from a checkpoint if its directory still exists
    pub fn reactivate(&mut self, name: &str) -> bool {
        if self.project_dir(name).is_dir() {
            self.active_project = Some(name.to_string());
            true
        } else {
            false
        }
    }

    /// Resolve an explicit project name (sanitized) or fall back to the active one
    pub fn resolve_project(&self, requested: Option<&str>) -> Result<(String, PathBuf), ToolError> {
        let name = match requested {
            Some(raw) => sanitize_project_name(raw)
                .ok_or_else(|| ToolError::InvalidProject(raw.to_string()))?,
            None => self
                .active_project
                .clone()
                .ok_or_else(|| ToolError::InvalidProject("<none active>".to_string()))?,
        };

        let dir = self.project_dir(&name);
        if dir.is_dir() {
            Ok((name, dir))
        } else {
            Err(ToolError::InvalidProject(name))
        }
    }

    /// Content files of a project, excluding checkpoints, sorted by name
    pub fn list_content_files(&self, project: &str) -> Vec<(String, u64)> {
        let mut files: Vec<(String, u64)> = fs::read_dir(self.project_dir(project))
            .into_iter()
            .flatten()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                if is_checkpoint_file(&name) {
                    return None;
                }
                let size = e.metadata().map(|m| m.len()).unwrap_or(0);
                Some((name, size))
            })
            .collect();
        files.sort();
        files
    }
}

/// Make a project name safe as a single directory component
///
/// Lower-cases, maps anything outside `[a-z0-9_-]` to `_`, collapses runs of
/// separators, trims them from the ends and caps the length. Returns `None`
/// when nothing usable is left.
pub fn sanitize_project_name(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut last_sep = false;

    for c in raw.trim().chars() {
        let mapped = if c.is_ascii_alphanumeric() {
            c.to_ascii_lowercase()
        } else if c == '-' {
            '-'
        } else {
            '_'
        };

        let is_sep = mapped == '_' || mapped == '-';
        if is_sep && last_sep {
            continue;
        }
        last_sep = is_sep;
        out.push(mapped);
    }

    let trimmed: String = out
        .trim_matches(|c| c == '_' || c == '-')
        .chars()
        .take(MAX_PROJECT_NAME_LEN)
        .collect();
    let trimmed = trimmed.trim_end_matches(|c| c == '_' || c == '-').to_string();

    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
