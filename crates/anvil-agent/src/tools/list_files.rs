use serde_json::{Value, json};
use std::fs;
use std::sync::Arc;

use super::{
    LIST_FILES_TOOL, RegisteredTool, ToolContext, ToolDefinition, clamped_usize_argument,
    compile_glob, glob_matches, optional_bool_argument, optional_string_argument, relative_to,
};
use crate::ToolError;
use crate::workspace::is_ignored_name;

const DEFAULT_LIMIT: usize = 200;
const MAX_LIMIT: usize = 1_000;

pub(super) fn list_files_tool() -> RegisteredTool {
    RegisteredTool {
        definition: ToolDefinition {
            name: LIST_FILES_TOOL.to_string(),
            description: "List a directory. Without glob/recursive, returns immediate children \
                          (directories first, suffixed with '/'). With glob or recursive=true, \
                          returns matching files below the directory."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Directory relative to the workspace root. Defaults to '.'." },
                    "glob": { "type": "string" },
                    "recursive": { "type": "boolean" },
                    "limit": { "type": "integer" }
                }
            }),
        },
        executor: Arc::new(execute),
    }
}

fn execute(arguments: &Value, context: &mut ToolContext<'_>) -> Result<Value, ToolError> {
    let path = optional_string_argument(arguments, "path")?.unwrap_or_else(|| ".".to_string());
    let glob = compile_glob(optional_string_argument(arguments, "glob")?.as_deref())?;
    let recursive = optional_bool_argument(arguments, "recursive")?.unwrap_or(false);
    let limit = clamped_usize_argument(arguments, "limit", DEFAULT_LIMIT, 1, MAX_LIMIT)?;

    let guard = context.guard;
    let dir = guard.resolve(&path)?;
    guard.ensure_readable(&dir)?;
    if !dir.is_dir() {
        return Err(ToolError::Validation(format!(
            "'{}' is not a directory",
            guard.relative(&dir)
        )));
    }

    let mut entries = if glob.is_some() || recursive {
        let mut files: Vec<String> = guard
            .walk_files(&dir)
            .map(|file| relative_to(&dir, &file))
            .filter(|relative| glob.as_ref().is_none_or(|pattern| glob_matches(pattern, relative)))
            .collect();
        files.sort();
        files
    } else {
        list_children(context, &dir)?
    };

    let truncated = entries.len() > limit;
    entries.truncate(limit);
    Ok(json!({
        "path": guard.relative(&dir),
        "entries": entries,
        "truncated": truncated,
    }))
}

fn list_children(context: &ToolContext<'_>, dir: &std::path::Path) -> Result<Vec<String>, ToolError> {
    let guard = context.guard;
    let display = guard.relative(dir);
    let read_dir = fs::read_dir(dir).map_err(|error| ToolError::from_io(&display, &error))?;

    let mut dirs = Vec::new();
    let mut files = Vec::new();
    for entry in read_dir.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        let is_dir = if file_type.is_symlink() {
            match fs::canonicalize(entry.path()) {
                Ok(target) if target.starts_with(guard.root()) => target.is_dir(),
                _ => continue,
            }
        } else {
            file_type.is_dir()
        };
        if is_ignored_name(&name, is_dir) {
            continue;
        }
        if is_dir {
            dirs.push(format!("{name}/"));
        } else {
            files.push(name);
        }
    }
    dirs.sort();
    files.sort();
    dirs.extend(files);
    Ok(dirs)
}
