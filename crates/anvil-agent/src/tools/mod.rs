mod delete_file;
mod list_files;
mod read_file;
mod registry;
mod replace_in_file;
mod search_in_files;
mod write_file;

use crate::{ChangeBuffer, FileSnapshot, PendingChange, ToolError, WorkspaceGuard};
use serde_json::{Map, Value, json};
use std::fs;
use std::path::Path;

pub use registry::{RegisteredTool, ToolDefinition, ToolExecutor, ToolRegistry};

pub const LIST_FILES_TOOL: &str = "list_files";
pub const READ_FILE_TOOL: &str = "read_file";
pub const SEARCH_IN_FILES_TOOL: &str = "search_in_files";
pub const WRITE_FILE_TOOL: &str = "write_file";
pub const REPLACE_IN_FILE_TOOL: &str = "replace_in_file";
pub const DELETE_FILE_TOOL: &str = "delete_file";

pub const TOOL_CATALOG: &[&str] = &[
    LIST_FILES_TOOL,
    READ_FILE_TOOL,
    SEARCH_IN_FILES_TOOL,
    WRITE_FILE_TOOL,
    REPLACE_IN_FILE_TOOL,
    DELETE_FILE_TOOL,
];

const TOOL_NAME_ALIASES: &[(&str, &str)] = &[
    ("create_file", WRITE_FILE_TOOL),
    ("append_file", WRITE_FILE_TOOL),
    ("save_file", WRITE_FILE_TOOL),
    ("edit_file", REPLACE_IN_FILE_TOOL),
    ("remove_file", DELETE_FILE_TOOL),
    ("grep", SEARCH_IN_FILES_TOOL),
    ("ls", LIST_FILES_TOOL),
    ("cat", READ_FILE_TOOL),
];

const ARGUMENT_ALIASES: &[(&str, &str)] = &[
    ("file_path", "path"),
    ("filepath", "path"),
    ("filename", "path"),
    ("dir", "path"),
    ("directory", "path"),
    ("text", "content"),
    ("query", "pattern"),
    ("search", "find"),
    ("old", "find"),
    ("new", "replace"),
    ("replacement", "replace"),
];

/// Everything a tool executor may touch while it runs.
pub struct ToolContext<'a> {
    pub guard: &'a WorkspaceGuard,
    pub changes: &'a mut ChangeBuffer,
    /// Changes committed directly because auto-apply is on.
    pub applied: &'a mut Vec<PendingChange>,
    pub auto_apply: bool,
}

impl ToolContext<'_> {
    /// Snapshot of the path from this run's point of view: the latest staged
    /// version if one exists, otherwise what is on disk. `None` when absent.
    /// Non-text files are returned too; callers that edit text reject them.
    fn current_file(&self, relative: &str, path: &Path) -> Result<Option<FileSnapshot>, ToolError> {
        if let Some(staged) = self.changes.effective_content(relative) {
            return Ok(staged.map(FileSnapshot::from_text));
        }
        if path.is_dir() {
            return Err(ToolError::Permission {
                path: relative.to_string(),
                reason: "path is a directory".to_string(),
            });
        }
        match fs::read(path) {
            Ok(bytes) => Ok(Some(FileSnapshot::from_bytes(bytes))),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(ToolError::from_io(relative, &error)),
        }
    }

    /// Stages the change, or applies it immediately when auto-apply is on.
    fn commit(&mut self, change: PendingChange) -> Result<Value, ToolError> {
        let stats = change.diff_stats();
        let payload = json!({
            "path": change.path,
            "kind": change.kind,
            "change_id": change.id,
            "applied": self.auto_apply,
            "diff_stats": stats,
        });
        if self.auto_apply {
            ChangeBuffer::apply_one(&change, self.guard)?;
            self.applied.push(change);
        } else {
            self.changes.stage(change);
        }
        Ok(payload)
    }
}

pub fn build_workspace_tool_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::default();
    registry.register(list_files::list_files_tool());
    registry.register(read_file::read_file_tool());
    registry.register(search_in_files::search_in_files_tool());
    registry.register(write_file::write_file_tool());
    registry.register(replace_in_file::replace_in_file_tool());
    registry.register(delete_file::delete_file_tool());
    registry
}

/// Maps a loosely named tool onto its catalog name. Unknown names pass through.
pub fn canonical_tool_name(name: &str) -> String {
    let name = name.trim();
    TOOL_NAME_ALIASES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(name))
        .map(|(_, canonical)| (*canonical).to_string())
        .unwrap_or_else(|| name.to_string())
}

/// Renames aliased argument keys. An explicit canonical key wins over its alias.
pub fn normalize_argument_names(arguments: Value) -> Value {
    let Value::Object(object) = arguments else {
        return arguments;
    };
    let mut normalized = Map::with_capacity(object.len());
    let mut aliased = Vec::new();
    for (key, value) in object {
        match ARGUMENT_ALIASES.iter().find(|(alias, _)| *alias == key) {
            Some((_, canonical)) => aliased.push(((*canonical).to_string(), value)),
            None => {
                normalized.insert(key, value);
            }
        }
    }
    for (key, value) in aliased {
        normalized.entry(key).or_insert(value);
    }
    Value::Object(normalized)
}

/// Converts string-encoded integers and booleans where the schema expects them.
fn coerce_argument_types(schema: &Value, arguments: &mut Value) {
    let (Some(properties), Some(object)) = (
        schema.get("properties").and_then(Value::as_object),
        arguments.as_object_mut(),
    ) else {
        return;
    };
    for (key, value) in object.iter_mut() {
        let Some(text) = value.as_str().map(str::trim) else {
            continue;
        };
        let coerced = match properties
            .get(key)
            .and_then(|property| property.get("type"))
            .and_then(Value::as_str)
        {
            Some("integer") => text.parse::<i64>().ok().map(Value::from),
            Some("boolean") => match text.to_ascii_lowercase().as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        };
        if let Some(coerced) = coerced {
            *value = coerced;
        }
    }
}

fn required_string_argument(arguments: &Value, key: &str) -> Result<String, ToolError> {
    optional_string_argument(arguments, key)?
        .ok_or_else(|| ToolError::Validation(format!("missing required argument '{}'", key)))
}

fn optional_string_argument(arguments: &Value, key: &str) -> Result<Option<String>, ToolError> {
    let Some(value) = arguments.get(key).filter(|value| !value.is_null()) else {
        return Ok(None);
    };
    let Some(value) = value.as_str() else {
        return Err(ToolError::Validation(format!(
            "argument '{}' must be a string",
            key
        )));
    };
    Ok(Some(value.to_string()))
}

fn optional_bool_argument(arguments: &Value, key: &str) -> Result<Option<bool>, ToolError> {
    let Some(value) = arguments.get(key).filter(|value| !value.is_null()) else {
        return Ok(None);
    };
    let Some(value) = value.as_bool() else {
        return Err(ToolError::Validation(format!(
            "argument '{}' must be a boolean",
            key
        )));
    };
    Ok(Some(value))
}

fn optional_usize_argument(arguments: &Value, key: &str) -> Result<Option<usize>, ToolError> {
    let Some(value) = arguments.get(key).filter(|value| !value.is_null()) else {
        return Ok(None);
    };
    if let Some(value) = value.as_u64() {
        return Ok(Some(usize::try_from(value).unwrap_or(usize::MAX)));
    }
    Err(ToolError::Validation(format!(
        "argument '{}' must be a non-negative integer",
        key
    )))
}

fn clamped_usize_argument(
    arguments: &Value,
    key: &str,
    default: usize,
    min: usize,
    max: usize,
) -> Result<usize, ToolError> {
    Ok(optional_usize_argument(arguments, key)?
        .unwrap_or(default)
        .clamp(min, max))
}

fn decode_text(bytes: Vec<u8>, relative: &str) -> Result<String, ToolError> {
    if bytes.contains(&0) {
        return Err(ToolError::NotText {
            path: relative.to_string(),
        });
    }
    String::from_utf8(bytes).map_err(|_| ToolError::NotText {
        path: relative.to_string(),
    })
}

fn glob_match_options() -> glob::MatchOptions {
    glob::MatchOptions {
        case_sensitive: true,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    }
}

fn compile_glob(pattern: Option<&str>) -> Result<Option<glob::Pattern>, ToolError> {
    pattern
        .map(str::trim)
        .filter(|pattern| !pattern.is_empty())
        .map(|pattern| {
            glob::Pattern::new(pattern)
                .map_err(|error| ToolError::InvalidPattern(format!("glob '{pattern}': {error}")))
        })
        .transpose()
}

/// A glob filter matches either the path relative to the search base or the
/// bare file name.
fn glob_matches(pattern: &glob::Pattern, relative: &str) -> bool {
    let options = glob_match_options();
    let file_name = relative.rsplit('/').next().unwrap_or(relative);
    pattern.matches_with(relative, options) || pattern.matches_with(file_name, options)
}

fn relative_to(base: &Path, path: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn validate_tool_arguments(schema: &Value, arguments: &Value) -> Result<(), ToolError> {
    let object = arguments
        .as_object()
        .ok_or_else(|| ToolError::Validation("tool arguments must be a JSON object".to_string()))?;

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if object.get(key).is_none_or(Value::is_null) {
                return Err(ToolError::Validation(format!(
                    "missing required argument '{}'",
                    key
                )));
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };

    for (key, value) in object {
        if value.is_null() {
            continue;
        }
        let Some(type_name) = properties
            .get(key)
            .and_then(|property| property.get("type"))
            .and_then(Value::as_str)
        else {
            continue;
        };

        let is_valid = match type_name {
            "string" => value.is_string(),
            "integer" => value.as_i64().is_some() || value.as_u64().is_some(),
            "boolean" => value.is_boolean(),
            _ => true,
        };
        if !is_valid {
            return Err(ToolError::Validation(format!(
                "argument '{}' expected type '{}' but received '{}'",
                key,
                type_name,
                json_type_name(value)
            )));
        }
    }

    Ok(())
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::String(_) => "string",
        Value::Number(_) => "number",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}


#[cfg(test)]
pub(crate) mod fixture {
    use super::*;
    use crate::Observation;
    use crate::ToolCall;

    /// Temporary workspace plus the state a run would hand to tools.
    pub(crate) struct ToolFixture {
        pub dir: tempfile::TempDir,
        pub guard: WorkspaceGuard,
        pub changes: ChangeBuffer,
        pub applied: Vec<PendingChange>,
        pub auto_apply: bool,
        registry: ToolRegistry,
        calls: usize,
    }

    impl ToolFixture {
        pub fn new(files: &[(&str, &str)]) -> Self {
            let dir = tempfile::tempdir().expect("tempdir should be created");
            for (path, content) in files {
                let path = dir.path().join(path);
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).expect("fixture dir should be created");
                }
                fs::write(&path, content).expect("fixture file should be written");
            }
            let guard = WorkspaceGuard::new(dir.path()).expect("guard should build");
            Self {
                dir,
                guard,
                changes: ChangeBuffer::new(),
                applied: Vec::new(),
                auto_apply: false,
                registry: build_workspace_tool_registry(),
                calls: 0,
            }
        }

        pub fn call(&mut self, tool: &str, arguments: Value) -> Observation {
            self.calls += 1;
            let call = ToolCall::new(format!("call-{}", self.calls), tool, arguments);
            let mut context = ToolContext {
                guard: &self.guard,
                changes: &mut self.changes,
                applied: &mut self.applied,
                auto_apply: self.auto_apply,
            };
            self.registry.dispatch(&call, &mut context)
        }

        pub fn read(&self, path: &str) -> Option<String> {
            fs::read_to_string(self.dir.path().join(path)).ok()
        }
    }
}
