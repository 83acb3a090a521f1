use regex::Regex;
use serde_json::{Value, json};
use std::sync::Arc;

use super::{
    REPLACE_IN_FILE_TOOL, RegisteredTool, ToolContext, ToolDefinition, optional_bool_argument,
    optional_usize_argument, required_string_argument,
};
use crate::{ChangeKind, PendingChange, ToolError};

pub(super) fn replace_in_file_tool() -> RegisteredTool {
    RegisteredTool {
        definition: ToolDefinition {
            name: REPLACE_IN_FILE_TOOL.to_string(),
            description: "Replace occurrences of `find` with `replace` in one file. count=0 \
                          (default) replaces all. Set regex=true to treat `find` as a regex. \
                          Fails if nothing matches."
                .to_string(),
            parameters: json!({
                "type": "object",
                "required": ["path", "find", "replace"],
                "properties": {
                    "path": { "type": "string" },
                    "find": { "type": "string" },
                    "replace": { "type": "string" },
                    "count": { "type": "integer" },
                    "regex": { "type": "boolean" }
                }
            }),
        },
        executor: Arc::new(execute),
    }
}

fn execute(arguments: &Value, context: &mut ToolContext<'_>) -> Result<Value, ToolError> {
    let path = required_string_argument(arguments, "path")?;
    let find = required_string_argument(arguments, "find")?;
    let replace = required_string_argument(arguments, "replace")?;
    let count = optional_usize_argument(arguments, "count")?.unwrap_or(0);
    let use_regex = optional_bool_argument(arguments, "regex")?.unwrap_or(false);
    if find.is_empty() {
        return Err(ToolError::Validation("argument 'find' must not be empty".to_string()));
    }

    let resolved = context.guard.resolve(&path)?;
    let relative = context.guard.relative(&resolved);
    let Some(snapshot) = context.current_file(&relative, &resolved)? else {
        return Err(ToolError::NotFound { path: relative });
    };
    if !snapshot.is_text {
        return Err(ToolError::NotText { path: relative });
    }
    let before = snapshot.text.clone();

    let (after, replacements) = if use_regex {
        let pattern = Regex::new(&find).map_err(|error| ToolError::InvalidPattern(error.to_string()))?;
        let found = pattern.find_iter(&before).count();
        if found == 0 {
            return Err(ToolError::NoMatch { path: relative });
        }
        let after = pattern.replacen(&before, count, replace.as_str()).into_owned();
        (after, if count == 0 { found } else { found.min(count) })
    } else {
        let found = before.matches(find.as_str()).count();
        if found == 0 {
            return Err(ToolError::NoMatch { path: relative });
        }
        let after = if count == 0 {
            before.replace(find.as_str(), &replace)
        } else {
            before.replacen(find.as_str(), &replace, count)
        };
        (after, if count == 0 { found } else { found.min(count) })
    };

    context.guard.ensure_writable(&resolved)?;
    let mut payload = context.commit(PendingChange::from_snapshot(
        relative,
        ChangeKind::Replace,
        Some(snapshot),
        Some(after),
    ))?;
    payload["replacements"] = json!(replacements);
    Ok(payload)
}
