use serde_json::{Value, json};
use std::sync::Arc;

use super::{DELETE_FILE_TOOL, RegisteredTool, ToolContext, ToolDefinition, required_string_argument};
use crate::{ChangeKind, PendingChange, ToolError};

pub(super) fn delete_file_tool() -> RegisteredTool {
    RegisteredTool {
        definition: ToolDefinition {
            name: DELETE_FILE_TOOL.to_string(),
            description: "Delete one existing file.".to_string(),
            parameters: json!({
                "type": "object",
                "required": ["path"],
                "properties": {
                    "path": { "type": "string" }
                }
            }),
        },
        executor: Arc::new(execute),
    }
}

fn execute(arguments: &Value, context: &mut ToolContext<'_>) -> Result<Value, ToolError> {
    let path = required_string_argument(arguments, "path")?;
    let resolved = context.guard.resolve(&path)?;
    let relative = context.guard.relative(&resolved);
    let Some(before) = context.current_file(&relative, &resolved)? else {
        return Err(ToolError::NotFound { path: relative });
    };

    context.commit(PendingChange::from_snapshot(
        relative,
        ChangeKind::Delete,
        Some(before),
        None,
    ))
}
