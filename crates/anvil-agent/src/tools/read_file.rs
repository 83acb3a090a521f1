use serde_json::{Value, json};
use std::fs;
use std::sync::Arc;

use super::{
    READ_FILE_TOOL, RegisteredTool, ToolContext, ToolDefinition, clamped_usize_argument,
    decode_text, optional_usize_argument, required_string_argument,
};
use crate::ToolError;

const DEFAULT_MAX_CHARS: usize = 50_000;
const MAX_CHARS_LIMIT: usize = 500_000;

pub(super) fn read_file_tool() -> RegisteredTool {
    RegisteredTool {
        definition: ToolDefinition {
            name: READ_FILE_TOOL.to_string(),
            description: "Read a text file. Optional 1-based inclusive line range. Returns the \
                          content and the file's total line count."
                .to_string(),
            parameters: json!({
                "type": "object",
                "required": ["path"],
                "properties": {
                    "path": { "type": "string" },
                    "start_line": { "type": "integer" },
                    "end_line": { "type": "integer" },
                    "max_chars": { "type": "integer" }
                }
            }),
        },
        executor: Arc::new(execute),
    }
}

fn execute(arguments: &Value, context: &mut ToolContext<'_>) -> Result<Value, ToolError> {
    let path = required_string_argument(arguments, "path")?;
    let start_line = optional_usize_argument(arguments, "start_line")?;
    let end_line = optional_usize_argument(arguments, "end_line")?;
    let max_chars =
        clamped_usize_argument(arguments, "max_chars", DEFAULT_MAX_CHARS, 1, MAX_CHARS_LIMIT)?;

    let guard = context.guard;
    let resolved = guard.resolve(&path)?;
    let relative = guard.relative(&resolved);

    let (text, staged) = match context.changes.effective_content(&relative) {
        Some(Some(content)) => (content.to_string(), true),
        Some(None) => return Err(ToolError::NotFound { path: relative }),
        None => {
            guard.ensure_readable(&resolved)?;
            if resolved.is_dir() {
                return Err(ToolError::Validation(format!(
                    "'{relative}' is a directory; use list_files"
                )));
            }
            let bytes = fs::read(&resolved).map_err(|error| ToolError::from_io(&relative, &error))?;
            (decode_text(bytes, &relative)?, false)
        }
    };

    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let total_lines = lines.len();
    let ranged = start_line.is_some() || end_line.is_some();
    let start = start_line.unwrap_or(1).max(1);
    let end = end_line.unwrap_or(total_lines).min(total_lines);

    let content = if !ranged {
        text.clone()
    } else {
        if total_lines > 0 && start > total_lines {
            return Err(ToolError::Validation(format!(
                "start_line {start} is past the end of the file ({total_lines} lines)"
            )));
        }
        if start > end {
            String::new()
        } else {
            lines[start - 1..end].concat()
        }
    };

    let char_count = content.chars().count();
    let truncated = char_count > max_chars;
    let content = if truncated {
        content.chars().take(max_chars).collect()
    } else {
        content
    };

    Ok(json!({
        "path": relative,
        "content": content,
        "total_lines": total_lines,
        "start_line": if ranged { start } else { 1 },
        "end_line": if ranged { end } else { total_lines },
        "truncated": truncated,
        "staged": staged,
    }))
}

#[cfg(test)]
mod tests {
    use super::super::fixture::ToolFixture;
    use crate::ToolErrorKind;
    use serde_json::json;

    #[test]
    fn reads_whole_file_exactly() {
        let mut fixture = ToolFixture::new(&[("notes.txt", "alpha\nbeta\n\ngamma")]);
        let observation = fixture.call("read_file", json!({"path": "notes.txt"}));
        let payload = observation.payload().expect("read should succeed");
        assert_eq!(payload["content"], json!("alpha\nbeta\n\ngamma"));
        assert_eq!(payload["total_lines"], json!(4));
        assert_eq!(payload["staged"], json!(false));
    }

    #[test]
    fn reads_inclusive_line_range() {
        let mut fixture = ToolFixture::new(&[("notes.txt", "1\n2\n3\n4\n")]);
        let observation = fixture.call(
            "read_file",
            json!({"path": "notes.txt", "start_line": 2, "end_line": 3}),
        );
        let payload = observation.payload().expect("read should succeed");
        assert_eq!(payload["content"], json!("2\n3\n"));
        assert_eq!(payload["start_line"], json!(2));
        assert_eq!(payload["end_line"], json!(3));
        assert_eq!(payload["total_lines"], json!(4));
    }

    #[test]
    fn binary_files_are_not_text() {
        let mut fixture = ToolFixture::new(&[("blob.bin", "ab\0cd")]);
        let observation = fixture.call("read_file", json!({"path": "blob.bin"}));
        assert_eq!(observation.error_kind(), Some(ToolErrorKind::NotText));
    }

    #[test]
    fn max_chars_truncates_content() {
        let mut fixture = ToolFixture::new(&[("long.txt", "abcdefghij")]);
        let observation = fixture.call("read_file", json!({"path": "long.txt", "max_chars": 4}));
        let payload = observation.payload().expect("read should succeed");
        assert_eq!(payload["content"], json!("abcd"));
        assert_eq!(payload["truncated"], json!(true));
    }

    #[test]
    fn staged_content_is_served_before_disk() {
        let mut fixture = ToolFixture::new(&[("a.txt", "disk")]);
        let write = fixture.call("write_file", json!({"path": "a.txt", "content": "staged"}));
        assert!(!write.is_error());
        let observation = fixture.call("read_file", json!({"path": "a.txt"}));
        let payload = observation.payload().expect("read should succeed");
        assert_eq!(payload["content"], json!("staged"));
        assert_eq!(payload["staged"], json!(true));
        assert_eq!(fixture.read("a.txt").as_deref(), Some("disk"));
    }

    #[test]
    fn missing_file_is_not_found() {
        let mut fixture = ToolFixture::new(&[]);
        let observation = fixture.call("read_file", json!({"path": "ghost.txt"}));
        assert_eq!(observation.error_kind(), Some(ToolErrorKind::NotFound));
    }
}
