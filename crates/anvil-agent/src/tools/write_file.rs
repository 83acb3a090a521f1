use serde_json::{Value, json};
use std::sync::Arc;

use super::{RegisteredTool, ToolContext, ToolDefinition, WRITE_FILE_TOOL, required_string_argument};
use crate::{ChangeKind, PendingChange, ToolError};

pub(super) fn write_file_tool() -> RegisteredTool {
    RegisteredTool {
        definition: ToolDefinition {
            name: WRITE_FILE_TOOL.to_string(),
            description: "Create a file or overwrite it with the full new content. Parent \
                          directories are created. Prefer replace_in_file for small edits."
                .to_string(),
            parameters: json!({
                "type": "object",
                "required": ["path", "content"],
                "properties": {
                    "path": { "type": "string" },
                    "content": { "type": "string" }
                }
            }),
        },
        executor: Arc::new(execute),
    }
}

fn execute(arguments: &Value, context: &mut ToolContext<'_>) -> Result<Value, ToolError> {
    let path = required_string_argument(arguments, "path")?;
    let content = required_string_argument(arguments, "content")?;

    let resolved = context.guard.resolve(&path)?;
    context.guard.ensure_writable(&resolved)?;
    let relative = context.guard.relative(&resolved);
    let before = context.current_file(&relative, &resolved)?;

    if before
        .as_ref()
        .is_some_and(|before| before.is_text && before.text == content)
    {
        return Ok(json!({
            "path": relative,
            "kind": ChangeKind::Write,
            "unchanged": true,
        }));
    }

    context.commit(PendingChange::from_snapshot(
        relative,
        ChangeKind::Write,
        before,
        Some(content),
    ))
}

#[cfg(test)]
mod tests {
    use super::super::fixture::ToolFixture;
    use crate::{ChangeKind, ToolErrorKind};
    use serde_json::json;

    #[test]
    fn write_stages_without_touching_disk() {
        let mut fixture = ToolFixture::new(&[]);
        let observation = fixture.call(
            "write_file",
            json!({"path": "src/new.txt", "content": "hello\n"}),
        );
        let payload = observation.payload().expect("write should stage");
        assert_eq!(payload["applied"], json!(false));
        assert_eq!(payload["diff_stats"], json!({"added": 1, "removed": 0}));
        assert_eq!(fixture.changes.len(), 1);
        assert_eq!(fixture.changes.changes()[0].kind, ChangeKind::Write);
        assert_eq!(fixture.changes.changes()[0].before, None);
        assert!(!fixture.dir.path().join("src").exists());
    }

    #[test]
    fn auto_apply_writes_immediately() {
        let mut fixture = ToolFixture::new(&[("a.txt", "old")]);
        fixture.auto_apply = true;
        let observation = fixture.call("write_file", json!({"path": "a.txt", "content": "new"}));
        assert_eq!(
            observation.payload().map(|payload| payload["applied"].clone()),
            Some(json!(true))
        );
        assert!(fixture.changes.is_empty());
        assert_eq!(fixture.applied.len(), 1);
        assert_eq!(fixture.read("a.txt").as_deref(), Some("new"));
    }

    #[test]
    fn identical_content_is_not_staged() {
        let mut fixture = ToolFixture::new(&[("a.txt", "same")]);
        let observation = fixture.call("write_file", json!({"path": "a.txt", "content": "same"}));
        assert_eq!(
            observation.payload().map(|payload| payload["unchanged"].clone()),
            Some(json!(true))
        );
        assert!(fixture.changes.is_empty());
    }

    #[test]
    fn non_text_file_can_be_overwritten() {
        let mut fixture = ToolFixture::new(&[]);
        std::fs::write(fixture.dir.path().join("data.bin"), [0x00, 0xde, 0xad, 0xbe, 0xef])
            .expect("fixture");
        let observation = fixture.call(
            "write_file",
            json!({"path": "data.bin", "content": "text now"}),
        );
        assert!(!observation.is_error(), "{}", observation.summary());
        let staged = &fixture.changes.changes()[0];
        assert_eq!(staged.before.as_deref(), Some("[non-text file, 5 bytes]\n"));

        let report = fixture.changes.accept_all(&fixture.guard);
        assert!(report.is_success(), "{report:?}");
        assert_eq!(fixture.read("data.bin").as_deref(), Some("text now"));
    }

    #[test]
    fn writing_over_a_directory_is_a_permission_error() {
        let mut fixture = ToolFixture::new(&[("src/a.py", "")]);
        let observation = fixture.call("write_file", json!({"path": "src", "content": "x"}));
        assert_eq!(observation.error_kind(), Some(ToolErrorKind::Permission));
        assert!(fixture.changes.is_empty());
    }

    #[test]
    fn escaping_write_is_rejected_before_staging() {
        let mut fixture = ToolFixture::new(&[]);
        let observation = fixture.call(
            "write_file",
            json!({"path": "../escape.txt", "content": "x"}),
        );
        assert_eq!(observation.error_kind(), Some(ToolErrorKind::PathEscape));
        assert!(fixture.changes.is_empty());
    }
}
