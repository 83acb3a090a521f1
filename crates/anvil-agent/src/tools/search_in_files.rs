use regex::RegexBuilder;
use serde_json::{Value, json};
use std::fs;
use std::sync::Arc;

use super::{
    RegisteredTool, SEARCH_IN_FILES_TOOL, ToolContext, ToolDefinition, clamped_usize_argument,
    compile_glob, glob_matches, optional_bool_argument, optional_string_argument, relative_to,
    required_string_argument,
};
use crate::ToolError;
use crate::truncation::clip_text;

const DEFAULT_LIMIT: usize = 100;
/// Hard cap on matches returned by one search.
pub const MAX_SEARCH_MATCHES: usize = 1_000;
const LINE_TEXT_LIMIT: usize = 500;

pub(super) fn search_in_files_tool() -> RegisteredTool {
    RegisteredTool {
        definition: ToolDefinition {
            name: SEARCH_IN_FILES_TOOL.to_string(),
            description: "Search text files for a literal string (or a regex with regex=true). \
                          Case-insensitive by default. Returns {path, line_no, line_text} matches."
                .to_string(),
            parameters: json!({
                "type": "object",
                "required": ["pattern"],
                "properties": {
                    "pattern": { "type": "string" },
                    "path": { "type": "string" },
                    "glob": { "type": "string" },
                    "regex": { "type": "boolean" },
                    "ignore_case": { "type": "boolean" },
                    "limit": { "type": "integer" }
                }
            }),
        },
        executor: Arc::new(execute),
    }
}

fn execute(arguments: &Value, context: &mut ToolContext<'_>) -> Result<Value, ToolError> {
    let pattern = required_string_argument(arguments, "pattern")?;
    if pattern.is_empty() {
        return Err(ToolError::Validation("pattern must not be empty".to_string()));
    }
    let path = optional_string_argument(arguments, "path")?.unwrap_or_else(|| ".".to_string());
    let glob = compile_glob(optional_string_argument(arguments, "glob")?.as_deref())?;
    let use_regex = optional_bool_argument(arguments, "regex")?.unwrap_or(false);
    let ignore_case = optional_bool_argument(arguments, "ignore_case")?.unwrap_or(true);
    let limit = clamped_usize_argument(arguments, "limit", DEFAULT_LIMIT, 1, MAX_SEARCH_MATCHES)?;

    let source = if use_regex {
        pattern.clone()
    } else {
        regex::escape(&pattern)
    };
    let matcher = RegexBuilder::new(&source)
        .case_insensitive(ignore_case)
        .build()
        .map_err(|error| ToolError::InvalidPattern(error.to_string()))?;

    let guard = context.guard;
    let base = guard.resolve(&path)?;
    guard.ensure_readable(&base)?;
    let files: Vec<_> = if base.is_file() {
        vec![base.clone()]
    } else {
        guard.walk_files(&base).collect()
    };

    let mut matches = Vec::new();
    let mut files_scanned = 0usize;
    let mut truncated = false;
    'files: for file in files {
        if let Some(pattern) = &glob {
            if base.is_dir() && !glob_matches(pattern, &relative_to(&base, &file)) {
                continue;
            }
        }
        let Ok(bytes) = fs::read(&file) else {
            continue;
        };
        if bytes.contains(&0) {
            continue;
        }
        let Ok(text) = String::from_utf8(bytes) else {
            continue;
        };
        files_scanned += 1;
        let relative = guard.relative(&file);
        for (index, line) in text.lines().enumerate() {
            if !matcher.is_match(line) {
                continue;
            }
            if matches.len() >= limit {
                truncated = true;
                break 'files;
            }
            matches.push(json!({
                "path": relative,
                "line_no": index + 1,
                "line_text": clip_text(line, LINE_TEXT_LIMIT),
            }));
        }
    }

    Ok(json!({
        "pattern": pattern,
        "matches": matches,
        "files_scanned": files_scanned,
        "truncated": truncated,
    }))
}

#[cfg(test)]
mod tests {
    use super::super::fixture::ToolFixture;
    use crate::ToolErrorKind;
    use serde_json::json;

    #[test]
    fn literal_search_is_case_insensitive_by_default() {
        let mut fixture = ToolFixture::new(&[
            ("src/a.py", "import os\nTODO: fix\n"),
            ("src/b.py", "print('todo list')\n"),
            ("README.md", "nothing here\n"),
        ]);
        let observation = fixture.call("search_in_files", json!({"pattern": "todo"}));
        let payload = observation.payload().expect("search should succeed");
        assert_eq!(
            payload["matches"],
            json!([
                {"path": "src/a.py", "line_no": 2, "line_text": "TODO: fix"},
                {"path": "src/b.py", "line_no": 1, "line_text": "print('todo list')"}
            ])
        );
        assert_eq!(payload["files_scanned"], json!(3));
    }

    #[test]
    fn literal_patterns_do_not_interpret_regex_syntax() {
        let mut fixture = ToolFixture::new(&[("a.txt", "call(x)\ncallx\n")]);
        let observation = fixture.call("search_in_files", json!({"pattern": "call(x)"}));
        let payload = observation.payload().expect("search should succeed");
        assert_eq!(payload["matches"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn regex_search_with_glob_filter() {
        let mut fixture = ToolFixture::new(&[
            ("src/lib.rs", "fn alpha() {}\nfn beta() {}\n"),
            ("src/notes.txt", "fn gamma() {}\n"),
        ]);
        let observation = fixture.call(
            "search_in_files",
            json!({"pattern": r"^fn \w+", "regex": true, "glob": "*.rs", "path": "src"}),
        );
        let payload = observation.payload().expect("search should succeed");
        assert_eq!(payload["matches"].as_array().map(Vec::len), Some(2));
        assert_eq!(payload["files_scanned"], json!(1));
    }

    #[test]
    fn invalid_regex_is_reported() {
        let mut fixture = ToolFixture::new(&[("a.txt", "x")]);
        let observation =
            fixture.call("search_in_files", json!({"pattern": "(unclosed", "regex": true}));
        assert_eq!(observation.error_kind(), Some(ToolErrorKind::InvalidPattern));
    }

    #[test]
    fn match_count_is_capped_by_limit() {
        let mut fixture = ToolFixture::new(&[("a.txt", "hit\nhit\nhit\n")]);
        let observation = fixture.call("search_in_files", json!({"pattern": "hit", "limit": 2}));
        let payload = observation.payload().expect("search should succeed");
        assert_eq!(payload["matches"].as_array().map(Vec::len), Some(2));
        assert_eq!(payload["truncated"], json!(true));
    }
}
