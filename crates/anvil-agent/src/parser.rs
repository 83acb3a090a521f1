//! Turns a raw model reply into a tool call or a final answer.
//!
//! The model is asked for a fenced JSON object `{"tool": ..., "args": {...}}`.
//! Candidates are examined in order of appearance and the first one shaped
//! like a tool call decides the reply: a valid call wins over any surrounding
//! prose (kept as display text), an undecodable one makes the reply
//! [`ParsedReply::Malformed`]. Replies with no tool-call-shaped content are
//! final answers.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

use crate::tools::{TOOL_CATALOG, canonical_tool_name, normalize_argument_names};

#[derive(Clone, Debug, PartialEq)]
pub enum ParsedReply {
    ToolCall {
        name: String,
        arguments: Value,
        display_text: String,
    },
    FinalAnswer {
        text: String,
    },
    Malformed {
        reason: String,
    },
}

enum Candidate {
    Call { name: String, arguments: Value },
    Answer(String),
    Invalid(String),
    NotACall,
}

fn fence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```[ \t]*([A-Za-z0-9_+.-]*)[^\n`]*\n?(.*?)```").expect("fence regex")
    })
}

fn reasoning_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?is)<think>.*?</think>|<thinking>.*?</thinking>|<analysis>.*?</analysis>|```(?:thinking|reasoning)[^\n]*\n.*?```",
        )
        .expect("reasoning regex")
    })
}

fn call_expression_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*`?([A-Za-z_][A-Za-z0-9_]*)\((.*)\)`?\s*$").expect("call regex")
    })
}

fn keyword_argument_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"([A-Za-z_][A-Za-z0-9_]*)\s*=\s*("(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'|-?\d+|true|false|True|False)"#,
        )
        .expect("keyword argument regex")
    })
}

/// Removes `<think>`-style sections some models emit before their answer.
pub fn strip_reasoning(raw: &str) -> String {
    reasoning_regex().replace_all(raw, "").trim().to_string()
}

pub fn parse_reply(raw: &str) -> ParsedReply {
    let text = strip_reasoning(raw);
    if text.is_empty() {
        return ParsedReply::Malformed {
            reason: "reply was empty".to_string(),
        };
    }

    for fence in fence_regex().captures_iter(&text) {
        let (Some(whole), Some(info), Some(body_match)) =
            (fence.get(0), fence.get(1), fence.get(2))
        else {
            continue;
        };
        let body = body_match.as_str().trim();
        let shaped = looks_like_tool_call(info.as_str(), body);
        let (candidate, span_end) = match decode_json_candidate(body) {
            Some(value) => (classify(&value), whole.end()),
            None if shaped => match object_spanning_fence(&text, body_match.start()) {
                Some((value, end)) => (classify(&value), end),
                None => (
                    Candidate::Invalid("tool-call block is not valid JSON".to_string()),
                    whole.end(),
                ),
            },
            None => (Candidate::NotACall, whole.end()),
        };
        let display_text = remove_span(&text, whole.start(), span_end);
        if let Some(decided) = decide(candidate, display_text) {
            return decided;
        }
    }

    let trimmed = text.trim();
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            let slice = &trimmed[start..=end];
            let candidate = match serde_json::from_str::<Value>(slice) {
                Ok(value) => classify(&value),
                Err(_) if looks_like_tool_call("", slice) => {
                    Candidate::Invalid("tool call is not valid JSON".to_string())
                }
                Err(_) => Candidate::NotACall,
            };
            if let Some(decided) = decide(candidate, remove_span(trimmed, start, end + 1)) {
                return decided;
            }
        }
    }

    if let Some(decided) = parse_call_expression(trimmed) {
        return decided;
    }

    ParsedReply::FinalAnswer {
        text: trimmed.to_string(),
    }
}

fn decide(candidate: Candidate, display_text: String) -> Option<ParsedReply> {
    match candidate {
        Candidate::Call { name, arguments } => Some(ParsedReply::ToolCall {
            name,
            arguments,
            display_text,
        }),
        Candidate::Answer(text) => Some(ParsedReply::FinalAnswer { text }),
        Candidate::Invalid(reason) => Some(ParsedReply::Malformed { reason }),
        Candidate::NotACall => None,
    }
}

fn looks_like_tool_call(info: &str, body: &str) -> bool {
    matches!(
        info.to_ascii_lowercase().as_str(),
        "json" | "tool" | "tool_call" | "action"
    ) || body.contains("\"tool\"")
        || body.contains("\"actions\"")
}

/// Decodes the block, or failing that the outermost `{...}` inside it.
fn decode_json_candidate(body: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        return Some(value);
    }
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if start >= end {
        return None;
    }
    serde_json::from_str::<Value>(&body[start..=end]).ok()
}

/// Recovers a block whose JSON strings contain a fence of their own, such as
/// a Markdown file passed as `content`. Reads the object starting at the first
/// `{` of the block, then skips the closing fence that follows it. Returns the
/// value and the end of the consumed span.
fn object_spanning_fence(text: &str, body_start: usize) -> Option<(Value, usize)> {
    let start = body_start + text[body_start..].find('{')?;
    let end = object_end(text, start)?;
    let value = serde_json::from_str::<Value>(&text[start..end]).ok()?;
    let rest = &text[end..];
    let after_fence = rest
        .trim_start()
        .strip_prefix("```")
        .map_or(end, |remaining| text.len() - remaining.len());
    Some((value, after_fence))
}

/// Byte offset just past the `}` closing the object that opens at `start`.
/// Braces inside JSON strings are ignored.
fn object_end(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, byte) in text.as_bytes()[start..].iter().copied().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn classify(value: &Value) -> Candidate {
    let Some(object) = value.as_object() else {
        return Candidate::NotACall;
    };

    if let Some(actions) = object.get("actions") {
        let Some(actions) = actions.as_array() else {
            return Candidate::Invalid("'actions' must be a list".to_string());
        };
        return match actions.first() {
            Some(first) => match classify(first) {
                Candidate::NotACall => {
                    Candidate::Invalid("first action does not name a tool".to_string())
                }
                decided => decided,
            },
            None => final_answer_field(object).map_or(Candidate::NotACall, Candidate::Answer),
        };
    }
    if let Some(action) = object.get("action").filter(|action| action.is_object()) {
        return classify(action);
    }

    let has_arguments = ["args", "arguments", "parameters"]
        .iter()
        .any(|key| object.contains_key(*key));
    let name = match (object.get("tool"), object.get("name")) {
        (Some(tool), _) => tool,
        (None, Some(name)) if has_arguments => name,
        _ => {
            return final_answer_field(object).map_or(Candidate::NotACall, Candidate::Answer);
        }
    };
    let Some(name) = name.as_str().map(str::trim).filter(|name| !name.is_empty()) else {
        return Candidate::Invalid("tool name must be a non-empty string".to_string());
    };

    let arguments = ["args", "arguments", "parameters"]
        .iter()
        .find_map(|key| object.get(*key))
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()));
    let arguments = match arguments {
        Value::Object(_) => arguments,
        Value::Null => Value::Object(Map::new()),
        Value::String(encoded) => match serde_json::from_str::<Value>(&encoded) {
            Ok(decoded @ Value::Object(_)) => decoded,
            _ => return Candidate::Invalid("tool args must be a JSON object".to_string()),
        },
        _ => return Candidate::Invalid("tool args must be a JSON object".to_string()),
    };

    Candidate::Call {
        name: canonical_tool_name(name),
        arguments: normalize_argument_names(arguments),
    }
}

fn final_answer_field(object: &Map<String, Value>) -> Option<String> {
    ["final_answer", "final", "answer"]
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

/// Accepts a line such as `read_file(path="src/a.py")` naming a catalog tool.
fn parse_call_expression(text: &str) -> Option<ParsedReply> {
    for (index, line) in text.lines().enumerate() {
        let Some(captures) = call_expression_regex().captures(line) else {
            continue;
        };
        let name = canonical_tool_name(&captures[1]);
        if !TOOL_CATALOG.contains(&name.as_str()) {
            continue;
        }
        let mut arguments = Map::new();
        for argument in keyword_argument_regex().captures_iter(&captures[2]) {
            arguments.insert(argument[1].to_string(), literal_value(&argument[2]));
        }
        let display_text = text
            .lines()
            .enumerate()
            .filter(|(other, _)| *other != index)
            .map(|(_, line)| line)
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string();
        return Some(ParsedReply::ToolCall {
            name,
            arguments: normalize_argument_names(Value::Object(arguments)),
            display_text,
        });
    }
    None
}

fn literal_value(literal: &str) -> Value {
    match literal {
        "true" | "True" => Value::Bool(true),
        "false" | "False" => Value::Bool(false),
        _ if literal.starts_with('"') => serde_json::from_str(literal)
            .unwrap_or_else(|_| Value::String(literal.trim_matches('"').to_string())),
        _ if literal.starts_with('\'') => Value::String(
            literal[1..literal.len() - 1]
                .replace("\\'", "'")
                .replace("\\n", "\n"),
        ),
        _ => literal
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(literal.to_string())),
    }
}

fn remove_span(text: &str, start: usize, end: usize) -> String {
    let mut remaining = String::with_capacity(text.len());
    remaining.push_str(text[..start].trim_end());
    let tail = text[end..].trim_start();
    if !remaining.is_empty() && !tail.is_empty() {
        remaining.push_str("\n\n");
    }
    remaining.push_str(tail);
    remaining.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn expect_call(reply: ParsedReply) -> (String, Value, String) {
        match reply {
            ParsedReply::ToolCall {
                name,
                arguments,
                display_text,
            } => (name, arguments, display_text),
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn fenced_json_tool_call_is_extracted() {
        let reply = "Let me look.\n```json\n{\"tool\": \"list_files\", \"args\": {\"path\": \"src\"}}\n```";
        let (name, arguments, display) = expect_call(parse_reply(reply));
        assert_eq!(name, "list_files");
        assert_eq!(arguments, json!({"path": "src"}));
        assert_eq!(display, "Let me look.");
    }

    #[test]
    fn tool_call_wins_over_trailing_prose() {
        let reply = "```json\n{\"tool\": \"read_file\", \"args\": {\"path\": \"a.txt\"}}\n```\nThe file is probably empty, so the answer is no.";
        let (name, _, display) = expect_call(parse_reply(reply));
        assert_eq!(name, "read_file");
        assert_eq!(display, "The file is probably empty, so the answer is no.");
    }

    #[test]
    fn first_tool_call_block_wins() {
        let reply = "```json\n{\"tool\": \"read_file\", \"args\": {\"path\": \"first.txt\"}}\n```\n```json\n{\"tool\": \"delete_file\", \"args\": {\"path\": \"second.txt\"}}\n```";
        let (name, arguments, _) = expect_call(parse_reply(reply));
        assert_eq!(name, "read_file");
        assert_eq!(arguments["path"], json!("first.txt"));
    }

    #[test]
    fn actions_envelope_uses_first_action() {
        let reply = r#"{"actions": [{"tool": "create_file", "args": {"file_path": "a.txt", "text": "hi"}}, {"tool": "delete_file", "args": {"path": "b"}}]}"#;
        let (name, arguments, _) = expect_call(parse_reply(reply));
        assert_eq!(name, "write_file");
        assert_eq!(arguments, json!({"path": "a.txt", "content": "hi"}));
    }

    #[test]
    fn bare_json_and_stringified_arguments_are_accepted() {
        let reply = r#"{"name": "read_file", "arguments": "{\"path\": \"x.rs\"}"}"#;
        let (name, arguments, _) = expect_call(parse_reply(reply));
        assert_eq!(name, "read_file");
        assert_eq!(arguments, json!({"path": "x.rs"}));
    }

    #[test]
    fn plain_prose_is_a_final_answer() {
        let reply = "The project has two files: a.py and b.py.";
        assert_eq!(
            parse_reply(reply),
            ParsedReply::FinalAnswer {
                text: reply.to_string()
            }
        );
    }

    #[test]
    fn non_tool_code_blocks_stay_in_final_answer() {
        let reply = "Use this:\n```rust\nfn main() { println!(\"{}\", 1); }\n```";
        assert!(matches!(parse_reply(reply), ParsedReply::FinalAnswer { .. }));
        let data = "Config:\n```json\n{\"port\": 8080}\n```";
        assert!(matches!(parse_reply(data), ParsedReply::FinalAnswer { .. }));
    }

    #[test]
    fn broken_tool_block_is_malformed() {
        let reply = "```json\n{\"tool\": \"read_file\", \"args\": {\"path\": \"a.txt\"\n```";
        assert!(matches!(parse_reply(reply), ParsedReply::Malformed { .. }));
        let wrong_args = r#"{"tool": "read_file", "args": ["a.txt"]}"#;
        assert!(matches!(parse_reply(wrong_args), ParsedReply::Malformed { .. }));
    }

    #[test]
    fn fence_inside_json_string_does_not_end_the_block() {
        let reply = "Writing the README.\n```json\n{\"tool\": \"write_file\", \"args\": {\"path\": \"README.md\", \"content\": \"# Demo\\n```rust\\nfn main() {}\\n```\\n\"}}\n```\nDone soon.";
        let (name, arguments, display) = expect_call(parse_reply(reply));
        assert_eq!(name, "write_file");
        assert_eq!(arguments["path"], json!("README.md"));
        assert_eq!(
            arguments["content"],
            json!("# Demo\n```rust\nfn main() {}\n```\n")
        );
        assert_eq!(display, "Writing the README.\n\nDone soon.");
    }

    #[test]
    fn unterminated_object_in_tool_block_stays_malformed() {
        let reply = "```json\n{\"tool\": \"write_file\", \"args\": {\"content\": \"```\"\n```";
        assert!(matches!(parse_reply(reply), ParsedReply::Malformed { .. }));
    }

    #[test]
    fn empty_reply_is_malformed() {
        assert!(matches!(
            parse_reply("<think>hmm</think>   "),
            ParsedReply::Malformed { .. }
        ));
    }

    #[test]
    fn reasoning_sections_are_stripped() {
        let reply = "<think>maybe delete everything</think>\nAll done.";
        assert_eq!(
            parse_reply(reply),
            ParsedReply::FinalAnswer {
                text: "All done.".to_string()
            }
        );
        assert_eq!(
            strip_reasoning("```thinking\nplan\n```\nanswer"),
            "answer"
        );
    }

    #[test]
    fn envelope_final_answer_field_is_a_final_answer() {
        let reply = r#"{"actions": [], "final": "Nothing to change."}"#;
        assert_eq!(
            parse_reply(reply),
            ParsedReply::FinalAnswer {
                text: "Nothing to change.".to_string()
            }
        );
    }

    #[test]
    fn call_expression_line_is_a_tool_call() {
        let reply = "I'll check it.\nread_file(path=\"src/a.py\", start_line=2)";
        let (name, arguments, display) = expect_call(parse_reply(reply));
        assert_eq!(name, "read_file");
        assert_eq!(arguments, json!({"path": "src/a.py", "start_line": 2}));
        assert_eq!(display, "I'll check it.");
        assert!(matches!(
            parse_reply("print(value=1)"),
            ParsedReply::FinalAnswer { .. }
        ));
    }
}
