use crate::AgentConfig;
use crate::tools::{LIST_FILES_TOOL, SEARCH_IN_FILES_TOOL};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TruncationMode {
    HeadTail,
    Head,
}

pub fn default_truncation_mode_for_tool(tool_name: &str) -> TruncationMode {
    match tool_name {
        LIST_FILES_TOOL | SEARCH_IN_FILES_TOOL => TruncationMode::Head,
        _ => TruncationMode::HeadTail,
    }
}

/// Clips a rendered observation to the per-tool limit before it enters a prompt.
pub fn truncate_observation(rendered: &str, tool_name: &str, config: &AgentConfig) -> String {
    let max_chars = config.tool_output_limit(tool_name);
    truncate_chars(rendered, max_chars, default_truncation_mode_for_tool(tool_name))
}

pub fn truncate_chars(output: &str, max_chars: usize, mode: TruncationMode) -> String {
    let char_count = output.chars().count();
    if char_count <= max_chars {
        return output.to_string();
    }

    let removed = char_count.saturating_sub(max_chars);
    match mode {
        TruncationMode::HeadTail => {
            let head = max_chars / 2;
            let tail = max_chars.saturating_sub(head);
            format!(
                "{}\n[... {} characters omitted ...]\n{}",
                take_head(output, head),
                removed,
                take_tail(output, tail)
            )
        }
        TruncationMode::Head => {
            format!(
                "{}\n[... {} more characters omitted ...]",
                take_head(output, max_chars),
                removed
            )
        }
    }
}

/// Shortens a single line of context, marking the cut with an ellipsis.
pub fn clip_text(input: &str, max_chars: usize) -> String {
    let trimmed = input.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut clipped = take_head(trimmed, max_chars.saturating_sub(3));
    clipped.push_str("...");
    clipped
}

fn take_head(input: &str, char_count: usize) -> String {
    input.chars().take(char_count).collect()
}

fn take_tail(input: &str, char_count: usize) -> String {
    let total = input.chars().count();
    input
        .chars()
        .skip(total.saturating_sub(char_count))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_chars_head_tail_keeps_both_ends() {
        let output = truncate_chars("abcdefghij", 6, TruncationMode::HeadTail);
        assert!(output.starts_with("abc"));
        assert!(output.ends_with("hij"));
        assert!(output.contains("4 characters omitted"));
    }

    #[test]
    fn truncate_chars_head_keeps_prefix_only() {
        let output = truncate_chars("abcdefghij", 4, TruncationMode::Head);
        assert!(output.starts_with("abcd\n"));
        assert!(output.contains("6 more characters omitted"));
    }

    #[test]
    fn short_output_is_untouched() {
        assert_eq!(truncate_chars("abc", 10, TruncationMode::HeadTail), "abc");
    }

    #[test]
    fn clip_text_marks_cut() {
        assert_eq!(clip_text("  hello world  ", 8), "hello...");
        assert_eq!(clip_text("short", 8), "short");
    }

    #[test]
    fn listing_tools_truncate_from_the_head() {
        assert_eq!(
            default_truncation_mode_for_tool(LIST_FILES_TOOL),
            TruncationMode::Head
        );
        assert_eq!(
            default_truncation_mode_for_tool("read_file"),
            TruncationMode::HeadTail
        );
    }
}
