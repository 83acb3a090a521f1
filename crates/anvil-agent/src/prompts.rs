//! Prompt templates and the text blocks substituted into them.

use minijinja::Environment;
use serde::Serialize;
use std::fmt::Write as _;

use crate::tools::ToolDefinition;
use crate::truncation::{TruncationMode, clip_text, truncate_chars, truncate_observation};
use crate::{
    AgentConfig, AgentError, Observation, ObservationOutcome, PromptOverrides, ToolCall, Turn,
    TurnRole,
};

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");
const TASK_TEMPLATE: &str = include_str!("prompts/task.md");
const OBSERVATION_TEMPLATE: &str = include_str!("prompts/observation.md");
const REPAIR_TEMPLATE: &str = include_str!("prompts/repair.md");

const NONE_BLOCK: &str = "- none";

/// Values available to every template.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PromptVariables {
    pub history_block: String,
    pub user_message: String,
    pub clean_message: String,
    pub actions_preview: String,
    pub failed_block: String,
    pub observations_block: String,
    pub malformed_reply: String,
    pub parse_error: String,
    pub tool_catalog: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromptKind {
    System,
    Task,
    Observation,
    Repair,
}

impl PromptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Task => "task",
            Self::Observation => "observation",
            Self::Repair => "repair",
        }
    }
}

/// The four prompt sources, built-in or overridden, checked for syntax up front.
#[derive(Clone, Debug)]
pub struct PromptSet {
    system: String,
    task: String,
    observation: String,
    repair: String,
}

impl PromptSet {
    pub fn new(overrides: &PromptOverrides) -> Result<Self, AgentError> {
        let pick = |custom: &Option<String>, builtin: &str| {
            custom
                .as_deref()
                .filter(|source| !source.trim().is_empty())
                .unwrap_or(builtin)
                .to_string()
        };
        let prompts = Self {
            system: pick(&overrides.system, SYSTEM_TEMPLATE),
            task: pick(&overrides.task, TASK_TEMPLATE),
            observation: pick(&overrides.observation, OBSERVATION_TEMPLATE),
            repair: pick(&overrides.repair, REPAIR_TEMPLATE),
        };

        let env = Environment::new();
        for kind in [
            PromptKind::System,
            PromptKind::Task,
            PromptKind::Observation,
            PromptKind::Repair,
        ] {
            env.template_from_str(prompts.source(kind)).map_err(|error| {
                AgentError::Prompt(format!("{} template: {error}", kind.as_str()))
            })?;
        }
        Ok(prompts)
    }

    pub fn source(&self, kind: PromptKind) -> &str {
        match kind {
            PromptKind::System => &self.system,
            PromptKind::Task => &self.task,
            PromptKind::Observation => &self.observation,
            PromptKind::Repair => &self.repair,
        }
    }

    pub fn render(&self, kind: PromptKind, variables: &PromptVariables) -> Result<String, AgentError> {
        let env = Environment::new();
        let rendered = env.render_str(self.source(kind), variables)?;
        Ok(rendered.trim().to_string())
    }
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            system: SYSTEM_TEMPLATE.to_string(),
            task: TASK_TEMPLATE.to_string(),
            observation: OBSERVATION_TEMPLATE.to_string(),
            repair: REPAIR_TEMPLATE.to_string(),
        }
    }
}

pub fn render_tool_catalog(definitions: &[ToolDefinition]) -> String {
    let mut catalog = String::new();
    for definition in definitions {
        let _ = writeln!(catalog, "- {}: {}", definition.name, definition.description);
        let _ = writeln!(catalog, "  args schema: {}", definition.parameters);
    }
    catalog.trim_end().to_string()
}

/// Recent user messages and final answers from earlier runs of the session.
pub fn history_block(prior_turns: &[Turn], limit: usize, entry_chars: usize) -> String {
    let entries: Vec<String> = prior_turns
        .iter()
        .filter_map(|turn| match turn.role {
            TurnRole::User => Some(format!("User: {}", clip_text(&turn.content, entry_chars))),
            TurnRole::Assistant if turn.tool_call.is_none() => Some(format!(
                "Assistant: {}",
                clip_text(&turn.content, entry_chars)
            )),
            _ => None,
        })
        .collect();
    if entries.is_empty() || limit == 0 {
        return String::new();
    }
    let start = entries.len().saturating_sub(limit);
    format!("Conversation context:\n{}", entries[start..].join("\n"))
}

/// Renders observations for a prompt, each clipped to its tool's limit and
/// the whole block optionally clipped to `budget` characters.
pub fn observations_block(
    observations: &[&Observation],
    config: &AgentConfig,
    budget: Option<usize>,
) -> String {
    if observations.is_empty() {
        return NONE_BLOCK.to_string();
    }
    let rendered = observations
        .iter()
        .map(|observation| {
            let json = serde_json::to_string_pretty(&observation.to_prompt_value())
                .unwrap_or_else(|_| observation.summary());
            truncate_observation(&json, &observation.tool, config)
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    match budget {
        Some(budget) => truncate_chars(&rendered, budget, TruncationMode::Head),
        None => rendered,
    }
}

pub fn actions_preview(calls: &[&ToolCall]) -> String {
    if calls.is_empty() {
        return NONE_BLOCK.to_string();
    }
    let wire: Vec<_> = calls.iter().map(|call| call.to_wire()).collect();
    serde_json::to_string(&wire).unwrap_or_else(|_| NONE_BLOCK.to_string())
}

pub fn failed_block(observations: &[&Observation]) -> String {
    let lines: Vec<String> = observations
        .iter()
        .filter_map(|observation| match &observation.outcome {
            ObservationOutcome::Failure { kind, message } => {
                Some(format!("- {} [{}]: {}", observation.tool, kind, message))
            }
            ObservationOutcome::Success { .. } => None,
        })
        .collect();
    if lines.is_empty() {
        NONE_BLOCK.to_string()
    } else {
        lines.join("\n")
    }
}

/// The user message with reasoning tags removed and whitespace collapsed.
pub fn clean_message(message: &str) -> String {
    crate::parser::strip_reasoning(message)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
