use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::AgentError;
use crate::tools::{
    DELETE_FILE_TOOL, LIST_FILES_TOOL, READ_FILE_TOOL, REPLACE_IN_FILE_TOOL,
    SEARCH_IN_FILES_TOOL, WRITE_FILE_TOOL,
};

/// Runtime configuration for agent runs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Maximum tool calls executed for a single user message.
    pub max_steps: usize,
    pub auto_apply: bool,
    /// Prior session turns rendered into `history_block`.
    pub history_limit: usize,
    pub history_entry_chars: usize,
    pub repair_observation_budget: usize,
    pub tool_output_limits: HashMap<String, usize>,
    pub prompts: PromptOverrides,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 8,
            auto_apply: false,
            history_limit: 8,
            history_entry_chars: 400,
            repair_observation_budget: 2_600,
            tool_output_limits: default_tool_output_limits(),
            prompts: PromptOverrides::default(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.history_entry_chars == 0 {
            return Err(AgentError::InvalidConfiguration(
                "history_entry_chars must be greater than zero".to_string(),
            ));
        }
        if self.repair_observation_budget == 0 {
            return Err(AgentError::InvalidConfiguration(
                "repair_observation_budget must be greater than zero".to_string(),
            ));
        }
        if let Some((tool, _)) = self
            .tool_output_limits
            .iter()
            .find(|(_, limit)| **limit == 0)
        {
            return Err(AgentError::InvalidConfiguration(format!(
                "tool_output_limits.{tool} must be greater than zero"
            )));
        }
        Ok(())
    }

    pub fn tool_output_limit(&self, tool_name: &str) -> usize {
        self.tool_output_limits
            .get(tool_name)
            .copied()
            .unwrap_or(20_000)
    }
}

/// Template sources replacing the built-in prompts. Each is a minijinja template.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptOverrides {
    pub system: Option<String>,
    pub task: Option<String>,
    pub observation: Option<String>,
    pub repair: Option<String>,
}

pub fn default_tool_output_limits() -> HashMap<String, usize> {
    HashMap::from([
        (READ_FILE_TOOL.to_string(), 50_000),
        (SEARCH_IN_FILES_TOOL.to_string(), 20_000),
        (LIST_FILES_TOOL.to_string(), 20_000),
        (WRITE_FILE_TOOL.to_string(), 2_000),
        (REPLACE_IN_FILE_TOOL.to_string(), 2_000),
        (DELETE_FILE_TOOL.to_string(), 2_000),
    ])
}
