use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{ToolError, ToolErrorKind};

pub type Timestamp = String;

/// A model-issued request to run one catalog action.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Wire form the model is asked to emit.
    pub fn to_wire(&self) -> Value {
        json!({ "tool": self.name, "args": self.arguments })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ObservationOutcome {
    Success { payload: Value },
    Failure { kind: ToolErrorKind, message: String },
}

/// Result of executing one tool call. Every dispatched call produces exactly one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub call_id: String,
    pub tool: String,
    pub outcome: ObservationOutcome,
}

impl Observation {
    pub fn success(call: &ToolCall, payload: Value) -> Self {
        Self {
            call_id: call.id.clone(),
            tool: call.name.clone(),
            outcome: ObservationOutcome::Success { payload },
        }
    }

    pub fn failure(call: &ToolCall, error: &ToolError) -> Self {
        Self {
            call_id: call.id.clone(),
            tool: call.name.clone(),
            outcome: ObservationOutcome::Failure {
                kind: error.kind(),
                message: error.to_string(),
            },
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ObservationOutcome::Failure { .. })
    }

    pub fn error_kind(&self) -> Option<ToolErrorKind> {
        match &self.outcome {
            ObservationOutcome::Failure { kind, .. } => Some(*kind),
            ObservationOutcome::Success { .. } => None,
        }
    }

    pub fn payload(&self) -> Option<&Value> {
        match &self.outcome {
            ObservationOutcome::Success { payload } => Some(payload),
            ObservationOutcome::Failure { .. } => None,
        }
    }

    /// JSON shown to the model.
    pub fn to_prompt_value(&self) -> Value {
        match &self.outcome {
            ObservationOutcome::Success { payload } => {
                json!({ "tool": self.tool, "ok": true, "result": payload })
            }
            ObservationOutcome::Failure { kind, message } => json!({
                "tool": self.tool,
                "ok": false,
                "error": { "kind": kind, "message": message },
            }),
        }
    }

    pub fn summary(&self) -> String {
        match &self.outcome {
            ObservationOutcome::Success { .. } => format!("{} ok", self.tool),
            ObservationOutcome::Failure { message, .. } => {
                format!("{} failed: {}", self.tool, message)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
    Tool,
    /// Runtime bookkeeping (repairs, parse failures, limits). Never sent to the model.
    Note,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation: Option<Observation>,
    pub timestamp: Timestamp,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(TurnRole::User, content.into(), None, None)
    }

    pub fn assistant(content: impl Into<String>, tool_call: Option<ToolCall>) -> Self {
        Self::new(TurnRole::Assistant, content.into(), tool_call, None)
    }

    pub fn tool(observation: Observation) -> Self {
        Self::new(TurnRole::Tool, observation.summary(), None, Some(observation))
    }

    pub fn note(content: impl Into<String>) -> Self {
        Self::new(TurnRole::Note, content.into(), None, None)
    }

    fn new(
        role: TurnRole,
        content: String,
        tool_call: Option<ToolCall>,
        observation: Option<Observation>,
    ) -> Self {
        Self {
            role,
            content,
            tool_call,
            observation,
            timestamp: current_timestamp(),
        }
    }
}

pub(crate) fn current_timestamp() -> Timestamp {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    now.as_secs().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_observation_carries_error_kind() {
        let call = ToolCall::new("call-1", "delete_file", json!({"path": "gone.txt"}));
        let observation = Observation::failure(
            &call,
            &ToolError::NotFound {
                path: "gone.txt".to_string(),
            },
        );
        assert!(observation.is_error());
        assert_eq!(observation.error_kind(), Some(ToolErrorKind::NotFound));
        let value = observation.to_prompt_value();
        assert_eq!(value["ok"], json!(false));
        assert_eq!(value["error"]["kind"], json!("not_found"));
    }

    #[test]
    fn tool_turn_summarizes_observation() {
        let call = ToolCall::new("call-1", "list_files", json!({"path": "src"}));
        let turn = Turn::tool(Observation::success(&call, json!({"entries": []})));
        assert_eq!(turn.role, TurnRole::Tool);
        assert_eq!(turn.content, "list_files ok");
        assert!(turn.tool_call.is_none());
    }

    #[test]
    fn tool_call_wire_form_uses_tool_and_args_keys() {
        let call = ToolCall::new("call-2", "read_file", json!({"path": "a.txt"}));
        assert_eq!(
            call.to_wire(),
            json!({"tool": "read_file", "args": {"path": "a.txt"}})
        );
    }
}
