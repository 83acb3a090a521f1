use anvil_llm::{ChatError, ChatRequest};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

use super::CancelHandle;
use crate::{AgentError, ChangeBuffer, PendingChange, ToolCall, Turn};

#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    /// Overrides the configured auto-apply mode for this run.
    pub auto_apply: Option<bool>,
    pub cancel: Option<CancelHandle>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Answered,
    StepLimit,
    Cancelled,
    FatalError,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Answered => "answered",
            Self::StepLimit => "step_limit",
            Self::Cancelled => "cancelled",
            Self::FatalError => "fatal_error",
        }
    }
}

impl Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run ended in `fatal_error`, with the originating error kind kept.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub kind: String,
    pub message: String,
}

impl RunFailure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn from_chat(error: &ChatError) -> Self {
        Self::new(error.kind(), error.to_string())
    }

    pub fn from_agent(error: &AgentError) -> Self {
        match error {
            AgentError::Chat(chat) => Self::from_chat(chat),
            AgentError::InvalidConfiguration(_) => Self::new("configuration", error.to_string()),
            AgentError::Workspace(_) => Self::new("workspace", error.to_string()),
            AgentError::Prompt(_) => Self::new("prompt", error.to_string()),
        }
    }
}

/// Loop states. Each iteration of the driver consumes one state and produces
/// the next; `Done` and `Failed` end the run.
#[derive(Clone, Debug, PartialEq)]
pub enum LoopState {
    Idle,
    Prompting,
    AwaitingModel {
        request: ChatRequest,
        /// Set when this call is the repair re-prompt for a malformed reply.
        repair_of: Option<String>,
    },
    Parsing {
        reply: String,
        repair_of: Option<String>,
    },
    Repairing {
        malformed: String,
        reason: String,
    },
    Executing {
        call: ToolCall,
    },
    Done(StopReason),
    Failed(RunFailure),
}

impl LoopState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Prompting => "prompting",
            Self::AwaitingModel { .. } => "awaiting_model",
            Self::Parsing { .. } => "parsing",
            Self::Repairing { .. } => "repairing",
            Self::Executing { .. } => "executing",
            Self::Done(_) => "done",
            Self::Failed(_) => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Failed(_))
    }

    /// States in which a pending cancel request takes effect.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            Self::Prompting | Self::AwaitingModel { .. } | Self::Repairing { .. } | Self::Executing { .. }
        )
    }

    pub fn can_transition_to(&self, next: &LoopState) -> bool {
        if self.is_terminal() {
            return false;
        }
        if matches!(next, Self::Failed(_) | Self::Done(StopReason::Cancelled)) {
            return true;
        }
        match self {
            Self::Idle => matches!(next, Self::Prompting),
            Self::Prompting => matches!(next, Self::AwaitingModel { .. }),
            Self::AwaitingModel { .. } => matches!(next, Self::Parsing { .. }),
            Self::Parsing { .. } => matches!(
                next,
                Self::Executing { .. } | Self::Repairing { .. } | Self::Done(StopReason::Answered)
            ),
            Self::Repairing { .. } => matches!(next, Self::AwaitingModel { .. }),
            Self::Executing { .. } => {
                matches!(next, Self::Prompting | Self::Done(StopReason::StepLimit))
            }
            Self::Done(_) | Self::Failed(_) => false,
        }
    }
}

impl Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal output of one run. Staged changes live in `changes` and belong
/// to the caller, who accepts or discards them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentRunResult {
    pub run_id: String,
    pub answer: String,
    pub turns: Vec<Turn>,
    pub changes: ChangeBuffer,
    /// Changes already written because auto-apply was on.
    pub applied: Vec<PendingChange>,
    pub stopped_reason: StopReason,
    pub failure: Option<RunFailure>,
    pub steps: usize,
    pub model_calls: usize,
}

impl AgentRunResult {
    pub fn pending_changes(&self) -> &[PendingChange] {
        self.changes.changes()
    }

    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        self.turns
            .iter()
            .filter_map(|turn| turn.tool_call.as_ref())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_state_transitions_follow_the_cycle() {
        let prompting = LoopState::Prompting;
        assert!(LoopState::Idle.can_transition_to(&prompting));
        assert!(!LoopState::Idle.can_transition_to(&LoopState::Executing {
            call: ToolCall::new("c", "read_file", serde_json::json!({}))
        }));
        assert!(
            LoopState::Executing {
                call: ToolCall::new("c", "read_file", serde_json::json!({}))
            }
            .can_transition_to(&LoopState::Done(StopReason::StepLimit))
        );
        assert!(!LoopState::Done(StopReason::Answered).can_transition_to(&prompting));
        assert!(prompting.can_transition_to(&LoopState::Failed(RunFailure::new("x", "y"))));
    }

    #[test]
    fn stop_reason_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(StopReason::StepLimit).expect("serialize"),
            serde_json::json!("step_limit")
        );
        assert_eq!(StopReason::FatalError.to_string(), "fatal_error");
    }

    #[test]
    fn run_failure_keeps_chat_error_kind() {
        let failure = RunFailure::from_chat(&ChatError::RateLimited {
            retry_after_secs: None,
        });
        assert_eq!(failure.kind, "rate_limited");
        let failure = RunFailure::from_agent(&AgentError::Chat(ChatError::Auth("bad key".into())));
        assert_eq!(failure.kind, "auth");
    }
}
