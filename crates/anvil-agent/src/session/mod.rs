use crate::{
    AgentConfig, AgentError, EventEmitter, PromptSet, SessionEvent, ToolRegistry,
    TracingEventEmitter, Turn, WorkspaceGuard, build_workspace_tool_registry,
};
use anvil_llm::ChatBackend;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

mod cancel;
mod runner;
mod types;
pub use cancel::CancelHandle;
pub use types::{AgentRunResult, LoopState, RunFailure, RunOptions, StopReason};

pub const STEP_LIMIT_ANSWER: &str = "Agent reached the step limit without a final answer.";
pub const CANCELLED_ANSWER: &str = "Run cancelled.";

/// Conversation state that outlives a single run. Runs append their turns here,
/// and earlier turns feed the `history_block` of later prompts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    /// Conversation id on the chat backend, when it keeps server-side threads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    pub model_id: String,
    #[serde(default)]
    pub turns: Vec<Turn>,
}

impl Session {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            chat_id: None,
            model_id: model_id.into(),
            turns: Vec::new(),
        }
    }

    pub fn with_chat_id(mut self, chat_id: impl Into<String>) -> Self {
        self.chat_id = Some(chat_id.into());
        self
    }

    pub fn history(&self) -> &[Turn] {
        &self.turns
    }
}

/// Runs the tool loop for one workspace against one chat backend.
pub struct Agent {
    backend: Arc<dyn ChatBackend>,
    registry: ToolRegistry,
    guard: WorkspaceGuard,
    config: AgentConfig,
    prompts: PromptSet,
    event_emitter: Arc<dyn EventEmitter>,
}

impl Agent {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        guard: WorkspaceGuard,
        config: AgentConfig,
    ) -> Result<Self, AgentError> {
        config.validate()?;
        let prompts = PromptSet::new(&config.prompts)?;
        Ok(Self {
            backend,
            registry: build_workspace_tool_registry(),
            guard,
            config,
            prompts,
            event_emitter: Arc::new(TracingEventEmitter),
        })
    }

    pub fn with_event_emitter(mut self, event_emitter: Arc<dyn EventEmitter>) -> Self {
        self.event_emitter = event_emitter;
        self
    }

    pub fn guard(&self) -> &WorkspaceGuard {
        &self.guard
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    fn emit(&self, event: SessionEvent) {
        let kind = event.kind;
        if let Err(error) = self.event_emitter.emit(event) {
            warn!(kind = kind.as_str(), %error, "event emitter failed");
        }
    }
}
