use crate::AgentError;
use crate::turn::{Timestamp, current_timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

pub type EventData = HashMap<String, Value>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RunStart,
    RunEnd,
    UserInput,
    ModelRequest,
    ModelReply,
    ParseRepair,
    ToolCallStart,
    ToolCallEnd,
    ChangeStaged,
    ChangeApplied,
    StepLimit,
    Cancelled,
    Error,
    Warning,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunStart => "run_start",
            Self::RunEnd => "run_end",
            Self::UserInput => "user_input",
            Self::ModelRequest => "model_request",
            Self::ModelReply => "model_reply",
            Self::ParseRepair => "parse_repair",
            Self::ToolCallStart => "tool_call_start",
            Self::ToolCallEnd => "tool_call_end",
            Self::ChangeStaged => "change_staged",
            Self::ChangeApplied => "change_applied",
            Self::StepLimit => "step_limit",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
            Self::Warning => "warning",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub kind: EventKind,
    pub timestamp: Timestamp,
    pub session_id: String,
    pub run_id: String,
    pub data: EventData,
}

impl SessionEvent {
    pub fn new(kind: EventKind, session_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            kind,
            timestamp: current_timestamp(),
            session_id: session_id.into(),
            run_id: run_id.into(),
            data: EventData::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }
}

pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: SessionEvent) -> Result<(), AgentError>;
}

#[derive(Default)]
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit(&self, _event: SessionEvent) -> Result<(), AgentError> {
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct BufferedEventEmitter {
    inner: Arc<Mutex<Vec<SessionEvent>>>,
}

impl BufferedEventEmitter {
    pub fn snapshot(&self) -> Vec<SessionEvent> {
        let guard = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.snapshot().into_iter().map(|event| event.kind).collect()
    }
}

impl EventEmitter for BufferedEventEmitter {
    fn emit(&self, event: SessionEvent) -> Result<(), AgentError> {
        let mut guard = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.push(event);
        Ok(())
    }
}

/// Forwards loop events to `tracing` at a level matching their weight.
#[derive(Default)]
pub struct TracingEventEmitter;

impl EventEmitter for TracingEventEmitter {
    fn emit(&self, event: SessionEvent) -> Result<(), AgentError> {
        let data = serde_json::to_string(&event.data).unwrap_or_default();
        let kind = event.kind.as_str();
        match event.kind {
            EventKind::RunStart | EventKind::RunEnd | EventKind::ChangeApplied => {
                info!(run_id = %event.run_id, kind, %data, "agent event");
            }
            EventKind::ParseRepair
            | EventKind::StepLimit
            | EventKind::Cancelled
            | EventKind::Error
            | EventKind::Warning => {
                warn!(run_id = %event.run_id, kind, %data, "agent event");
            }
            _ => debug!(run_id = %event.run_id, kind, %data, "agent event"),
        }
        Ok(())
    }
}
