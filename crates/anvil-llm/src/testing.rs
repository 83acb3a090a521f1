//! Deterministic backend for tests and offline runs.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::backend::ChatBackend;
use crate::errors::ChatError;
use crate::types::{ChatReply, ChatRequest};

/// Replays queued replies in order and records every request it receives.
///
/// An exhausted queue yields a transport error so a test that under-scripts a
/// run fails loudly instead of hanging.
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    replies: Arc<Mutex<VecDeque<Result<ChatReply, ChatError>>>>,
    requests: Arc<Mutex<Vec<ChatRequest>>>,
}

impl ScriptedBackend {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let backend = Self::default();
        for reply in replies {
            backend.push_reply(reply);
        }
        backend
    }

    pub fn push_reply(&self, text: impl Into<String>) {
        self.lock_replies().push_back(Ok(ChatReply::text(text)));
    }

    pub fn push_error(&self, error: ChatError) {
        self.lock_replies().push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .map(|requests| requests.len())
            .unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.lock_replies().len()
    }

    fn lock_replies(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<ChatReply, ChatError>>> {
        self.replies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(&self, request: ChatRequest) -> Result<ChatReply, ChatError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        self.lock_replies()
            .pop_front()
            .unwrap_or_else(|| Err(ChatError::transport("scripted backend has no replies left")))
    }
}
