//! HTTP backend for OpenAI-compatible chat completion servers.

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::backend::ChatBackend;
use crate::errors::ChatError;
use crate::types::{ChatReply, ChatRequest};

const ERROR_DETAIL_LIMIT: usize = 300;
const MAX_RETRY_DELAY: Duration = Duration::from_secs(8);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpBackendConfig {
    pub base_url: String,
    pub completion_path: String,
    pub signin_path: String,
    pub api_key: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub timeout_seconds: u64,
    pub retries: u32,
    /// Delay before the first retry; doubles on each further attempt.
    pub retry_backoff_ms: u64,
    pub user_agent: String,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            completion_path: "/api/chat/completions".to_string(),
            signin_path: "/api/v1/auths/signin".to_string(),
            api_key: None,
            email: None,
            password: None,
            timeout_seconds: 30,
            retries: 2,
            retry_backoff_ms: 500,
            user_agent: concat!("anvil/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl HttpBackendConfig {
    pub fn validate(&self) -> Result<(), ChatError> {
        let base_url = self.base_url.trim();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ChatError::Configuration(format!(
                "base_url must start with http:// or https://, got '{}'",
                self.base_url
            )));
        }
        for (name, path) in [
            ("completion_path", &self.completion_path),
            ("signin_path", &self.signin_path),
        ] {
            if !path.starts_with('/') {
                return Err(ChatError::Configuration(format!(
                    "{name} must start with '/', got '{path}'"
                )));
            }
        }
        if self.timeout_seconds == 0 {
            return Err(ChatError::Configuration(
                "timeout_seconds must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn normalized_base_url(&self) -> &str {
        self.base_url.trim().trim_end_matches('/')
    }

    fn has_credentials(&self) -> bool {
        self.email.as_deref().is_some_and(|email| !email.is_empty())
            && self.password.as_deref().is_some_and(|password| !password.is_empty())
    }
}

/// Chat backend that POSTs the transcript to `{base_url}{completion_path}`.
///
/// Authentication uses the configured API key, or signs in with email and
/// password and caches the returned token. Network failures and 5xx responses
/// are retried `retries` times before surfacing as [`ChatError::Transport`].
pub struct HttpChatBackend {
    client: reqwest::Client,
    config: HttpBackendConfig,
    token: RwLock<Option<String>>,
}

impl HttpChatBackend {
    pub fn new(config: HttpBackendConfig) -> Result<Self, ChatError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|error| ChatError::Configuration(error.to_string()))?;
        let token = config.api_key.clone().filter(|key| !key.is_empty());
        Ok(Self {
            client,
            config,
            token: RwLock::new(token),
        })
    }

    pub fn config(&self) -> &HttpBackendConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.normalized_base_url(), path)
    }

    async fn bearer_token(&self) -> Result<Option<String>, ChatError> {
        if let Some(token) = self.token.read().await.clone() {
            return Ok(Some(token));
        }
        if !self.config.has_credentials() {
            return Ok(None);
        }
        let token = self.sign_in().await?;
        *self.token.write().await = Some(token.clone());
        Ok(Some(token))
    }

    async fn sign_in(&self) -> Result<String, ChatError> {
        debug!(endpoint = %self.config.signin_path, "signing in to chat backend");
        let response = self
            .client
            .post(self.endpoint(&self.config.signin_path))
            .json(&json!({
                "email": self.config.email,
                "password": self.config.password,
            }))
            .send()
            .await
            .map_err(|error| ChatError::transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(match classify_status(status.as_u16(), None, &detail) {
                ChatError::Transport { .. } if status.is_client_error() => {
                    ChatError::Auth(format!("sign-in rejected (status {})", status.as_u16()))
                }
                other => other,
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|error| ChatError::InvalidResponse(error.to_string()))?;
        payload
            .get("token")
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ChatError::Auth("sign-in response did not include a token".to_string()))
    }

    async fn post_completion(&self, body: &Value, token: Option<&str>) -> Result<Value, ChatError> {
        let mut builder = self
            .client
            .post(self.endpoint(&self.config.completion_path))
            .json(body);
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|error| ChatError::transport(error.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return response
                .json::<Value>()
                .await
                .map_err(|error| ChatError::InvalidResponse(error.to_string()));
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok());
        let detail = response.text().await.unwrap_or_default();
        Err(classify_status(status.as_u16(), retry_after, &detail))
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(&self, request: ChatRequest) -> Result<ChatReply, ChatError> {
        let body = completion_body(&request);
        let attempts = self.config.retries.saturating_add(1);
        let mut attempt = 0;
        let mut reauthenticated = false;

        loop {
            attempt += 1;
            debug!(
                model = %request.model,
                messages = request.messages.len(),
                attempt,
                "sending chat completion"
            );
            let token = self.bearer_token().await?;
            match self.post_completion(&body, token.as_deref()).await {
                Ok(payload) => {
                    let text = extract_reply_text(&payload)?;
                    let model = payload
                        .get("model")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    return Ok(ChatReply { text, model });
                }
                Err(ChatError::Auth(message))
                    if !reauthenticated && self.config.has_credentials() =>
                {
                    warn!(%message, "chat backend rejected token, signing in again");
                    reauthenticated = true;
                    attempt -= 1;
                    *self.token.write().await = None;
                }
                Err(error) if error.is_retryable() && attempt < attempts => {
                    let backoff = retry_delay(self.config.retry_backoff_ms, attempt);
                    warn!(
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        %error,
                        "chat completion failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

/// Exponential backoff before retry number `attempt` (1-based), capped at 8s.
pub fn retry_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    Duration::from_millis(base_ms.saturating_mul(factor)).min(MAX_RETRY_DELAY)
}

pub fn completion_body(request: &ChatRequest) -> Value {
    let mut body = json!({
        "model": request.model,
        "messages": request.messages,
        "stream": false,
    });
    if let Some(chat_id) = request.chat_id.as_deref().filter(|id| !id.is_empty()) {
        body["chat_id"] = Value::String(chat_id.to_string());
    }
    body
}

pub fn classify_status(status: u16, retry_after_secs: Option<u64>, detail: &str) -> ChatError {
    match status {
        401 | 403 => ChatError::Auth(format!("backend rejected credentials (status {status})")),
        429 => ChatError::RateLimited { retry_after_secs },
        _ => {
            let detail = detail.trim();
            let message = if detail.is_empty() {
                "request failed".to_string()
            } else {
                detail.chars().take(ERROR_DETAIL_LIMIT).collect()
            };
            ChatError::Transport {
                status: Some(status),
                message,
            }
        }
    }
}

/// Pulls the assistant text out of a completion payload.
pub fn extract_reply_text(payload: &Value) -> Result<String, ChatError> {
    let content = payload
        .pointer("/choices/0/message/content")
        .or_else(|| payload.pointer("/message/content"))
        .or_else(|| payload.get("content"));

    let text = match content {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| match part {
                Value::String(text) => Some(text.as_str()),
                Value::Object(_) => part.get("text").and_then(Value::as_str),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    };

    if text.trim().is_empty() {
        return Err(ChatError::InvalidResponse(
            "backend reply contained no assistant text".to_string(),
        ));
    }
    Ok(text)
}
