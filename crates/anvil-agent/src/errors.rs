use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use thiserror::Error;

/// Top-level error type for the anvil-agent crate.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("workspace error: {0}")]
    Workspace(#[source] ToolError),
    #[error("prompt template error: {0}")]
    Prompt(String),
    #[error(transparent)]
    Chat(#[from] anvil_llm::ChatError),
}

impl From<minijinja::Error> for AgentError {
    fn from(error: minijinja::Error) -> Self {
        Self::Prompt(error.to_string())
    }
}

/// Failures a single tool call can produce. These never abort a run; they are
/// reported back to the model as failure observations.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error("Path escapes workspace root: {path}")]
    PathEscape { path: String },
    #[error("Path not found: {path}")]
    NotFound { path: String },
    #[error("Permission denied: {path}: {reason}")]
    Permission { path: String, reason: String },
    #[error("File is not valid text: {path}")]
    NotText { path: String },
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
    #[error("No match for search text in {path}")]
    NoMatch { path: String },
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Invalid arguments: {0}")]
    Validation(String),
    #[error("File changed since it was staged: {path}")]
    Conflict { path: String },
    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },
}

impl ToolError {
    pub fn kind(&self) -> ToolErrorKind {
        match self {
            Self::PathEscape { .. } => ToolErrorKind::PathEscape,
            Self::NotFound { .. } => ToolErrorKind::NotFound,
            Self::Permission { .. } => ToolErrorKind::Permission,
            Self::NotText { .. } => ToolErrorKind::NotText,
            Self::InvalidPattern(_) => ToolErrorKind::InvalidPattern,
            Self::NoMatch { .. } => ToolErrorKind::NoMatch,
            Self::UnknownTool(_) => ToolErrorKind::UnknownTool,
            Self::Validation(_) => ToolErrorKind::Validation,
            Self::Conflict { .. } => ToolErrorKind::Conflict,
            Self::Io { .. } => ToolErrorKind::Io,
        }
    }

    pub(crate) fn from_io(path: &str, error: &std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound {
                path: path.to_string(),
            },
            std::io::ErrorKind::PermissionDenied => Self::Permission {
                path: path.to_string(),
                reason: error.to_string(),
            },
            _ => Self::Io {
                path: path.to_string(),
                message: error.to_string(),
            },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    PathEscape,
    NotFound,
    Permission,
    NotText,
    InvalidPattern,
    NoMatch,
    UnknownTool,
    Validation,
    Conflict,
    Io,
}

impl ToolErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PathEscape => "path_escape",
            Self::NotFound => "not_found",
            Self::Permission => "permission",
            Self::NotText => "not_text",
            Self::InvalidPattern => "invalid_pattern",
            Self::NoMatch => "no_match",
            Self::UnknownTool => "unknown_tool",
            Self::Validation => "validation",
            Self::Conflict => "conflict",
            Self::Io => "io",
        }
    }
}

impl Display for ToolErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
