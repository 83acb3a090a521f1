use crate::{Observation, ToolCall, ToolError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::{ToolContext, coerce_argument_types, validate_tool_arguments};

pub type ToolExecutor =
    Arc<dyn Fn(&Value, &mut ToolContext<'_>) -> Result<Value, ToolError> + Send + Sync>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Clone)]
pub struct RegisteredTool {
    pub definition: ToolDefinition,
    pub executor: ToolExecutor,
}

#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn register(&mut self, tool: RegisteredTool) {
        self.tools.insert(tool.definition.name.clone(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|tool| tool.definition.clone())
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Runs one call and always returns an observation. Unknown tools and
    /// invalid arguments are reported without invoking any executor.
    pub fn dispatch(&self, call: &ToolCall, context: &mut ToolContext<'_>) -> Observation {
        let Some(tool) = self.get(&call.name) else {
            debug!(tool = %call.name, "unknown tool requested");
            return Observation::failure(call, &ToolError::UnknownTool(call.name.clone()));
        };

        let mut arguments = call.arguments.clone();
        coerce_argument_types(&tool.definition.parameters, &mut arguments);
        if let Err(error) = validate_tool_arguments(&tool.definition.parameters, &arguments) {
            return Observation::failure(call, &error);
        }

        debug!(tool = %call.name, call_id = %call.id, "executing tool");
        match (tool.executor)(&arguments, context) {
            Ok(payload) => Observation::success(call, payload),
            Err(error) => {
                debug!(tool = %call.name, %error, "tool failed");
                Observation::failure(call, &error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChangeBuffer, ToolErrorKind, WorkspaceGuard};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn counting_tool(name: &str, count: Arc<AtomicUsize>) -> RegisteredTool {
        RegisteredTool {
            definition: ToolDefinition {
                name: name.to_string(),
                description: "counts invocations".to_string(),
                parameters: json!({
                    "type": "object",
                    "required": ["path"],
                    "properties": { "path": { "type": "string" } }
                }),
            },
            executor: Arc::new(move |_args: &Value, _context: &mut ToolContext<'_>| {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(json!("ran"))
            }),
        }
    }

    #[test]
    fn tool_registry_latest_registration_wins() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::default();
        registry.register(counting_tool("probe", first.clone()));
        registry.register(counting_tool("probe", second.clone()));
        assert_eq!(registry.names(), vec!["probe"]);

        let dir = tempdir().expect("tempdir");
        let guard = WorkspaceGuard::new(dir.path()).expect("guard");
        let mut changes = ChangeBuffer::new();
        let mut applied = Vec::new();
        let mut context = ToolContext {
            guard: &guard,
            changes: &mut changes,
            applied: &mut applied,
            auto_apply: false,
        };
        let observation = registry.dispatch(
            &ToolCall::new("call-1", "probe", json!({"path": "a"})),
            &mut context,
        );
        assert!(!observation.is_error());
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispatch_unknown_tool_returns_failure_observation() {
        let registry = super::super::build_workspace_tool_registry();
        let dir = tempdir().expect("tempdir");
        let guard = WorkspaceGuard::new(dir.path()).expect("guard");
        let mut changes = ChangeBuffer::new();
        let mut applied = Vec::new();
        let mut context = ToolContext {
            guard: &guard,
            changes: &mut changes,
            applied: &mut applied,
            auto_apply: false,
        };
        let observation = registry.dispatch(
            &ToolCall::new("call-1", "format_disk", json!({})),
            &mut context,
        );
        assert_eq!(observation.error_kind(), Some(ToolErrorKind::UnknownTool));
        assert_eq!(observation.call_id, "call-1");
    }

    #[test]
    fn dispatch_validation_error_skips_execution() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::default();
        registry.register(counting_tool("probe", count.clone()));

        let dir = tempdir().expect("tempdir");
        let guard = WorkspaceGuard::new(dir.path()).expect("guard");
        let mut changes = ChangeBuffer::new();
        let mut applied = Vec::new();
        let mut context = ToolContext {
            guard: &guard,
            changes: &mut changes,
            applied: &mut applied,
            auto_apply: false,
        };
        let observation = registry.dispatch(
            &ToolCall::new("call-1", "probe", json!({"path": 7})),
            &mut context,
        );
        assert_eq!(observation.error_kind(), Some(ToolErrorKind::Validation));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn definitions_are_sorted_and_cover_the_catalog() {
        let registry = super::super::build_workspace_tool_registry();
        let names: Vec<String> = registry
            .definitions()
            .into_iter()
            .map(|definition| definition.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "delete_file",
                "list_files",
                "read_file",
                "replace_in_file",
                "search_in_files",
                "write_file"
            ]
        );
    }
}
