#![allow(dead_code)]

use anvil_agent::{
    Agent, AgentConfig, ChangeBuffer, NoopEventEmitter, Observation, PendingChange, ToolCall,
    ToolContext, WorkspaceGuard, build_workspace_tool_registry,
};
use anvil_llm::testing::ScriptedBackend;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use walkdir::WalkDir;

/// A throwaway workspace seeded with text files.
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn with_files(files: &[(&str, &str)]) -> Self {
        let dir = TempDir::new().expect("tempdir");
        for (path, content) in files {
            let target = dir.path().join(path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).expect("create parent");
            }
            fs::write(target, content).expect("seed file");
        }
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn guard(&self) -> WorkspaceGuard {
        WorkspaceGuard::new(self.path()).expect("workspace guard")
    }

    pub fn read(&self, path: &str) -> Option<String> {
        fs::read_to_string(self.path().join(path)).ok()
    }

    /// Every file under the root with its content, for before/after comparisons.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        snapshot_dir(self.path())
    }

    pub fn agent(&self, backend: ScriptedBackend, config: AgentConfig) -> Agent {
        Agent::new(Arc::new(backend), self.guard(), config)
            .expect("agent")
            .with_event_emitter(Arc::new(NoopEventEmitter))
    }
}

pub fn snapshot_dir(root: &Path) -> BTreeMap<String, String> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            let relative = entry
                .path()
                .strip_prefix(root)
                .expect("entry under root")
                .to_string_lossy()
                .replace('\\', "/");
            let content = fs::read_to_string(entry.path()).unwrap_or_default();
            (relative, content)
        })
        .collect()
}

pub fn tool_reply(tool: &str, args: Value) -> String {
    format!("```json\n{}\n```", json!({ "tool": tool, "args": args }))
}

/// Dispatches one call directly against the registry with staging enabled.
pub fn dispatch(
    guard: &WorkspaceGuard,
    changes: &mut ChangeBuffer,
    tool: &str,
    args: Value,
) -> Observation {
    let mut applied: Vec<PendingChange> = Vec::new();
    let mut context = ToolContext {
        guard,
        changes,
        applied: &mut applied,
        auto_apply: false,
    };
    build_workspace_tool_registry().dispatch(&ToolCall::new("call-test", tool, args), &mut context)
}
