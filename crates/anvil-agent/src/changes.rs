//! Staging area for filesystem mutations.
//!
//! Tools never write directly unless auto-apply is on; they stage a
//! [`PendingChange`] that the caller later accepts or discards. Applying is
//! not transactional: [`ChangeBuffer::accept_all`] stops at the first failure
//! and leaves already-applied changes on disk.

use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tracing::debug;
use uuid::Uuid;

use crate::{ToolError, ToolErrorKind, WorkspaceGuard};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Write,
    Replace,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Write => "write",
            Self::Replace => "replace",
            Self::Delete => "delete",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    pub added: usize,
    pub removed: usize,
}

/// Hex blake3 digest of file bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// What a file holds at one moment: its text and a digest of its exact bytes.
/// Non-text files carry a placeholder line instead of their content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileSnapshot {
    pub text: String,
    pub hash: String,
    pub is_text: bool,
}

impl FileSnapshot {
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            hash: content_hash(text.as_bytes()),
            text,
            is_text: true,
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let hash = content_hash(&bytes);
        if bytes.contains(&0) {
            return Self::binary(bytes.len(), hash);
        }
        match String::from_utf8(bytes) {
            Ok(text) => Self {
                text,
                hash,
                is_text: true,
            },
            Err(error) => Self::binary(error.as_bytes().len(), hash),
        }
    }

    fn binary(len: usize, hash: String) -> Self {
        Self {
            text: format!("[non-text file, {len} bytes]\n"),
            hash,
            is_text: false,
        }
    }
}

/// One staged mutation. `before` is `None` when the path did not exist;
/// `after` is `None` for deletes. `before_hash` pins the exact bytes the
/// change was computed against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChange {
    pub id: String,
    pub path: String,
    pub kind: ChangeKind,
    pub before: Option<String>,
    #[serde(default)]
    pub before_hash: Option<String>,
    pub after: Option<String>,
}

impl PendingChange {
    pub fn new(
        path: impl Into<String>,
        kind: ChangeKind,
        before: Option<String>,
        after: Option<String>,
    ) -> Self {
        Self::from_snapshot(path, kind, before.map(FileSnapshot::from_text), after)
    }

    pub fn from_snapshot(
        path: impl Into<String>,
        kind: ChangeKind,
        before: Option<FileSnapshot>,
        after: Option<String>,
    ) -> Self {
        let (before, before_hash) = match before {
            Some(snapshot) => (Some(snapshot.text), Some(snapshot.hash)),
            None => (None, None),
        };
        Self {
            id: Uuid::new_v4().to_string(),
            path: path.into(),
            kind,
            before,
            before_hash,
            after,
        }
    }

    /// Unified diff between `before` and `after`, `/dev/null` for a missing side.
    pub fn diff(&self) -> String {
        let old_header = match self.before {
            Some(_) => format!("a/{}", self.path),
            None => "/dev/null".to_string(),
        };
        let new_header = match self.after {
            Some(_) => format!("b/{}", self.path),
            None => "/dev/null".to_string(),
        };
        let before = self.before.as_deref().unwrap_or("");
        let after = self.after.as_deref().unwrap_or("");
        TextDiff::from_lines(before, after)
            .unified_diff()
            .context_radius(3)
            .header(&old_header, &new_header)
            .to_string()
    }

    pub fn diff_stats(&self) -> DiffStats {
        let before = self.before.as_deref().unwrap_or("");
        let after = self.after.as_deref().unwrap_or("");
        let diff = TextDiff::from_lines(before, after);
        let mut stats = DiffStats::default();
        for change in diff.iter_all_changes() {
            match change.tag() {
                ChangeTag::Insert => stats.added += 1,
                ChangeTag::Delete => stats.removed += 1,
                ChangeTag::Equal => {}
            }
        }
        stats
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyFailure {
    pub path: String,
    pub kind: ToolErrorKind,
    pub message: String,
}

impl ApplyFailure {
    fn new(path: &str, error: &ToolError) -> Self {
        Self {
            path: path.to_string(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Outcome of [`ChangeBuffer::accept_all`], by path.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub applied: Vec<String>,
    pub failed: Option<ApplyFailure>,
    pub not_attempted: Vec<String>,
}

impl ApplyReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_none()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeBuffer {
    changes: Vec<PendingChange>,
}

impl ChangeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&mut self, change: PendingChange) -> &PendingChange {
        debug!(path = %change.path, kind = change.kind.as_str(), "staging change");
        self.changes.push(change);
        &self.changes[self.changes.len() - 1]
    }

    pub fn changes(&self) -> &[PendingChange] {
        &self.changes
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Content `path` will have once the buffer is accepted, if any staged
    /// change touches it. `Some(None)` means the path is staged for deletion.
    pub fn effective_content(&self, path: &str) -> Option<Option<&str>> {
        self.changes
            .iter()
            .rev()
            .find(|change| change.path == path)
            .map(|change| change.after.as_deref())
    }

    pub fn diff(&self, change: &PendingChange) -> String {
        change.diff()
    }

    /// Applies staged changes in staging order. Applied changes leave the
    /// buffer; the failing change and everything after it stay staged.
    pub fn accept_all(&mut self, guard: &WorkspaceGuard) -> ApplyReport {
        let mut report = ApplyReport::default();
        let mut applied_count = 0;
        for change in &self.changes {
            match Self::apply_one(change, guard) {
                Ok(()) => {
                    report.applied.push(change.path.clone());
                    applied_count += 1;
                }
                Err(error) => {
                    report.failed = Some(ApplyFailure::new(&change.path, &error));
                    break;
                }
            }
        }
        self.changes.drain(..applied_count);
        report.not_attempted = self
            .changes
            .iter()
            .skip(usize::from(report.failed.is_some()))
            .map(|change| change.path.clone())
            .collect();
        report
    }

    pub fn discard_all(&mut self) -> usize {
        let discarded = self.changes.len();
        self.changes.clear();
        discarded
    }

    /// Writes one change to disk after confirming the file still holds the
    /// bytes the change was computed against.
    pub fn apply_one(change: &PendingChange, guard: &WorkspaceGuard) -> Result<(), ToolError> {
        let path = guard.resolve(&change.path)?;
        let current = current_hash(&path, &change.path)?;
        if current != change.before_hash {
            return Err(ToolError::Conflict {
                path: change.path.clone(),
            });
        }

        match &change.after {
            Some(content) => {
                guard.ensure_writable(&path)?;
                write_atomic(&path, content, &change.path)?;
            }
            None => {
                fs::remove_file(&path).map_err(|error| ToolError::from_io(&change.path, &error))?;
            }
        }
        debug!(path = %change.path, kind = change.kind.as_str(), "applied change");
        Ok(())
    }

    /// One line per staged change: kind, path and line counts.
    pub fn summary(&self) -> String {
        let mut summary = String::new();
        for change in &self.changes {
            let stats = change.diff_stats();
            let _ = writeln!(
                summary,
                "- {} {} (+{} -{})",
                change.kind.as_str(),
                change.path,
                stats.added,
                stats.removed
            );
        }
        summary
    }
}

fn current_hash(path: &Path, display: &str) -> Result<Option<String>, ToolError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(content_hash(&bytes))),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(ToolError::from_io(display, &error)),
    }
}

fn write_atomic(path: &Path, contents: &str, display: &str) -> Result<(), ToolError> {
    let io_error = |error: std::io::Error| ToolError::from_io(display, &error);
    let parent = path.parent().ok_or_else(|| ToolError::Permission {
        path: display.to_string(),
        reason: "path has no parent directory".to_string(),
    })?;
    fs::create_dir_all(parent).map_err(io_error)?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = parent.join(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()));
    fs::write(&tmp_path, contents).map_err(io_error)?;
    if let Err(error) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(io_error(error));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn workspace() -> (tempfile::TempDir, WorkspaceGuard) {
        let dir = tempdir().expect("tempdir should be created");
        let guard = WorkspaceGuard::new(dir.path()).expect("guard should build");
        (dir, guard)
    }

    #[test]
    fn accept_all_applies_in_staging_order() {
        let (dir, guard) = workspace();
        let mut buffer = ChangeBuffer::new();
        buffer.stage(PendingChange::new(
            "notes/a.txt",
            ChangeKind::Write,
            None,
            Some("one\n".to_string()),
        ));
        buffer.stage(PendingChange::new(
            "notes/a.txt",
            ChangeKind::Replace,
            Some("one\n".to_string()),
            Some("two\n".to_string()),
        ));

        let report = buffer.accept_all(&guard);
        assert!(report.is_success());
        assert_eq!(report.applied, vec!["notes/a.txt", "notes/a.txt"]);
        assert!(buffer.is_empty());
        assert_eq!(
            fs::read_to_string(dir.path().join("notes/a.txt")).expect("read"),
            "two\n"
        );
    }

    #[test]
    fn accept_all_stops_at_first_failure_without_rollback() {
        let (dir, guard) = workspace();
        fs::write(dir.path().join("b.txt"), "changed on disk").expect("fixture");
        let mut buffer = ChangeBuffer::new();
        buffer.stage(PendingChange::new(
            "a.txt",
            ChangeKind::Write,
            None,
            Some("a".to_string()),
        ));
        buffer.stage(PendingChange::new(
            "b.txt",
            ChangeKind::Replace,
            Some("original".to_string()),
            Some("new".to_string()),
        ));
        buffer.stage(PendingChange::new(
            "c.txt",
            ChangeKind::Write,
            None,
            Some("c".to_string()),
        ));

        let report = buffer.accept_all(&guard);
        assert_eq!(report.applied, vec!["a.txt"]);
        let failure = report.failed.expect("b.txt should conflict");
        assert_eq!(failure.path, "b.txt");
        assert_eq!(failure.kind, ToolErrorKind::Conflict);
        assert_eq!(report.not_attempted, vec!["c.txt"]);
        assert!(dir.path().join("a.txt").exists());
        assert!(!dir.path().join("c.txt").exists());
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn discard_all_leaves_disk_untouched() {
        let (dir, guard) = workspace();
        fs::write(dir.path().join("keep.txt"), "keep").expect("fixture");
        let mut buffer = ChangeBuffer::new();
        buffer.stage(PendingChange::new(
            "keep.txt",
            ChangeKind::Delete,
            Some("keep".to_string()),
            None,
        ));
        assert_eq!(buffer.discard_all(), 1);
        assert!(buffer.is_empty());
        assert_eq!(
            fs::read_to_string(dir.path().join("keep.txt")).expect("read"),
            "keep"
        );
        let report = buffer.accept_all(&guard);
        assert!(report.applied.is_empty() && report.is_success());
    }

    #[test]
    fn delete_removes_file_when_content_matches() {
        let (dir, guard) = workspace();
        fs::write(dir.path().join("old.txt"), "bye").expect("fixture");
        let change = PendingChange::new("old.txt", ChangeKind::Delete, Some("bye".to_string()), None);
        ChangeBuffer::apply_one(&change, &guard).expect("delete should apply");
        assert!(!dir.path().join("old.txt").exists());
    }

    #[test]
    fn delete_of_non_text_file_checks_bytes_not_text() {
        let (dir, guard) = workspace();
        let bytes = vec![0x89, b'P', b'N', b'G', 0x00, 0xff];
        fs::write(dir.path().join("logo.png"), &bytes).expect("fixture");
        let snapshot = FileSnapshot::from_bytes(bytes);
        assert!(!snapshot.is_text);
        assert_eq!(snapshot.text, "[non-text file, 6 bytes]\n");

        let stale = PendingChange::from_snapshot(
            "logo.png",
            ChangeKind::Delete,
            Some(FileSnapshot::from_bytes(vec![0x00, 0x01])),
            None,
        );
        let error = ChangeBuffer::apply_one(&stale, &guard).expect_err("bytes differ");
        assert_eq!(error.kind(), ToolErrorKind::Conflict);
        assert!(dir.path().join("logo.png").exists());

        let change = PendingChange::from_snapshot("logo.png", ChangeKind::Delete, Some(snapshot), None);
        ChangeBuffer::apply_one(&change, &guard).expect("delete should apply");
        assert!(!dir.path().join("logo.png").exists());
    }

    #[test]
    fn diff_uses_dev_null_for_created_files() {
        let change = PendingChange::new(
            "src/new.rs",
            ChangeKind::Write,
            None,
            Some("fn main() {}\n".to_string()),
        );
        let diff = change.diff();
        assert!(diff.contains("--- /dev/null"));
        assert!(diff.contains("+++ b/src/new.rs"));
        assert!(diff.contains("+fn main() {}"));
        assert_eq!(change.diff_stats(), DiffStats { added: 1, removed: 0 });
    }

    #[test]
    fn effective_content_reflects_latest_staged_change() {
        let mut buffer = ChangeBuffer::new();
        assert_eq!(buffer.effective_content("a.txt"), None);
        buffer.stage(PendingChange::new(
            "a.txt",
            ChangeKind::Write,
            None,
            Some("v1".to_string()),
        ));
        buffer.stage(PendingChange::new(
            "a.txt",
            ChangeKind::Delete,
            Some("v1".to_string()),
            None,
        ));
        assert_eq!(buffer.effective_content("a.txt"), Some(None));
        assert!(buffer.summary().contains("- delete a.txt (+0 -1)"));
    }
}
