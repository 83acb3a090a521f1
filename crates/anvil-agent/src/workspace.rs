//! Path confinement for every tool that touches storage.
//!
//! Paths are resolved component by component with symlinks followed, then
//! compared against the canonical root by path components. Nothing outside the
//! root is ever returned from [`WorkspaceGuard::resolve`].

use std::fs;
use std::path::{Component, Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use crate::ToolError;

pub const IGNORED_DIR_NAMES: &[&str] = &[
    ".anvil",
    ".git",
    ".hg",
    ".svn",
    ".mypy_cache",
    ".pytest_cache",
    ".ruff_cache",
    ".venv",
    "__pycache__",
    "build",
    "dist",
    "node_modules",
    "target",
];

pub const IGNORED_FILE_NAMES: &[&str] = &[".DS_Store"];

const MAX_SYMLINK_HOPS: usize = 40;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkspaceGuard {
    root: PathBuf,
}

impl WorkspaceGuard {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, ToolError> {
        let root = root.as_ref();
        let display = root.display().to_string();
        let canonical = fs::canonicalize(root).map_err(|error| ToolError::from_io(&display, &error))?;
        if !canonical.is_dir() {
            return Err(ToolError::Permission {
                path: display,
                reason: "workspace root is not a directory".to_string(),
            });
        }
        Ok(Self { root: canonical })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a workspace-relative (or absolute) path to an absolute path
    /// inside the root. Missing trailing components are allowed.
    pub fn resolve(&self, requested: &str) -> Result<PathBuf, ToolError> {
        let trimmed = requested.trim();
        if trimmed.contains('\0') {
            return Err(ToolError::Validation(
                "path must not contain NUL bytes".to_string(),
            ));
        }

        let requested_path = Path::new(trimmed);
        let candidate = if requested_path.is_absolute() {
            requested_path.to_path_buf()
        } else {
            self.root.join(requested_path)
        };

        let mut hops = 0;
        match resolve_components(&candidate, &mut hops) {
            Some(resolved) if resolved.starts_with(&self.root) => Ok(resolved),
            _ => Err(ToolError::PathEscape {
                path: requested.to_string(),
            }),
        }
    }

    /// Confirms `path` exists and can be opened for reading. No handle is kept.
    pub fn ensure_readable(&self, path: &Path) -> Result<(), ToolError> {
        let display = self.relative(path);
        let metadata = fs::metadata(path).map_err(|error| ToolError::from_io(&display, &error))?;
        let probe = if metadata.is_dir() {
            fs::read_dir(path).map(|_| ())
        } else {
            fs::File::open(path).map(|_| ())
        };
        probe.map_err(|error| ToolError::from_io(&display, &error))
    }

    /// Confirms `path` can be created or overwritten as a regular file.
    pub fn ensure_writable(&self, path: &Path) -> Result<(), ToolError> {
        let display = self.relative(path);
        match fs::metadata(path) {
            Ok(metadata) if metadata.is_dir() => {
                return Err(ToolError::Permission {
                    path: display,
                    reason: "path is a directory".to_string(),
                });
            }
            Ok(metadata) if metadata.permissions().readonly() => {
                return Err(ToolError::Permission {
                    path: display,
                    reason: "file is read-only".to_string(),
                });
            }
            Ok(_) => return Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => return Err(ToolError::from_io(&display, &error)),
        }

        let mut ancestor = path.parent();
        while let Some(dir) = ancestor {
            if let Ok(metadata) = fs::metadata(dir) {
                if !metadata.is_dir() {
                    return Err(ToolError::Permission {
                        path: display,
                        reason: format!("'{}' is not a directory", self.relative(dir)),
                    });
                }
                if metadata.permissions().readonly() {
                    return Err(ToolError::Permission {
                        path: display,
                        reason: format!("directory '{}' is read-only", self.relative(dir)),
                    });
                }
                return Ok(());
            }
            ancestor = dir.parent();
        }
        Ok(())
    }

    /// Workspace-relative, `/`-separated rendering of an absolute path.
    pub fn relative(&self, path: &Path) -> String {
        let Ok(stripped) = path.strip_prefix(&self.root) else {
            return path.display().to_string();
        };
        let parts: Vec<String> = stripped
            .components()
            .map(|component| component.as_os_str().to_string_lossy().into_owned())
            .collect();
        if parts.is_empty() {
            ".".to_string()
        } else {
            parts.join("/")
        }
    }

    /// Regular files under `base` in file-name order, skipping ignored
    /// entries and symlinks that lead outside the root.
    pub fn walk_files<'a>(&'a self, base: &Path) -> impl Iterator<Item = PathBuf> + 'a {
        WalkDir::new(base)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_ignored(entry))
            .filter_map(Result::ok)
            .filter_map(move |entry| {
                let file_type = entry.file_type();
                if file_type.is_file() {
                    return Some(entry.into_path());
                }
                if file_type.is_symlink() {
                    let target = fs::canonicalize(entry.path()).ok()?;
                    if target.starts_with(&self.root) && target.is_file() {
                        return Some(entry.into_path());
                    }
                }
                None
            })
    }
}

pub fn is_ignored_name(name: &str, is_dir: bool) -> bool {
    if is_dir {
        IGNORED_DIR_NAMES.contains(&name)
    } else {
        IGNORED_FILE_NAMES.contains(&name)
    }
}

fn is_ignored(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    is_ignored_name(&name, entry.file_type().is_dir())
}

/// Walks `path` component by component, replacing each symlink with its
/// target. Components that do not exist yet are kept as written.
fn resolve_components(path: &Path, hops: &mut usize) -> Option<PathBuf> {
    let mut resolved = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => resolved.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            Component::Normal(name) => {
                resolved.push(name);
                let Ok(metadata) = fs::symlink_metadata(&resolved) else {
                    continue;
                };
                if metadata.file_type().is_symlink() {
                    *hops += 1;
                    if *hops > MAX_SYMLINK_HOPS {
                        return None;
                    }
                    let target = fs::read_link(&resolved).ok()?;
                    resolved.pop();
                    let joined = resolved.join(target);
                    resolved = resolve_components(&joined, hops)?;
                }
            }
        }
    }
    Some(resolved)
}
