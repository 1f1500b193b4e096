// Copyright 2026 Forge Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Minimal sandboxed filesystem handlers used by the demo binary and by
//! integration tests. Each handler validates its own path against the
//! configured workspace root (spec §5 "sandboxing contract") rather than
//! relying on the caller to have done so.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::tools::ToolHandler;

/// Resolves `path` relative to `root`, rejecting anything that would
/// escape it (via `..` or an absolute path).
fn resolve_sandboxed(root: &Path, path: &str) -> Result<PathBuf, String> {
    let candidate = root.join(path);
    let root_abs = root
        .canonicalize()
        .map_err(|e| format!("workspace root {} is not accessible: {e}", root.display()))?;

    // The file need not exist yet (write_file), so canonicalize the parent
    // instead of the candidate itself when the candidate is absent.
    let parent = candidate.parent().unwrap_or(&candidate);
    let parent_abs = parent
        .canonicalize()
        .map_err(|e| format!("path {path:?} does not resolve within the workspace: {e}"))?;

    if !parent_abs.starts_with(&root_abs) {
        return Err(format!("path {path:?} escapes the workspace root"));
    }

    Ok(candidate)
}

pub struct ReadFileHandler {
    pub workspace_root: PathBuf,
}

impl ReadFileHandler {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }
}

impl Default for ReadFileHandler {
    fn default() -> Self {
        Self::new(".")
    }
}

#[async_trait]
impl ToolHandler for ReadFileHandler {
    async fn execute(&self, args: serde_json::Value, _cancel: CancellationToken) -> Result<String, String> {
        let path = args
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "missing required argument \"path\"".to_string())?;

        let resolved = resolve_sandboxed(&self.workspace_root, path)?;
        tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| format!("failed to read {path:?}: {e}"))
    }
}

pub struct WriteFileHandler {
    pub workspace_root: PathBuf,
}

impl WriteFileHandler {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }
}

impl Default for WriteFileHandler {
    fn default() -> Self {
        Self::new(".")
    }
}

#[async_trait]
impl ToolHandler for WriteFileHandler {
    async fn execute(&self, args: serde_json::Value, _cancel: CancellationToken) -> Result<String, String> {
        let path = args
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "missing required argument \"path\"".to_string())?;
        let content = args
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "missing required argument \"content\"".to_string())?;

        let resolved = resolve_sandboxed(&self.workspace_root, path)?;
        let mut file = tokio::fs::File::create(&resolved)
            .await
            .map_err(|e| format!("failed to create {path:?}: {e}"))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| format!("failed to write {path:?}: {e}"))?;
        Ok(format!("wrote {} bytes to {path}", content.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let writer = WriteFileHandler::new(dir.path());
        let reader = ReadFileHandler::new(dir.path());

        writer
            .execute(
                serde_json::json!({"path": "notes.txt", "content": "hello"}),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let content = reader
            .execute(serde_json::json!({"path": "notes.txt"}), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(content, "hello");
    }

    #[tokio::test]
    async fn rejects_path_escaping_workspace_root() {
        let dir = tempfile::tempdir().unwrap();
        let reader = ReadFileHandler::new(dir.path());
        let result = reader
            .execute(
                serde_json::json!({"path": "../../etc/passwd"}),
                CancellationToken::new(),
            )
            .await;
        assert!(result.is_err());
    }
}
