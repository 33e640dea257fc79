// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;
use walkdir::WalkDir;

use foreman_interp::{HostTool, Session, ToolError};

use crate::args::{optional_str, required_str};

/// Cap on entries returned by the listing/search tools.
const MAX_ENTRIES: usize = 500;

pub struct CreateFileTool;

#[async_trait]
impl HostTool for CreateFileTool {
    fn name(&self) -> &str {
        "create_file"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file with the given content. Parent \
         directories are created as needed."
    }

    fn signature(&self) -> String {
        "create_file(path, content)".into()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "array",
            "prefixItems": [
                { "type": "string", "description": "Absolute file path" },
                { "type": "string", "description": "File content" }
            ]
        })
    }

    async fn call(&self, session: &Session, args: &[Value]) -> Result<Value, ToolError> {
        let path = required_str(args, 0, "path")?;
        let content = required_str(args, 1, "content")?;
        let real = session.fs.resolve(path)?;

        debug!(path = %real.display(), bytes = content.len(), "create_file");

        if let Some(parent) = real.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::internal(format!("mkdir: {e}")))?;
        }
        tokio::fs::write(&real, content)
            .await
            .map_err(|e| ToolError::internal(format!("write error: {e}")))?;
        Ok(json!({ "created": true, "path": path, "bytes": content.len() }))
    }
}

pub struct EditFileTool;

#[async_trait]
impl HostTool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace one occurrence of old_str with new_str in a file. old_str \
         must match exactly once; include enough surrounding context to \
         make it unique."
    }

    fn signature(&self) -> String {
        "edit_file(path, old_str, new_str)".into()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "array",
            "prefixItems": [
                { "type": "string", "description": "Absolute file path" },
                { "type": "string", "description": "Exact text to replace" },
                { "type": "string", "description": "Replacement text" }
            ]
        })
    }

    async fn call(&self, session: &Session, args: &[Value]) -> Result<Value, ToolError> {
        let path = required_str(args, 0, "path")?;
        let old_str = required_str(args, 1, "old_str")?;
        let new_str = required_str(args, 2, "new_str")?;
        let real = session.fs.resolve(path)?;

        let text = tokio::fs::read_to_string(&real)
            .await
            .map_err(|e| ToolError::not_found(format!("read error: {e}")))?;

        let matches = text.matches(old_str).count();
        if matches == 0 {
            return Err(ToolError::invalid("old_str not found in file"));
        }
        if matches > 1 {
            return Err(ToolError::invalid(format!(
                "old_str matches {matches} times; add surrounding context to make it unique"
            )));
        }

        let updated = text.replacen(old_str, new_str, 1);
        tokio::fs::write(&real, updated)
            .await
            .map_err(|e| ToolError::internal(format!("write error: {e}")))?;
        Ok(json!({ "edited": true, "path": path }))
    }
}

pub struct ListFilesTool;

#[async_trait]
impl HostTool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List the entries of a directory. Directories are suffixed with '/'."
    }

    fn signature(&self) -> String {
        "list_files(path)".into()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "array",
            "prefixItems": [ { "type": "string", "description": "Absolute directory path" } ]
        })
    }

    async fn call(&self, session: &Session, args: &[Value]) -> Result<Value, ToolError> {
        let path = required_str(args, 0, "path")?;
        let real = session.fs.resolve(path)?;

        let mut reader = tokio::fs::read_dir(&real)
            .await
            .map_err(|e| ToolError::not_found(format!("list error: {e}")))?;

        let mut entries = Vec::new();
        while let Ok(Some(entry)) = reader.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            entries.push(if is_dir { format!("{name}/") } else { name });
            if entries.len() >= MAX_ENTRIES {
                break;
            }
        }
        entries.sort();
        Ok(json!(entries))
    }
}

pub struct FindFileTool;

#[async_trait]
impl HostTool for FindFileTool {
    fn name(&self) -> &str {
        "find_file"
    }

    fn description(&self) -> &str {
        "Find files whose name contains the given pattern, searching \
         recursively from dir (default: project root). Returns absolute \
         paths, capped at 500."
    }

    fn signature(&self) -> String {
        "find_file(pattern, dir?)".into()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "array",
            "prefixItems": [
                { "type": "string", "description": "Substring of the file name" },
                { "type": "string", "description": "Directory to search from" }
            ]
        })
    }

    async fn call(&self, session: &Session, args: &[Value]) -> Result<Value, ToolError> {
        let pattern = required_str(args, 0, "pattern")?.to_string();
        let dir = optional_str(args, 1).unwrap_or("/");
        let real = session.fs.resolve(dir)?;
        let fs = session.fs.clone();

        // walkdir is synchronous; the traversal runs on the blocking pool.
        let paths = tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            for entry in WalkDir::new(&real).follow_links(false).into_iter().flatten() {
                if !entry.file_type().is_file() {
                    continue;
                }
                if entry.file_name().to_string_lossy().contains(&pattern) {
                    out.push(fs.virtualize(entry.path()));
                    if out.len() >= MAX_ENTRIES {
                        break;
                    }
                }
            }
            out.sort();
            out
        })
        .await
        .map_err(|e| ToolError::internal(format!("search task failed: {e}")))?;

        Ok(json!(paths))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use foreman_interp::ScopedFs;

    fn session_in(dir: &std::path::Path) -> Session {
        Session::new(ScopedFs::new(dir))
    }

    #[tokio::test]
    async fn create_then_edit_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let sess = session_in(dir.path());

        CreateFileTool
            .call(&sess, &[json!("/sub/a.txt"), json!("hello old world")])
            .await
            .unwrap();
        EditFileTool
            .call(&sess, &[json!("/sub/a.txt"), json!("old"), json!("new")])
            .await
            .unwrap();
        let text = std::fs::read_to_string(dir.path().join("sub/a.txt")).unwrap();
        assert_eq!(text, "hello new world");
    }

    #[tokio::test]
    async fn edit_rejects_ambiguous_match() {
        let dir = tempfile::tempdir().unwrap();
        let sess = session_in(dir.path());
        std::fs::write(dir.path().join("a.txt"), "dup dup").unwrap();
        let err = EditFileTool
            .call(&sess, &[json!("/a.txt"), json!("dup"), json!("x")])
            .await
            .unwrap_err();
        assert!(err.message.contains("2 times"));
    }

    #[tokio::test]
    async fn edit_rejects_missing_old_str() {
        let dir = tempfile::tempdir().unwrap();
        let sess = session_in(dir.path());
        std::fs::write(dir.path().join("a.txt"), "content").unwrap();
        let err = EditFileTool
            .call(&sess, &[json!("/a.txt"), json!("absent"), json!("x")])
            .await
            .unwrap_err();
        assert!(err.message.contains("not found"));
    }

    #[tokio::test]
    async fn list_files_marks_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("f.txt"), "").unwrap();
        let sess = session_in(dir.path());
        let out = ListFilesTool.call(&sess, &[json!("/")]).await.unwrap();
        let entries: Vec<String> = serde_json::from_value(out).unwrap();
        assert_eq!(entries, vec!["f.txt", "sub/"]);
    }

    #[tokio::test]
    async fn find_file_returns_virtual_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "").unwrap();
        std::fs::write(dir.path().join("src/other.txt"), "").unwrap();
        let sess = session_in(dir.path());
        let out = FindFileTool.call(&sess, &[json!(".rs")]).await.unwrap();
        let paths: Vec<String> = serde_json::from_value(out).unwrap();
        assert_eq!(paths, vec!["/src/main.rs"]);
    }
}
