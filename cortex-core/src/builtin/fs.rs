//! File tools: `read_file`, `write_file`, `list_directory`.

use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::context::AgentContext;
use crate::types::ToolResult;

#[derive(Debug, Deserialize)]
pub(super) struct ReadFileArgs {
    file_path: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct WriteFileArgs {
    file_path: String,
    content: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct ListDirectoryArgs {
    #[serde(default)]
    directory_path: Option<String>,
}

fn timestamp(t: std::io::Result<SystemTime>) -> Option<String> {
    t.ok().map(|t| DateTime::<Utc>::from(t).to_rfc3339())
}

pub(super) async fn read_file(args: ReadFileArgs, ctx: &AgentContext) -> ToolResult {
    let path = ctx.resolve_path(&args.file_path);
    let content = match tokio::fs::read_to_string(&path).await {
        Ok(c) => c,
        Err(e) => {
            return ToolResult::failure_with(e.to_string(), json!({ "path": path }));
        }
    };
    let meta = tokio::fs::metadata(&path).await.ok();
    ToolResult::ok(json!({
        "content": content,
        "path": path,
        "size": meta.as_ref().map(|m| m.len()),
        "modified": meta.and_then(|m| timestamp(m.modified())),
    }))
}

pub(super) async fn write_file(args: WriteFileArgs, ctx: &AgentContext) -> ToolResult {
    let path = ctx.resolve_path(&args.file_path);
    if let Some(parent) = path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            return ToolResult::failure_with(e.to_string(), json!({ "path": path }));
        }
    }
    if let Err(e) = tokio::fs::write(&path, args.content.as_bytes()).await {
        return ToolResult::failure_with(e.to_string(), json!({ "path": path }));
    }
    ToolResult::ok(json!({
        "path": path,
        "bytes_written": args.content.len(),
    }))
}

pub(super) async fn list_directory(args: ListDirectoryArgs, ctx: &AgentContext) -> ToolResult {
    let path = ctx.resolve_path(args.directory_path.as_deref().unwrap_or("."));
    let mut reader = match tokio::fs::read_dir(&path).await {
        Ok(r) => r,
        Err(e) => return ToolResult::failure_with(e.to_string(), json!({ "path": path })),
    };

    let mut entries = Vec::new();
    loop {
        match reader.next_entry().await {
            Ok(Some(entry)) => {
                // Entries that vanish mid-listing still show up, with unknown type.
                let meta = entry.metadata().await.ok();
                let kind = match meta.as_ref() {
                    Some(m) if m.is_dir() => "directory",
                    Some(m) if m.is_symlink() => "symlink",
                    Some(_) => "file",
                    None => "unknown",
                };
                entries.push(json!({
                    "name": entry.file_name().to_string_lossy(),
                    "type": kind,
                    "size": meta.as_ref().map(|m| m.len()),
                    "modified": meta.and_then(|m| timestamp(m.modified())),
                }));
            }
            Ok(None) => break,
            Err(e) => return ToolResult::failure_with(e.to_string(), json!({ "path": path })),
        }
    }
    entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

    ToolResult::ok(json!({
        "path": path,
        "entries": entries,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = AgentContext::detect().with_working_dir(dir.path());

        let w = write_file(
            WriteFileArgs {
                file_path: "reports/findings.md".into(),
                content: "# XSS in /search".into(),
            },
            &ctx,
        )
        .await;
        assert!(w.success);
        assert_eq!(w.data.unwrap()["bytes_written"], 16);

        let r = read_file(
            ReadFileArgs {
                file_path: "reports/findings.md".into(),
            },
            &ctx,
        )
        .await;
        assert!(r.success);
        assert_eq!(r.data.unwrap()["content"], "# XSS in /search");
    }

    #[tokio::test]
    async fn read_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = AgentContext::detect().with_working_dir(dir.path());
        let r = read_file(ReadFileArgs { file_path: "nope.txt".into() }, &ctx).await;
        assert!(!r.success);
        assert!(r.error.is_some());
    }

    #[tokio::test]
    async fn list_directory_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        std::fs::write(dir.path().join("a.txt"), "aa").unwrap();
        std::fs::create_dir(dir.path().join("loot")).unwrap();

        let ctx = AgentContext::detect();
        let r = list_directory(
            ListDirectoryArgs {
                directory_path: Some(dir.path().to_string_lossy().into_owned()),
            },
            &ctx,
        )
        .await;
        assert!(r.success);
        let data = r.data.unwrap();
        let entries = data["entries"].as_array().unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "loot"]);
        assert_eq!(entries[2]["type"], "directory");
        assert_eq!(entries[0]["size"], 2);
    }
}
