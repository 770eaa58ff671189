//! Workspace-rooted file tools with approval previews.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use volley_contract::{Args, Preview, PreviewKind, RiskLevel, ToolResult, ToolSchema};

use crate::policy::validate_workspace_path;
use crate::registry::{object_schema, str_arg, Tool, ToolError, ToolRegistry};

/// Register the file tool set against one registry.
pub fn register_file_tools(
    registry: &ToolRegistry,
    workspace_root: impl Into<PathBuf>,
) -> Result<(), crate::registry::RegistryError> {
    let root: PathBuf = workspace_root.into();
    registry.register(Arc::new(ReadFileTool { root: root.clone() }))?;
    registry.register(Arc::new(WriteFileTool { root: root.clone() }))?;
    registry.register(Arc::new(AppendFileTool { root }))?;
    Ok(())
}

/// Resolve a path argument inside the workspace. Tools re-check the
/// boundary themselves so they stay safe even when dispatched outside the
/// policy pipeline.
fn resolve(root: &Path, args: &Args) -> Result<(PathBuf, String), ToolResult> {
    let Some(rel) = str_arg(args, "path").filter(|p| !p.is_empty()) else {
        return Err(ToolResult::error("path argument required"));
    };
    if let Err(e) = validate_workspace_path(rel, root) {
        return Err(ToolResult::error(e.to_string()));
    }
    let abs = if Path::new(rel).is_absolute() {
        PathBuf::from(rel)
    } else {
        root.join(rel)
    };
    Ok((abs, rel.to_string()))
}

fn content_excerpt(content: &str) -> String {
    const MAX: usize = 400;
    if content.chars().count() <= MAX {
        return content.to_string();
    }
    let head: String = content.chars().take(MAX).collect();
    format!("{head}\n… ({} bytes total)", content.len())
}

pub struct ReadFileTool {
    root: PathBuf,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "read_file".into(),
            description: "Read a file from the workspace".into(),
            parameters: object_schema(&[(
                "path",
                "string",
                "Path relative to the workspace root",
                true,
            )]),
        }
    }

    fn risk(&self) -> RiskLevel {
        RiskLevel::None
    }

    async fn execute(&self, args: &Args) -> Result<ToolResult, ToolError> {
        let (abs, rel) = match resolve(&self.root, args) {
            Ok(resolved) => resolved,
            Err(result) => return Ok(result),
        };
        match tokio::fs::read_to_string(&abs).await {
            Ok(content) => Ok(ToolResult::success(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(ToolResult::error(format!("file not found: {rel}")))
            }
            Err(e) => Ok(ToolResult::error(format!("read failed: {e}"))),
        }
    }
}

pub struct WriteFileTool {
    root: PathBuf,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "write_file".into(),
            description: "Write a file in the workspace, creating parent directories".into(),
            parameters: object_schema(&[
                ("path", "string", "Path relative to the workspace root", true),
                ("content", "string", "Full file content", true),
            ]),
        }
    }

    async fn execute(&self, args: &Args) -> Result<ToolResult, ToolError> {
        let (abs, rel) = match resolve(&self.root, args) {
            Ok(resolved) => resolved,
            Err(result) => return Ok(result),
        };
        let content = str_arg(args, "content").unwrap_or("");

        if let Some(parent) = abs.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&abs, content.as_bytes()).await?;
        Ok(ToolResult::success(format!(
            "wrote {} bytes to {rel}",
            content.len()
        )))
    }

    async fn preview(&self, args: &Args) -> Option<Preview> {
        let rel = str_arg(args, "path")?;
        let content = str_arg(args, "content").unwrap_or("");
        let exists = self.root.join(rel).exists();
        Some(Preview {
            kind: PreviewKind::Diff,
            summary: format!(
                "{} {rel} ({} bytes)",
                if exists { "Overwrite" } else { "Create" },
                content.len()
            ),
            content: content_excerpt(content),
            affected: vec![rel.to_string()],
            risk_hint: if exists {
                "replaces existing content".into()
            } else {
                String::new()
            },
        })
    }
}

pub struct AppendFileTool {
    root: PathBuf,
}

#[async_trait]
impl Tool for AppendFileTool {
    fn name(&self) -> &str {
        "append_file"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "append_file".into(),
            description: "Append to a file in the workspace, creating it if missing".into(),
            parameters: object_schema(&[
                ("path", "string", "Path relative to the workspace root", true),
                ("content", "string", "Content to append", true),
            ]),
        }
    }

    async fn execute(&self, args: &Args) -> Result<ToolResult, ToolError> {
        let (abs, rel) = match resolve(&self.root, args) {
            Ok(resolved) => resolved,
            Err(result) => return Ok(result),
        };
        let content = str_arg(args, "content").unwrap_or("");

        if let Some(parent) = abs.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let existing = tokio::fs::read_to_string(&abs).await.unwrap_or_default();
        let mut combined = existing;
        combined.push_str(content);
        tokio::fs::write(&abs, combined.as_bytes()).await?;

        Ok(ToolResult::success(format!(
            "appended {} bytes to {rel}",
            content.len()
        )))
    }

    async fn preview(&self, args: &Args) -> Option<Preview> {
        let rel = str_arg(args, "path")?;
        let content = str_arg(args, "content").unwrap_or("");
        Some(Preview {
            kind: PreviewKind::Text,
            summary: format!("Append {} bytes to {rel}", content.len()),
            content: content_excerpt(content),
            affected: vec![rel.to_string()],
            risk_hint: String::new(),
        })
    }
}
