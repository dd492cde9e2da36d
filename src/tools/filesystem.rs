//! 沙箱文件系统工具
//!
//! SafeFs 绑定 root_dir，所有路径必须落在 root 下（禁止 ../ 与绝对路径逃逸）；
//! 工具本身不持有 SafeFs，而是从 ToolContext 取句柄，同一套工具可服务不同沙箱。

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::AgentError;
use crate::tools::{ToolContext, ToolRegistry, TypedTool};

/// 沙箱文件系统：绑定根目录，resolve 校验路径在根下，防止路径逃逸
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
}

impl SafeFs {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        let root = root_dir.as_ref().to_path_buf();
        let root_dir = root.canonicalize().unwrap_or(root);
        Self { root_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// 解析已存在的路径（跟随符号链接后仍须在沙箱内）
    pub fn resolve(&self, path: &str) -> Result<PathBuf, AgentError> {
        let path = path.trim_start_matches("./");
        let full = self.root_dir.join(path);
        let canonical = full
            .canonicalize()
            .map_err(|_| AgentError::ToolExecutionFailed(format!("Path not found: {path}")))?;
        if canonical.starts_with(&self.root_dir) {
            Ok(canonical)
        } else {
            Err(AgentError::PathEscape(path.to_string())) // 如 ../../etc/passwd
        }
    }

    /// 解析可能尚不存在的路径：逐段规范化，再检查最近的已存在祖先
    pub fn resolve_new(&self, path: &str) -> Result<PathBuf, AgentError> {
        let mut out = self.root_dir.clone();
        let mut depth = 0usize;
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => {
                    out.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                Component::ParentDir if depth > 0 => {
                    out.pop();
                    depth -= 1;
                }
                _ => return Err(AgentError::PathEscape(path.to_string())),
            }
        }

        let mut probe = out.as_path();
        while !probe.exists() {
            match probe.parent() {
                Some(parent) => probe = parent,
                None => break,
            }
        }
        match probe.canonicalize() {
            Ok(real) if !real.starts_with(&self.root_dir) => {
                Err(AgentError::PathEscape(path.to_string()))
            }
            _ => Ok(out),
        }
    }

    pub async fn read_file(&self, path: &str) -> Result<String, AgentError> {
        let resolved = self.resolve(path)?;
        tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Read failed: {e}")))
    }

    pub async fn write_file(&self, path: &str, content: &str) -> Result<usize, AgentError> {
        let resolved = self.resolve_new(path)?;
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AgentError::ToolExecutionFailed(format!("Create dir failed: {e}")))?;
        }
        tokio::fs::write(&resolved, content)
            .await
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Write failed: {e}")))?;
        Ok(content.len())
    }

    pub async fn list_dir(&self, path: &str) -> Result<Vec<String>, AgentError> {
        let base = if path.is_empty() || path == "." {
            self.root_dir.clone()
        } else {
            self.resolve(path)?
        };
        let mut dir = tokio::fs::read_dir(&base)
            .await
            .map_err(|e| AgentError::ToolExecutionFailed(format!("List failed: {e}")))?;
        let mut entries = Vec::new();
        while let Some(e) = dir
            .next_entry()
            .await
            .map_err(|e| AgentError::ToolExecutionFailed(e.to_string()))?
        {
            let name = e.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let is_dir = e.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            entries.push(if is_dir { format!("{name}/") } else { name });
        }
        entries.sort();
        Ok(entries)
    }

    pub async fn delete_file(&self, path: &str) -> Result<(), AgentError> {
        let resolved = self.resolve(path)?;
        if resolved == self.root_dir || resolved.is_dir() {
            return Err(AgentError::ToolExecutionFailed(format!(
                "Refusing to delete directory: {path}"
            )));
        }
        tokio::fs::remove_file(&resolved)
            .await
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Delete failed: {e}")))
    }

    pub async fn make_dir(&self, path: &str) -> Result<(), AgentError> {
        let resolved = self.resolve_new(path)?;
        tokio::fs::create_dir_all(&resolved)
            .await
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Mkdir failed: {e}")))
    }

    pub async fn exists(&self, path: &str) -> Result<bool, AgentError> {
        let resolved = self.resolve_new(path)?;
        tokio::fs::try_exists(&resolved)
            .await
            .map_err(|e| AgentError::ToolExecutionFailed(e.to_string()))
    }
}

/// 注册全部文件系统工具
pub fn register_filesystem_tools(registry: &mut ToolRegistry) {
    registry.register_typed(ReadFileTool);
    registry.register_typed(WriteFileTool);
    registry.register_typed(ListDirTool);
    registry.register_typed(DeleteFileTool);
    registry.register_typed(MakeDirTool);
    registry.register_typed(FileExistsTool);
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PathArgs {
    /// 相对工作区根目录的路径
    pub path: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListArgs {
    /// 目录路径，默认 "."
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WriteArgs {
    pub path: String,
    pub content: String,
}

pub struct ReadFileTool;

#[async_trait]
impl TypedTool for ReadFileTool {
    type Input = PathArgs;

    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read file contents. Args: {\"path\": \"file path relative to workspace\"}"
    }

    async fn run(&self, input: PathArgs, ctx: &ToolContext) -> Result<Value, String> {
        tracing::info!(path = %input.path, "read_file tool execute");
        let fs = ctx.require_fs()?;
        fs.read_file(&input.path)
            .await
            .map(Value::String)
            .map_err(|e| e.to_string())
    }
}

pub struct WriteFileTool;

#[async_trait]
impl TypedTool for WriteFileTool {
    type Input = WriteArgs;

    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write a file, creating parent directories. Args: {\"path\": \"...\", \"content\": \"...\"}"
    }

    fn validate(&self, input: &WriteArgs) -> bool {
        !input.path.trim().is_empty()
    }

    async fn run(&self, input: WriteArgs, ctx: &ToolContext) -> Result<Value, String> {
        tracing::info!(path = %input.path, "write_file tool execute");
        let fs = ctx.require_fs()?;
        let bytes = fs
            .write_file(&input.path, &input.content)
            .await
            .map_err(|e| e.to_string())?;
        Ok(json!({
            "path": input.path,
            "bytes": bytes,
            "artifacts": [input.path],
        }))
    }
}

pub struct ListDirTool;

#[async_trait]
impl TypedTool for ListDirTool {
    type Input = ListArgs;

    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List directory. Args: {\"path\": \"directory path, default '.'\"}"
    }

    async fn run(&self, input: ListArgs, ctx: &ToolContext) -> Result<Value, String> {
        let path = input.path.unwrap_or_else(|| ".".to_string());
        tracing::info!(path = %path, "list_dir tool execute");
        let fs = ctx.require_fs()?;
        let entries = fs.list_dir(&path).await.map_err(|e| e.to_string())?;
        Ok(Value::String(entries.join("\n")))
    }
}

pub struct DeleteFileTool;

#[async_trait]
impl TypedTool for DeleteFileTool {
    type Input = PathArgs;

    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a single file. Args: {\"path\": \"...\"}"
    }

    async fn run(&self, input: PathArgs, ctx: &ToolContext) -> Result<Value, String> {
        tracing::info!(path = %input.path, "delete_file tool execute");
        let fs = ctx.require_fs()?;
        fs.delete_file(&input.path).await.map_err(|e| e.to_string())?;
        Ok(json!({ "deleted": input.path }))
    }
}

pub struct MakeDirTool;

#[async_trait]
impl TypedTool for MakeDirTool {
    type Input = PathArgs;

    fn name(&self) -> &str {
        "make_dir"
    }

    fn description(&self) -> &str {
        "Create a directory and its parents. Args: {\"path\": \"...\"}"
    }

    async fn run(&self, input: PathArgs, ctx: &ToolContext) -> Result<Value, String> {
        let fs = ctx.require_fs()?;
        fs.make_dir(&input.path).await.map_err(|e| e.to_string())?;
        Ok(json!({ "created": input.path }))
    }
}

pub struct FileExistsTool;

#[async_trait]
impl TypedTool for FileExistsTool {
    type Input = PathArgs;

    fn name(&self) -> &str {
        "file_exists"
    }

    fn description(&self) -> &str {
        "Check whether a path exists. Args: {\"path\": \"...\"}"
    }

    async fn run(&self, input: PathArgs, ctx: &ToolContext) -> Result<Value, String> {
        let fs = ctx.require_fs()?;
        fs.exists(&input.path)
            .await
            .map(Value::Bool)
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn ctx(dir: &TempDir) -> ToolContext {
        ToolContext::new("test-agent").with_fs(Arc::new(SafeFs::new(dir.path())))
    }

    #[test]
    fn test_resolve_new_rejects_escape() {
        let dir = TempDir::new().unwrap();
        let fs = SafeFs::new(dir.path());
        assert!(matches!(fs.resolve_new("../outside.txt"), Err(AgentError::PathEscape(_))));
        assert!(matches!(fs.resolve_new("/etc/passwd"), Err(AgentError::PathEscape(_))));
        assert!(fs.resolve_new("a/../b/new.txt").unwrap().ends_with("b/new.txt"));
    }

    #[tokio::test]
    async fn test_write_read_list_delete() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx(&dir);

        let written = WriteFileTool
            .run(
                WriteArgs {
                    path: "notes/todo.txt".into(),
                    content: "ship it".into(),
                },
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(written["artifacts"], json!(["notes/todo.txt"]));

        let read = ReadFileTool
            .run(PathArgs { path: "notes/todo.txt".into() }, &ctx)
            .await
            .unwrap();
        assert_eq!(read, json!("ship it"));

        let listing = ListDirTool.run(ListArgs { path: None }, &ctx).await.unwrap();
        assert_eq!(listing, json!("notes/"));

        DeleteFileTool
            .run(PathArgs { path: "notes/todo.txt".into() }, &ctx)
            .await
            .unwrap();
        let exists = FileExistsTool
            .run(PathArgs { path: "notes/todo.txt".into() }, &ctx)
            .await
            .unwrap();
        assert_eq!(exists, json!(false));
    }

    #[tokio::test]
    async fn test_missing_fs_handle_is_an_error() {
        let err = ReadFileTool
            .run(PathArgs { path: "a".into() }, &ToolContext::new("x"))
            .await
            .unwrap_err();
        assert!(err.contains("filesystem"));
    }

    #[tokio::test]
    async fn test_make_dir_and_refuse_dir_delete() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx(&dir);
        MakeDirTool
            .run(PathArgs { path: "a/b".into() }, &ctx)
            .await
            .unwrap();
        assert!(dir.path().join("a/b").is_dir());
        assert!(DeleteFileTool
            .run(PathArgs { path: "a".into() }, &ctx)
            .await
            .is_err());
    }
}
