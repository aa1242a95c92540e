//! `file_read` / `file_write` / `file_search` / `file_list` — adapters over
//! `ProjectFiles`, the sandboxed per-project filesystem standing in for the
//! out-of-scope document store.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::context::RequestContext;
use crate::core::annotations::ToolAnnotations;
use crate::core::registry::{ToolDescriptor, ToolHandler, ToolResult};
use crate::error::CoreError;
use crate::tools::collaborators::ProjectFiles;

const DEFAULT_PROJECT: &str = "default";

fn project_of(arguments: &Value) -> String {
    arguments
        .get("project")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_PROJECT)
        .to_string()
}

/// Structured error shape shared by the file and memory subsystems so
/// agents can decide whether to retry.
fn structured_error(code: &str, message: impl Into<String>, retryable: bool) -> ToolResult {
    let message = message.into();
    ToolResult {
        is_error: true,
        text: message.clone(),
        structured: Some(json!({
            "code": code,
            "message": message,
            "retryable": retryable,
        })),
    }
}

fn downstream_to_result(err: CoreError) -> ToolResult {
    match err {
        CoreError::Validation(msg) => structured_error("validation", msg, false),
        other => structured_error("downstream", other.to_string(), true),
    }
}

pub struct FileReadTool {
    files: Arc<dyn ProjectFiles>,
}

impl FileReadTool {
    pub fn new(files: Arc<dyn ProjectFiles>) -> Self {
        Self { files }
    }
}

#[async_trait]
impl ToolHandler for FileReadTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "file_read".to_string(),
            description: "Read a file from the project's virtual filesystem.".to_string(),
            schema: json!({
                "type": "object",
                "properties": {
                    "project": {"type": "string", "description": "Project namespace, defaults to \"default\""},
                    "path": {"type": "string", "description": "Path within the project"}
                },
                "required": ["path"]
            }),
            annotations: ToolAnnotations::read_only(),
            base_cost: 0,
        }
    }

    async fn handle(&self, ctx: &RequestContext, arguments: Value) -> Result<ToolResult, CoreError> {
        if !ctx.identity.is_authenticated() {
            return Ok(structured_error(
                "unauthorized",
                CoreError::MissingAuthorization.to_string(),
                false,
            ));
        }
        let Some(path) = arguments.get("path").and_then(Value::as_str) else {
            return Ok(ToolResult::error("missing required argument: path"));
        };
        let project = project_of(&arguments);

        match self.files.read(&project, path).await {
            Ok(content) => Ok(ToolResult::ok_structured(json!({ "content": content }))),
            Err(e) => Ok(downstream_to_result(e)),
        }
    }
}

pub struct FileWriteTool {
    files: Arc<dyn ProjectFiles>,
}

impl FileWriteTool {
    pub fn new(files: Arc<dyn ProjectFiles>) -> Self {
        Self { files }
    }
}

#[async_trait]
impl ToolHandler for FileWriteTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "file_write".to_string(),
            description: "Write a file into the project's virtual filesystem.".to_string(),
            schema: json!({
                "type": "object",
                "properties": {
                    "project": {"type": "string", "description": "Project namespace, defaults to \"default\""},
                    "path": {"type": "string"},
                    "content": {"type": "string"}
                },
                "required": ["path", "content"]
            }),
            annotations: ToolAnnotations::default().with_idempotent(true).with_open_world(false),
            base_cost: 0,
        }
    }

    async fn handle(&self, ctx: &RequestContext, arguments: Value) -> Result<ToolResult, CoreError> {
        if !ctx.identity.is_authenticated() {
            return Ok(structured_error(
                "unauthorized",
                CoreError::MissingAuthorization.to_string(),
                false,
            ));
        }
        let (Some(path), Some(content)) = (
            arguments.get("path").and_then(Value::as_str),
            arguments.get("content").and_then(Value::as_str),
        ) else {
            return Ok(ToolResult::error("missing required argument: path or content"));
        };
        let project = project_of(&arguments);

        match self.files.write(&project, path, content).await {
            Ok(()) => Ok(ToolResult::ok_structured(json!({ "written": true, "path": path }))),
            Err(e) => Ok(downstream_to_result(e)),
        }
    }
}

pub struct FileSearchTool {
    files: Arc<dyn ProjectFiles>,
}

impl FileSearchTool {
    pub fn new(files: Arc<dyn ProjectFiles>) -> Self {
        Self { files }
    }
}

#[async_trait]
impl ToolHandler for FileSearchTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "file_search".to_string(),
            description: "Search a file in the project's virtual filesystem for a substring, line by line.".to_string(),
            schema: json!({
                "type": "object",
                "properties": {
                    "project": {"type": "string", "description": "Project namespace, defaults to \"default\""},
                    "path": {"type": "string"},
                    "query": {"type": "string"}
                },
                "required": ["path", "query"]
            }),
            annotations: ToolAnnotations::read_only(),
            base_cost: 0,
        }
    }

    async fn handle(&self, ctx: &RequestContext, arguments: Value) -> Result<ToolResult, CoreError> {
        if !ctx.identity.is_authenticated() {
            return Ok(structured_error(
                "unauthorized",
                CoreError::MissingAuthorization.to_string(),
                false,
            ));
        }
        let (Some(path), Some(query)) = (
            arguments.get("path").and_then(Value::as_str),
            arguments.get("query").and_then(Value::as_str),
        ) else {
            return Ok(ToolResult::error("missing required argument: path or query"));
        };
        let project = project_of(&arguments);

        match self.files.search(&project, path, query).await {
            Ok(matches) => Ok(ToolResult::ok_structured(json!({ "chunk_content": matches }))),
            Err(e) => Ok(downstream_to_result(e)),
        }
    }
}

pub struct FileListTool {
    files: Arc<dyn ProjectFiles>,
}

impl FileListTool {
    pub fn new(files: Arc<dyn ProjectFiles>) -> Self {
        Self { files }
    }
}

#[async_trait]
impl ToolHandler for FileListTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "file_list".to_string(),
            description: "List entries under a path in the project's virtual filesystem.".to_string(),
            schema: json!({
                "type": "object",
                "properties": {
                    "project": {"type": "string", "description": "Project namespace, defaults to \"default\""},
                    "path": {"type": "string", "description": "Path to list, defaults to \"/\""}
                }
            }),
            annotations: ToolAnnotations::read_only(),
            base_cost: 0,
        }
    }

    async fn handle(&self, ctx: &RequestContext, arguments: Value) -> Result<ToolResult, CoreError> {
        if !ctx.identity.is_authenticated() {
            return Ok(structured_error(
                "unauthorized",
                CoreError::MissingAuthorization.to_string(),
                false,
            ));
        }
        let project = project_of(&arguments);
        let path = arguments.get("path").and_then(Value::as_str).unwrap_or("/");

        match self.files.list(&project, path).await {
            Ok(listing) => Ok(ToolResult::ok_structured(json!(listing))),
            Err(e) => Ok(downstream_to_result(e)),
        }
    }
}
