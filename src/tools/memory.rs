//! `memory_before_turn` / `memory_after_turn` / `memory_list_dir_with_abstract`
//! — adapters over `TurnMemory`, the turn-scoped agent memory store.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::core::annotations::ToolAnnotations;
use crate::core::registry::{ToolDescriptor, ToolHandler, ToolResult};
use crate::error::CoreError;
use crate::tools::collaborators::TurnMemory;

const DEFAULT_PROJECT: &str = "default";
const DEFAULT_SESSION: &str = "default";
const DEFAULT_MAX_INPUT_TOK: u32 = 120_000;
const DEFAULT_DEPTH: u32 = 8;
const DEFAULT_LIMIT: u32 = 200;

fn project_of(arguments: &Value) -> String {
    arguments
        .get("project")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_PROJECT)
        .to_string()
}

fn session_of(arguments: &Value) -> String {
    arguments
        .get("session_id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SESSION)
        .to_string()
}

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

/// `turn-<epoch-millis>-<6-hex>`, the documented default when a caller
/// omits `turn_id`.
fn generate_turn_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let suffix = Uuid::new_v4().as_simple().to_string();
    format!("turn-{millis}-{}", &suffix[..6])
}

pub struct MemoryBeforeTurnTool {
    memory: Arc<dyn TurnMemory>,
}

impl MemoryBeforeTurnTool {
    pub fn new(memory: Arc<dyn TurnMemory>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl ToolHandler for MemoryBeforeTurnTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "memory_before_turn".to_string(),
            description: "Fetch agent memory context before starting a new turn.".to_string(),
            schema: json!({
                "type": "object",
                "properties": {
                    "project": {"type": "string", "description": "defaults to \"default\""},
                    "session_id": {"type": "string", "description": "defaults to \"default\""},
                    "max_input_tok": {"type": "integer", "description": "defaults to 120000"}
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
        let session_id = session_of(&arguments);
        let max_input_tok = arguments
            .get("max_input_tok")
            .and_then(Value::as_u64)
            .map(|v| v as u32)
            .unwrap_or(DEFAULT_MAX_INPUT_TOK);

        match self.memory.before_turn(&project, &session_id, max_input_tok).await {
            Ok(value) => Ok(ToolResult::ok_structured(value)),
            Err(e) => Ok(downstream_to_result(e)),
        }
    }
}

pub struct MemoryAfterTurnTool {
    memory: Arc<dyn TurnMemory>,
}

impl MemoryAfterTurnTool {
    pub fn new(memory: Arc<dyn TurnMemory>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl ToolHandler for MemoryAfterTurnTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "memory_after_turn".to_string(),
            description: "Persist the inputs and outputs of a completed turn into agent memory.".to_string(),
            schema: json!({
                "type": "object",
                "properties": {
                    "project": {"type": "string", "description": "defaults to \"default\""},
                    "session_id": {"type": "string", "description": "defaults to \"default\""},
                    "turn_id": {"type": "string", "description": "defaults to an auto-generated turn-<epoch-millis>-<6-hex> id"},
                    "current_input": {},
                    "input_items": {"type": "array", "items": {}},
                    "output_items": {"type": "array", "items": {}}
                }
            }),
            annotations: ToolAnnotations::default().with_idempotent(false).with_open_world(false),
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
        let session_id = session_of(&arguments);
        let turn_id = arguments
            .get("turn_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(generate_turn_id);
        let current_input = arguments.get("current_input").cloned().unwrap_or(Value::Null);
        let input_items = arguments.get("input_items").cloned().unwrap_or_else(|| json!([]));
        let output_items = arguments.get("output_items").cloned().unwrap_or_else(|| json!([]));

        match self
            .memory
            .after_turn(&project, &session_id, &turn_id, current_input, input_items, output_items)
            .await
        {
            Ok(()) => Ok(ToolResult::ok_structured(json!({ "turn_id": turn_id, "stored": true }))),
            Err(e) => Ok(downstream_to_result(e)),
        }
    }
}

pub struct MemoryListDirWithAbstractTool {
    memory: Arc<dyn TurnMemory>,
}

impl MemoryListDirWithAbstractTool {
    pub fn new(memory: Arc<dyn TurnMemory>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl ToolHandler for MemoryListDirWithAbstractTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "memory_list_dir_with_abstract".to_string(),
            description: "List recent turns for a session along with a short abstract of each.".to_string(),
            schema: json!({
                "type": "object",
                "properties": {
                    "project": {"type": "string", "description": "defaults to \"default\""},
                    "session_id": {"type": "string", "description": "defaults to \"default\""},
                    "depth": {"type": "integer", "description": "defaults to 8"},
                    "limit": {"type": "integer", "description": "defaults to 200"}
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
        let session_id = session_of(&arguments);
        let depth = arguments
            .get("depth")
            .and_then(Value::as_u64)
            .map(|v| v as u32)
            .unwrap_or(DEFAULT_DEPTH);
        let limit = arguments
            .get("limit")
            .and_then(Value::as_u64)
            .map(|v| v as u32)
            .unwrap_or(DEFAULT_LIMIT);

        match self.memory.list_dir_with_abstract(&project, &session_id, depth, limit).await {
            Ok(value) => Ok(ToolResult::ok_structured(value)),
            Err(e) => Ok(downstream_to_result(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::collaborators::InMemoryTurnMemory;

    fn authenticated_ctx() -> RequestContext {
        let (identity, _, _) = crate::auth::resolve_identity(Some("Bearer key"), "").unwrap();
        RequestContext::new("req", identity)
    }

    #[tokio::test]
    async fn before_turn_defaults_max_input_tok() {
        let memory = Arc::new(InMemoryTurnMemory::new());
        let tool = MemoryBeforeTurnTool::new(memory);
        let result = tool.handle(&authenticated_ctx(), json!({})).await.unwrap();
        assert_eq!(result.structured.unwrap()["max_input_tok"], DEFAULT_MAX_INPUT_TOK);
    }

    #[tokio::test]
    async fn after_turn_generates_turn_id_when_omitted() {
        let memory = Arc::new(InMemoryTurnMemory::new());
        let tool = MemoryAfterTurnTool::new(memory);
        let result = tool.handle(&authenticated_ctx(), json!({})).await.unwrap();
        let turn_id = result.structured.unwrap()["turn_id"].as_str().unwrap().to_string();
        assert!(turn_id.starts_with("turn-"));
    }

    #[tokio::test]
    async fn after_turn_then_list_dir_with_abstract_sees_it() {
        let memory = Arc::new(InMemoryTurnMemory::new());
        let after = MemoryAfterTurnTool::new(memory.clone());
        let list = MemoryListDirWithAbstractTool::new(memory.clone());

        after
            .handle(&authenticated_ctx(), json!({"turn_id": "turn-fixed"}))
            .await
            .unwrap();
        let result = list.handle(&authenticated_ctx(), json!({})).await.unwrap();
        let structured = result.structured.unwrap();
        assert_eq!(structured["depth"], DEFAULT_DEPTH);
        assert_eq!(structured["turns"][0], "turn-fixed");
    }

    #[tokio::test]
    async fn missing_identity_is_an_in_protocol_error() {
        let memory = Arc::new(InMemoryTurnMemory::new());
        let tool = MemoryBeforeTurnTool::new(memory);
        let ctx = RequestContext::new("req", crate::auth::IdentityContext::anonymous());
        let result = tool.handle(&ctx, json!({})).await.unwrap();
        assert!(result.is_error);
        assert_eq!(result.text, "missing authorization bearer token");
    }
}
