//! `mcp_pipe` — the pipeline orchestrator tool (C8). A thin adapter: all of
//! the evaluation logic lives in `core::pipeline`; this module only
//! resolves the tool's two accepted input shapes (raw object or a
//! JSON-encoded string under `spec`) and shapes the final response.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::context::RequestContext;
use crate::core::annotations::ToolAnnotations;
use crate::core::config::PipelineLimits;
use crate::core::pipeline::{PipelineOrchestrator, PipelineSpec};
use crate::core::registry::{RegistryHandle, ToolDescriptor, ToolHandler, ToolResult};
use crate::error::CoreError;
use crate::recorder::CallRecorder;

pub struct McpPipeTool {
    registry: Arc<RegistryHandle>,
    recorder: Arc<CallRecorder>,
    limits: PipelineLimits,
}

impl McpPipeTool {
    pub fn new(registry: Arc<RegistryHandle>, recorder: Arc<CallRecorder>, limits: PipelineLimits) -> Self {
        Self {
            registry,
            recorder,
            limits,
        }
    }
}

fn parse_spec(arguments: &Value) -> Result<PipelineSpec, String> {
    if let Some(raw) = arguments.get("spec") {
        if let Some(text) = raw.as_str() {
            return serde_json::from_str(text).map_err(|e| format!("invalid pipeline spec JSON: {e}"));
        }
        return serde_json::from_value(raw.clone()).map_err(|e| format!("invalid pipeline spec: {e}"));
    }
    serde_json::from_value(arguments.clone()).map_err(|e| format!("invalid pipeline spec: {e}"))
}

#[async_trait]
impl ToolHandler for McpPipeTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "mcp_pipe".to_string(),
            description:
                "Evaluate a declarative pipeline of tool invocations: sequential steps, parallel groups, nested pipelines, ${path} interpolation and {$ref} references.".to_string(),
            schema: json!({
                "type": "object",
                "properties": {
                    "vars": {"type": "object"},
                    "steps": {"type": "array", "items": {"type": "object"}},
                    "return": {},
                    "spec": {"description": "alternative: the whole spec as a JSON-encoded string or object"}
                }
            }),
            annotations: ToolAnnotations::default().with_open_world(true),
            base_cost: 0,
        }
    }

    async fn handle(&self, ctx: &RequestContext, arguments: Value) -> Result<ToolResult, CoreError> {
        let spec = match parse_spec(&arguments) {
            Ok(spec) => spec,
            Err(message) => return Ok(ToolResult::error(message)),
        };

        let orchestrator = PipelineOrchestrator::new(self.registry.get(), &self.recorder, self.limits.clone());
        let output = orchestrator.run(ctx, spec).await;

        Ok(ToolResult::ok_structured(json!({
            "ok": output.ok,
            "error": output.error,
            "result": output.result,
            "steps": output.steps,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::IdentityContext;
    use crate::core::registry::{ToolRegistry, ToolResult as RawToolResult};

    struct AddOneHandler;

    #[async_trait]
    impl ToolHandler for AddOneHandler {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor {
                name: "add_one".to_string(),
                description: "adds one to n".to_string(),
                schema: json!({"type": "object"}),
                annotations: ToolAnnotations::read_only(),
                base_cost: 1,
            }
        }

        async fn handle(&self, _ctx: &RequestContext, arguments: Value) -> Result<RawToolResult, CoreError> {
            let n = arguments.get("n").and_then(Value::as_i64).unwrap_or(0);
            Ok(RawToolResult::ok_structured(json!({"n": n + 1})))
        }
    }

    fn test_ctx() -> RequestContext {
        RequestContext::new("pipe-tool-req", IdentityContext::anonymous())
    }

    fn handle_with_add_one() -> Arc<RegistryHandle> {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(AddOneHandler));
        let handle = Arc::new(RegistryHandle::new());
        handle.set(Arc::new(registry));
        handle
    }

    #[tokio::test]
    async fn runs_a_sequential_pipeline_from_raw_arguments() {
        let tool = McpPipeTool::new(handle_with_add_one(), Arc::new(CallRecorder::default()), PipelineLimits::default());

        let args = json!({
            "steps": [
                {"id": "a", "tool": {"name": "add_one", "args": {"n": 1}}},
            ],
            "return": {"$ref": "steps.a.structured.n"}
        });

        let result = tool.handle(&test_ctx(), args).await.unwrap();
        assert!(!result.is_error);
        assert_eq!(result.structured.unwrap()["result"], json!(2));
    }

    #[tokio::test]
    async fn accepts_spec_as_json_encoded_string() {
        let tool = McpPipeTool::new(handle_with_add_one(), Arc::new(CallRecorder::default()), PipelineLimits::default());

        let spec_str = json!({
            "steps": [{"id": "a", "tool": {"name": "add_one", "args": {"n": 5}}}]
        })
        .to_string();

        let result = tool.handle(&test_ctx(), json!({"spec": spec_str})).await.unwrap();
        assert!(!result.is_error);
        assert_eq!(result.structured.unwrap()["result"], json!({"n": 6}));
    }

    #[tokio::test]
    async fn malformed_spec_is_an_in_protocol_error() {
        let registry = ToolRegistry::new();
        let handle = Arc::new(RegistryHandle::new());
        handle.set(Arc::new(registry));
        let tool = McpPipeTool::new(handle, Arc::new(CallRecorder::default()), PipelineLimits::default());
        let result = tool.handle(&test_ctx(), json!({"spec": "{not json"})).await.unwrap();
        assert!(result.is_error);
    }
}
