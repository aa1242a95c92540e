//! `extract_key_info` — charge-bearing adapter over `ExtractionBackend`.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::context::RequestContext;
use crate::core::annotations::ToolAnnotations;
use crate::core::registry::{ToolDescriptor, ToolHandler, ToolResult};
use crate::error::CoreError;
use crate::tools::collaborators::{BillingChecker, ExtractionBackend};

const PRICE_TAG: u64 = 1;

pub struct ExtractKeyInfoTool {
    backend: Arc<dyn ExtractionBackend>,
    billing: Arc<dyn BillingChecker>,
}

impl ExtractKeyInfoTool {
    pub fn new(backend: Arc<dyn ExtractionBackend>, billing: Arc<dyn BillingChecker>) -> Self {
        Self { backend, billing }
    }
}

#[async_trait]
impl ToolHandler for ExtractKeyInfoTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "extract_key_info".to_string(),
            description: "Extract the passages of `materials` relevant to `query`.".to_string(),
            schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "materials": {"type": "string"}
                },
                "required": ["query", "materials"]
            }),
            annotations: ToolAnnotations::read_only(),
            base_cost: PRICE_TAG,
        }
    }

    async fn handle(&self, ctx: &RequestContext, arguments: Value) -> Result<ToolResult, CoreError> {
        if !ctx.identity.is_authenticated() {
            return Ok(ToolResult::error(CoreError::MissingAuthorization.to_string()));
        }

        let (Some(query), Some(materials)) = (
            arguments.get("query").and_then(Value::as_str),
            arguments.get("materials").and_then(Value::as_str),
        ) else {
            return Ok(ToolResult::error("missing required argument: query or materials"));
        };

        if let Err(reason) = self
            .billing
            .check(&ctx.identity.api_key_hash, PRICE_TAG, "extract_key_info")
            .await
        {
            return Ok(ToolResult::error(format!("billing check failed: {reason}")));
        }

        match self.backend.extract(query, materials).await {
            Ok(contexts) => Ok(ToolResult::ok_structured(json!({ "contexts": contexts }))),
            Err(e) => Ok(ToolResult::error(e.to_string())),
        }
    }
}
