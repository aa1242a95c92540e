//! `web_fetch` — charge-bearing adapter over `FetchBackend`.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::context::RequestContext;
use crate::core::annotations::ToolAnnotations;
use crate::core::registry::{ToolDescriptor, ToolHandler, ToolResult};
use crate::error::CoreError;
use crate::tools::collaborators::{BillingChecker, FetchBackend};

const PRICE_TAG: u64 = 1;

pub struct WebFetchTool {
    backend: Arc<dyn FetchBackend>,
    billing: Arc<dyn BillingChecker>,
}

impl WebFetchTool {
    pub fn new(backend: Arc<dyn FetchBackend>, billing: Arc<dyn BillingChecker>) -> Self {
        Self { backend, billing }
    }
}

#[async_trait]
impl ToolHandler for WebFetchTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "web_fetch".to_string(),
            description: "Fetch a URL and return its rendered content.".to_string(),
            schema: json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string", "description": "URL to fetch"}
                },
                "required": ["url"]
            }),
            annotations: ToolAnnotations::read_only(),
            base_cost: PRICE_TAG,
        }
    }

    async fn handle(&self, ctx: &RequestContext, arguments: Value) -> Result<ToolResult, CoreError> {
        if !ctx.identity.is_authenticated() {
            return Ok(ToolResult::error(CoreError::MissingAuthorization.to_string()));
        }

        let Some(url) = arguments.get("url").and_then(Value::as_str) else {
            return Ok(ToolResult::error("missing required argument: url"));
        };

        if let Err(reason) = self
            .billing
            .check(&ctx.identity.api_key_hash, PRICE_TAG, "web_fetch")
            .await
        {
            return Ok(ToolResult::error(format!("billing check failed: {reason}")));
        }

        match self.backend.fetch(url).await {
            Ok(page) => Ok(ToolResult::ok_structured(json!(page))),
            Err(e) => Ok(ToolResult::error(e.to_string())),
        }
    }
}
