//! `web_search` — charge-bearing adapter over `SearchBackend`.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::context::RequestContext;
use crate::core::annotations::ToolAnnotations;
use crate::core::registry::{ToolDescriptor, ToolHandler, ToolResult};
use crate::error::CoreError;
use crate::tools::collaborators::{BillingChecker, SearchBackend};

const PRICE_TAG: u64 = 1;

pub struct WebSearchTool {
    backend: Arc<dyn SearchBackend>,
    billing: Arc<dyn BillingChecker>,
}

impl WebSearchTool {
    pub fn new(backend: Arc<dyn SearchBackend>, billing: Arc<dyn BillingChecker>) -> Self {
        Self { backend, billing }
    }
}

#[async_trait]
impl ToolHandler for WebSearchTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "web_search".to_string(),
            description: "Search the web for a query and return ranked hits.".to_string(),
            schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Search query"}
                },
                "required": ["query"]
            }),
            annotations: ToolAnnotations::read_only(),
            base_cost: PRICE_TAG,
        }
    }

    async fn handle(&self, ctx: &RequestContext, arguments: Value) -> Result<ToolResult, CoreError> {
        if !ctx.identity.is_authenticated() {
            return Ok(ToolResult::error(CoreError::MissingAuthorization.to_string()));
        }

        let Some(query) = arguments.get("query").and_then(Value::as_str) else {
            return Ok(ToolResult::error("missing required argument: query"));
        };

        if let Err(reason) = self
            .billing
            .check(&ctx.identity.api_key_hash, PRICE_TAG, "web_search")
            .await
        {
            return Ok(ToolResult::error(format!("billing check failed: {reason}")));
        }

        match self.backend.search(query).await {
            Ok(hits) => Ok(ToolResult::ok_structured(json!({ "hits": hits }))),
            Err(e) => Ok(ToolResult::error(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::IdentityContext;
    use crate::tools::collaborators::{AlwaysAllowBilling, BillingChecker, StubSearchBackend};

    struct DenyingBilling;

    #[async_trait]
    impl BillingChecker for DenyingBilling {
        async fn check(&self, _api_key_hash: &str, _price_tag: u64, _reason: &str) -> Result<(), String> {
            Err("quota exceeded".to_string())
        }
    }

    fn authenticated_ctx() -> RequestContext {
        let (identity, _, _) = crate::auth::resolve_identity(Some("Bearer key"), "").unwrap();
        RequestContext::new("req", identity)
    }

    #[tokio::test]
    async fn missing_query_is_an_in_protocol_error() {
        let tool = WebSearchTool::new(Arc::new(StubSearchBackend), Arc::new(AlwaysAllowBilling));
        let result = tool.handle(&authenticated_ctx(), json!({})).await.unwrap();
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn missing_identity_is_an_in_protocol_error() {
        let tool = WebSearchTool::new(Arc::new(StubSearchBackend), Arc::new(AlwaysAllowBilling));
        let ctx = RequestContext::new("req", IdentityContext::anonymous());
        let result = tool.handle(&ctx, json!({"query": "rust"})).await.unwrap();
        assert!(result.is_error);
        assert_eq!(result.text, "missing authorization bearer token");
    }

    #[tokio::test]
    async fn billing_denial_is_an_in_protocol_error() {
        let tool = WebSearchTool::new(Arc::new(StubSearchBackend), Arc::new(DenyingBilling));
        let result = tool.handle(&authenticated_ctx(), json!({"query": "rust"})).await.unwrap();
        assert!(result.is_error);
        assert_eq!(result.text, "billing check failed: quota exceeded");
    }

    #[tokio::test]
    async fn successful_search_returns_hits() {
        let tool = WebSearchTool::new(Arc::new(StubSearchBackend), Arc::new(AlwaysAllowBilling));
        let result = tool.handle(&authenticated_ctx(), json!({"query": "rust"})).await.unwrap();
        assert!(!result.is_error);
        assert!(result.structured.unwrap()["hits"].as_array().unwrap().len() >= 1);
    }
}
