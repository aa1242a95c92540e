//! `get_user_request` — the ask-user tool. Wired directly to the hold
//! broker (C7) and the preferences service (C10): it first tries to drain
//! any commands already pending, then blocks on the broker only when a
//! human is actively typing (a "hold").

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::context::RequestContext;
use crate::core::annotations::ToolAnnotations;
use crate::core::hold::{HoldBroker, PendingCommand};
use crate::core::preferences::PreferencesService;
use crate::core::registry::{ToolDescriptor, ToolHandler, ToolResult};
use crate::error::CoreError;

const DEFAULT_TASK_ID: &str = "default";

fn command_to_json(c: &PendingCommand) -> Value {
    json!({
        "id": c.id,
        "content": c.content,
        "task_id": c.task_id,
        "created_at": c.created_at,
    })
}

pub struct GetUserRequestTool {
    broker: Arc<HoldBroker>,
    preferences: Arc<dyn PreferencesService>,
}

impl GetUserRequestTool {
    pub fn new(broker: Arc<HoldBroker>, preferences: Arc<dyn PreferencesService>) -> Self {
        Self { broker, preferences }
    }
}

#[async_trait]
impl ToolHandler for GetUserRequestTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "get_user_request".to_string(),
            description:
                "Pick up a human-posted command for this task, waiting briefly if a human is currently typing."
                    .to_string(),
            schema: json!({
                "type": "object",
                "properties": {
                    "task_id": {"type": "string", "description": "defaults to \"default\""}
                }
            }),
            annotations: ToolAnnotations::default().with_idempotent(false).with_open_world(false),
            base_cost: 0,
        }
    }

    async fn handle(&self, ctx: &RequestContext, arguments: Value) -> Result<ToolResult, CoreError> {
        if !ctx.identity.is_authenticated() {
            return Ok(ToolResult::error(CoreError::MissingAuthorization.to_string()));
        }

        let task_id = arguments
            .get("task_id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_TASK_ID);
        let api_key_hash = &ctx.identity.api_key_hash;

        // Agent-supplied return_mode overrides are ignored by design: only
        // the stored preference governs how many commands come back.
        let return_mode = self.preferences.get_return_mode(&ctx.identity.user_identity).await;
        let first_only = return_mode == "first";

        if self.broker.is_hold_active(api_key_hash, task_id) {
            let existing = if first_only {
                self.broker
                    .try_consume_one(api_key_hash, task_id)
                    .into_iter()
                    .collect::<Vec<_>>()
            } else {
                self.broker.try_consume_many(api_key_hash, task_id, usize::MAX)
            };
            if !existing.is_empty() {
                return Ok(ToolResult::ok_structured(json!({
                    "status": "answered",
                    "commands": existing.iter().map(command_to_json).collect::<Vec<_>>(),
                })));
            }

            let (command, timed_out) = self.broker.wait_for_command(ctx, api_key_hash, task_id).await;
            return Ok(match command {
                Some(c) => ToolResult::ok_structured(json!({
                    "status": "answered",
                    "commands": [command_to_json(&c)],
                })),
                None if timed_out => ToolResult::ok_structured(json!({
                    "status": "hold_timeout",
                    "message": format!("no command arrived while waiting for get_user_request (task {task_id}); a human appears to be typing"),
                })),
                None => ToolResult::ok_structured(json!({
                    "status": "empty",
                    "message": "get_user_request was cancelled before a command arrived",
                })),
            });
        }

        let consumed = if first_only {
            self.broker
                .try_consume_one(api_key_hash, task_id)
                .into_iter()
                .collect::<Vec<_>>()
        } else {
            self.broker.try_consume_many(api_key_hash, task_id, usize::MAX)
        };

        if consumed.is_empty() {
            return Ok(ToolResult::ok_structured(json!({
                "status": "empty",
                "message": format!("no pending commands for task {task_id}"),
            })));
        }

        Ok(ToolResult::ok_structured(json!({
            "status": "answered",
            "commands": consumed.iter().map(command_to_json).collect::<Vec<_>>(),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::preferences::InMemoryPreferences;

    fn authenticated_ctx() -> RequestContext {
        let (identity, _, _) = crate::auth::resolve_identity(Some("Bearer key"), "").unwrap();
        RequestContext::new("req", identity)
    }

    #[tokio::test]
    async fn empty_when_nothing_pending_and_no_hold() {
        let broker = Arc::new(HoldBroker::new(300));
        let prefs = Arc::new(InMemoryPreferences::new());
        let tool = GetUserRequestTool::new(broker, prefs);
        let result = tool.handle(&authenticated_ctx(), json!({})).await.unwrap();
        assert_eq!(result.structured.unwrap()["status"], "empty");
    }

    #[tokio::test]
    async fn returns_pending_command_without_waiting() {
        let broker = Arc::new(HoldBroker::new(300));
        let prefs = Arc::new(InMemoryPreferences::new());
        let ctx = authenticated_ctx();
        broker.post_command(&ctx.identity.api_key_hash, "default", &ctx.identity.user_identity, "hello");

        let tool = GetUserRequestTool::new(broker, prefs);
        let result = tool.handle(&ctx, json!({})).await.unwrap();
        let structured = result.structured.unwrap();
        assert_eq!(structured["status"], "answered");
        assert_eq!(structured["commands"][0]["content"], "hello");
    }

    #[tokio::test]
    async fn first_return_mode_caps_at_one_command() {
        let broker = Arc::new(HoldBroker::new(300));
        let prefs = Arc::new(InMemoryPreferences::new());
        let ctx = authenticated_ctx();
        broker.post_command(&ctx.identity.api_key_hash, "default", &ctx.identity.user_identity, "first");
        broker.post_command(&ctx.identity.api_key_hash, "default", &ctx.identity.user_identity, "second");
        prefs.set_return_mode(&ctx.identity.user_identity, "first".to_string()).await;

        let tool = GetUserRequestTool::new(broker, prefs);
        let result = tool.handle(&ctx, json!({})).await.unwrap();
        let structured = result.structured.unwrap();
        assert_eq!(structured["commands"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_identity_is_an_in_protocol_error() {
        let broker = Arc::new(HoldBroker::new(300));
        let prefs = Arc::new(InMemoryPreferences::new());
        let tool = GetUserRequestTool::new(broker, prefs);
        let ctx = RequestContext::new("req", crate::auth::IdentityContext::anonymous());
        let result = tool.handle(&ctx, json!({})).await.unwrap();
        assert!(result.is_error);
        assert_eq!(result.text, "missing authorization bearer token");
    }
}
