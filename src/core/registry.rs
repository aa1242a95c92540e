//! Tool registry and dispatch envelope (C4).
//!
//! The registry is a process-wide, read-only-after-boot mapping from tool
//! name to descriptor and handler. `dispatch` is the uniform envelope every
//! `tools/call` passes through: availability check, handler invocation
//! (panic-isolated), duration/status accounting, redaction, and recording.
//! Handlers never touch the recorder directly — this is the only place
//! auditing happens.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::info;

use crate::context::RequestContext;
use crate::core::annotations::ToolAnnotations;
use crate::error::CoreError;
use crate::recorder::{CallRecorder, InvocationRecord};
use crate::redact::redact;

/// One per registered tool. Immutable after boot.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub schema: Value,
    pub annotations: ToolAnnotations,
    pub base_cost: u64,
}

/// The outcome a handler hands back to the envelope. `is_error` carries the
/// in-protocol failure channel described by the component design: a failed
/// validation or downstream call is still a `ToolResult`, not a transport
/// error, so the envelope can record and return it uniformly.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub is_error: bool,
    pub text: String,
    pub structured: Option<Value>,
}

impl ToolResult {
    pub fn ok_text(text: impl Into<String>) -> Self {
        Self {
            is_error: false,
            text: text.into(),
            structured: None,
        }
    }

    pub fn ok_structured(value: Value) -> Self {
        Self {
            is_error: false,
            text: value.to_string(),
            structured: Some(value),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            is_error: true,
            text: text.into(),
            structured: None,
        }
    }
}

/// `{Definition(), Handle(ctx, req)}` capability set: one implementation
/// per tool, wired into the registry at boot.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn descriptor(&self) -> ToolDescriptor;

    async fn handle(&self, ctx: &RequestContext, arguments: Value) -> Result<ToolResult, CoreError>;
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    handler: Arc<dyn ToolHandler>,
}

/// What the envelope hands back to the caller (C5/C8). `TransportError`
/// models a handler-level `Err` that must propagate at the framer level in
/// addition to being auditable — distinct from an in-protocol `ToolResult`
/// whose `is_error` flag is the normal failure channel.
pub enum DispatchOutcome {
    Result(ToolResult),
    TransportError { message: String },
}

impl DispatchOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, DispatchOutcome::Result(r) if !r.is_error)
    }
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. An unavailable dependency simply means the
    /// caller never invokes this method for that tool — the server degrades
    /// gracefully by omitting it from `tools/list`.
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        let descriptor = handler.descriptor();
        let name = descriptor.name.clone();
        info!(tool = %name, "registered tool");
        self.tools.insert(name, RegisteredTool { descriptor, handler });
    }

    pub fn get_descriptor(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name).map(|t| &t.descriptor)
    }

    pub fn descriptors(&self) -> Vec<&ToolDescriptor> {
        self.tools.values().map(|t| &t.descriptor).collect()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// The uniform dispatch envelope for one `tools/call`. Never panics the
    /// caller: a handler panic is isolated via `tokio::spawn` and turned
    /// into a transport error.
    pub async fn dispatch(
        &self,
        ctx: &RequestContext,
        recorder: &CallRecorder,
        tool_name: &str,
        arguments: Value,
    ) -> DispatchOutcome {
        let start = Utc::now();
        let api_key_hash = ctx.identity.api_key_hash.clone();

        let Some(tool) = self.tools.get(tool_name) else {
            let message = format!("{tool_name} tool is not available");
            let duration_ms = (Utc::now() - start).num_milliseconds().max(0);
            recorder.try_record(InvocationRecord::error(
                tool_name,
                api_key_hash,
                duration_ms,
                redact(tool_name, arguments),
                message.clone(),
            ));
            return DispatchOutcome::Result(ToolResult::error(message));
        };

        let handler = tool.handler.clone();
        let base_cost = tool.descriptor.base_cost;
        let task_ctx = ctx.clone();
        let task_args = arguments.clone();

        let outcome = tokio::spawn(async move { handler.handle(&task_ctx, task_args).await }).await;

        let duration_ms = (Utc::now() - start).num_milliseconds().max(0);
        let parameters_redacted = redact(tool_name, arguments);

        let (tool_result, transport_error) = match outcome {
            Ok(Ok(result)) => (result, None),
            Ok(Err(core_error)) => {
                (ToolResult::error(core_error.user_message()), Some(core_error.to_string()))
            }
            Err(join_error) => (
                ToolResult::error(format!("{tool_name} handler panicked")),
                Some(join_error.to_string()),
            ),
        };

        let success = transport_error.is_none() && !tool_result.is_error;
        let cost = if success { base_cost } else { 0 };
        let error_message = match (&transport_error, tool_result.is_error) {
            (Some(t), true) => format!("{} | {}", tool_result.text.trim(), t.trim()),
            (Some(t), false) => t.trim().to_string(),
            (None, true) => tool_result.text.trim().to_string(),
            (None, false) => String::new(),
        };

        if success {
            recorder.try_record(InvocationRecord::success(
                tool_name,
                api_key_hash,
                cost,
                duration_ms,
                parameters_redacted,
            ));
        } else {
            recorder.try_record(InvocationRecord::error(
                tool_name,
                api_key_hash,
                duration_ms,
                parameters_redacted,
                error_message,
            ));
        }

        match transport_error {
            Some(message) => DispatchOutcome::TransportError { message },
            None => DispatchOutcome::Result(tool_result),
        }
    }
}

/// A once-initialized handle to the fully-built registry. The pipeline
/// orchestrator tool (`mcp_pipe`) needs to re-enter `dispatch` on the same
/// registry it is itself registered in, which cannot hold an `Arc` to
/// itself before construction finishes — this cell is filled in
/// immediately after `Arc::new(registry)`, before the first request is
/// served, and read on every `mcp_pipe` invocation thereafter.
#[derive(Default)]
pub struct RegistryHandle(OnceLock<Arc<ToolRegistry>>);

impl RegistryHandle {
    pub fn new() -> Self {
        Self(OnceLock::new())
    }

    pub fn set(&self, registry: Arc<ToolRegistry>) {
        let _ = self.0.set(registry);
    }

    pub fn get(&self) -> &ToolRegistry {
        self.0
            .get()
            .expect("registry handle read before initialization")
            .as_ref()
    }
}
