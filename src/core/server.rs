//! MCP server transport (C5).
//!
//! HTTP and STDIO framing around the JSON-RPC 2.0 methods `initialize`,
//! `tools/list`, and `tools/call`. This is the only layer that parses wire
//! bytes; everything downstream works with already-decoded values. The
//! authorization header (C1) is resolved here, `tools/list` responses are
//! filtered by C6, and every `tools/call` is dispatched through C4's
//! envelope.

use actix_web::{
    middleware::{Compress, DefaultHeaders, Logger},
    web, App, HttpRequest, HttpResponse, HttpServer,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::resolve_identity;
use crate::context::RequestContext;
use crate::core::config::Config;
use crate::core::hold::HoldBroker;
use crate::core::preferences::PreferencesService;
use crate::core::registry::{DispatchOutcome, ToolRegistry};
use crate::core::session::SessionCache;
use crate::core::tools_list_filter::filter_tools_list_response;
use crate::recorder::CallRecorder;
use crate::redact::redact;

const SESSION_HEADER: &str = "mcp-session-id";
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Application state shared across all worker threads in HTTP mode, and
/// the equivalent bundle passed by reference in STDIO mode.
pub struct AppState {
    pub server_name: String,
    pub server_version: String,
    pub registry: Arc<ToolRegistry>,
    pub recorder: Arc<CallRecorder>,
    pub sessions: SessionCache,
    pub preferences: Arc<dyn PreferencesService>,
    pub hold_broker: Arc<HoldBroker>,
    pub body_log_cap_bytes: usize,
}

#[derive(Deserialize, Debug, Clone)]
pub struct MCPRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    id: Option<Value>,
    method: String,
    params: Option<Value>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct MCPResponse {
    jsonrpc: String,
    id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<MCPError>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct MCPError {
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl MCPResponse {
    fn ok(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(MCPError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

fn handle_initialize(state: &AppState, id: Option<Value>) -> MCPResponse {
    MCPResponse::ok(
        id,
        serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "serverInfo": {
                "name": state.server_name,
                "version": state.server_version,
            }
        }),
    )
}

fn tools_list_body(state: &AppState, id: Option<Value>) -> Value {
    let tools: Vec<Value> = state
        .registry
        .descriptors()
        .into_iter()
        .map(|d| {
            serde_json::json!({
                "name": d.name,
                "description": d.description,
                "inputSchema": d.schema,
                "annotations": d.annotations,
            })
        })
        .collect();

    serde_json::to_value(MCPResponse::ok(id, serde_json::json!({ "tools": tools })))
        .unwrap_or(Value::Null)
}

async fn handle_tools_list(
    state: &AppState,
    identity: Option<&crate::auth::IdentityContext>,
    session_id: Option<&str>,
    id: Option<Value>,
) -> Value {
    let body = tools_list_body(state, id);

    let effective_identity = match identity {
        Some(i) if i.is_authenticated() => Some(i.clone()),
        _ => session_id.and_then(|sid| {
            state.sessions.get(sid).map(|cached| crate::auth::IdentityContext {
                api_key: None,
                api_key_hash: cached.api_key_hash,
                key_suffix: cached.key_suffix,
                user_identity: cached.user_identity,
            })
        }),
    };

    filter_tools_list_response(body, effective_identity.as_ref(), state.preferences.as_ref()).await
}

async fn handle_tools_call(state: &AppState, ctx: &RequestContext, id: Option<Value>, params: Option<Value>) -> MCPResponse {
    let Some(params) = params else {
        return MCPResponse::err(id, -32602, "Invalid params");
    };

    let tool_name = params.get("name").and_then(Value::as_str).unwrap_or("");
    let arguments = params.get("arguments").cloned().unwrap_or_else(|| serde_json::json!({}));

    let outcome = state
        .registry
        .dispatch(ctx, &state.recorder, tool_name, arguments)
        .await;

    match outcome {
        DispatchOutcome::Result(r) => MCPResponse::ok(
            id,
            serde_json::json!({
                "content": [{"type": "text", "text": r.text}],
                "structuredContent": r.structured,
                "isError": r.is_error,
            }),
        ),
        DispatchOutcome::TransportError { message } => MCPResponse::err(id, -32000, message),
    }
}

fn method_not_found(id: Option<Value>, method: &str) -> MCPResponse {
    MCPResponse::err(id, -32601, format!("Method not found: {method}"))
}

fn body_log_preview(method: &str, params: &Option<Value>, cap: usize) -> String {
    let tool_name = params
        .as_ref()
        .and_then(|p| p.get("name"))
        .and_then(Value::as_str)
        .unwrap_or(method);
    let redacted = redact(tool_name, params.clone().unwrap_or(Value::Null));
    let mut text = redacted.to_string();
    if text.len() > cap {
        text.truncate(cap);
        text.push_str("...(truncated)");
    }
    text
}

async fn mcp_handler(http_req: HttpRequest, state: web::Data<Arc<AppState>>, body: web::Bytes) -> HttpResponse {
    let started = std::time::Instant::now();
    let remote_addr = http_req.peer_addr().map(|a| a.to_string()).unwrap_or_default();

    let auth_header = http_req
        .headers()
        .get(actix_web::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let session_id = http_req
        .headers()
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let identity = match resolve_identity(auth_header, http_req.query_string()) {
        Ok((identity, _source, _reinsert)) => identity,
        Err(message) => {
            warn!(%message, "rejected malformed authorization");
            return HttpResponse::Unauthorized().json(serde_json::json!({ "error": message }));
        }
    };

    if let (Some(sid), true) = (&session_id, identity.is_authenticated()) {
        state.sessions.remember(sid.clone(), identity.cacheable());
    }

    let parsed: Result<MCPRequest, _> = serde_json::from_slice(&body);
    let req = match parsed {
        Ok(r) => r,
        Err(e) => {
            return HttpResponse::Ok().json(MCPResponse::err(None, -32700, format!("Parse error: {e}")));
        }
    };

    let ctx = RequestContext::new(format!("req-{}", Uuid::new_v4()), identity.clone());

    let response_value = match req.method.as_str() {
        "initialize" => serde_json::to_value(handle_initialize(&state, req.id.clone())).unwrap_or(Value::Null),
        "tools/list" => handle_tools_list(&state, Some(&identity), session_id.as_deref(), req.id.clone()).await,
        "tools/call" => {
            serde_json::to_value(handle_tools_call(&state, &ctx, req.id.clone(), req.params.clone()).await)
                .unwrap_or(Value::Null)
        }
        other => serde_json::to_value(method_not_found(req.id.clone(), other)).unwrap_or(Value::Null),
    };

    let duration_ms = started.elapsed().as_millis() as u64;
    let body_preview = body_log_preview(&req.method, &req.params, state.body_log_cap_bytes);
    let had_error = response_value.get("error").is_some();
    info!(
        method = %req.method,
        status = if had_error { "error" } else { "ok" },
        duration_ms,
        session_present = session_id.is_some(),
        remote = %remote_addr,
        body = %body_preview,
        "mcp request"
    );

    HttpResponse::Ok().json(response_value)
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok", "service": "mcp-gateway" }))
}

async fn metrics_handler(state: web::Data<Arc<AppState>>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "invocations_total": state.recorder.len(),
        "sessions_cached": state.sessions.len(),
        "status": "ok",
    }))
}

/// Builds the shared application state: registers every concrete tool,
/// constructs the recorder/session cache/preferences singletons. Callers
/// own the resulting `Arc` and pass it to either transport.
pub fn build_app_state(config: &Config) -> Arc<AppState> {
    let preferences: Arc<dyn PreferencesService> = Arc::new(crate::core::preferences::InMemoryPreferences::new());
    let hold_broker = Arc::new(HoldBroker::new(config.hold_timeout_secs));
    let recorder = Arc::new(CallRecorder::new(config.recorder_capacity));

    let mut registry = ToolRegistry::new();
    let registry_handle = crate::tools::register_all(
        &mut registry,
        config,
        recorder.clone(),
        hold_broker.clone(),
        preferences.clone(),
    );
    let registry = Arc::new(registry);
    registry_handle.set(registry.clone());

    Arc::new(AppState {
        server_name: config.server_name.clone(),
        server_version: config.server_version.clone(),
        registry,
        recorder,
        sessions: SessionCache::new(),
        preferences,
        hold_broker,
        body_log_cap_bytes: config.body_log_cap_bytes,
    })
}

pub async fn run_server_http(state: Arc<AppState>, host: String, port: u16) -> std::io::Result<()> {
    use std::time::Duration;

    let bind_addr = format!("{host}:{port}");
    let app_data = web::Data::new(state.clone());

    let workers = std::env::var("WORKER_THREADS")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or_else(|| num_cpus::get().min(16).max(1));

    info!(name = %state.server_name, version = %state.server_version, %bind_addr, workers, "mcp gateway starting (http)");

    HttpServer::new(move || {
        App::new()
            .app_data(app_data.clone())
            .wrap(Compress::default())
            .wrap(
                DefaultHeaders::new()
                    .add(("X-Content-Type-Options", "nosniff"))
                    .add(("X-Frame-Options", "DENY"))
                    .add(("X-XSS-Protection", "1; mode=block")),
            )
            .wrap(Logger::new("%r %s %Dms"))
            .route("/health", web::get().to(health))
            .route("/metrics", web::get().to(metrics_handler))
            .route("/mcp", web::post().to(mcp_handler))
            .route("/", web::post().to(mcp_handler))
            .route("/", web::get().to(health))
    })
    .workers(workers)
    .max_connections(10_000)
    .max_connection_rate(1_000)
    .keep_alive(Duration::from_secs(30))
    .client_request_timeout(Duration::from_secs(30))
    .client_disconnect_timeout(Duration::from_secs(2))
    .shutdown_timeout(10)
    .bind(&bind_addr)?
    .run()
    .await
}

/// STDIO transport: one JSON-RPC request per line on stdin, one response
/// per line on stdout. Authorization still resolves from a bare
/// `Authorization`-shaped field in `params` if a caller supplies one;
/// STDIO sessions have no HTTP headers, so most callers run unauthenticated
/// unless the tool itself demands identity.
pub async fn run_server_stdio(state: Arc<AppState>) -> std::io::Result<()> {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};

    info!(name = %state.server_name, version = %state.server_version, "mcp gateway starting (stdio)");

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::with_capacity(8192, stdin).lines();
    let stdout = tokio::io::stdout();
    let mut stdout = BufWriter::with_capacity(8192, stdout);

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let parsed: Result<MCPRequest, _> = serde_json::from_str(&line);
        let req = match parsed {
            Ok(r) => r,
            Err(e) => {
                if let Ok(partial) = serde_json::from_str::<Value>(&line) {
                    if let Some(id) = partial.get("id") {
                        let response = MCPResponse::err(Some(id.clone()), -32700, format!("Parse error: {e}"));
                        write_stdio_response(&mut stdout, &response).await;
                    }
                }
                continue;
            }
        };

        if req.id.is_none() {
            continue;
        }

        let identity = crate::auth::IdentityContext::anonymous();
        let ctx = RequestContext::new(format!("req-{}", Uuid::new_v4()), identity.clone());

        let response = match req.method.as_str() {
            "initialize" => handle_initialize(&state, req.id.clone()),
            "tools/list" => {
                let value = handle_tools_list(&state, None, None, req.id.clone()).await;
                match serde_json::from_value::<MCPResponse>(value) {
                    Ok(r) => r,
                    Err(_) => MCPResponse::err(req.id.clone(), -32603, "internal error building tools/list"),
                }
            }
            "tools/call" => handle_tools_call(&state, &ctx, req.id.clone(), req.params.clone()).await,
            other => method_not_found(req.id.clone(), other),
        };

        write_stdio_response(&mut stdout, &response).await;
    }

    Ok(())
}

async fn write_stdio_response<W: tokio::io::AsyncWrite + Unpin>(out: &mut W, response: &MCPResponse) {
    use tokio::io::AsyncWriteExt;
    let json = match serde_json::to_string(response) {
        Ok(j) => j,
        Err(e) => {
            tracing::error!(%e, "failed to serialize stdio response");
            return;
        }
    };
    if out.write_all(json.as_bytes()).await.is_err() {
        return;
    }
    let _ = out.write_all(b"\n").await;
    let _ = out.flush().await;
}
