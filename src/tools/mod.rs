//! Tools module (C9).
//!
//! Each submodule implements one MCP tool as a thin `ToolHandler` adapter
//! over a collaborator trait from `collaborators`. `register_all` wires
//! every tool into the registry at boot — an unavailable dependency simply
//! means the corresponding `register` call is skipped, so the server
//! degrades gracefully rather than failing to start.

pub mod collaborators;
pub mod extract_key_info;
pub mod file_ops;
pub mod get_user_request;
pub mod mcp_pipe;
pub mod memory;
pub mod web_fetch;
pub mod web_search;

use std::sync::Arc;

use crate::core::config::Config;
use crate::core::hold::HoldBroker;
use crate::core::preferences::PreferencesService;
use crate::core::registry::{RegistryHandle, ToolRegistry};
use crate::recorder::CallRecorder;

use collaborators::{
    AlwaysAllowBilling, InMemoryTurnMemory, LocalProjectFiles, NaiveExtractionBackend, StubFetchBackend,
    StubSearchBackend,
};
use extract_key_info::ExtractKeyInfoTool;
use file_ops::{FileListTool, FileReadTool, FileSearchTool, FileWriteTool};
use get_user_request::GetUserRequestTool;
use mcp_pipe::McpPipeTool;
use memory::{MemoryAfterTurnTool, MemoryBeforeTurnTool, MemoryListDirWithAbstractTool};
use web_fetch::WebFetchTool;
use web_search::WebSearchTool;

const DEFAULT_PROJECT_ROOT: &str = "./data/projects";

/// Registers every concrete tool this gateway ships with its local
/// stand-in collaborator, then finalizes the registry handle `mcp_pipe`
/// uses to re-enter dispatch on itself.
pub fn register_all(
    registry: &mut ToolRegistry,
    config: &Config,
    recorder: Arc<CallRecorder>,
    hold_broker: Arc<HoldBroker>,
    preferences: Arc<dyn PreferencesService>,
) -> Arc<RegistryHandle> {
    let billing = Arc::new(AlwaysAllowBilling);
    registry.register(Arc::new(WebSearchTool::new(Arc::new(StubSearchBackend), billing.clone())));
    registry.register(Arc::new(WebFetchTool::new(Arc::new(StubFetchBackend), billing.clone())));
    registry.register(Arc::new(ExtractKeyInfoTool::new(Arc::new(NaiveExtractionBackend), billing)));

    let project_root = config
        .tool_config("file_read")
        .get("project_root")
        .and_then(|v| v.as_str())
        .unwrap_or(DEFAULT_PROJECT_ROOT)
        .to_string();
    let files: Arc<dyn collaborators::ProjectFiles> = Arc::new(LocalProjectFiles::new(project_root));
    registry.register(Arc::new(FileReadTool::new(files.clone())));
    registry.register(Arc::new(FileWriteTool::new(files.clone())));
    registry.register(Arc::new(FileSearchTool::new(files.clone())));
    registry.register(Arc::new(FileListTool::new(files)));

    let memory: Arc<dyn collaborators::TurnMemory> = Arc::new(InMemoryTurnMemory::new());
    registry.register(Arc::new(MemoryBeforeTurnTool::new(memory.clone())));
    registry.register(Arc::new(MemoryAfterTurnTool::new(memory.clone())));
    registry.register(Arc::new(MemoryListDirWithAbstractTool::new(memory)));

    registry.register(Arc::new(GetUserRequestTool::new(hold_broker, preferences)));

    let registry_handle = Arc::new(RegistryHandle::new());
    registry.register(Arc::new(McpPipeTool::new(
        registry_handle.clone(),
        recorder,
        config.pipeline.clone(),
    )));

    registry_handle
}
