//! Collaborator traits for C9 tool handlers and their local stand-ins.
//!
//! Every real backend here (search index, web fetcher, extraction model,
//! document store, memory store, billing ledger) is out of core scope. Each
//! trait gets one local/in-memory implementation so the gateway is runnable
//! standalone, matching the one-stand-in-per-collaborator approach the
//! component design calls for.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, CoreError>;
}

/// Deterministic stand-in: synthesizes a single hit describing the query
/// rather than calling out to a real search index.
pub struct StubSearchBackend;

#[async_trait]
impl SearchBackend for StubSearchBackend {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, CoreError> {
        if query.trim().is_empty() {
            return Err(CoreError::Validation("query must not be empty".to_string()));
        }
        Ok(vec![SearchHit {
            title: format!("Local result for \"{query}\""),
            url: "about:blank".to_string(),
            snippet: format!("No external search backend is configured; echoing query: {query}"),
        }])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedPage {
    pub url: String,
    pub status: u16,
    pub content: String,
}

#[async_trait]
pub trait FetchBackend: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, CoreError>;
}

pub struct StubFetchBackend;

#[async_trait]
impl FetchBackend for StubFetchBackend {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, CoreError> {
        if url.trim().is_empty() {
            return Err(CoreError::Validation("url must not be empty".to_string()));
        }
        Ok(FetchedPage {
            url: url.to_string(),
            status: 200,
            content: format!("No external fetch backend is configured; requested {url}"),
        })
    }
}

#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    async fn extract(&self, query: &str, materials: &str) -> Result<Vec<String>, CoreError>;
}

/// Stand-in extractor: splits `materials` on blank lines and keeps the
/// segments that share a word with `query`, case-insensitively.
pub struct NaiveExtractionBackend;

#[async_trait]
impl ExtractionBackend for NaiveExtractionBackend {
    async fn extract(&self, query: &str, materials: &str) -> Result<Vec<String>, CoreError> {
        let query_words: Vec<String> = query.to_lowercase().split_whitespace().map(str::to_string).collect();
        if query_words.is_empty() {
            return Err(CoreError::Validation("query must not be empty".to_string()));
        }
        let contexts: Vec<String> = materials
            .split("\n\n")
            .filter(|segment| {
                let lower = segment.to_lowercase();
                query_words.iter().any(|w| lower.contains(w.as_str()))
            })
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        Ok(contexts)
    }
}

/// Always-allow billing checker. Charge-bearing handlers still go through
/// this seam so a real ledger can be swapped in without touching handler
/// code. A denial is a plain reason string, not a `CoreError`: it surfaces
/// as the in-protocol message `"billing check failed: <reason>"`, never as
/// a transport fault.
#[async_trait]
pub trait BillingChecker: Send + Sync {
    async fn check(&self, api_key_hash: &str, price_tag: u64, reason: &str) -> Result<(), String>;
}

pub struct AlwaysAllowBilling;

#[async_trait]
impl BillingChecker for AlwaysAllowBilling {
    async fn check(&self, _api_key_hash: &str, _price_tag: u64, _reason: &str) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub is_dir: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ListResult {
    pub entries: Vec<FileEntry>,
    pub has_more: bool,
}

/// Sandboxed per-project local filesystem, standing in for the out-of-scope
/// document store. `project` selects a subdirectory under `root`; every
/// path is resolved and checked to stay within it before any I/O.
#[async_trait]
pub trait ProjectFiles: Send + Sync {
    async fn read(&self, project: &str, path: &str) -> Result<String, CoreError>;
    async fn write(&self, project: &str, path: &str, content: &str) -> Result<(), CoreError>;
    async fn search(&self, project: &str, path: &str, query: &str) -> Result<Vec<String>, CoreError>;
    async fn list(&self, project: &str, path: &str) -> Result<ListResult, CoreError>;
}

pub struct LocalProjectFiles {
    root: PathBuf,
}

impl LocalProjectFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolves `project/path` against `root`, rejecting any `..` segment
    /// or absolute override so a caller cannot escape the sandbox.
    fn resolve(&self, project: &str, path: &str) -> Result<PathBuf, CoreError> {
        let mut resolved = self.root.join(project);
        let normalized_path = path.trim_start_matches('/');
        for component in Path::new(normalized_path).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(CoreError::Validation(format!("path escapes project sandbox: {path}")));
                }
            }
        }
        Ok(resolved)
    }
}

#[async_trait]
impl ProjectFiles for LocalProjectFiles {
    async fn read(&self, project: &str, path: &str) -> Result<String, CoreError> {
        let full = self.resolve(project, path)?;
        tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| CoreError::Downstream(format!("read {path}: {e}")))
    }

    async fn write(&self, project: &str, path: &str, content: &str) -> Result<(), CoreError> {
        let full = self.resolve(project, path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::Downstream(format!("create dirs for {path}: {e}")))?;
        }
        tokio::fs::write(&full, content)
            .await
            .map_err(|e| CoreError::Downstream(format!("write {path}: {e}")))
    }

    async fn search(&self, project: &str, path: &str, query: &str) -> Result<Vec<String>, CoreError> {
        let full = self.resolve(project, path)?;
        let content = tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| CoreError::Downstream(format!("search {path}: {e}")))?;
        Ok(content
            .lines()
            .filter(|line| line.contains(query))
            .map(str::to_string)
            .collect())
    }

    async fn list(&self, project: &str, path: &str) -> Result<ListResult, CoreError> {
        let normalized = if path.trim() == "/" { "" } else { path };
        let full = self.resolve(project, normalized)?;
        let mut read_dir = match tokio::fs::read_dir(&full).await {
            Ok(rd) => rd,
            Err(_) => return Ok(ListResult::default()),
        };
        let mut entries = Vec::new();
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            let file_type = entry.file_type().await.map_err(|e| CoreError::Downstream(e.to_string()))?;
            entries.push(FileEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                is_dir: file_type.is_dir(),
            });
        }
        Ok(ListResult {
            entries,
            has_more: false,
        })
    }
}

/// Turn-scoped agent memory, standing in for the out-of-scope memory store.
/// Keyed by `(project, session_id)`.
#[async_trait]
pub trait TurnMemory: Send + Sync {
    async fn before_turn(&self, project: &str, session_id: &str, max_input_tok: u32) -> Result<serde_json::Value, CoreError>;
    async fn after_turn(
        &self,
        project: &str,
        session_id: &str,
        turn_id: &str,
        current_input: serde_json::Value,
        input_items: serde_json::Value,
        output_items: serde_json::Value,
    ) -> Result<(), CoreError>;
    async fn list_dir_with_abstract(
        &self,
        project: &str,
        session_id: &str,
        depth: u32,
        limit: u32,
    ) -> Result<serde_json::Value, CoreError>;
}

#[derive(Default, Clone)]
struct MemoryTurn {
    turn_id: String,
    current_input: serde_json::Value,
    input_items: serde_json::Value,
    output_items: serde_json::Value,
}

#[derive(Default)]
pub struct InMemoryTurnMemory {
    turns: Mutex<HashMap<(String, String), Vec<MemoryTurn>>>,
}

impl InMemoryTurnMemory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TurnMemory for InMemoryTurnMemory {
    async fn before_turn(&self, project: &str, session_id: &str, max_input_tok: u32) -> Result<serde_json::Value, CoreError> {
        let turns = self.turns.lock();
        let history = turns
            .get(&(project.to_string(), session_id.to_string()))
            .cloned()
            .unwrap_or_default();
        Ok(serde_json::json!({
            "max_input_tok": max_input_tok,
            "turn_count": history.len(),
            "last_turn_id": history.last().map(|t| t.turn_id.clone()),
        }))
    }

    async fn after_turn(
        &self,
        project: &str,
        session_id: &str,
        turn_id: &str,
        current_input: serde_json::Value,
        input_items: serde_json::Value,
        output_items: serde_json::Value,
    ) -> Result<(), CoreError> {
        let mut turns = self.turns.lock();
        turns
            .entry((project.to_string(), session_id.to_string()))
            .or_default()
            .push(MemoryTurn {
                turn_id: turn_id.to_string(),
                current_input,
                input_items,
                output_items,
            });
        Ok(())
    }

    async fn list_dir_with_abstract(
        &self,
        project: &str,
        session_id: &str,
        depth: u32,
        limit: u32,
    ) -> Result<serde_json::Value, CoreError> {
        let turns = self.turns.lock();
        let history = turns
            .get(&(project.to_string(), session_id.to_string()))
            .cloned()
            .unwrap_or_default();
        let entries: Vec<_> = history.iter().rev().take(limit as usize).map(|t| t.turn_id.clone()).collect();
        Ok(serde_json::json!({ "depth": depth, "limit": limit, "turns": entries }))
    }
}
