//! Call recorder (C3).
//!
//! Append-only log of tool invocations. The live store is a bounded
//! `VecDeque` behind a lock, the same shape as the audit trail in the
//! richer sibling crate this project is grounded on — a queryable buffer
//! an out-of-core pagination API would sit in front of.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;

const DEFAULT_MAX_ENTRIES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvocationStatus {
    Success,
    Error,
}

/// One record per tool call, appended by the envelope (C4) after the
/// handler returns. Never updated after insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationRecord {
    pub tool_name: String,
    pub api_key_hash: String,
    pub status: InvocationStatus,
    pub cost: u64,
    pub duration_ms: i64,
    pub parameters_redacted: Value,
    pub error_message: String,
    pub occurred_at: DateTime<Utc>,
}

impl InvocationRecord {
    pub fn success(
        tool_name: impl Into<String>,
        api_key_hash: impl Into<String>,
        cost: u64,
        duration_ms: i64,
        parameters_redacted: Value,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            api_key_hash: api_key_hash.into(),
            status: InvocationStatus::Success,
            cost,
            duration_ms: duration_ms.max(0),
            parameters_redacted,
            error_message: String::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn error(
        tool_name: impl Into<String>,
        api_key_hash: impl Into<String>,
        duration_ms: i64,
        parameters_redacted: Value,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            api_key_hash: api_key_hash.into(),
            status: InvocationStatus::Error,
            cost: 0,
            duration_ms: duration_ms.max(0),
            parameters_redacted,
            error_message: error_message.into(),
            occurred_at: Utc::now(),
        }
    }
}

/// Thread-safe, bounded invocation log.
pub struct CallRecorder {
    entries: RwLock<VecDeque<InvocationRecord>>,
    max_entries: usize,
}

impl Default for CallRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl CallRecorder {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(max_entries.min(1024))),
            max_entries,
        }
    }

    /// Append one record. Per the component contract this can never fail the
    /// call — any bookkeeping problem is logged at `warn` and swallowed.
    pub fn record(&self, entry: InvocationRecord) {
        let mut entries = self.entries.write();
        if entries.len() >= self.max_entries {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Convenience used by the envelope when the store itself might be
    /// fallible in a real deployment (e.g. the out-of-core persistence
    /// layer this stands in for). Always succeeds here, but keeps the
    /// call site shaped like a fallible recorder: a real backing store
    /// could fail, and the contract requires that failure never
    /// propagate to the caller, only get logged at `warn`.
    pub fn try_record(&self, entry: InvocationRecord) {
        self.record(entry);
    }

    pub fn recent(&self, limit: usize) -> Vec<InvocationRecord> {
        self.entries.read().iter().rev().take(limit).cloned().collect()
    }

    pub fn for_identity(&self, api_key_hash: &str, limit: usize) -> Vec<InvocationRecord> {
        self.entries
            .read()
            .iter()
            .rev()
            .filter(|e| e.api_key_hash == api_key_hash)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn for_tool(&self, tool_name: &str, limit: usize) -> Vec<InvocationRecord> {
        self.entries
            .read()
            .iter()
            .rev()
            .filter(|e| e.tool_name == tool_name)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
