//! Per-session authorization cache (part of C5).
//!
//! MCP sessions are identified by a session-id header emitted by the
//! framer. Whenever a request bearing both a session id and a parseable
//! `Authorization` comes through, the resulting identity is cached here so
//! that later requests on the same session — which may omit the header
//! entirely — can still be attributed for C6's `tools/list` filtering.

use crate::auth::CachedIdentity;
use dashmap::DashMap;

#[derive(Default)]
pub struct SessionCache {
    sessions: DashMap<String, CachedIdentity>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remember(&self, session_id: impl Into<String>, identity: CachedIdentity) {
        self.sessions.insert(session_id.into(), identity);
    }

    pub fn get(&self, session_id: &str) -> Option<CachedIdentity> {
        self.sessions.get(session_id).map(|e| e.value().clone())
    }

    /// Removed on session unregister (the framer's lifecycle hook).
    pub fn forget(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(hash: &str) -> CachedIdentity {
        CachedIdentity {
            api_key_hash: hash.to_string(),
            key_suffix: "abcd".to_string(),
            user_identity: format!("user_{hash}"),
        }
    }

    #[test]
    fn remember_then_get_round_trips() {
        let cache = SessionCache::new();
        cache.remember("sess-1", identity("h1"));
        let found = cache.get("sess-1").unwrap();
        assert_eq!(found.api_key_hash, "h1");
    }

    #[test]
    fn unknown_session_returns_none() {
        let cache = SessionCache::new();
        assert!(cache.get("missing").is_none());
    }

    #[test]
    fn forget_removes_entry() {
        let cache = SessionCache::new();
        cache.remember("sess-1", identity("h1"));
        cache.forget("sess-1");
        assert!(cache.get("sess-1").is_none());
    }
}
