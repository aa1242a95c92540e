//! Preferences service interface (C10).
//!
//! The real store is the out-of-scope relational preferences table; this is
//! the in-process concurrent-map stand-in behind the same `PreferencesService`
//! trait, shared by C6's `tools/list` filtering and C9's `get_user_request`.

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Preferences {
    pub return_mode: String,
    pub disabled_tools: Vec<String>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            return_mode: "all".to_string(),
            disabled_tools: Vec::new(),
        }
    }
}

#[async_trait]
pub trait PreferencesService: Send + Sync {
    async fn get_disabled_tools(&self, identity: &str) -> Vec<String>;
    async fn get_return_mode(&self, identity: &str) -> String;
    async fn set_return_mode(&self, identity: &str, mode: String);
    async fn set_disabled_tools(&self, identity: &str, tools: Vec<String>);
}

#[derive(Default)]
pub struct InMemoryPreferences {
    store: DashMap<String, Preferences>,
}

impl InMemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PreferencesService for InMemoryPreferences {
    async fn get_disabled_tools(&self, identity: &str) -> Vec<String> {
        self.store
            .get(identity)
            .map(|p| p.disabled_tools.clone())
            .unwrap_or_default()
    }

    async fn get_return_mode(&self, identity: &str) -> String {
        self.store
            .get(identity)
            .map(|p| p.return_mode.clone())
            .unwrap_or_else(|| {
                warn!(identity, "no preferences on record, defaulting return_mode to all");
                "all".to_string()
            })
    }

    async fn set_return_mode(&self, identity: &str, mode: String) {
        self.store.entry(identity.to_string()).or_default().return_mode = mode;
    }

    async fn set_disabled_tools(&self, identity: &str, tools: Vec<String>) {
        self.store.entry(identity.to_string()).or_default().disabled_tools = tools;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_identity_gets_defaults() {
        let prefs = InMemoryPreferences::new();
        assert_eq!(prefs.get_return_mode("user_abc").await, "all");
        assert!(prefs.get_disabled_tools("user_abc").await.is_empty());
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let prefs = InMemoryPreferences::new();
        prefs
            .set_disabled_tools("user_abc", vec!["web_fetch".to_string()])
            .await;
        prefs.set_return_mode("user_abc", "first".to_string()).await;
        assert_eq!(prefs.get_return_mode("user_abc").await, "first");
        assert_eq!(prefs.get_disabled_tools("user_abc").await, vec!["web_fetch"]);
    }
}
