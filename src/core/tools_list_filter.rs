//! `tools/list` response filter (C6).
//!
//! Post-processes the framer's `tools/list` response body, dropping any
//! tool the caller has disabled. This is the single choke point for hiding
//! tools — the registry itself is never touched. Fails closed: if identity
//! cannot be derived at all, the response is filtered down to no tools
//! rather than left unfiltered.

use serde_json::Value;

use crate::auth::IdentityContext;
use crate::core::preferences::PreferencesService;

/// Filters the `result.tools` array of a `tools/list` response body in
/// place, dropping entries whose `name` is in `disabled_tools`. Returns the
/// number of entries removed.
fn filter_tools_array(tools: &mut Vec<Value>, disabled: &[String]) -> usize {
    let before = tools.len();
    tools.retain(|tool| {
        tool.get("name")
            .and_then(Value::as_str)
            .map(|name| !disabled.iter().any(|d| d == name))
            .unwrap_or(true)
    });
    before - tools.len()
}

/// Applies C6 to a full `tools/list` JSON-RPC response body. `identity` is
/// `None` when it could not be derived from either the request header or
/// the session cache, in which case the response is filtered to zero tools
/// (fail-closed) rather than left unfiltered.
pub async fn filter_tools_list_response(
    mut body: Value,
    identity: Option<&IdentityContext>,
    preferences: &dyn PreferencesService,
) -> Value {
    let Some(tools) = body
        .get_mut("result")
        .and_then(|r| r.get_mut("tools"))
        .and_then(Value::as_array_mut)
    else {
        return body;
    };

    match identity {
        Some(identity) if identity.is_authenticated() => {
            let disabled = preferences.get_disabled_tools(&identity.user_identity).await;
            filter_tools_array(tools, &disabled);
        }
        _ => {
            tools.clear();
        }
    }

    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::resolve_identity;
    use crate::core::preferences::InMemoryPreferences;
    use serde_json::json;

    fn sample_response() -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "tools": [
                    {"name": "web_search"},
                    {"name": "web_fetch"},
                    {"name": "file_read"}
                ]
            }
        })
    }

    #[tokio::test]
    async fn disabled_tools_are_removed() {
        let (identity, _, _) = resolve_identity(Some("Bearer abc123"), "").unwrap();
        let prefs = InMemoryPreferences::new();
        prefs
            .set_disabled_tools(&identity.user_identity, vec!["web_fetch".to_string()])
            .await;

        let filtered = filter_tools_list_response(sample_response(), Some(&identity), &prefs).await;
        let names: Vec<&str> = filtered["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["web_search", "file_read"]);
    }

    #[tokio::test]
    async fn missing_identity_fails_closed_to_empty_tools() {
        let prefs = InMemoryPreferences::new();
        let filtered = filter_tools_list_response(sample_response(), None, &prefs).await;
        assert!(filtered["result"]["tools"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn filtering_is_idempotent() {
        let (identity, _, _) = resolve_identity(Some("Bearer abc123"), "").unwrap();
        let prefs = InMemoryPreferences::new();
        prefs
            .set_disabled_tools(&identity.user_identity, vec!["web_fetch".to_string()])
            .await;

        let once = filter_tools_list_response(sample_response(), Some(&identity), &prefs).await;
        let twice = filter_tools_list_response(once.clone(), Some(&identity), &prefs).await;
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn response_without_tools_array_passes_through() {
        let prefs = InMemoryPreferences::new();
        let body = json!({"jsonrpc": "2.0", "id": 1, "result": {}});
        let filtered = filter_tools_list_response(body.clone(), None, &prefs).await;
        assert_eq!(filtered, body);
    }
}
