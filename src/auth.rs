//! Authorization resolver (C1).
//!
//! Derives an `IdentityContext` from an inbound request's headers and query
//! string. The raw key is kept only for the lifetime of the request context;
//! everything persisted downstream uses `apiKeyHash`.

use sha2::{Digest, Sha256};
use std::collections::HashMap;

const KEY_SUFFIX_LEN: usize = 4;

/// Where the bearer key was found, for observability only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthSource {
    Header,
    Query,
    None,
}

/// Per-request identity, derived once in C1 and carried through the
/// request context. `api_key` is never logged; only the hash, suffix and
/// identity label are ever persisted.
#[derive(Debug, Clone)]
pub struct IdentityContext {
    pub api_key: Option<String>,
    pub api_key_hash: String,
    pub key_suffix: String,
    pub user_identity: String,
}

impl IdentityContext {
    /// The anonymous identity used when no key could be resolved at all.
    /// Handlers that require identity must still refuse on this value.
    pub fn anonymous() -> Self {
        Self {
            api_key: None,
            api_key_hash: String::new(),
            key_suffix: String::new(),
            user_identity: String::new(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.api_key.is_some()
    }

    fn from_key(api_key: String) -> Self {
        let api_key_hash = hash_key(&api_key);
        let key_suffix = suffix(&api_key, KEY_SUFFIX_LEN);
        let user_identity = format!("user_{}", &api_key_hash[..8.min(api_key_hash.len())]);
        Self {
            api_key: Some(api_key),
            api_key_hash,
            key_suffix,
            user_identity,
        }
    }

    /// Only the fields safe to cache per-session (C5) — never the raw key.
    pub fn cacheable(&self) -> CachedIdentity {
        CachedIdentity {
            api_key_hash: self.api_key_hash.clone(),
            key_suffix: self.key_suffix.clone(),
            user_identity: self.user_identity.clone(),
        }
    }
}

/// The subset of `IdentityContext` safe to hold in the session-auth cache.
#[derive(Debug, Clone)]
pub struct CachedIdentity {
    pub api_key_hash: String,
    pub key_suffix: String,
    pub user_identity: String,
}

fn hash_key(api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn suffix(s: &str, n: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= n {
        chars.into_iter().collect()
    } else {
        chars[chars.len() - n..].iter().collect()
    }
}

/// Resolve the identity for a request given its header value and raw query
/// string. Returns the identity, the source it came from, and — for the
/// legacy query path — the `Authorization` value that should be re-inserted
/// into the request's headers by the caller (C5).
///
/// `Err` is only returned for a non-empty `Authorization` header that cannot
/// be parsed at all (not even as a bare key) — callers map that to HTTP 401.
pub fn resolve_identity(
    authorization_header: Option<&str>,
    query: &str,
) -> Result<(IdentityContext, AuthSource, Option<String>), String> {
    if let Some(raw) = authorization_header {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            let key = strip_bearer(trimmed);
            if key.is_empty() {
                return Err("empty bearer token".to_string());
            }
            return Ok((IdentityContext::from_key(key), AuthSource::Header, None));
        }
    }

    if let Some(key) = legacy_query_key(query) {
        let synthesized = format!("Bearer {key}");
        return Ok((
            IdentityContext::from_key(key),
            AuthSource::Query,
            Some(synthesized),
        ));
    }

    Ok((IdentityContext::anonymous(), AuthSource::None, None))
}

fn strip_bearer(value: &str) -> String {
    const PREFIX: &str = "bearer";
    let has_prefix = value.len() >= PREFIX.len()
        && value[..PREFIX.len()].eq_ignore_ascii_case(PREFIX)
        && value[PREFIX.len()..]
            .chars()
            .next()
            .map(|c| c.is_whitespace())
            .unwrap_or(true);
    if has_prefix {
        value[PREFIX.len()..].trim().to_string()
    } else {
        value.to_string()
    }
}

fn legacy_query_key(query: &str) -> Option<String> {
    let params = parse_query(query);
    for name in ["APIKEY", "apikey", "api_key"] {
        if let Some(v) = params.get(name) {
            if !v.is_empty() {
                return Some(v.clone());
            }
        }
    }
    None
}

fn parse_query(query: &str) -> HashMap<String, String> {
    let query = query.trim_start_matches('?');
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?;
            let value = parts.next().unwrap_or("");
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}
