//! Tile URL rewriting.
//!
//! Every URL the streaming engine fetches passes through
//! [`UrlSessionResolver::resolve`], which appends the API key and the sticky
//! session token handed out by the tile service. Rewrites are memoized per raw
//! URL so a tile always resolves to the same request within one session.

use std::collections::HashMap;

use bevy::prelude::*;

use crate::constants;

/// Hook the streaming engine calls before issuing any fetch.
pub trait UrlPreprocessor {
    fn preprocess(&mut self, url: &str) -> String;
}

/// Rewrites and caches outbound tile URLs for one streaming session.
#[derive(Debug, Default, Clone)]
pub struct UrlSessionResolver {
    api_key: String,
    session: Option<String>,
    cache: HashMap<String, String>,
}

impl UrlSessionResolver {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            session: None,
            cache: HashMap::new(),
        }
    }

    /// Resolve a raw URL into the URL that should actually be requested.
    ///
    /// Malformed input is treated as an opaque string and rewritten by plain
    /// concatenation.
    pub fn resolve(&mut self, raw: &str) -> String {
        if is_local_url(raw) {
            return raw.to_string();
        }

        if let Some(cached) = self.cache.get(raw) {
            return cached.clone();
        }

        let captured = query_param(raw, constants::SESSION_PARAM).filter(|token| !token.is_empty());
        if let Some(token) = captured {
            if self.session.as_deref() != Some(token) {
                debug!("Captured tile session token from {}", raw);
                self.session = Some(token.to_string());
            }
        }

        let mut resolved = raw.to_string();
        if !self.api_key.is_empty() && query_param(&resolved, constants::API_KEY_PARAM).is_none() {
            resolved = append_param(&resolved, constants::API_KEY_PARAM, &self.api_key);
        }
        if let Some(token) = &self.session {
            if query_param(&resolved, constants::SESSION_PARAM).is_none() {
                resolved = append_param(&resolved, constants::SESSION_PARAM, token);
            }
        }

        self.cache.insert(raw.to_string(), resolved.clone());
        resolved
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session.as_deref()
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    /// Forget every cached rewrite and the captured session token.
    pub fn clear(&mut self) {
        self.cache.clear();
        self.session = None;
    }
}

impl UrlPreprocessor for UrlSessionResolver {
    fn preprocess(&mut self, url: &str) -> String {
        self.resolve(url)
    }
}

/// Blob, data and file URLs never reach the tile service.
fn is_local_url(url: &str) -> bool {
    let lower = url.trim_start().to_ascii_lowercase();
    lower.starts_with("blob:") || lower.starts_with("data:") || lower.starts_with("file:")
}

/// Value of the first `name=value` pair in the query string, if any.
/// A bare `name` without `=` yields an empty value.
fn query_param<'a>(url: &'a str, name: &str) -> Option<&'a str> {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let (_, query) = without_fragment.split_once('?')?;
    query
        .split('&')
        .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

fn append_param(url: &str, name: &str, value: &str) -> String {
    let (base, fragment) = match url.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (url, None),
    };
    let separator = if !base.contains('?') {
        "?"
    } else if base.ends_with('?') || base.ends_with('&') {
        ""
    } else {
        "&"
    };
    match fragment {
        Some(fragment) => format!("{base}{separator}{name}={value}#{fragment}"),
        None => format!("{base}{separator}{name}={value}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_is_deterministic() {
        let mut resolver = UrlSessionResolver::new("abc123");
        let first = resolver.resolve("https://tile.example.com/v1/3dtiles/root.json");
        let second = resolver.resolve("https://tile.example.com/v1/3dtiles/root.json");
        assert_eq!(first, second);
        assert_eq!(first, "https://tile.example.com/v1/3dtiles/root.json?key=abc123");
        assert_eq!(resolver.cached_len(), 1);
    }

    #[test]
    fn test_blob_urls_pass_through() {
        let mut resolver = UrlSessionResolver::new("abc123");
        let blob = "blob:https://app.example.com/6f1c-44aa";
        assert_eq!(resolver.resolve(blob), blob);
        assert_eq!(resolver.resolve(blob), blob);
        assert_eq!(resolver.cached_len(), 0);
    }

    #[test]
    fn test_session_is_captured_and_applied() {
        let mut resolver = UrlSessionResolver::new("k");
        let with_session = resolver.resolve("https://tiles.example.com/a.json?session=abc");
        assert_eq!(with_session, "https://tiles.example.com/a.json?session=abc&key=k");
        assert_eq!(resolver.session_token(), Some("abc"));

        let later = resolver.resolve("https://tiles.example.com/b.glb");
        assert_eq!(later, "https://tiles.example.com/b.glb?key=k&session=abc");
    }

    #[test]
    fn test_later_session_does_not_rewrite_cache() {
        let mut resolver = UrlSessionResolver::new("k");
        resolver.resolve("https://t.example.com/a?session=one");
        let b = resolver.resolve("https://t.example.com/b");
        resolver.resolve("https://t.example.com/c?session=two");

        assert_eq!(resolver.resolve("https://t.example.com/b"), b);
        assert!(b.ends_with("session=one"));
        assert!(resolver.resolve("https://t.example.com/d").ends_with("session=two"));
    }

    #[test]
    fn test_existing_key_is_not_duplicated() {
        let mut resolver = UrlSessionResolver::new("k");
        let url = resolver.resolve("https://t.example.com/a?key=other");
        assert_eq!(url, "https://t.example.com/a?key=other");
    }

    #[test]
    fn test_empty_api_key_is_not_appended() {
        let mut resolver = UrlSessionResolver::new("");
        assert_eq!(resolver.resolve("https://t.example.com/a"), "https://t.example.com/a");
    }

    #[test]
    fn test_fragment_stays_last() {
        let mut resolver = UrlSessionResolver::new("k");
        assert_eq!(
            resolver.resolve("https://t.example.com/a?x=1#frag"),
            "https://t.example.com/a?x=1&key=k#frag"
        );
    }

    #[test]
    fn test_malformed_url_is_rewritten_best_effort() {
        let mut resolver = UrlSessionResolver::new("k");
        assert_eq!(resolver.resolve("not a url"), "not a url?key=k");
    }

    #[test]
    fn test_empty_session_is_not_captured() {
        let mut resolver = UrlSessionResolver::new("k");
        resolver.resolve("https://t.example.com/a?session=");
        resolver.resolve("https://t.example.com/b?session");
        assert_eq!(resolver.session_token(), None);
        assert_eq!(resolver.resolve("https://t.example.com/c"), "https://t.example.com/c?key=k");

        resolver.resolve("https://t.example.com/d?session=abc");
        resolver.resolve("https://t.example.com/e?session=");
        assert_eq!(resolver.session_token(), Some("abc"));
    }

    #[test]
    fn test_clear_forgets_cache_and_session() {
        let mut resolver = UrlSessionResolver::new("k");
        resolver.resolve("https://t.example.com/a?session=abc");
        resolver.clear();
        assert_eq!(resolver.cached_len(), 0);
        assert_eq!(resolver.session_token(), None);
        assert_eq!(resolver.resolve("https://t.example.com/b"), "https://t.example.com/b?key=k");
    }
}
