//! Sync engine tuning and remote backend configuration.
//!
//! [`SyncSettings`] holds the knobs of the sync engine. [`RemoteConfig`]
//! describes how to reach the remote backend and can be loaded from the
//! environment or from a JSON file.

use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::{is_http_url, non_empty_trimmed};
use crate::{Error, Result};

const ENV_API_URL: &str = "LOTBOOK_API_URL";
const ENV_ANON_KEY: &str = "LOTBOOK_ANON_KEY";
const ENV_ACCESS_TOKEN: &str = "LOTBOOK_ACCESS_TOKEN";
const ENV_BUCKET: &str = "LOTBOOK_BUCKET";

const DEFAULT_BUCKET: &str = "photos";

/// Tuning for the sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Maximum photo downloads in flight during a pull stage
    pub photo_download_concurrency: usize,
    /// Maximum entities pushed concurrently
    pub push_concurrency: usize,
    /// Lifetime requested for signed blob references
    pub signed_reference_ttl: Duration,
    /// How long a signed reference is reused from the in-memory cache
    pub reference_cache_ttl: Duration,
    /// Deadline for bootstrap calls (company fetch)
    pub bootstrap_timeout: Duration,
    /// Delay before a terminal status (complete/error) is cleared
    pub status_clear_delay: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            photo_download_concurrency: 4,
            push_concurrency: 4,
            signed_reference_ttl: Duration::from_secs(60 * 60),
            // Shorter than the signed TTL so a cached reference never expires mid-display
            reference_cache_ttl: Duration::from_secs(55 * 60),
            bootstrap_timeout: Duration::from_secs(5),
            status_clear_delay: Duration::from_secs(3),
        }
    }
}

impl SyncSettings {
    #[must_use]
    pub const fn with_photo_download_concurrency(mut self, limit: usize) -> Self {
        self.photo_download_concurrency = limit;
        self
    }

    #[must_use]
    pub const fn with_push_concurrency(mut self, limit: usize) -> Self {
        self.push_concurrency = limit;
        self
    }

    #[must_use]
    pub const fn with_reference_cache_ttl(mut self, ttl: Duration) -> Self {
        self.reference_cache_ttl = ttl;
        self
    }

    #[must_use]
    pub const fn with_bootstrap_timeout(mut self, timeout: Duration) -> Self {
        self.bootstrap_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_status_clear_delay(mut self, delay: Duration) -> Self {
        self.status_clear_delay = delay;
        self
    }
}

/// Connection details for the remote entity store and blob store.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteConfig {
    /// Base URL of the backend (e.g. `https://project.supabase.co`)
    pub api_url: String,
    /// Public (anon) API key
    pub anon_key: String,
    /// Signed-in user's access token; the anon key is used when absent
    #[serde(default)]
    pub access_token: Option<String>,
    /// Storage bucket holding photo blobs
    #[serde(default = "default_bucket")]
    pub storage_bucket: String,
}

fn default_bucket() -> String {
    DEFAULT_BUCKET.to_string()
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RemoteConfig")
            .field("api_url", &self.api_url)
            .field("anon_key", &"[REDACTED]")
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("storage_bucket", &self.storage_bucket)
            .finish()
    }
}

impl RemoteConfig {
    /// Load configuration from environment variables.
    ///
    /// Returns `Ok(None)` when no variables are set and an error when only a
    /// partial configuration is provided.
    pub fn from_env() -> Result<Option<Self>> {
        parse_config(|key| env::var(key).ok())
    }

    /// Parse a JSON configuration file body.
    pub fn from_json(payload: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(payload)
            .map_err(|error| Error::Config(format!("invalid remote config JSON: {error}")))?;
        config.normalized()
    }

    /// Read and parse a JSON configuration file.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self> {
        let payload = std::fs::read_to_string(path)?;
        Self::from_json(&payload)
    }

    /// Bearer token sent with every request.
    pub fn bearer_token(&self) -> &str {
        self.access_token.as_deref().unwrap_or(&self.anon_key)
    }

    fn normalized(self) -> Result<Self> {
        let api_url = non_empty_trimmed(Some(self.api_url))
            .ok_or_else(|| Error::Config("api_url must not be empty".to_string()))?;
        if !is_http_url(&api_url) {
            return Err(Error::Config(
                "api_url must include http:// or https://".to_string(),
            ));
        }
        let anon_key = non_empty_trimmed(Some(self.anon_key))
            .ok_or_else(|| Error::Config("anon_key must not be empty".to_string()))?;
        let storage_bucket = non_empty_trimmed(Some(self.storage_bucket))
            .unwrap_or_else(default_bucket);

        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            anon_key,
            access_token: non_empty_trimmed(self.access_token),
            storage_bucket,
        })
    }
}

fn parse_config(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<RemoteConfig>> {
    let api_url = non_empty_trimmed(lookup(ENV_API_URL));
    let anon_key = non_empty_trimmed(lookup(ENV_ANON_KEY));
    let access_token = non_empty_trimmed(lookup(ENV_ACCESS_TOKEN));
    let bucket = non_empty_trimmed(lookup(ENV_BUCKET));

    let any_present =
        api_url.is_some() || anon_key.is_some() || access_token.is_some() || bucket.is_some();
    if !any_present {
        return Ok(None);
    }

    let mut missing = Vec::new();
    if api_url.is_none() {
        missing.push(ENV_API_URL);
    }
    if anon_key.is_none() {
        missing.push(ENV_ANON_KEY);
    }

    let (Some(api_url), Some(anon_key)) = (api_url, anon_key) else {
        return Err(Error::Config(format!(
            "Remote configuration is incomplete. Missing: {}",
            missing.join(", ")
        )));
    };

    RemoteConfig {
        api_url,
        anon_key,
        access_token,
        storage_bucket: bucket.unwrap_or_else(default_bucket),
    }
    .normalized()
    .map(Some)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn parse_from_map(map: &HashMap<&str, &str>) -> Result<Option<RemoteConfig>> {
        parse_config(|key| map.get(key).map(ToString::to_string))
    }

    #[test]
    fn default_settings_match_engine_limits() {
        let settings = SyncSettings::default();
        assert_eq!(settings.photo_download_concurrency, 4);
        assert_eq!(settings.bootstrap_timeout, Duration::from_secs(5));
        assert!(settings.reference_cache_ttl < settings.signed_reference_ttl);
    }

    #[test]
    fn settings_setters_override_defaults() {
        let settings = SyncSettings::default()
            .with_photo_download_concurrency(2)
            .with_push_concurrency(1)
            .with_reference_cache_ttl(Duration::from_secs(60))
            .with_bootstrap_timeout(Duration::from_millis(500))
            .with_status_clear_delay(Duration::ZERO);
        assert_eq!(settings.photo_download_concurrency, 2);
        assert_eq!(settings.push_concurrency, 1);
        assert_eq!(settings.reference_cache_ttl, Duration::from_secs(60));
        assert_eq!(settings.bootstrap_timeout, Duration::from_millis(500));
        assert_eq!(settings.status_clear_delay, Duration::ZERO);
        assert_eq!(settings.signed_reference_ttl, Duration::from_secs(3600));
    }

    #[test]
    fn parse_config_none_returns_none() {
        assert!(parse_from_map(&HashMap::new()).unwrap().is_none());
    }

    #[test]
    fn parse_config_requires_url_and_key() {
        let mut map = HashMap::new();
        map.insert(ENV_BUCKET, "lot-photos");

        let err = parse_from_map(&map).unwrap_err();
        match err {
            Error::Config(message) => {
                assert!(message.contains(ENV_API_URL));
                assert!(message.contains(ENV_ANON_KEY));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn parse_config_normalizes_values() {
        let mut map = HashMap::new();
        map.insert(ENV_API_URL, " https://project.supabase.co/ ");
        map.insert(ENV_ANON_KEY, "anon");

        let config = parse_from_map(&map).unwrap().unwrap();
        assert_eq!(config.api_url, "https://project.supabase.co");
        assert_eq!(config.storage_bucket, DEFAULT_BUCKET);
        assert_eq!(config.bearer_token(), "anon");
    }

    #[test]
    fn from_json_rejects_unknown_fields() {
        let error = RemoteConfig::from_json(
            r#"{"api_url": "https://x.example.com", "anon_key": "k", "region": "eu"}"#,
        )
        .unwrap_err();
        assert!(error.to_string().contains("unknown field"));
    }

    #[test]
    fn from_json_rejects_missing_scheme() {
        let error =
            RemoteConfig::from_json(r#"{"api_url": "x.example.com", "anon_key": "k"}"#)
                .unwrap_err();
        assert!(error.to_string().contains("http:// or https://"));
    }

    #[test]
    fn debug_redacts_secrets() {
        let config = RemoteConfig {
            api_url: "https://x.example.com".to_string(),
            anon_key: "anon-secret".to_string(),
            access_token: Some("user-secret".to_string()),
            storage_bucket: "photos".to_string(),
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
