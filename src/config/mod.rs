//! Application configuration
//!
//! Loaded with figment: an optional TOML file merged with
//! `STREAM_FUSION_`-prefixed environment variables (`__` as the section
//! separator), so `STREAM_FUSION_SERVER__BASE_URL` overrides
//! `[server] base_url`.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

pub mod duration_serde;

use crate::models::ServiceId;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub outbound: OutboundConfig,
    pub limits: LimitsConfig,
    pub services: ServicesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Public base URL the service is reachable at
    pub base_url: String,
    /// Internal base URL requests to `base_url` are rewritten onto, so
    /// self-calls never re-enter the external front door
    pub internal_url: Option<String>,
    /// Shared secret attached to internally rewritten requests
    pub internal_secret: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8468,
            base_url: "http://localhost:8468".to_string(),
            internal_url: None,
            internal_secret: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Enables the broadcast memoizer backend
    pub redis_uri: Option<String>,
    /// Enables the transactional memoizer backend and persisted users
    pub database_uri: Option<String>,
    /// TTL of title metadata backing playback URLs
    #[serde(with = "duration_serde::duration")]
    pub builtin_playback_link_validity: Duration,
    /// Users not accessed for this many days are pruned; 0 disables
    pub prune_max_days: u32,
    /// Cadence of the pruning task
    #[serde(with = "duration_serde::duration")]
    pub prune_interval: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            redis_uri: None,
            database_uri: None,
            builtin_playback_link_validity: Duration::from_secs(6 * 60 * 60),
            prune_max_days: 0,
            prune_interval: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboundConfig {
    /// Outbound proxy pool (http:// or socks5:// URLs)
    pub addon_proxies: Vec<String>,
    /// Hostname-glob → proxy selection; last matching rule wins.
    /// Values: an index into `addon_proxies`, `true` (first proxy),
    /// or `false` (direct).
    pub proxy_rules: Vec<ProxyRule>,
    /// Hostname-glob → User-Agent overrides
    pub user_agent_overrides: HashMap<String, String>,
    /// Exact URL-prefix rewrites applied before dispatch
    pub request_url_mappings: HashMap<String, String>,
    /// Recursion guard: identical (url, forwarded-ip) calls in the window
    pub recursion_threshold_limit: u32,
    #[serde(with = "duration_serde::duration")]
    pub recursion_threshold_window: Duration,
    /// Default timeout when a provider does not set one
    #[serde(with = "duration_serde::duration")]
    pub default_timeout: Duration,
    /// Maximum concurrent provider fetches per request
    pub fetch_parallelism: usize,
    /// Maximum concurrent debrid API calls per service
    pub debrid_parallelism: usize,
    /// Transient network errors are retried this many times
    pub max_retries: u32,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            addon_proxies: Vec::new(),
            proxy_rules: Vec::new(),
            user_agent_overrides: HashMap::new(),
            request_url_mappings: HashMap::new(),
            recursion_threshold_limit: 5,
            recursion_threshold_window: Duration::from_secs(10),
            default_timeout: Duration::from_secs(15),
            fetch_parallelism: 16,
            debrid_parallelism: 4,
            max_retries: 2,
        }
    }
}

/// One proxy-selection rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyRule {
    pub hostname: String,
    pub proxy: ProxyChoice,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProxyChoice {
    /// true = first configured proxy, false = direct
    Toggle(bool),
    /// Index into the proxy pool
    Index(usize),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_stream_expression_filters: usize,
    pub max_keyword_filters: usize,
    pub max_groups: usize,
    /// Patterns users without free-regex permission may reference, matched
    /// by exact string
    pub regex_allowlist: Vec<String>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_stream_expression_filters: 20,
            max_keyword_filters: 50,
            max_groups: 5,
            regex_allowlist: Vec::new(),
        }
    }
}

/// Operator-level service credential policy.
///
/// `default` keys apply when the user configured none; `forced` keys always
/// override the user's value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub default_api_keys: HashMap<ServiceId, String>,
    pub forced_api_keys: HashMap<ServiceId, String>,
    /// Operator-forced stream proxy fields; set fields always override the
    /// user's proxy configuration
    pub force_proxy: ForcedProxyConfig,
}

/// Forced overrides of the user's stream proxy configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ForcedProxyConfig {
    pub enabled: Option<bool>,
    pub url: Option<String>,
    pub public_url: Option<String>,
    pub credentials: Option<String>,
}

impl ForcedProxyConfig {
    /// Overlay the set fields onto a user's proxy configuration
    pub fn overlay(&self, proxy: &mut crate::models::StreamProxyConfig) {
        if let Some(enabled) = self.enabled {
            proxy.enabled = enabled;
        }
        if let Some(url) = &self.url {
            proxy.url = Some(url.clone());
        }
        if let Some(public_url) = &self.public_url {
            proxy.public_url = Some(public_url.clone());
        }
        if let Some(credentials) = &self.credentials {
            proxy.credentials = Some(credentials.clone());
        }
    }
}

impl ServicesConfig {
    /// Resolve the effective API key for a service: forced beats user
    /// beats default.
    pub fn resolve_api_key<'a>(
        &'a self,
        service: ServiceId,
        user_value: Option<&'a str>,
    ) -> Option<&'a str> {
        if let Some(forced) = self.forced_api_keys.get(&service) {
            return Some(forced.as_str());
        }
        user_value.or_else(|| self.default_api_keys.get(&service).map(String::as_str))
    }
}

impl Config {
    /// Load from an optional TOML file plus the environment overlay
    pub fn load(config_file: Option<&str>) -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));
        if let Some(path) = config_file {
            figment = figment.merge(Toml::file(path));
        }
        let config: Config = figment
            .merge(Env::prefixed("STREAM_FUSION_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Effective internal base URL; falls back to the public one
    pub fn internal_base(&self) -> &str {
        self.server
            .internal_url
            .as_deref()
            .unwrap_or(&self.server.base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.limits.max_groups, 5);
        assert_eq!(config.outbound.recursion_threshold_limit, 5);
        assert!(config.storage.redis_uri.is_none());
    }

    #[test]
    fn forced_api_key_beats_user_value() {
        let mut services = ServicesConfig::default();
        services
            .default_api_keys
            .insert(ServiceId::TorBox, "default-key".into());
        assert_eq!(
            services.resolve_api_key(ServiceId::TorBox, None),
            Some("default-key")
        );
        assert_eq!(
            services.resolve_api_key(ServiceId::TorBox, Some("user-key")),
            Some("user-key")
        );

        services
            .forced_api_keys
            .insert(ServiceId::TorBox, "forced-key".into());
        assert_eq!(
            services.resolve_api_key(ServiceId::TorBox, Some("user-key")),
            Some("forced-key")
        );
    }

    #[test]
    fn forced_proxy_fields_overlay_user_config() {
        let forced = ForcedProxyConfig {
            enabled: Some(true),
            url: Some("https://operator-proxy.example.com".into()),
            public_url: None,
            credentials: None,
        };
        let mut proxy = crate::models::StreamProxyConfig {
            enabled: false,
            url: Some("https://user-proxy.example.com".into()),
            credentials: Some("user:pass".into()),
            ..Default::default()
        };
        forced.overlay(&mut proxy);
        assert!(proxy.enabled);
        assert_eq!(proxy.url.as_deref(), Some("https://operator-proxy.example.com"));
        // Unset forced fields keep the user's values
        assert_eq!(proxy.credentials.as_deref(), Some("user:pass"));
    }

    #[test]
    fn proxy_choice_accepts_bools_and_indices() {
        let rule: ProxyRule =
            serde_json::from_str(r#"{"hostname": "*.example.com", "proxy": 1}"#).unwrap();
        assert_eq!(rule.proxy, ProxyChoice::Index(1));
        let rule: ProxyRule =
            serde_json::from_str(r#"{"hostname": "*", "proxy": false}"#).unwrap();
        assert_eq!(rule.proxy, ProxyChoice::Toggle(false));
    }
}
