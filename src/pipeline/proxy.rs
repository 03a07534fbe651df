//! Proxy stage
//!
//! Rewrites playback URLs through the user's configured stream proxy when
//! the stream's provider or detected service is opted in. The original URL
//! travels as a signed parameter so the proxy can verify it was issued by
//! this server. `external`, `youtube` and `error` streams never proxy.

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::models::{ParsedStream, StreamProxyConfig, StreamType};

pub struct ProxyEngine<'a> {
    config: &'a StreamProxyConfig,
}

impl<'a> ProxyEngine<'a> {
    pub fn new(config: &'a StreamProxyConfig) -> Self {
        Self { config }
    }

    pub fn apply(&self, mut streams: Vec<ParsedStream>) -> Vec<ParsedStream> {
        if !self.config.enabled {
            return streams;
        }
        let Some(base) = self
            .config
            .public_url
            .as_deref()
            .or(self.config.url.as_deref())
        else {
            return streams;
        };
        let base = base.trim_end_matches('/');

        let mut rewritten = 0usize;
        for stream in &mut streams {
            if self.should_proxy(stream)
                && let Some(original) = stream.url.clone()
            {
                stream.url = Some(self.proxied_url(base, &original));
                stream.proxied = true;
                rewritten += 1;
            }
        }
        if rewritten > 0 {
            debug!(rewritten, "streams routed through the playback proxy");
        }
        streams
    }

    fn should_proxy(&self, stream: &ParsedStream) -> bool {
        if matches!(
            stream.stream_type(),
            StreamType::External | StreamType::Youtube | StreamType::Error | StreamType::Statistic
        ) || stream.url.is_none()
            || stream.proxied
        {
            return false;
        }

        let addon_match = self
            .config
            .proxied_addons
            .iter()
            .any(|a| a == &stream.provider);
        let service_match = stream
            .service
            .map(|s| self.config.proxied_services.contains(&s.id))
            .unwrap_or(false);
        addon_match || service_match
    }

    /// `{base}/proxy/stream?url=...&sig=...`; the signature binds the
    /// original URL to the configured credentials
    fn proxied_url(&self, base: &str, original: &str) -> String {
        let credentials = self.config.credentials.as_deref().unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(credentials.as_bytes());
        hasher.update(b"|");
        hasher.update(original.as_bytes());
        let signature = hex::encode(&hasher.finalize()[..16]);

        format!(
            "{base}/proxy/stream?url={}&sig={signature}",
            urlencoding::encode(original)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ServiceAttribution, ServiceId};

    fn config() -> StreamProxyConfig {
        StreamProxyConfig {
            enabled: true,
            url: Some("https://proxy.internal:8080".into()),
            public_url: Some("https://proxy.example.com".into()),
            credentials: Some("user:pass".into()),
            proxied_addons: vec!["p1".into()],
            proxied_services: vec![ServiceId::RealDebrid],
        }
    }

    fn stream(id: &str, provider: &str, stream_type: StreamType) -> ParsedStream {
        ParsedStream {
            id: id.into(),
            provider: provider.into(),
            r#type: Some(stream_type),
            url: Some("https://upstream.example.com/video.mkv".into()),
            ..Default::default()
        }
    }

    #[test]
    fn proxies_opted_in_addons_and_services() {
        let config = config();
        let engine = ProxyEngine::new(&config);

        let by_addon = stream("a", "p1", StreamType::Http);
        let mut by_service = stream("b", "other", StreamType::Debrid);
        by_service.service = Some(ServiceAttribution {
            id: ServiceId::RealDebrid,
            cached: true,
        });
        let untouched = stream("c", "other", StreamType::Http);

        let out = engine.apply(vec![by_addon, by_service, untouched]);
        assert!(out[0].proxied);
        assert!(out[0].url.as_deref().unwrap().starts_with("https://proxy.example.com/proxy/stream?url="));
        assert!(out[0].url.as_deref().unwrap().contains("&sig="));
        assert!(out[1].proxied);
        assert!(!out[2].proxied);
    }

    #[test]
    fn never_proxies_external_youtube_or_error() {
        let config = config();
        let engine = ProxyEngine::new(&config);

        let external = stream("a", "p1", StreamType::External);
        let youtube = stream("b", "p1", StreamType::Youtube);
        let error = stream("c", "p1", StreamType::Error);

        let out = engine.apply(vec![external, youtube, error]);
        assert!(out.iter().all(|s| !s.proxied));
    }

    #[test]
    fn disabled_proxy_is_a_noop() {
        let config = StreamProxyConfig::default();
        let engine = ProxyEngine::new(&config);
        let out = engine.apply(vec![stream("a", "p1", StreamType::Http)]);
        assert!(!out[0].proxied);
        assert_eq!(out[0].url.as_deref(), Some("https://upstream.example.com/video.mkv"));
    }
}
