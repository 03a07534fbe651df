//! Addon fetcher
//!
//! Resolves a provider's manifest, builds resource URLs and deserializes
//! stream responses. Every upstream fetch for the same
//! `(manifest, resource, type, id, extras)` tuple passes through the
//! distributed memoizer so concurrent identical requests collapse into a
//! single upstream call whose byte-identical body is replayed to waiters.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};

use crate::errors::{FetchError, FetchResult, LockError};
use crate::fetch::{FetchClient, FetchOptions};
use crate::lock::{DistributedLock, LockOptions, Producer};
use crate::models::{
    AddonManifest, ProviderDescriptor, RawStreamResponse, StreamRequest, StreamResource,
};

/// How long a memoized upstream body stays replayable
const FETCH_MEMO_TTL: Duration = Duration::from_secs(60);
/// Manifests move rarely; cache them longer
const MANIFEST_MEMO_TTL: Duration = Duration::from_secs(10 * 60);

pub struct AddonFetcher {
    fetch_client: Arc<FetchClient>,
    lock: Arc<dyn DistributedLock>,
}

impl AddonFetcher {
    pub fn new(fetch_client: Arc<FetchClient>, lock: Arc<dyn DistributedLock>) -> Self {
        Self { fetch_client, lock }
    }

    /// The manifest base: everything before the trailing `/manifest.json`
    fn manifest_base(manifest_url: &str) -> &str {
        manifest_url
            .strip_suffix("/manifest.json")
            .unwrap_or(manifest_url)
    }

    /// `{base}/{resource}/{type}/{id}[/{extras}].json`
    pub fn resource_url(provider: &ProviderDescriptor, request: &StreamRequest) -> String {
        let base = Self::manifest_base(&provider.manifest_url);
        let id = urlencoding::encode(&request.id);
        match request.extras.as_deref() {
            Some(extras) if !extras.is_empty() => {
                format!(
                    "{base}/{}/{}/{id}/{extras}.json",
                    request.resource, request.media_type
                )
            }
            _ => format!("{base}/{}/{}/{id}.json", request.resource, request.media_type),
        }
    }

    /// Memoized raw-body fetch; the single-flight key covers the exact URL
    /// so distinct request tuples never share a flight.
    async fn fetch_memoized(
        &self,
        provider: &ProviderDescriptor,
        key: String,
        url: &str,
        ttl: Duration,
    ) -> FetchResult<String> {
        let opts = LockOptions {
            ttl,
            // Waiters tolerate the winner using the full provider budget
            timeout: provider.timeout + Duration::from_secs(2),
            retry_interval: Duration::from_millis(100),
        };

        let fetch_client = self.fetch_client.clone();
        let fetch_url = url.to_string();
        let fetch_options = FetchOptions {
            timeout: Some(provider.timeout),
            headers: provider.extra_headers.clone(),
            ..Default::default()
        };
        let producer: Producer = Box::new(move || {
            Box::pin(async move {
                fetch_client
                    .fetch_text(&fetch_url, fetch_options)
                    .await
                    .map_err(|e| e.to_string())
            })
        });

        match self.lock.with_lock(&key, producer, opts).await {
            Ok(outcome) => {
                debug!(url, cached = outcome.cached, "upstream fetch completed");
                Ok(outcome.result)
            }
            Err(LockError::Timeout { waited_ms, .. }) => Err(FetchError::ProviderTimeout {
                url: url.to_string(),
                timeout_ms: waited_ms,
            }),
            Err(LockError::Producer { message, .. }) => Err(FetchError::Transport {
                url: url.to_string(),
                message,
            }),
            Err(LockError::Backend(message)) => Err(FetchError::Transport {
                url: url.to_string(),
                message,
            }),
        }
    }

    /// Resolve and parse the provider's manifest
    #[instrument(skip(self), fields(provider = %provider.instance_id))]
    pub async fn manifest(&self, provider: &ProviderDescriptor) -> FetchResult<AddonManifest> {
        let body = self
            .fetch_memoized(
                provider,
                format!("manifest:{}", provider.manifest_url),
                &provider.manifest_url,
                MANIFEST_MEMO_TTL,
            )
            .await?;

        serde_json::from_str(&body).map_err(|e| FetchError::ProviderBadResponse {
            resource: StreamResource::Stream,
            message: format!("manifest: {e}"),
        })
    }

    /// Issue a stream query and deserialize the response.
    ///
    /// The provider's manifest is resolved first (memoized) to discover the
    /// resources it actually advertises; a query the manifest does not
    /// answer for is rejected before any resource fetch goes out. Shape
    /// mismatches become a per-addon error; they never abort the rest of
    /// the request (the orchestrator turns them into inline errors).
    #[instrument(skip(self), fields(provider = %provider.instance_id, id = %request.id))]
    pub async fn fetch_streams(
        &self,
        provider: &ProviderDescriptor,
        request: &StreamRequest,
    ) -> FetchResult<RawStreamResponse> {
        let manifest = self.manifest(provider).await?;
        if !manifest.supports(request.resource, request.media_type) {
            return Err(FetchError::ProviderBadResponse {
                resource: request.resource,
                message: format!(
                    "addon '{}' does not advertise {}/{}",
                    manifest.id, request.resource, request.media_type
                ),
            });
        }

        let url = Self::resource_url(provider, request);
        let body = self
            .fetch_memoized(provider, format!("fetch:{url}"), &url, FETCH_MEMO_TTL)
            .await?;

        serde_json::from_str::<RawStreamResponse>(&body).map_err(|e| {
            FetchError::ProviderBadResponse {
                resource: request.resource,
                message: e.to_string(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::models::MediaType;

    fn provider(manifest_url: &str) -> ProviderDescriptor {
        ProviderDescriptor {
            instance_id: "p1".into(),
            manifest_url: manifest_url.into(),
            display_name: "P1".into(),
            identifier: "p1".into(),
            short_id: "P1".into(),
            timeout: Duration::from_secs(5),
            resources: vec![StreamResource::Stream],
            media_types: vec![MediaType::Movie, MediaType::Series],
            extra_headers: HashMap::new(),
            force_to_top: false,
            library: false,
            format_passthrough: false,
            result_passthrough: false,
        }
    }

    #[test]
    fn builds_resource_urls_from_the_manifest_base() {
        let provider = provider("https://addon.example.com/v1/manifest.json");
        let request = StreamRequest::new(MediaType::Movie, "tt0111161");
        assert_eq!(
            AddonFetcher::resource_url(&provider, &request),
            "https://addon.example.com/v1/stream/movie/tt0111161.json"
        );

        let mut with_extras = StreamRequest::new(MediaType::Series, "tt0903747:2:8");
        with_extras.extras = Some("season=2".into());
        assert_eq!(
            AddonFetcher::resource_url(&provider, &with_extras),
            "https://addon.example.com/v1/stream/series/tt0903747%3A2%3A8/season=2.json"
        );
    }

    #[test]
    fn manifest_base_tolerates_bare_urls() {
        assert_eq!(
            AddonFetcher::manifest_base("https://a.example.com"),
            "https://a.example.com"
        );
    }
}
