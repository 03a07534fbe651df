//! Request orchestrator
//!
//! Composes the whole pipeline for one player request: materialize presets,
//! partition providers into groups, fan out with bounded concurrency and
//! per-provider timeouts, merge in configured provider order, run
//! filter→dedup→sort→proxy→format, and attach opaque playback links to
//! debrid-eligible streams. One provider's failure never aborts the rest;
//! it surfaces as an inline error stream unless the user hides those.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

use crate::addon::AddonFetcher;
use crate::config::{LimitsConfig, ServicesConfig};
use crate::enrich::enrich_streams;
use crate::errors::{AppResult, FetchResult};
use crate::expression::validate_boolean;
use crate::models::{
    GroupStrategy, MediaType, ParsedStream, ProviderDescriptor, RawStreamResponse, StreamRequest,
    StreamType, UserConfig,
};
use crate::parser::ParseMemo;
use crate::pipeline;
use crate::playback::{
    CredentialBox, FileInfo, MetadataStore, StoreAuth, TitleMetadata, playback_path,
    seal_store_auth,
};
use crate::presets;

/// Seam the orchestrator fans out through; the production implementation
/// is [`AddonFetcher`], tests substitute their own.
#[async_trait]
pub trait StreamSource: Send + Sync {
    async fn fetch_streams(
        &self,
        provider: &ProviderDescriptor,
        request: &StreamRequest,
    ) -> FetchResult<RawStreamResponse>;
}

#[async_trait]
impl StreamSource for AddonFetcher {
    async fn fetch_streams(
        &self,
        provider: &ProviderDescriptor,
        request: &StreamRequest,
    ) -> FetchResult<RawStreamResponse> {
        AddonFetcher::fetch_streams(self, provider, request).await
    }
}

pub struct Orchestrator {
    source: Arc<dyn StreamSource>,
    limits: LimitsConfig,
    services_config: ServicesConfig,
    credentials: Arc<CredentialBox>,
    metadata_store: Arc<MetadataStore>,
    /// Bounds concurrent provider fetches per request
    fetch_parallelism: usize,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn StreamSource>,
        limits: LimitsConfig,
        services_config: ServicesConfig,
        credentials: Arc<CredentialBox>,
        metadata_store: Arc<MetadataStore>,
        fetch_parallelism: usize,
    ) -> Self {
        Self {
            source,
            limits,
            services_config,
            credentials,
            metadata_store,
            fetch_parallelism: fetch_parallelism.max(1),
        }
    }

    /// Handle one stream request end to end
    #[instrument(skip(self, user, metadata), fields(id = %request.id, media_type = %request.media_type))]
    pub async fn handle(
        &self,
        request: &StreamRequest,
        mut user: UserConfig,
        metadata: Option<TitleMetadata>,
    ) -> AppResult<Vec<ParsedStream>> {
        let providers = presets::materialize(&user)?;
        presets::sanitize_references(&mut user, &providers);
        user.providers = providers;
        self.services_config.force_proxy.overlay(&mut user.proxy);

        let eligible: Vec<ProviderDescriptor> = user
            .providers
            .iter()
            .filter(|p| p.supports(request.resource, request.media_type))
            .cloned()
            .collect();

        let groups = self.build_groups(&user, &eligible)?;
        let exit_condition = match (&user.dynamic_fetch.enabled, &user.dynamic_fetch.exit_condition)
        {
            (true, Some(text)) => Some(validate_boolean(text)?),
            _ => None,
        };

        // Groups admitted on the initial zero-stream context run per the
        // configured strategy; later groups consult the gathered streams
        let mut gathered: Vec<ParsedStream> = Vec::new();
        for (index, group) in groups.iter().enumerate() {
            if index > 0 {
                match &exit_condition {
                    Some(condition) => {
                        if condition.evaluate_boolean(&gathered)? {
                            debug!(group = index, "dynamic fetch exit condition met");
                            break;
                        }
                    }
                    None if user.group_strategy == GroupStrategy::Sequential => {
                        let survivors = gathered
                            .iter()
                            .filter(|s| s.stream_type() != StreamType::Error)
                            .count();
                        if survivors > 0 {
                            break;
                        }
                    }
                    None => {}
                }
            }

            if let Some(condition_text) = &group.condition
                && !condition_text.trim().is_empty()
            {
                let condition = validate_boolean(condition_text)?;
                if !condition.evaluate_boolean(&gathered)? {
                    debug!(group = index, "group condition rejected");
                    continue;
                }
            }

            let members: Vec<&ProviderDescriptor> = group
                .providers
                .iter()
                .filter_map(|id| eligible.iter().find(|p| &p.instance_id == id))
                .collect();
            let batch = self.fan_out(&members, request, &user).await;
            gathered.extend(batch);
        }

        let processed = pipeline::run(&user, request.media_type, &self.limits, gathered)?;
        self.link_playback(processed, request, &user, metadata).await
    }

    /// Partition providers into run groups, bounded by the group limit.
    /// Without explicit groups, everything runs as one parallel group.
    fn build_groups(
        &self,
        user: &UserConfig,
        eligible: &[ProviderDescriptor],
    ) -> AppResult<Vec<crate::models::GroupConfig>> {
        if user.groups.is_empty() {
            return Ok(vec![crate::models::GroupConfig {
                providers: eligible.iter().map(|p| p.instance_id.clone()).collect(),
                condition: None,
            }]);
        }
        let mut groups = user.groups.clone();
        if groups.len() > self.limits.max_groups {
            warn!(
                configured = groups.len(),
                limit = self.limits.max_groups,
                "truncating provider groups to the configured limit"
            );
            groups.truncate(self.limits.max_groups);
        }
        Ok(groups)
    }

    /// Fan out to one group's providers with bounded parallelism.
    /// Responses merge in configured provider order, not completion order,
    /// so the final list is deterministic for identical upstream answers.
    async fn fan_out(
        &self,
        members: &[&ProviderDescriptor],
        request: &StreamRequest,
        user: &UserConfig,
    ) -> Vec<ParsedStream> {
        let semaphore = Arc::new(Semaphore::new(self.fetch_parallelism));
        let mut tasks = FuturesUnordered::new();

        for (order, provider) in members.iter().enumerate() {
            let provider = (*provider).clone();
            let request = request.clone();
            let source = self.source.clone();
            let semaphore = semaphore.clone();
            tasks.push(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = source.fetch_streams(&provider, &request).await;
                (order, provider, result)
            });
        }

        let mut slots: Vec<Option<(ProviderDescriptor, FetchResult<RawStreamResponse>)>> =
            (0..members.len()).map(|_| None).collect();
        while let Some((order, provider, result)) = tasks.next().await {
            slots[order] = Some((provider, result));
        }

        let mut memo = ParseMemo::new();
        let mut merged = Vec::new();
        for slot in slots.into_iter().flatten() {
            let (provider, result) = slot;
            match result {
                Ok(response) => {
                    merged.extend(enrich_streams(&provider, &response.streams, &mut memo));
                }
                Err(error) => {
                    warn!(
                        provider = %provider.instance_id,
                        error = %error,
                        "provider fetch failed"
                    );
                    if user.surfaces_errors_for(&request.resource.to_string()) {
                        merged.push(ParsedStream::error_stream(
                            &provider,
                            format!("{} failed", provider.display_name),
                            Some(error.to_string()),
                        ));
                    }
                }
            }
        }
        merged
    }

    /// Attach opaque playback links to debrid-eligible streams: p2p results
    /// the user's services could resolve at click time. Upstream URLs are
    /// never resolved here; resolution happens in the playback endpoint.
    async fn link_playback(
        &self,
        streams: Vec<ParsedStream>,
        request: &StreamRequest,
        user: &UserConfig,
        metadata: Option<TitleMetadata>,
    ) -> AppResult<Vec<ParsedStream>> {
        let Some(service) = user.services.iter().find(|s| s.enabled) else {
            return Ok(streams);
        };
        let user_key = service.api_key().and_then(|v| v.plaintext());
        let Some(api_key) = self
            .services_config
            .resolve_api_key(service.service_id, user_key)
        else {
            return Ok(streams);
        };

        let metadata = metadata.unwrap_or_else(|| metadata_from_request(request));
        let metadata_id = self.metadata_store.put(&metadata).await?;

        let auth = StoreAuth {
            id: service.service_id,
            credential: api_key.to_string(),
        };
        let sealed = seal_store_auth(&self.credentials, &auth)?;

        let mut linked = streams;
        for stream in &mut linked {
            if stream.stream_type() != StreamType::P2p || stream.url.is_some() {
                continue;
            }
            let Some(torrent) = &stream.torrent else {
                continue;
            };
            let file_info = FileInfo::Torrent {
                hash: torrent.info_hash.clone(),
                index: torrent.file_idx,
                sources: torrent.sources.clone(),
                cache_and_play: user.cache_and_play.contains(&StreamType::P2p),
            };
            let path = playback_path(
                &sealed,
                &file_info,
                &metadata_id,
                stream.filename.as_deref(),
            )?;
            stream.url = Some(path);
            stream.r#type = Some(StreamType::Debrid);
            if stream.service.is_none() {
                stream.service = Some(crate::models::ServiceAttribution {
                    id: service.service_id,
                    cached: false,
                });
            }
        }
        Ok(linked)
    }
}

/// Derive season/episode metadata from the conventional
/// `{title-id}:{season}:{episode}` request id shape
pub fn metadata_from_request(request: &StreamRequest) -> TitleMetadata {
    let mut parts = request.id.split(':');
    let _title_id = parts.next();
    let season = parts.next().and_then(|s| s.parse().ok());
    let episode = parts.next().and_then(|e| e.parse().ok());
    TitleMetadata {
        titles: Vec::new(),
        year: None,
        season,
        episode,
        absolute_episode: if season.is_none() { episode } else { None },
    }
}
