//! Parser & enricher stage
//!
//! Converts upstream wire records into canonical [`ParsedStream`]s: runs the
//! title parser over `(name, description, filename)` in that order, derives
//! the stream type from a presence rule table, and attributes streams to the
//! debrid service they already target. Failures become inline `error`
//! streams; nothing is dropped silently.

use std::sync::LazyLock;

use regex::Regex;
use strum::IntoEnumIterator;
use tracing::debug;

use crate::models::{
    ParsedFile, ParsedStream, ProviderDescriptor, RawStream, ServiceAttribution, ServiceId,
    StreamType,
};
use crate::parser::ParseMemo;
use crate::utils::parse_size;

static SIZE_IN_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:💾|size[:\s]|\b)(\d+(?:\.\d+)?\s?(?:[kmgt]i?b))\b").expect("static regex")
});
static SEEDERS_IN_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:👤|seed(?:er)?s?[:\s]+)\s*(\d+)").expect("static regex")
});
static AGE_IN_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:🕒|age[:\s]+)\s*(\d+)\s*d").expect("static regex"));

/// Markers upstream addons use to flag debrid cache state in stream names
const CACHED_MARKERS: &[&str] = &["⚡", "[cached]", "instant"];
const UNCACHED_MARKERS: &[&str] = &["⏳", "[uncached]", "download"];

/// Derive the stream type from target presence and provider hints
fn derive_stream_type(raw: &RawStream, service: Option<&ServiceAttribution>) -> StreamType {
    if raw.info_hash.is_some() && service.is_none() {
        return StreamType::P2p;
    }
    if raw.info_hash.is_some() {
        return StreamType::Debrid;
    }
    if raw.yt_id.is_some() {
        return StreamType::Youtube;
    }
    if raw.external_url.is_some() && raw.url.is_none() {
        return StreamType::External;
    }
    if service.is_some() {
        return StreamType::Debrid;
    }
    StreamType::Http
}

/// Detect which debrid service a stream already resolves through, from the
/// URL host first, then from name tokens.
fn detect_service(raw: &RawStream) -> Option<ServiceAttribution> {
    let cached = cache_state(raw);

    if let Some(url) = raw.url.as_deref() {
        let lowered = url.to_ascii_lowercase();
        for service in ServiceId::iter() {
            if service.url_markers().iter().any(|m| lowered.contains(m)) {
                return Some(ServiceAttribution {
                    id: service,
                    cached: cached.unwrap_or(true),
                });
            }
        }
    }

    if let Some(name) = raw.name.as_deref() {
        let lowered = name.to_ascii_lowercase();
        for service in ServiceId::iter() {
            if service.name_markers().iter().any(|m| lowered.contains(m)) {
                return Some(ServiceAttribution {
                    id: service,
                    cached: cached.unwrap_or(false),
                });
            }
        }
    }

    None
}

/// Tri-state cache marker detection over the stream name
fn cache_state(raw: &RawStream) -> Option<bool> {
    let name = raw.name.as_deref().unwrap_or_default().to_ascii_lowercase();
    if CACHED_MARKERS.iter().any(|m| name.contains(m)) {
        return Some(true);
    }
    if UNCACHED_MARKERS.iter().any(|m| name.contains(m)) {
        return Some(false);
    }
    None
}

/// Merge `overlay` into `base`, filling only fields `base` is missing
fn merge_parsed(base: &mut ParsedFile, overlay: ParsedFile) {
    if base.resolution.is_none() {
        base.resolution = overlay.resolution;
    }
    if base.quality.is_none() {
        base.quality = overlay.quality;
    }
    if base.encode.is_none() {
        base.encode = overlay.encode;
    }
    if base.visual_tags.is_empty() {
        base.visual_tags = overlay.visual_tags;
    }
    if base.audio_tags.is_empty() {
        base.audio_tags = overlay.audio_tags;
    }
    if base.audio_channels.is_empty() {
        base.audio_channels = overlay.audio_channels;
    }
    if base.languages.is_empty() {
        base.languages = overlay.languages;
    }
    if base.title.is_none() {
        base.title = overlay.title;
    }
    if base.year.is_none() {
        base.year = overlay.year;
    }
    if base.season.is_none() {
        base.season = overlay.season;
    }
    if base.episode.is_none() {
        base.episode = overlay.episode;
    }
    if base.release_group.is_none() {
        base.release_group = overlay.release_group;
    }
}

/// Convert one raw stream. Returns an error stream (never drops) when the
/// record has no playable target at all.
pub fn enrich_stream(
    provider: &ProviderDescriptor,
    index: usize,
    raw: &RawStream,
    memo: &mut ParseMemo,
) -> ParsedStream {
    if !raw.has_playable_target() {
        return ParsedStream::error_stream(
            provider,
            format!("{} returned an unplayable stream", provider.display_name),
            raw.name.clone(),
        );
    }

    let description = raw.description_text().map(str::to_string);
    let filename = raw
        .behavior_hints
        .as_ref()
        .and_then(|h| h.filename.clone())
        .or_else(|| {
            // First line of the description is the filename by convention
            description
                .as_deref()
                .and_then(|d| d.lines().next())
                .filter(|line| line.contains('.'))
                .map(str::to_string)
        });

    // Fixed parse order: name, then description, then filename; later
    // sources only fill fields the earlier ones missed.
    let mut parsed_file = ParsedFile::default();
    for source in [raw.name.as_deref(), description.as_deref(), filename.as_deref()]
        .into_iter()
        .flatten()
    {
        if let Some(parsed) = memo.parse(source) {
            merge_parsed(&mut parsed_file, parsed);
        }
    }

    let service = detect_service(raw);
    let stream_type = derive_stream_type(raw, service.as_ref());

    let size = raw
        .behavior_hints
        .as_ref()
        .and_then(|h| h.video_size)
        .or_else(|| {
            description
                .as_deref()
                .and_then(|d| SIZE_IN_TEXT.captures(d))
                .and_then(|caps| parse_size(&caps[1]))
        });
    let seeders = description
        .as_deref()
        .and_then(|d| SEEDERS_IN_TEXT.captures(d))
        .and_then(|caps| caps[1].parse().ok());
    let age = description
        .as_deref()
        .and_then(|d| AGE_IN_TEXT.captures(d))
        .and_then(|caps| caps[1].parse().ok());

    let torrent = raw.info_hash.as_ref().map(|hash| crate::models::TorrentInfo {
        info_hash: hash.to_ascii_lowercase(),
        file_idx: raw.file_idx,
        seeders,
        sources: raw.sources.clone(),
    });

    let hints = raw.behavior_hints.as_ref();

    ParsedStream {
        id: format!("{}.{}", provider.instance_id, index),
        provider: provider.instance_id.clone(),
        provider_name: provider.display_name.clone(),
        r#type: Some(stream_type),
        parsed_file,
        size,
        folder_size: None,
        torrent,
        service,
        indexer: None,
        age,
        filename,
        folder_name: None,
        url: raw.url.clone(),
        external_url: raw.external_url.clone(),
        yt_id: raw.yt_id.clone(),
        subtitles: raw.subtitles.clone(),
        country_whitelist: hints.map(|h| h.country_whitelist.clone()).unwrap_or_default(),
        not_web_ready: hints.and_then(|h| h.not_web_ready),
        binge_group: hints.and_then(|h| h.binge_group.clone()),
        proxied: false,
        regex_matched: None,
        keyword_matched: None,
        stream_expression_matched: None,
        library: provider.library,
        duration: None,
        error: None,
        formatted_name: None,
        formatted_description: None,
    }
}

/// Enrich a provider's whole response
pub fn enrich_streams(
    provider: &ProviderDescriptor,
    raw_streams: &[RawStream],
    memo: &mut ParseMemo,
) -> Vec<ParsedStream> {
    let parsed: Vec<ParsedStream> = raw_streams
        .iter()
        .enumerate()
        .map(|(index, raw)| enrich_stream(provider, index, raw, memo))
        .collect();
    debug!(
        provider = %provider.instance_id,
        raw = raw_streams.len(),
        parsed = parsed.len(),
        "enriched provider response"
    );
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    use crate::models::{MediaType, StreamResource};

    fn provider() -> ProviderDescriptor {
        ProviderDescriptor {
            instance_id: "prov1".into(),
            manifest_url: "https://addon.example.com/manifest.json".into(),
            display_name: "Example Addon".into(),
            identifier: "example".into(),
            short_id: "EX".into(),
            timeout: Duration::from_secs(10),
            resources: vec![StreamResource::Stream],
            media_types: vec![MediaType::Movie],
            extra_headers: HashMap::new(),
            force_to_top: false,
            library: false,
            format_passthrough: false,
            result_passthrough: false,
        }
    }

    #[test]
    fn p2p_type_and_seeders_from_description() {
        let raw: RawStream = serde_json::from_value(serde_json::json!({
            "infoHash": "AABBCC",
            "name": "Example 1080p",
            "title": "Some.Movie.2020.1080p.WEB-DL.x264-GRP.mkv\n👤 42 💾 2.5 GB",
        }))
        .unwrap();
        let mut memo = ParseMemo::new();
        let stream = enrich_stream(&provider(), 0, &raw, &mut memo);

        assert_eq!(stream.stream_type(), StreamType::P2p);
        let torrent = stream.torrent.unwrap();
        assert_eq!(torrent.info_hash, "aabbcc");
        assert_eq!(torrent.seeders, Some(42));
        assert_eq!(stream.size, Some((25 * 1024 * 1024 * 1024) / 10));
        assert_eq!(stream.filename.as_deref(), Some("Some.Movie.2020.1080p.WEB-DL.x264-GRP.mkv"));
        assert_eq!(stream.parsed_file.year, Some(2020));
    }

    #[test]
    fn debrid_detection_from_url_host() {
        let raw: RawStream = serde_json::from_value(serde_json::json!({
            "url": "https://my.real-debrid.com/d/ABC123",
            "name": "[RD+] Example ⚡",
        }))
        .unwrap();
        let mut memo = ParseMemo::new();
        let stream = enrich_stream(&provider(), 3, &raw, &mut memo);

        assert_eq!(stream.stream_type(), StreamType::Debrid);
        let service = stream.service.unwrap();
        assert_eq!(service.id, ServiceId::RealDebrid);
        assert!(service.cached);
        assert_eq!(stream.id, "prov1.3");
    }

    #[test]
    fn unplayable_records_become_error_streams() {
        let raw = RawStream::default();
        let mut memo = ParseMemo::new();
        let stream = enrich_stream(&provider(), 0, &raw, &mut memo);
        assert_eq!(stream.stream_type(), StreamType::Error);
        assert!(stream.error.is_some());
    }

    #[test]
    fn youtube_and_external_targets() {
        let mut memo = ParseMemo::new();

        let yt: RawStream = serde_json::from_value(serde_json::json!({"ytId": "abc"})).unwrap();
        assert_eq!(
            enrich_stream(&provider(), 0, &yt, &mut memo).stream_type(),
            StreamType::Youtube
        );

        let ext: RawStream =
            serde_json::from_value(serde_json::json!({"externalUrl": "https://x.example"}))
                .unwrap();
        assert_eq!(
            enrich_stream(&provider(), 0, &ext, &mut memo).stream_type(),
            StreamType::External
        );
    }
}
