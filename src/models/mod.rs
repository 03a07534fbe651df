//! Core data model shared by the aggregation pipeline
//!
//! Wire-facing records (`RawStream`, `RawStreamResponse`) mirror the upstream
//! addon schema; `ParsedStream` is the canonical internal record every
//! pipeline stage operates on. User-facing configuration lives here too so
//! that filtering, dedup, sorting and formatting all consume one shape.

pub mod user_config;

pub use user_config::*;

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};

/// Resources an upstream addon may expose
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum StreamResource {
    Stream,
    Subtitles,
    Catalog,
    Meta,
    AddonCatalog,
}

/// Media types a provider can answer for
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Series,
    Anime,
    Channel,
    Tv,
}

/// One upstream provider, resolved from a preset for the current request.
///
/// Immutable for the lifetime of a request. `instance_id` is unique within a
/// user configuration and must not contain `.` (it is embedded in composite
/// stream ids that use `.` as a separator).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub instance_id: String,
    pub manifest_url: String,
    pub display_name: String,
    /// Preset identifier this descriptor was produced from
    pub identifier: String,
    /// Short id used in formatted output and logs
    pub short_id: String,
    #[serde(with = "crate::utils::serde_duration_ms")]
    pub timeout: Duration,
    pub resources: Vec<StreamResource>,
    pub media_types: Vec<MediaType>,
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
    /// Streams from this provider are moved to the head after sorting
    #[serde(default)]
    pub force_to_top: bool,
    /// Results from this provider represent the user's own library
    #[serde(default)]
    pub library: bool,
    /// Skip the formatter for this provider's streams
    #[serde(default)]
    pub format_passthrough: bool,
    /// Skip filtering/dedup/sorting for this provider's streams
    #[serde(default)]
    pub result_passthrough: bool,
}

impl ProviderDescriptor {
    /// Validate the per-request invariants a descriptor must uphold
    pub fn validate(&self) -> AppResult<()> {
        if self.instance_id.is_empty() || self.instance_id.contains('.') {
            return Err(AppError::invalid_config(
                format!("providers.{}", self.instance_id),
                "instance id must be non-empty and must not contain '.'",
            ));
        }
        if self.manifest_url.is_empty() {
            return Err(AppError::invalid_config(
                format!("providers.{}.manifest_url", self.instance_id),
                "manifest URL is required",
            ));
        }
        Ok(())
    }

    pub fn supports(&self, resource: StreamResource, media_type: MediaType) -> bool {
        self.resources.contains(&resource) && self.media_types.contains(&media_type)
    }
}

/// Debrid / premium download services the resolver knows about
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ServiceId {
    RealDebrid,
    AllDebrid,
    Premiumize,
    DebridLink,
    TorBox,
    EasyDebrid,
    Debrider,
    PutIo,
    PikPak,
    Offcloud,
    Seedr,
    EasyNews,
}

impl ServiceId {
    /// Host fragments that identify a service inside a stream URL
    pub fn url_markers(&self) -> &'static [&'static str] {
        match self {
            Self::RealDebrid => &["real-debrid.com", "rdeb.io"],
            Self::AllDebrid => &["alldebrid.com", "debrid.it"],
            Self::Premiumize => &["premiumize.me"],
            Self::DebridLink => &["debrid-link.com", "debrid-link.fr"],
            Self::TorBox => &["torbox.app"],
            Self::EasyDebrid => &["easydebrid.com"],
            Self::Debrider => &["debrider.app"],
            Self::PutIo => &["put.io"],
            Self::PikPak => &["mypikpak.com"],
            Self::Offcloud => &["offcloud.com"],
            Self::Seedr => &["seedr.cc"],
            Self::EasyNews => &["easynews.com"],
        }
    }

    /// Short tokens providers commonly prepend to stream names.
    /// Bare two-letter forms are deliberately absent: they collide with
    /// ordinary words in release names.
    pub fn name_markers(&self) -> &'static [&'static str] {
        match self {
            Self::RealDebrid => &["[rd+]", "[rd]", "rd+"],
            Self::AllDebrid => &["[ad+]", "[ad]", "ad+"],
            Self::Premiumize => &["[pm+]", "[pm]", "pm+"],
            Self::DebridLink => &["[dl+]", "[dl]", "dl+"],
            Self::TorBox => &["[tb+]", "[tb]", "tb+", "torbox"],
            Self::EasyDebrid => &["[ed+]", "[ed]", "ed+"],
            Self::Debrider => &["[db+]", "[db]"],
            Self::PutIo => &["[putio]"],
            Self::PikPak => &["[pkp+]", "[pkp]"],
            Self::Offcloud => &["[oc+]", "[oc]", "oc+"],
            Self::Seedr => &["[sdr+]", "[sdr]"],
            Self::EasyNews => &["[en+]", "[en]", "easynews"],
        }
    }
}

/// A credential value that may be stored encrypted.
///
/// The ciphertext form carries a recognisable prefix so every boundary can
/// check the tag before use; see `playback::crypto` for the envelope format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialValue(pub String);

impl CredentialValue {
    pub const CIPHERTEXT_PREFIX: &'static str = "enc:v1:";

    pub fn is_encrypted(&self) -> bool {
        self.0.starts_with(Self::CIPHERTEXT_PREFIX)
    }

    /// The plaintext, only when this value is not an envelope
    pub fn plaintext(&self) -> Option<&str> {
        (!self.is_encrypted()).then_some(self.0.as_str())
    }
}

/// A user's credentials for one debrid service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceCredential {
    pub service_id: ServiceId,
    pub enabled: bool,
    #[serde(default)]
    pub credentials: HashMap<String, CredentialValue>,
}

impl ServiceCredential {
    /// The primary API key, whatever the service calls it
    pub fn api_key(&self) -> Option<&CredentialValue> {
        self.credentials
            .get("apiKey")
            .or_else(|| self.credentials.get("token"))
    }
}

/// Upstream wire record, as returned by an addon's stream resource.
///
/// At least one of `url`, `external_url`, `yt_id` or `info_hash` must be
/// present for the record to be usable; `into_validated` enforces that.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawStream {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yt_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_idx: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Upstream calls the description `title` for historical reasons
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subtitles: Vec<Subtitle>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub behavior_hints: Option<BehaviorHints>,
}

impl RawStream {
    /// The description text, tolerating both upstream spellings
    pub fn description_text(&self) -> Option<&str> {
        self.description.as_deref().or(self.title.as_deref())
    }

    pub fn has_playable_target(&self) -> bool {
        self.url.is_some()
            || self.external_url.is_some()
            || self.yt_id.is_some()
            || self.info_hash.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subtitle {
    pub id: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BehaviorHints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binge_group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_size: Option<u64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub proxy_headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_web_ready: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub country_whitelist: Vec<String>,
}

/// The stream resource response envelope
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawStreamResponse {
    #[serde(default)]
    pub streams: Vec<RawStream>,
}

/// Addon manifest subset the fetcher needs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddonManifest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub resources: Vec<ManifestResource>,
    #[serde(default)]
    pub types: Vec<String>,
}

impl AddonManifest {
    /// Whether the addon advertises this resource for this media type.
    ///
    /// A resource declared in object form may carry its own type list,
    /// which then overrides the manifest-level `types`.
    pub fn supports(&self, resource: StreamResource, media_type: MediaType) -> bool {
        let wanted_resource = resource.to_string();
        let wanted_type = media_type.to_string();

        let Some(declared) = self
            .resources
            .iter()
            .find(|r| r.name().eq_ignore_ascii_case(&wanted_resource))
        else {
            return false;
        };

        let types = match declared {
            ManifestResource::Full { types, .. } if !types.is_empty() => types,
            _ => &self.types,
        };
        // Addons rarely advertise "anime" as its own type; a series
        // declaration answers anime requests too
        types.iter().any(|t| {
            t.eq_ignore_ascii_case(&wanted_type)
                || (media_type == MediaType::Anime && t.eq_ignore_ascii_case("series"))
        })
    }
}

/// Manifests declare resources either as plain strings or objects
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ManifestResource {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        types: Vec<String>,
        #[serde(default, rename = "idPrefixes")]
        id_prefixes: Vec<String>,
    },
}

impl ManifestResource {
    pub fn name(&self) -> &str {
        match self {
            Self::Name(n) => n,
            Self::Full { name, .. } => name,
        }
    }
}

/// Classified stream type of a parsed stream
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    P2p,
    Live,
    Usenet,
    Debrid,
    Http,
    External,
    Youtube,
    Error,
    Statistic,
}

/// Structured attributes extracted from a release name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedFile {
    pub resolution: Option<String>,
    pub quality: Option<String>,
    pub encode: Option<String>,
    #[serde(default)]
    pub visual_tags: Vec<String>,
    #[serde(default)]
    pub audio_tags: Vec<String>,
    #[serde(default)]
    pub audio_channels: Vec<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    pub title: Option<String>,
    pub year: Option<u16>,
    pub season: Option<u16>,
    pub episode: Option<u16>,
    pub release_group: Option<String>,
}

/// Torrent attributes carried by p2p and debrid streams
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TorrentInfo {
    pub info_hash: String,
    pub file_idx: Option<u32>,
    pub seeders: Option<u32>,
    #[serde(default)]
    pub sources: Vec<String>,
}

/// Which service a stream resolves through, and whether it is already cached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAttribution {
    pub id: ServiceId,
    pub cached: bool,
}

/// Inline error surfaced in place of a provider's streams
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamErrorInfo {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Canonical internal stream record every pipeline stage operates on
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedStream {
    pub id: String,
    /// Instance id of the provider this stream came from
    pub provider: String,
    /// Display name of the provider, for formatting
    pub provider_name: String,
    pub r#type: Option<StreamType>,
    #[serde(default)]
    pub parsed_file: ParsedFile,
    pub size: Option<u64>,
    pub folder_size: Option<u64>,
    pub torrent: Option<TorrentInfo>,
    pub service: Option<ServiceAttribution>,
    pub indexer: Option<String>,
    /// Age of the release in days, when the provider exposes it
    pub age: Option<u32>,
    pub filename: Option<String>,
    pub folder_name: Option<String>,
    pub url: Option<String>,
    pub external_url: Option<String>,
    pub yt_id: Option<String>,
    #[serde(default)]
    pub subtitles: Vec<Subtitle>,
    #[serde(default)]
    pub country_whitelist: Vec<String>,
    pub not_web_ready: Option<bool>,
    pub binge_group: Option<String>,
    #[serde(default)]
    pub proxied: bool,
    /// Index of the first regex rule that matched, if any
    pub regex_matched: Option<usize>,
    /// Index of the first keyword rule that matched, if any
    pub keyword_matched: Option<usize>,
    /// Index of the first stream expression that selected this stream
    pub stream_expression_matched: Option<usize>,
    #[serde(default)]
    pub library: bool,
    /// Runtime of the media in seconds, when known
    pub duration: Option<u32>,
    pub error: Option<StreamErrorInfo>,
    /// Message shown to the user, rendered by the formatter
    pub formatted_name: Option<String>,
    pub formatted_description: Option<String>,
}

impl ParsedStream {
    pub fn stream_type(&self) -> StreamType {
        self.r#type.unwrap_or(StreamType::Http)
    }

    pub fn is_cached(&self) -> bool {
        self.service.map(|s| s.cached).unwrap_or(false)
    }

    /// Per-type minimum-fields invariant
    pub fn validate(&self) -> AppResult<()> {
        let fail = |need: &str| {
            Err(AppError::internal(format!(
                "stream {} of type {} is missing {need}",
                self.id,
                self.stream_type()
            )))
        };
        match self.stream_type() {
            StreamType::Debrid | StreamType::Http | StreamType::Live | StreamType::Usenet => {
                if self.url.is_none() {
                    return fail("a url");
                }
            }
            StreamType::P2p => {
                if self.torrent.as_ref().map(|t| t.info_hash.is_empty()).unwrap_or(true) {
                    return fail("torrent.info_hash");
                }
            }
            StreamType::External => {
                if self.external_url.is_none() && self.url.is_none() {
                    return fail("an external url");
                }
            }
            StreamType::Youtube => {
                if self.yt_id.is_none() {
                    return fail("a youtube id");
                }
            }
            StreamType::Error => {
                if self.error.as_ref().map(|e| e.title.is_empty()).unwrap_or(true) {
                    return fail("error.title");
                }
            }
            StreamType::Statistic => {}
        }
        Ok(())
    }

    /// Build an inline error stream attributed to a provider
    pub fn error_stream(provider: &ProviderDescriptor, title: impl Into<String>, description: Option<String>) -> Self {
        Self {
            id: format!("{}.error", provider.instance_id),
            provider: provider.instance_id.clone(),
            provider_name: provider.display_name.clone(),
            r#type: Some(StreamType::Error),
            error: Some(StreamErrorInfo {
                title: title.into(),
                description,
            }),
            ..Default::default()
        }
    }
}

/// A stream request as the orchestrator sees it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamRequest {
    pub resource: StreamResource,
    pub media_type: MediaType,
    pub id: String,
    pub extras: Option<String>,
}

impl StreamRequest {
    pub fn new(media_type: MediaType, id: impl Into<String>) -> Self {
        Self {
            resource: StreamResource::Stream,
            media_type,
            id: id.into(),
            extras: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_instance_id_rejects_dots() {
        let mut p = ProviderDescriptor {
            instance_id: "tor.rentio".into(),
            manifest_url: "https://example.com/manifest.json".into(),
            display_name: "Torrentio".into(),
            identifier: "torrentio".into(),
            short_id: "TOR".into(),
            timeout: Duration::from_secs(10),
            resources: vec![StreamResource::Stream],
            media_types: vec![MediaType::Movie],
            extra_headers: HashMap::new(),
            force_to_top: false,
            library: false,
            format_passthrough: false,
            result_passthrough: false,
        };
        assert!(p.validate().is_err());
        p.instance_id = "torrentio-1".into();
        assert!(p.validate().is_ok());
    }

    #[test]
    fn parsed_stream_type_invariants() {
        let mut s = ParsedStream {
            id: "a.1".into(),
            r#type: Some(StreamType::P2p),
            ..Default::default()
        };
        assert!(s.validate().is_err());
        s.torrent = Some(TorrentInfo {
            info_hash: "abcd".into(),
            ..Default::default()
        });
        assert!(s.validate().is_ok());

        s.r#type = Some(StreamType::Debrid);
        assert!(s.validate().is_err());
        s.url = Some("https://real-debrid.com/d/xyz".into());
        assert!(s.validate().is_ok());
    }

    #[test]
    fn credential_envelope_tag_detection() {
        assert!(CredentialValue("enc:v1:abcdef".into()).is_encrypted());
        let plain = CredentialValue("sk-123".into());
        assert!(!plain.is_encrypted());
        assert_eq!(plain.plaintext(), Some("sk-123"));
    }

    #[test]
    fn manifest_resource_discovery() {
        let manifest: AddonManifest = serde_json::from_value(serde_json::json!({
            "id": "org.example.addon",
            "name": "Example",
            "resources": [
                "stream",
                { "name": "catalog", "types": ["movie"] }
            ],
            "types": ["movie", "series"]
        }))
        .unwrap();

        // Plain-string resources inherit the manifest-level types
        assert!(manifest.supports(StreamResource::Stream, MediaType::Movie));
        assert!(manifest.supports(StreamResource::Stream, MediaType::Series));
        // Object-form resources with their own types override them
        assert!(manifest.supports(StreamResource::Catalog, MediaType::Movie));
        assert!(!manifest.supports(StreamResource::Catalog, MediaType::Series));
        // Undeclared resources are unsupported
        assert!(!manifest.supports(StreamResource::Subtitles, MediaType::Movie));
    }

    #[test]
    fn raw_stream_accepts_either_description_spelling() {
        let upstream: RawStream = serde_json::from_value(serde_json::json!({
            "infoHash": "deadbeef",
            "title": "Some.Show.S01E01.1080p"
        }))
        .unwrap();
        assert_eq!(upstream.description_text(), Some("Some.Show.S01E01.1080p"));
        assert!(upstream.has_playable_target());
    }
}
