//! User-facing pipeline configuration
//!
//! One request carries exactly one of these; every pipeline stage reads its
//! own slice. All fields default so a partially configured user still gets
//! sensible behaviour, and serde names match the stored JSON document.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::{MediaType, ProviderDescriptor, ServiceCredential, ServiceId, StreamType};

/// Lists applied to one categorical attribute.
///
/// `excluded` eliminates on intersection, `included` (when non-empty)
/// requires intersection, `required` requires every listed token, and
/// `preferred` only contributes to sort order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributeLists {
    pub excluded: Vec<String>,
    pub included: Vec<String>,
    pub required: Vec<String>,
    pub preferred: Vec<String>,
}

impl AttributeLists {
    pub fn is_empty(&self) -> bool {
        self.excluded.is_empty()
            && self.included.is_empty()
            && self.required.is_empty()
            && self.preferred.is_empty()
    }
}

/// Scope of a seeders range rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeederScope {
    P2p,
    Cached,
    Uncached,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SeederRange {
    pub min: Option<u32>,
    pub max: Option<u32>,
    /// Which stream populations the range applies to; empty = p2p only
    pub scopes: Vec<SeederScope>,
}

/// Half-open size interval `[min, max)` in bytes; zero/absent means no bound
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizeRange {
    pub min: Option<u64>,
    pub max: Option<u64>,
}

impl SizeRange {
    pub fn contains(&self, size: u64) -> bool {
        if let Some(min) = self.min
            && min > 0
            && size < min
        {
            return false;
        }
        if let Some(max) = self.max
            && max > 0
            && size >= max
        {
            return false;
        }
        true
    }

    pub fn is_unbounded(&self) -> bool {
        self.min.unwrap_or(0) == 0 && self.max.unwrap_or(0) == 0
    }
}

/// Size rules, scoped per media type and optionally per resolution.
/// The most specific scope wins: resolution-specific over the global range.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SizeFilterConfig {
    pub global: SizeRange,
    pub movie: Option<SizeRange>,
    pub series: Option<SizeRange>,
    /// Keyed by resolution token, e.g. "2160p"
    pub per_resolution: HashMap<String, SizeRange>,
}

impl SizeFilterConfig {
    /// Resolve the effective range for a stream
    pub fn effective(&self, media_type: MediaType, resolution: Option<&str>) -> SizeRange {
        if let Some(res) = resolution
            && let Some(range) = self.per_resolution.get(res)
        {
            return *range;
        }
        let per_type = match media_type {
            MediaType::Movie => self.movie,
            MediaType::Series | MediaType::Anime => self.series,
            _ => None,
        };
        per_type.unwrap_or(self.global)
    }
}

/// One user-authored regex rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegexRule {
    pub pattern: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Stream-expression rule applied as a selector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpressionRule {
    pub expression: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// The complete filter configuration (one list set per category)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub resolutions: AttributeLists,
    pub qualities: AttributeLists,
    pub languages: AttributeLists,
    pub visual_tags: AttributeLists,
    pub audio_tags: AttributeLists,
    pub audio_channels: AttributeLists,
    pub stream_types: AttributeLists,
    pub encodes: AttributeLists,

    pub excluded_regexes: Vec<RegexRule>,
    pub required_regexes: Vec<RegexRule>,
    pub preferred_regexes: Vec<RegexRule>,

    pub excluded_keywords: Vec<String>,
    pub required_keywords: Vec<String>,
    pub preferred_keywords: Vec<String>,

    pub excluded_expressions: Vec<ExpressionRule>,
    pub required_expressions: Vec<ExpressionRule>,
    pub preferred_expressions: Vec<ExpressionRule>,

    pub seeders: Option<SeederRange>,
    pub size: SizeFilterConfig,
}

/// Which fingerprint components participate in duplicate detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DedupKey {
    Filename,
    InfoHash,
    SmartDetect,
}

/// Survivor selection mode applied within one duplicate group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupMode {
    SingleResult,
    PerService,
    PerAddon,
    #[default]
    Disabled,
}

/// Cross-service handling when the same content is both cached and uncached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultiGroupBehaviour {
    #[default]
    KeepAll,
    Aggressive,
    Conservative,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub keys: Vec<DedupKey>,
    /// Mode per stream type; types not listed fall back to `default_mode`
    pub per_type: HashMap<StreamType, DedupMode>,
    pub default_mode: DedupMode,
    pub multi_group_behaviour: MultiGroupBehaviour,
}

impl DedupConfig {
    pub fn enabled(&self) -> bool {
        !self.keys.is_empty()
    }

    pub fn mode_for(&self, stream_type: StreamType) -> DedupMode {
        self.per_type
            .get(&stream_type)
            .copied()
            .unwrap_or(self.default_mode)
    }
}

/// Sortable criteria (§4.9)
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
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum SortCriterion {
    Quality,
    Resolution,
    Language,
    VisualTag,
    AudioTag,
    AudioChannel,
    StreamType,
    Encode,
    Size,
    Service,
    Seeders,
    Addon,
    RegexPatterns,
    Cached,
    Library,
    Keyword,
    StreamExpressionMatched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Desc,
    Asc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub criterion: SortCriterion,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortKey {
    pub fn desc(criterion: SortCriterion) -> Self {
        Self {
            criterion,
            direction: SortDirection::Desc,
        }
    }
}

/// Criteria lists, with per-request-type and per-cache-partition overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SortConfig {
    pub global: Vec<SortKey>,
    pub movies: Option<Vec<SortKey>>,
    pub series: Option<Vec<SortKey>>,
    pub anime: Option<Vec<SortKey>>,
    /// Criteria for the cached partition when `cached` ranks in the head
    pub cached: Option<Vec<SortKey>>,
    pub uncached: Option<Vec<SortKey>>,
}

impl SortConfig {
    /// The criteria list in effect for this request type
    pub fn for_media_type(&self, media_type: MediaType) -> &[SortKey] {
        let per_type = match media_type {
            MediaType::Movie => self.movies.as_ref(),
            MediaType::Series => self.series.as_ref(),
            MediaType::Anime => self.anime.as_ref(),
            _ => None,
        };
        per_type.unwrap_or(&self.global)
    }
}

/// Playback proxy configuration (§4.10)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamProxyConfig {
    pub enabled: bool,
    pub url: Option<String>,
    pub public_url: Option<String>,
    pub credentials: Option<String>,
    /// Provider instance ids whose streams are proxied
    pub proxied_addons: Vec<String>,
    /// Services whose streams are proxied
    pub proxied_services: Vec<ServiceId>,
}

/// Formatter templates (§4.11)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatConfig {
    pub name_template: String,
    pub description_template: String,
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            name_template: "{stream.type::=p2p[[P2P] ||]}{service.id::exists[{stream.cached::=true[⚡||⏳]}||]}{stream.library::=true[☁️ ||]}{addon.name} {stream.resolution}".to_string(),
            description_template: "{stream.filename::exists[{stream.filename}||{stream.title}]}\n{stream.size::bytes}{stream.seeders::exists[ 👤{stream.seeders}||]}{stream.languages::exists[ 🌐{stream.languages::join(, )}||]}".to_string(),
        }
    }
}

/// How the groups are executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupStrategy {
    #[default]
    Parallel,
    Sequential,
}

/// One provider group with an optional admission condition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    /// Provider instance ids in this group
    pub providers: Vec<String>,
    /// Group condition; empty means always admitted
    pub condition: Option<String>,
}

/// Dynamic addon fetching: groups are consulted until the exit condition
/// evaluates true over the streams gathered so far
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicFetchConfig {
    pub enabled: bool,
    /// Boolean expression over the accumulated candidate streams
    pub exit_condition: Option<String>,
}

/// A user's reference to a preset: the preset id plus an opaque options map
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresetSelection {
    pub preset: String,
    pub instance_id: String,
    #[serde(default)]
    pub options: serde_json::Value,
}

/// The full per-user configuration the orchestrator consumes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    pub user_id: Option<String>,
    /// Presets to materialize into provider descriptors
    pub presets: Vec<PresetSelection>,
    pub providers: Vec<ProviderDescriptor>,
    pub services: Vec<ServiceCredential>,
    pub groups: Vec<GroupConfig>,
    pub group_strategy: GroupStrategy,
    pub dynamic_fetch: DynamicFetchConfig,
    pub filters: FilterConfig,
    pub dedup: DedupConfig,
    pub sort: SortConfig,
    pub proxy: StreamProxyConfig,
    pub format: FormatConfig,
    /// Hide inline provider error streams entirely
    pub hide_errors: bool,
    /// Hide inline errors only for the listed resources, e.g. "stream"
    pub hide_errors_for_resources: Vec<String>,
    /// The user may author arbitrary regexes (otherwise the allow-list gates)
    pub allow_free_regex: bool,
    /// Deferred playback via the builtin resolver (per stream type)
    pub cache_and_play: Vec<StreamType>,
}

impl UserConfig {
    /// Position of a service in the user's configured order, for rankings
    pub fn service_rank(&self, id: ServiceId) -> usize {
        self.services
            .iter()
            .position(|s| s.service_id == id)
            .unwrap_or(usize::MAX)
    }

    /// Position of a provider in the user's configured order
    pub fn provider_rank(&self, instance_id: &str) -> usize {
        self.providers
            .iter()
            .position(|p| p.instance_id == instance_id)
            .unwrap_or(usize::MAX)
    }

    pub fn provider(&self, instance_id: &str) -> Option<&ProviderDescriptor> {
        self.providers.iter().find(|p| p.instance_id == instance_id)
    }

    /// Whether provider errors should surface for this resource
    pub fn surfaces_errors_for(&self, resource: &str) -> bool {
        !self.hide_errors
            && !self
                .hide_errors_for_resources
                .iter()
                .any(|r| r.eq_ignore_ascii_case(resource))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_range_is_half_open() {
        let range = SizeRange {
            min: Some(1_000),
            max: Some(2_000),
        };
        assert!(!range.contains(999));
        assert!(range.contains(1_000));
        assert!(range.contains(1_999));
        assert!(!range.contains(2_000));
    }

    #[test]
    fn size_zero_means_unbounded() {
        let range = SizeRange {
            min: Some(0),
            max: Some(0),
        };
        assert!(range.contains(0));
        assert!(range.contains(u64::MAX));
        assert!(range.is_unbounded());
    }

    #[test]
    fn size_scope_resolution_beats_media_type() {
        let mut cfg = SizeFilterConfig {
            global: SizeRange {
                min: None,
                max: Some(10),
            },
            movie: Some(SizeRange {
                min: None,
                max: Some(20),
            }),
            ..Default::default()
        };
        cfg.per_resolution.insert(
            "2160p".to_string(),
            SizeRange {
                min: None,
                max: Some(30),
            },
        );

        assert_eq!(
            cfg.effective(MediaType::Movie, Some("2160p")).max,
            Some(30)
        );
        assert_eq!(cfg.effective(MediaType::Movie, Some("720p")).max, Some(20));
        assert_eq!(cfg.effective(MediaType::Tv, None).max, Some(10));
    }

    #[test]
    fn dedup_mode_falls_back_to_default() {
        let mut cfg = DedupConfig {
            keys: vec![DedupKey::InfoHash],
            default_mode: DedupMode::SingleResult,
            ..Default::default()
        };
        cfg.per_type.insert(StreamType::P2p, DedupMode::PerService);
        assert_eq!(cfg.mode_for(StreamType::P2p), DedupMode::PerService);
        assert_eq!(cfg.mode_for(StreamType::Debrid), DedupMode::SingleResult);
    }
}
