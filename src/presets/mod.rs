//! Preset registry
//!
//! A preset is a user-facing template producing one or more provider
//! descriptors. Dispatch is a registry keyed by preset id yielding a
//! factory function; variant data is the preset id plus an opaque options
//! map, so no inheritance hierarchy is needed.
//!
//! References are one-way (config → preset id), so cycles cannot occur;
//! the only hygiene pass needed is removing references to ids that do not
//! resolve (`sanitize_references`).

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::errors::{AppError, AppResult};
use crate::models::{MediaType, ProviderDescriptor, StreamResource, UserConfig};

/// Factory signature: `(user config, opaque options) → descriptors`
pub type PresetFactory =
    fn(&UserConfig, &serde_json::Value) -> AppResult<Vec<ProviderDescriptor>>;

static REGISTRY: LazyLock<HashMap<&'static str, PresetFactory>> = LazyLock::new(|| {
    let mut registry: HashMap<&'static str, PresetFactory> = HashMap::new();
    registry.insert("manifest", manifest_preset);
    registry.insert("torrent-indexer", torrent_indexer_preset);
    registry
});

pub fn lookup(preset_id: &str) -> Option<PresetFactory> {
    REGISTRY.get(preset_id).copied()
}

/// Options of the generic manifest preset: point at any addon manifest
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ManifestOptions {
    url: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    timeout_ms: Option<u64>,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    force_to_top: bool,
}

fn manifest_preset(
    _user: &UserConfig,
    options: &serde_json::Value,
) -> AppResult<Vec<ProviderDescriptor>> {
    let options: ManifestOptions = serde_json::from_value(options.clone())
        .map_err(|e| AppError::invalid_config("presets.manifest.options", e.to_string()))?;

    let display_name = options.name.unwrap_or_else(|| "Addon".to_string());
    Ok(vec![ProviderDescriptor {
        instance_id: String::new(), // assigned by materialize
        manifest_url: options.url,
        short_id: display_name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .take(3)
            .collect::<String>()
            .to_uppercase(),
        display_name,
        identifier: "manifest".to_string(),
        timeout: Duration::from_millis(options.timeout_ms.unwrap_or(15_000)),
        resources: vec![StreamResource::Stream],
        media_types: vec![MediaType::Movie, MediaType::Series, MediaType::Anime],
        extra_headers: options.headers,
        force_to_top: options.force_to_top,
        library: false,
        format_passthrough: false,
        result_passthrough: false,
    }])
}

/// Options of the torrent-indexer preset: a hosted indexer with optional
/// per-site selection baked into the manifest path
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct TorrentIndexerOptions {
    base_url: String,
    #[serde(default)]
    indexers: Vec<String>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

fn torrent_indexer_preset(
    _user: &UserConfig,
    options: &serde_json::Value,
) -> AppResult<Vec<ProviderDescriptor>> {
    let options: TorrentIndexerOptions = serde_json::from_value(options.clone())
        .map_err(|e| AppError::invalid_config("presets.torrent-indexer.options", e.to_string()))?;

    let base = options.base_url.trim_end_matches('/');
    let manifest_url = if options.indexers.is_empty() {
        format!("{base}/manifest.json")
    } else {
        format!("{base}/providers={}/manifest.json", options.indexers.join(","))
    };

    Ok(vec![ProviderDescriptor {
        instance_id: String::new(),
        manifest_url,
        display_name: "Torrent Indexer".to_string(),
        identifier: "torrent-indexer".to_string(),
        short_id: "TI".to_string(),
        timeout: Duration::from_millis(options.timeout_ms.unwrap_or(15_000)),
        resources: vec![StreamResource::Stream],
        media_types: vec![MediaType::Movie, MediaType::Series, MediaType::Anime],
        extra_headers: HashMap::new(),
        force_to_top: false,
        library: false,
        format_passthrough: false,
        result_passthrough: false,
    }])
}

/// Materialize preset selections into provider descriptors and append them
/// to the explicitly configured providers. Instance ids come from the
/// selection (suffixed when a preset yields several descriptors).
pub fn materialize(user: &UserConfig) -> AppResult<Vec<ProviderDescriptor>> {
    let mut providers = user.providers.clone();

    for selection in &user.presets {
        let Some(factory) = lookup(&selection.preset) else {
            return Err(AppError::invalid_config(
                format!("presets.{}", selection.preset),
                "unknown preset id",
            ));
        };
        let mut produced = factory(user, &selection.options)?;
        let many = produced.len() > 1;
        for (offset, descriptor) in produced.iter_mut().enumerate() {
            descriptor.instance_id = if many {
                format!("{}-{offset}", selection.instance_id)
            } else {
                selection.instance_id.clone()
            };
            descriptor.validate()?;
        }
        providers.extend(produced);
    }

    for descriptor in &providers {
        descriptor.validate()?;
    }
    Ok(providers)
}

/// Remove references to provider instance ids that do not resolve:
/// group membership lists and the proxy opt-in list.
pub fn sanitize_references(user: &mut UserConfig, providers: &[ProviderDescriptor]) {
    let known: Vec<&str> = providers.iter().map(|p| p.instance_id.as_str()).collect();

    for group in &mut user.groups {
        group.providers.retain(|id| {
            let valid = known.contains(&id.as_str());
            if !valid {
                warn!(instance_id = %id, "dropping group reference to unknown provider");
            }
            valid
        });
    }
    user.proxy.proxied_addons.retain(|id| {
        let valid = known.contains(&id.as_str());
        if !valid {
            warn!(instance_id = %id, "dropping proxy reference to unknown provider");
        }
        valid
    });
}
