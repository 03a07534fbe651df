//! Deduplication stage
//!
//! Streams sharing any enabled fingerprint key (filename, info hash, smart
//! detect) are merged into duplicate groups with a union-find; survivors are
//! then picked per group according to the per-stream-type mode and the
//! multi-group cache behaviour. Output preserves input order.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::models::{
    DedupConfig, DedupKey, DedupMode, MultiGroupBehaviour, ParsedStream, ServiceId, StreamType,
    UserConfig,
};

/// Strip everything but alphanumerics and lowercase, so close variants of
/// the same release name fingerprint identically
fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn digest(prefix: &str, body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prefix.as_bytes());
    hasher.update(b":");
    hasher.update(body.as_bytes());
    hex::encode(&hasher.finalize()[..16])
}

/// Compute the fingerprint of one stream under one key, when derivable
fn fingerprint(stream: &ParsedStream, key: DedupKey) -> Option<String> {
    match key {
        DedupKey::Filename => {
            let filename = stream.filename.as_deref()?;
            let normalized = normalize(filename);
            (!normalized.is_empty()).then(|| digest("fn", &normalized))
        }
        DedupKey::InfoHash => stream
            .torrent
            .as_ref()
            .map(|t| digest("ih", &t.info_hash.to_ascii_lowercase())),
        DedupKey::SmartDetect => {
            // Tolerant composition of release attributes; falls back to the
            // normalized filename when the parse is too sparse
            let file = &stream.parsed_file;
            if let Some(title) = &file.title {
                let composed = format!(
                    "{}|{}|{}|{}|{}|{}|{}",
                    normalize(title),
                    file.year.map(|y| y.to_string()).unwrap_or_default(),
                    file.season.map(|s| s.to_string()).unwrap_or_default(),
                    file.episode.map(|e| e.to_string()).unwrap_or_default(),
                    file.resolution.as_deref().unwrap_or_default(),
                    normalize(file.quality.as_deref().unwrap_or_default()),
                    normalize(file.encode.as_deref().unwrap_or_default()),
                );
                Some(digest("sd", &composed))
            } else {
                let filename = stream.filename.as_deref()?;
                let normalized = normalize(filename);
                (!normalized.is_empty()).then(|| digest("sd", &normalized))
            }
        }
    }
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, index: usize) -> usize {
        if self.parent[index] != index {
            let root = self.find(self.parent[index]);
            self.parent[index] = root;
        }
        self.parent[index]
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // Lower index wins so group identity is deterministic
            let (low, high) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[high] = low;
        }
    }
}

pub struct DedupEngine<'a> {
    config: &'a DedupConfig,
    user: &'a UserConfig,
}

impl<'a> DedupEngine<'a> {
    pub fn new(config: &'a DedupConfig, user: &'a UserConfig) -> Self {
        Self { config, user }
    }

    pub fn apply(&self, streams: Vec<ParsedStream>) -> Vec<ParsedStream> {
        if !self.config.enabled() || streams.is_empty() {
            return streams;
        }

        // Union streams sharing any enabled fingerprint
        let mut groups = UnionFind::new(streams.len());
        let mut seen: HashMap<String, usize> = HashMap::new();
        for (index, stream) in streams.iter().enumerate() {
            if matches!(
                stream.stream_type(),
                StreamType::Error | StreamType::Statistic
            ) {
                continue;
            }
            for key in &self.config.keys {
                if let Some(fp) = fingerprint(stream, *key) {
                    match seen.get(&fp) {
                        Some(&existing) => groups.union(existing, index),
                        None => {
                            seen.insert(fp, index);
                        }
                    }
                }
            }
        }

        // Collect group members in input order
        let mut members: HashMap<usize, Vec<usize>> = HashMap::new();
        for index in 0..streams.len() {
            members.entry(groups.find(index)).or_default().push(index);
        }

        let mut keep = vec![true; streams.len()];
        for group in members.values() {
            if group.len() > 1 {
                self.pick_survivors(&streams, group, &mut keep);
            }
        }

        streams
            .into_iter()
            .enumerate()
            .filter(|(index, _)| keep[*index])
            .map(|(_, stream)| stream)
            .collect()
    }

    /// Apply multi-group cache behaviour, then the per-type survivor mode
    fn pick_survivors(&self, streams: &[ParsedStream], group: &[usize], keep: &mut [bool]) {
        // Phase 1: cache-state collapse across the whole group
        let mut alive: Vec<usize> = group.to_vec();
        match self.config.multi_group_behaviour {
            MultiGroupBehaviour::KeepAll => {}
            MultiGroupBehaviour::Aggressive => {
                let any_cached = alive.iter().any(|&i| streams[i].is_cached());
                if any_cached {
                    alive.retain(|&i| {
                        streams[i].service.is_none() || streams[i].is_cached()
                    });
                }
            }
            MultiGroupBehaviour::Conservative => {
                // Collapse is per-service and independent: a service's
                // cached copy evicts only that service's uncached copies
                let cached_services: Vec<ServiceId> = alive
                    .iter()
                    .filter(|&&i| streams[i].is_cached())
                    .filter_map(|&i| streams[i].service.map(|s| s.id))
                    .collect();
                alive.retain(|&i| match streams[i].service {
                    Some(attribution) => {
                        attribution.cached || !cached_services.contains(&attribution.id)
                    }
                    None => true,
                });
            }
        }

        // Phase 2: survivor mode per stream type
        let mut by_type: HashMap<StreamType, Vec<usize>> = HashMap::new();
        for &index in &alive {
            by_type
                .entry(streams[index].stream_type())
                .or_default()
                .push(index);
        }

        let mut survivors: Vec<usize> = Vec::new();
        for (stream_type, indices) in by_type {
            match self.config.mode_for(stream_type) {
                DedupMode::Disabled => survivors.extend(indices),
                DedupMode::SingleResult => {
                    if let Some(best) = indices
                        .iter()
                        .copied()
                        .min_by_key(|&i| self.rank_tuple(&streams[i], i))
                    {
                        survivors.push(best);
                    }
                }
                DedupMode::PerService => {
                    let mut per_service: HashMap<Option<ServiceId>, usize> = HashMap::new();
                    for index in indices {
                        let service = streams[index].service.map(|s| s.id);
                        per_service
                            .entry(service)
                            .and_modify(|best| {
                                if self.addon_tuple(&streams[index], index)
                                    < self.addon_tuple(&streams[*best], *best)
                                {
                                    *best = index;
                                }
                            })
                            .or_insert(index);
                    }
                    survivors.extend(per_service.into_values());
                }
                DedupMode::PerAddon => {
                    let mut per_addon: HashMap<&str, usize> = HashMap::new();
                    for index in indices {
                        let addon = streams[index].provider.as_str();
                        per_addon
                            .entry(addon)
                            .and_modify(|best| {
                                if self.service_tuple(&streams[index], index)
                                    < self.service_tuple(&streams[*best], *best)
                                {
                                    *best = index;
                                }
                            })
                            .or_insert(index);
                    }
                    survivors.extend(per_addon.into_values());
                }
            }
        }

        for &index in group {
            keep[index] = survivors.contains(&index);
        }
    }

    /// single_result ordering: service rank, then addon rank, then input
    fn rank_tuple(&self, stream: &ParsedStream, index: usize) -> (usize, usize, usize) {
        let service_rank = stream
            .service
            .map(|s| self.user.service_rank(s.id))
            .unwrap_or(usize::MAX);
        (
            service_rank,
            self.user.provider_rank(&stream.provider),
            index,
        )
    }

    /// per_service tie-break: best addon, then input order
    fn addon_tuple(&self, stream: &ParsedStream, index: usize) -> (usize, usize) {
        (self.user.provider_rank(&stream.provider), index)
    }

    /// per_addon tie-break: best service, then input order
    fn service_tuple(&self, stream: &ParsedStream, index: usize) -> (usize, usize) {
        let service_rank = stream
            .service
            .map(|s| self.user.service_rank(s.id))
            .unwrap_or(usize::MAX);
        (service_rank, index)
    }
}
