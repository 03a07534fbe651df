//! Pipeline invariants: dedup idempotence and stability, filter
//! monotonicity, sort stability, and the documented multi-service
//! dedup scenarios. Property-style cases use proptest.

use proptest::prelude::*;

use stream_fusion::config::LimitsConfig;
use stream_fusion::models::{
    DedupConfig, DedupKey, DedupMode, MediaType, MultiGroupBehaviour, ParsedStream,
    ServiceAttribution, ServiceCredential, ServiceId, SortCriterion, SortKey, StreamType,
    TorrentInfo, UserConfig,
};
use stream_fusion::pipeline::{DedupEngine, FilterEngine, SortEngine};

fn user_with_services(services: &[ServiceId]) -> UserConfig {
    UserConfig {
        services: services
            .iter()
            .map(|&id| ServiceCredential {
                service_id: id,
                enabled: true,
                credentials: Default::default(),
            })
            .collect(),
        ..Default::default()
    }
}

fn stream(
    id: usize,
    hash: u8,
    service: Option<(ServiceId, bool)>,
    resolution: &str,
    size: u64,
) -> ParsedStream {
    ParsedStream {
        id: format!("s{id}"),
        provider: format!("p{}", id % 3),
        provider_name: format!("Provider {}", id % 3),
        r#type: Some(if service.is_some() {
            StreamType::Debrid
        } else {
            StreamType::P2p
        }),
        url: service.map(|_| "https://example.com/d".to_string()),
        size: Some(size),
        torrent: Some(TorrentInfo {
            info_hash: format!("{hash:040x}"),
            ..Default::default()
        }),
        service: service.map(|(id, cached)| ServiceAttribution { id, cached }),
        parsed_file: stream_fusion::models::ParsedFile {
            resolution: Some(resolution.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

// -------------------------------------------------------------------------
// Scenario: overlapping torrents across two services (§ concrete cases)
// -------------------------------------------------------------------------

#[test]
fn overlap_per_service_keeps_both_aggressive_single_keeps_cached() {
    let user = user_with_services(&[ServiceId::RealDebrid, ServiceId::TorBox]);

    let streams = || {
        vec![
            stream(0, 1, Some((ServiceId::RealDebrid, true)), "1080p", 100),
            stream(1, 1, Some((ServiceId::TorBox, false)), "1080p", 100),
        ]
    };

    // smartDetect + per_service: both survive
    let config = DedupConfig {
        keys: vec![DedupKey::SmartDetect, DedupKey::InfoHash],
        default_mode: DedupMode::PerService,
        multi_group_behaviour: MultiGroupBehaviour::KeepAll,
        ..Default::default()
    };
    assert_eq!(DedupEngine::new(&config, &user).apply(streams()).len(), 2);

    // single_result + aggressive: only the cached one survives
    let config = DedupConfig {
        keys: vec![DedupKey::InfoHash],
        default_mode: DedupMode::SingleResult,
        multi_group_behaviour: MultiGroupBehaviour::Aggressive,
        ..Default::default()
    };
    let out = DedupEngine::new(&config, &user).apply(streams());
    assert_eq!(out.len(), 1);
    assert!(out[0].is_cached());
}

// -------------------------------------------------------------------------
// Scenario: excluded 480p, preferred [2160p, 1080p]
// -------------------------------------------------------------------------

#[test]
fn excluded_and_preferred_resolutions_compose() {
    let mut user = UserConfig::default();
    user.filters.resolutions.excluded = vec!["480p".into()];
    user.filters.resolutions.preferred = vec!["2160p".into(), "1080p".into()];
    user.sort.global = vec![SortKey::desc(SortCriterion::Resolution)];

    let streams = vec![
        stream(0, 1, None, "2160p", 1),
        stream(1, 2, None, "1080p", 1),
        stream(2, 3, None, "720p", 1),
        stream(3, 4, None, "480p", 1),
    ];

    let filtered = FilterEngine::new(&user, MediaType::Movie, &LimitsConfig::default())
        .unwrap()
        .apply(streams)
        .unwrap();
    let sorted = SortEngine::new(&user, MediaType::Movie).apply(filtered);

    let resolutions: Vec<&str> = sorted
        .iter()
        .map(|s| s.parsed_file.resolution.as_deref().unwrap())
        .collect();
    assert_eq!(resolutions, vec!["2160p", "1080p", "720p"]);
}

// -------------------------------------------------------------------------
// Property: dedup is idempotent and never grows the list
// -------------------------------------------------------------------------

fn arbitrary_streams() -> impl Strategy<Value = Vec<ParsedStream>> {
    prop::collection::vec(
        (
            0u8..6,
            prop::option::of((0usize..3, any::<bool>())),
            0u64..10_000,
        ),
        0..24,
    )
    .prop_map(|specs| {
        let services = [ServiceId::RealDebrid, ServiceId::TorBox, ServiceId::AllDebrid];
        specs
            .into_iter()
            .enumerate()
            .map(|(index, (hash, service, size))| {
                let service = service.map(|(s, cached)| (services[s], cached));
                stream(index, hash, service, "1080p", size)
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn dedup_idempotence(streams in arbitrary_streams(), mode in 0usize..3, behaviour in 0usize..3) {
        let user = user_with_services(&[ServiceId::RealDebrid, ServiceId::TorBox, ServiceId::AllDebrid]);
        let config = DedupConfig {
            keys: vec![DedupKey::InfoHash, DedupKey::SmartDetect],
            default_mode: [DedupMode::SingleResult, DedupMode::PerService, DedupMode::PerAddon][mode],
            multi_group_behaviour: [
                MultiGroupBehaviour::KeepAll,
                MultiGroupBehaviour::Aggressive,
                MultiGroupBehaviour::Conservative,
            ][behaviour],
            ..Default::default()
        };
        let engine = DedupEngine::new(&config, &user);

        let input_len = streams.len();
        let once = engine.apply(streams);
        prop_assert!(once.len() <= input_len);

        let once_ids: Vec<String> = once.iter().map(|s| s.id.clone()).collect();
        let twice = engine.apply(once);
        let twice_ids: Vec<String> = twice.iter().map(|s| s.id.clone()).collect();
        prop_assert_eq!(once_ids, twice_ids);
    }

    #[test]
    fn conservative_never_drops_a_service_without_cached_copy(streams in arbitrary_streams()) {
        let user = user_with_services(&[ServiceId::RealDebrid, ServiceId::TorBox, ServiceId::AllDebrid]);
        let config = DedupConfig {
            keys: vec![DedupKey::InfoHash],
            default_mode: DedupMode::PerService,
            multi_group_behaviour: MultiGroupBehaviour::Conservative,
            ..Default::default()
        };
        let out = DedupEngine::new(&config, &user).apply(streams.clone());

        // Every (hash, service) pair that had only uncached copies in the
        // input keeps at least one representative
        for stream_record in &streams {
            let Some(service) = stream_record.service else { continue };
            if service.cached {
                continue;
            }
            let hash = stream_record.torrent.as_ref().unwrap().info_hash.clone();
            let service_has_cached_copy = streams.iter().any(|s| {
                s.service.map(|a| a.id == service.id && a.cached).unwrap_or(false)
                    && s.torrent.as_ref().map(|t| t.info_hash == hash).unwrap_or(false)
            });
            if !service_has_cached_copy {
                let survives = out.iter().any(|s| {
                    s.service.map(|a| a.id == service.id).unwrap_or(false)
                        && s.torrent.as_ref().map(|t| t.info_hash == hash).unwrap_or(false)
                });
                prop_assert!(survives, "uncached copy on {:?} vanished", service.id);
            }
        }
    }

    #[test]
    fn excluding_values_never_grows_output(sizes in prop::collection::vec(1u64..100, 1..16)) {
        let mut base_user = UserConfig::default();
        base_user.filters.resolutions.preferred = vec!["1080p".into()];
        let streams: Vec<ParsedStream> = sizes
            .iter()
            .enumerate()
            .map(|(index, &size)| stream(index, index as u8, None, if size % 2 == 0 { "1080p" } else { "720p" }, size))
            .collect();

        let limits = LimitsConfig::default();
        let baseline = FilterEngine::new(&base_user, MediaType::Movie, &limits)
            .unwrap()
            .apply(streams.clone())
            .unwrap();

        let mut narrowed_user = base_user.clone();
        narrowed_user.filters.resolutions.excluded = vec!["720p".into()];
        let narrowed = FilterEngine::new(&narrowed_user, MediaType::Movie, &limits)
            .unwrap()
            .apply(streams)
            .unwrap();

        prop_assert!(narrowed.len() <= baseline.len());
    }

    #[test]
    fn preferred_changes_order_not_membership(seed in prop::collection::vec(0u64..50, 1..12)) {
        let mut plain_user = UserConfig::default();
        plain_user.sort.global = vec![SortKey::desc(SortCriterion::Size)];
        let streams: Vec<ParsedStream> = seed
            .iter()
            .enumerate()
            .map(|(index, &size)| {
                stream(index, index as u8, None, if index % 2 == 0 { "2160p" } else { "720p" }, size)
            })
            .collect();

        let limits = LimitsConfig::default();
        let without = FilterEngine::new(&plain_user, MediaType::Movie, &limits)
            .unwrap()
            .apply(streams.clone())
            .unwrap();

        let mut preferring_user = plain_user.clone();
        preferring_user.filters.resolutions.preferred = vec!["2160p".into()];
        let with = FilterEngine::new(&preferring_user, MediaType::Movie, &limits)
            .unwrap()
            .apply(streams)
            .unwrap();

        let mut without_ids: Vec<String> = without.iter().map(|s| s.id.clone()).collect();
        let mut with_ids: Vec<String> = with.iter().map(|s| s.id.clone()).collect();
        without_ids.sort();
        with_ids.sort();
        prop_assert_eq!(without_ids, with_ids);
    }
}

// -------------------------------------------------------------------------
// Sort stability
// -------------------------------------------------------------------------

#[test]
fn equal_keys_preserve_merge_order() {
    let mut user = UserConfig::default();
    user.sort.global = vec![
        SortKey::desc(SortCriterion::Resolution),
        SortKey::desc(SortCriterion::Size),
    ];

    let streams: Vec<ParsedStream> = (0..8)
        .map(|index| stream(index, index as u8, None, "1080p", 42))
        .collect();
    let expected: Vec<String> = streams.iter().map(|s| s.id.clone()).collect();

    let sorted = SortEngine::new(&user, MediaType::Movie).apply(streams);
    let actual: Vec<String> = sorted.iter().map(|s| s.id.clone()).collect();
    assert_eq!(actual, expected);
}
