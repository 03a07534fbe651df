//! Playback URL integrity: links round-trip through their three wire
//! formats, and anything with an unknown metadata id or undecryptable
//! store auth is rejected before a service is ever contacted.

use std::time::Duration;

use stream_fusion::models::ServiceId;
use stream_fusion::playback::{
    CredentialBox, FileInfo, MetadataStore, StoreAuth, TitleMetadata, open_store_auth,
    playback_path, seal_store_auth,
};

fn sample_metadata() -> TitleMetadata {
    TitleMetadata {
        titles: vec!["Some Show".into(), "Some Show (US)".into()],
        year: Some(2019),
        season: Some(2),
        episode: Some(5),
        absolute_episode: None,
    }
}

#[tokio::test]
async fn full_link_round_trip() {
    let secrets = CredentialBox::new("operator-secret");
    let store = MetadataStore::new(Duration::from_secs(60), None);

    let auth = StoreAuth {
        id: ServiceId::RealDebrid,
        credential: "rd-api-key".into(),
    };
    let sealed = seal_store_auth(&secrets, &auth).unwrap();

    let file_info = FileInfo::Torrent {
        hash: "AABBCCDD00112233".into(),
        index: Some(1),
        sources: vec![],
        cache_and_play: false,
    };
    let metadata_id = store.put(&sample_metadata()).await.unwrap();

    let path = playback_path(&sealed, &file_info, &metadata_id, Some("episode.mkv")).unwrap();
    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    assert_eq!(segments[0], "playback");
    assert_eq!(segments.len(), 5);

    // The endpoint's decode sequence
    let decoded_auth =
        open_store_auth(&secrets, &urlencoding::decode(segments[1]).unwrap()).unwrap();
    assert_eq!(decoded_auth, auth);

    let decoded_info = FileInfo::decode(segments[2]).unwrap();
    assert_eq!(decoded_info, file_info);

    let stored = store.get(segments[3]).await.unwrap();
    assert_eq!(stored, Some(sample_metadata()));
}

#[tokio::test]
async fn unknown_metadata_ids_read_as_absent() {
    let store = MetadataStore::new(Duration::from_secs(60), None);
    store.put(&sample_metadata()).await.unwrap();
    assert_eq!(store.get("000000000000").await.unwrap(), None);
}

#[test]
fn auth_from_another_deployment_fails_to_open() {
    let ours = CredentialBox::new("secret-a");
    let theirs = CredentialBox::new("secret-b");

    let sealed = seal_store_auth(
        &theirs,
        &StoreAuth {
            id: ServiceId::TorBox,
            credential: "key".into(),
        },
    )
    .unwrap();

    assert!(open_store_auth(&ours, &sealed).is_err());
}

#[test]
fn tampered_file_info_is_rejected() {
    let info = FileInfo::Torrent {
        hash: "cafe".into(),
        index: None,
        sources: vec![],
        cache_and_play: true,
    };
    let mut encoded = info.encode().unwrap();
    encoded.insert(0, '_');
    assert!(FileInfo::decode(&encoded).is_err());
}

#[test]
fn metadata_id_is_content_addressed() {
    let a = sample_metadata().id().unwrap();
    let b = sample_metadata().id().unwrap();
    assert_eq!(a, b);

    let different = TitleMetadata {
        episode: Some(6),
        ..sample_metadata()
    };
    assert_ne!(a, different.id().unwrap());
}
