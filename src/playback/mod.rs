//! Playback link plumbing
//!
//! The orchestrator never resolves debrid URLs inline; it hands the client
//! an opaque link `(encrypted store auth, file info, metadata id)` that the
//! playback endpoint resolves at click time. This module owns the three
//! wire formats and the TTL'd title-metadata store backing the links.

pub mod crypto;

pub use crypto::CredentialBox;

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::database::repositories::CacheRepository;
use crate::errors::{AppError, AppResult, DebridError};
use crate::models::ServiceId;

/// Stable base64-of-JSON payload identifying the content to resolve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum FileInfo {
    #[serde(rename = "torrent")]
    Torrent {
        hash: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        index: Option<u32>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        sources: Vec<String>,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        cache_and_play: bool,
    },
    #[serde(rename = "usenet")]
    Usenet {
        hash: String,
        nzb: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        index: Option<u32>,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        cache_and_play: bool,
    },
}

impl FileInfo {
    pub fn hash(&self) -> &str {
        match self {
            Self::Torrent { hash, .. } | Self::Usenet { hash, .. } => hash,
        }
    }

    pub fn index(&self) -> Option<u32> {
        match self {
            Self::Torrent { index, .. } | Self::Usenet { index, .. } => *index,
        }
    }

    pub fn cache_and_play(&self) -> bool {
        match self {
            Self::Torrent { cache_and_play, .. } | Self::Usenet { cache_and_play, .. } => {
                *cache_and_play
            }
        }
    }

    pub fn encode(&self) -> AppResult<String> {
        let json = serde_json::to_string(self)?;
        Ok(URL_SAFE_NO_PAD.encode(json.as_bytes()))
    }

    pub fn decode(encoded: &str) -> Result<Self, DebridError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.as_bytes())
            .map_err(|e| DebridError::PlaybackRejected {
                message: format!("file info is not valid base64: {e}"),
            })?;
        serde_json::from_slice(&bytes).map_err(|e| DebridError::PlaybackRejected {
            message: format!("file info payload rejected: {e}"),
        })
    }
}

/// What `encryptedStoreAuth` decrypts to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreAuth {
    pub id: ServiceId,
    pub credential: String,
}

/// Title metadata a playback link is resolved against
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TitleMetadata {
    pub titles: Vec<String>,
    pub year: Option<u16>,
    pub season: Option<u16>,
    pub episode: Option<u16>,
    pub absolute_episode: Option<u16>,
}

impl TitleMetadata {
    /// Short stable id: the first 12 hex chars of the canonical JSON hash
    pub fn id(&self) -> AppResult<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Ok(hex::encode(&hasher.finalize()[..6]))
    }
}

/// TTL'd store backing playback links.
///
/// Writes are write-once per metadata id (the id is content-addressed, so
/// rewrites are idempotent). Reads within the playback validity window are
/// consistent with writes; a database, when configured, extends the window
/// across process restarts.
pub struct MetadataStore {
    memory: moka::future::Cache<String, TitleMetadata>,
    database: Option<CacheRepository>,
    ttl: Duration,
}

impl MetadataStore {
    pub fn new(ttl: Duration, database: Option<CacheRepository>) -> Self {
        Self {
            memory: moka::future::Cache::builder()
                .max_capacity(100_000)
                .time_to_live(ttl)
                .build(),
            database,
            ttl,
        }
    }

    /// Store metadata and return its id
    pub async fn put(&self, metadata: &TitleMetadata) -> AppResult<String> {
        let id = metadata.id()?;
        self.memory.insert(id.clone(), metadata.clone()).await;
        if let Some(db) = &self.database {
            let json = serde_json::to_string(metadata)?;
            db.set(&format!("meta:{id}"), &json, self.ttl).await?;
        }
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> AppResult<Option<TitleMetadata>> {
        if let Some(hit) = self.memory.get(id).await {
            return Ok(Some(hit));
        }
        if let Some(db) = &self.database
            && let Some(json) = db.get(&format!("meta:{id}")).await?
        {
            let metadata: TitleMetadata = serde_json::from_str(&json)?;
            self.memory.insert(id.to_string(), metadata.clone()).await;
            return Ok(Some(metadata));
        }
        Ok(None)
    }
}

/// Build the opaque playback path for a debrid-eligible stream
pub fn playback_path(
    auth_ciphertext: &str,
    file_info: &FileInfo,
    metadata_id: &str,
    filename: Option<&str>,
) -> AppResult<String> {
    let encoded = file_info.encode()?;
    let filename = filename.unwrap_or("stream");
    Ok(format!(
        "/playback/{}/{}/{}/{}",
        urlencoding::encode(auth_ciphertext),
        encoded,
        metadata_id,
        urlencoding::encode(filename)
    ))
}

/// Reject playback URLs whose auth does not decrypt
pub fn open_store_auth(
    credentials: &CredentialBox,
    ciphertext: &str,
) -> Result<StoreAuth, DebridError> {
    let plaintext = credentials
        .open(ciphertext)
        .map_err(|e| DebridError::PlaybackRejected {
            message: format!("store auth rejected: {e}"),
        })?;
    serde_json::from_str(&plaintext).map_err(|e| DebridError::PlaybackRejected {
        message: format!("store auth payload rejected: {e}"),
    })
}

/// Seal a store auth for embedding into playback URLs
pub fn seal_store_auth(credentials: &CredentialBox, auth: &StoreAuth) -> AppResult<String> {
    let json = serde_json::to_string(auth)?;
    credentials
        .seal(&json)
        .map_err(|e| AppError::internal(format!("store auth encryption failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_info_round_trips_through_base64() {
        let info = FileInfo::Torrent {
            hash: "deadbeefcafe".into(),
            index: Some(3),
            sources: vec!["tracker:udp://x".into()],
            cache_and_play: true,
        };
        let encoded = info.encode().unwrap();
        let decoded = FileInfo::decode(&encoded).unwrap();
        assert_eq!(info, decoded);
        assert!(decoded.cache_and_play());
        assert_eq!(decoded.index(), Some(3));
    }

    #[test]
    fn garbage_file_info_is_rejected() {
        assert!(FileInfo::decode("!!!not-base64!!!").is_err());
        let valid_b64 = URL_SAFE_NO_PAD.encode(b"{\"type\":\"unknown\"}");
        assert!(FileInfo::decode(&valid_b64).is_err());
    }

    #[test]
    fn metadata_ids_are_stable_and_short() {
        let metadata = TitleMetadata {
            titles: vec!["Some Show".into()],
            season: Some(2),
            episode: Some(5),
            ..Default::default()
        };
        let a = metadata.id().unwrap();
        let b = metadata.id().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 12);

        let other = TitleMetadata {
            episode: Some(6),
            ..metadata
        };
        assert_ne!(a, other.id().unwrap());
    }

    #[tokio::test]
    async fn metadata_store_round_trips() {
        let store = MetadataStore::new(Duration::from_secs(60), None);
        let metadata = TitleMetadata {
            titles: vec!["Some Movie".into()],
            year: Some(2020),
            ..Default::default()
        };
        let id = store.put(&metadata).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap(), Some(metadata));
        assert_eq!(store.get("ffffffffffff").await.unwrap(), None);
    }
}
