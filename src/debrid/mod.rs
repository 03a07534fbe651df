//! Debrid playback resolver
//!
//! Turns `(service, content hash, file index)` into a playable URL by
//! driving the service through its state machine: check instant
//! availability, add the magnet/NZB when absent, pick the matching file,
//! and unrestrict it. Uncached content either waits for the cache
//! (cache-and-play) or surfaces the distinguished `Downloading` outcome.
//!
//! Individual service HTTP bindings live behind the [`DebridApi`] trait;
//! the resolver is generic over them and bounds per-service concurrency so
//! provider rate limits are respected.

pub mod file_picker;
pub mod resolver;

pub use resolver::{PlaybackResolver, ResolveRequest};

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::DebridResult;
use crate::models::ServiceId;

/// One file inside a service-side job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebridFile {
    pub index: u32,
    pub name: String,
    pub size: u64,
    #[serde(default)]
    pub mime: Option<String>,
}

/// Lifecycle state of a service-side job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Content is resident and files are ready to unrestrict
    Ready,
    /// The service is still fetching the content
    Downloading,
    /// The service rejected or lost the job
    Failed(String),
}

/// A magnet/NZB job on a debrid service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebridJob {
    pub id: String,
    /// Job title, usually the release name
    pub name: String,
    pub state: JobState,
    #[serde(default)]
    pub files: Vec<DebridFile>,
}

/// What to submit when the content is not yet on the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum AddJobRequest {
    Torrent {
        hash: String,
        #[serde(default)]
        sources: Vec<String>,
    },
    Usenet {
        nzb: String,
    },
}

/// Named interface every debrid service binding implements.
///
/// Credentials arrive pre-opened (plaintext); envelope handling happens at
/// the playback boundary, never in service bindings.
#[async_trait]
pub trait DebridApi: Send + Sync {
    fn service_id(&self) -> ServiceId;

    /// Instant-availability check for a set of content hashes
    async fn check_cached(
        &self,
        credential: &str,
        hashes: &[String],
    ) -> DebridResult<HashMap<String, bool>>;

    /// Create (or return the existing) job for this content
    async fn add_job(&self, credential: &str, request: &AddJobRequest) -> DebridResult<DebridJob>;

    /// Look up the job for a content hash, if the service knows it
    async fn get_job(&self, credential: &str, hash: &str) -> DebridResult<Option<DebridJob>>;

    /// Produce an unrestricted, directly playable URL for one file
    async fn unrestrict(
        &self,
        credential: &str,
        job: &DebridJob,
        file_index: u32,
    ) -> DebridResult<String>;
}
