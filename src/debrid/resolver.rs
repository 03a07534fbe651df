//! The per-(service, hash, index) resolution state machine.
//!
//! ```text
//!               ┌──────────┐
//!  new request ─▶  CHECK   │── cached ──▶ PICK_FILE ──▶ RESOLVE ──▶ READY
//!               │          │── uncached ▶ ADD ──┐
//!               └──────────┘                    ▼
//!                                         IN_PROGRESS ──(poll)──▶ PICK_FILE
//!                                              │
//!                             cache-and-play? ─▶ WAIT   else ▶ DOWNLOADING
//! ```
//!
//! Concurrent resolves for the same tuple share one flight through the
//! distributed memoizer; per-service semaphores keep the fan-in below the
//! provider's tolerance.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

use crate::debrid::file_picker::{FileHints, pick_file};
use crate::debrid::{AddJobRequest, DebridApi, DebridJob, JobState};
use crate::errors::{DebridError, DebridErrorCode, DebridResult, LockError};
use crate::lock::{DistributedLock, LockOptions, Producer};
use crate::models::ServiceId;
use crate::playback::{FileInfo, StoreAuth, TitleMetadata};

/// Everything a click-time resolution needs
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    pub auth: StoreAuth,
    pub file_info: FileInfo,
    pub metadata: TitleMetadata,
    pub filename: Option<String>,
}

pub struct PlaybackResolver {
    lock: Arc<dyn DistributedLock>,
    services: HashMap<ServiceId, Arc<dyn DebridApi>>,
    limiters: HashMap<ServiceId, Arc<Semaphore>>,
    /// Ceiling for a cache-and-play wait
    wait_timeout: Duration,
    poll_interval: Duration,
}

impl PlaybackResolver {
    pub fn new(
        lock: Arc<dyn DistributedLock>,
        services: Vec<Arc<dyn DebridApi>>,
        per_service_parallelism: usize,
    ) -> Self {
        let mut service_map = HashMap::new();
        let mut limiters = HashMap::new();
        for service in services {
            let id = service.service_id();
            limiters.insert(id, Arc::new(Semaphore::new(per_service_parallelism.max(1))));
            service_map.insert(id, service);
        }
        Self {
            lock,
            services: service_map,
            limiters,
            wait_timeout: Duration::from_secs(90),
            poll_interval: Duration::from_secs(3),
        }
    }

    pub fn with_wait(mut self, wait_timeout: Duration, poll_interval: Duration) -> Self {
        self.wait_timeout = wait_timeout;
        self.poll_interval = poll_interval;
        self
    }

    /// Resolve a playback link to a final playable URL
    #[instrument(skip(self, request), fields(service = %request.auth.id, hash = %request.file_info.hash()))]
    pub async fn resolve(&self, request: ResolveRequest) -> DebridResult<String> {
        let service_id = request.auth.id;
        let api = self
            .services
            .get(&service_id)
            .cloned()
            .ok_or_else(|| DebridError::PlaybackRejected {
                message: format!("no binding for service '{service_id}'"),
            })?;
        let limiter = self
            .limiters
            .get(&service_id)
            .cloned()
            .expect("limiter exists for every registered service");

        let key = format!(
            "debrid:{service_id}:{}:{}",
            request.file_info.hash().to_ascii_lowercase(),
            request.file_info.index().map(|i| i.to_string()).unwrap_or_default(),
        );
        let opts = LockOptions {
            ttl: self.wait_timeout + Duration::from_secs(30),
            timeout: self.wait_timeout + Duration::from_secs(30),
            retry_interval: Duration::from_millis(250),
        };

        let wait_timeout = self.wait_timeout;
        let poll_interval = self.poll_interval;
        let producer: Producer = Box::new(move || {
            Box::pin(async move {
                let _permit = limiter
                    .acquire_owned()
                    .await
                    .map_err(|_| "service limiter closed".to_string())?;
                drive(api, request, wait_timeout, poll_interval)
                    .await
                    .map_err(encode_error)
            })
        });

        match self.lock.with_lock(&key, producer, opts).await {
            Ok(outcome) => {
                debug!(cached_flight = outcome.cached, "debrid resolution completed");
                Ok(outcome.result)
            }
            Err(LockError::Producer { message, .. }) => Err(decode_error(&message)),
            Err(LockError::Timeout { .. }) => Err(DebridError::Downloading),
            Err(LockError::Backend(message)) => Err(DebridError::PlaybackRejected {
                message: format!("lock backend failed: {message}"),
            }),
        }
    }
}

/// Run the state machine against the service binding
async fn drive(
    api: Arc<dyn DebridApi>,
    request: ResolveRequest,
    wait_timeout: Duration,
    poll_interval: Duration,
) -> DebridResult<String> {
    let credential = &request.auth.credential;
    let hash = request.file_info.hash().to_ascii_lowercase();

    // CHECK
    let availability = api.check_cached(credential, std::slice::from_ref(&hash)).await?;
    let cached = availability.get(&hash).copied().unwrap_or(false);
    debug!(cached, "instant availability checked");

    // ADD (idempotent when the job already exists)
    let add_request = match &request.file_info {
        FileInfo::Torrent { hash, sources, .. } => AddJobRequest::Torrent {
            hash: hash.to_ascii_lowercase(),
            sources: sources.clone(),
        },
        FileInfo::Usenet { nzb, .. } => AddJobRequest::Usenet { nzb: nzb.clone() },
    };
    let job = match api.get_job(credential, &hash).await? {
        Some(job) => job,
        None => api.add_job(credential, &add_request).await?,
    };

    let job = match job.state {
        JobState::Ready => job,
        JobState::Failed(message) => {
            return Err(DebridError::service(
                DebridErrorCode::StoreMagnetInvalid,
                message,
            ));
        }
        JobState::Downloading => {
            // Cached content occasionally reports a transient downloading
            // state while the service materializes the job; waiting is
            // correct for it as well
            if !cached && !request.file_info.cache_and_play() {
                return Err(DebridError::Downloading);
            }
            wait_until_ready(&api, credential, &hash, wait_timeout, poll_interval).await?
        }
    };

    // PICK_FILE
    let hints = FileHints {
        index: request.file_info.index(),
        filename: request.filename.clone(),
    };
    let file = pick_file(&job, &request.metadata, &hints)?;

    // RESOLVE
    let url = api.unrestrict(credential, &job, file.index).await?;
    Ok(url)
}

/// Poll the job until it turns ready; a timeout surfaces as `Downloading`
/// so the client retries against a warmer cache
async fn wait_until_ready(
    api: &Arc<dyn DebridApi>,
    credential: &str,
    hash: &str,
    wait_timeout: Duration,
    poll_interval: Duration,
) -> DebridResult<DebridJob> {
    let deadline = tokio::time::Instant::now() + wait_timeout;
    loop {
        tokio::time::sleep(poll_interval).await;
        match api.get_job(credential, hash).await? {
            Some(job) => match job.state {
                JobState::Ready => return Ok(job),
                JobState::Failed(message) => {
                    return Err(DebridError::service(
                        DebridErrorCode::StoreMagnetInvalid,
                        message,
                    ));
                }
                JobState::Downloading => {}
            },
            None => {
                warn!(hash, "job vanished while waiting for cache");
                return Err(DebridError::service(
                    DebridErrorCode::StoreMagnetInvalid,
                    "job disappeared during cache-and-play wait",
                ));
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(DebridError::Downloading);
        }
    }
}

/// Flatten a debrid error into the replayable wire string
fn encode_error(error: DebridError) -> String {
    match error {
        DebridError::Service { code, message } => format!("{code}|{message}"),
        DebridError::Downloading => "DOWNLOADING|".to_string(),
        DebridError::PlaybackRejected { message } => format!("REJECTED|{message}"),
    }
}

fn decode_error(encoded: &str) -> DebridError {
    let (code, message) = encoded.split_once('|').unwrap_or((encoded, ""));
    if code == "DOWNLOADING" {
        return DebridError::Downloading;
    }
    if code == "REJECTED" {
        return DebridError::PlaybackRejected {
            message: message.to_string(),
        };
    }
    match DebridErrorCode::from_str(code) {
        Ok(code) => DebridError::service(code, message),
        Err(_) => DebridError::PlaybackRejected {
            message: encoded.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::debrid::DebridFile;
    use crate::lock::memory::MemoryLockBackend;

    /// In-memory service: `hash-cached` resolves instantly, `hash-slow`
    /// becomes ready after two polls, everything else never finishes.
    struct FakeService {
        add_calls: AtomicUsize,
        poll_counts: Mutex<HashMap<String, usize>>,
    }

    impl FakeService {
        fn new() -> Self {
            Self {
                add_calls: AtomicUsize::new(0),
                poll_counts: Mutex::new(HashMap::new()),
            }
        }

        fn ready_job(hash: &str) -> DebridJob {
            DebridJob {
                id: format!("job-{hash}"),
                name: "Some.Movie.2020.1080p.WEB-DL".into(),
                state: JobState::Ready,
                files: vec![DebridFile {
                    index: 0,
                    name: "Some.Movie.2020.1080p.WEB-DL.mkv".into(),
                    size: 4_000_000_000,
                    mime: Some("video/x-matroska".into()),
                }],
            }
        }
    }

    #[async_trait::async_trait]
    impl DebridApi for FakeService {
        fn service_id(&self) -> ServiceId {
            ServiceId::TorBox
        }

        async fn check_cached(
            &self,
            _credential: &str,
            hashes: &[String],
        ) -> DebridResult<HashMap<String, bool>> {
            Ok(hashes
                .iter()
                .map(|h| (h.clone(), h.contains("cached")))
                .collect())
        }

        async fn add_job(
            &self,
            _credential: &str,
            request: &AddJobRequest,
        ) -> DebridResult<DebridJob> {
            self.add_calls.fetch_add(1, Ordering::SeqCst);
            let AddJobRequest::Torrent { hash, .. } = request else {
                panic!("tests only submit torrents");
            };
            if hash.contains("cached") {
                Ok(Self::ready_job(hash))
            } else {
                Ok(DebridJob {
                    id: format!("job-{hash}"),
                    name: "pending".into(),
                    state: JobState::Downloading,
                    files: vec![],
                })
            }
        }

        async fn get_job(
            &self,
            _credential: &str,
            hash: &str,
        ) -> DebridResult<Option<DebridJob>> {
            let mut counts = self.poll_counts.lock().unwrap();
            let count = counts.entry(hash.to_string()).or_insert(0);
            *count += 1;
            if *count == 1 {
                // First lookup happens before ADD
                return Ok(None);
            }
            if hash.contains("cached") {
                return Ok(Some(Self::ready_job(hash)));
            }
            if hash.contains("slow") && *count > 2 {
                return Ok(Some(Self::ready_job(hash)));
            }
            Ok(Some(DebridJob {
                id: format!("job-{hash}"),
                name: "pending".into(),
                state: JobState::Downloading,
                files: vec![],
            }))
        }

        async fn unrestrict(
            &self,
            _credential: &str,
            job: &DebridJob,
            file_index: u32,
        ) -> DebridResult<String> {
            Ok(format!("https://cdn.example.com/{}/{file_index}", job.id))
        }
    }

    fn request(hash: &str, cache_and_play: bool) -> ResolveRequest {
        ResolveRequest {
            auth: StoreAuth {
                id: ServiceId::TorBox,
                credential: "key".into(),
            },
            file_info: FileInfo::Torrent {
                hash: hash.into(),
                index: None,
                sources: vec![],
                cache_and_play,
            },
            metadata: TitleMetadata {
                titles: vec!["Some Movie".into()],
                year: Some(2020),
                ..Default::default()
            },
            filename: None,
        }
    }

    fn resolver(service: Arc<FakeService>) -> PlaybackResolver {
        PlaybackResolver::new(Arc::new(MemoryLockBackend::new()), vec![service], 4)
            .with_wait(Duration::from_secs(5), Duration::from_millis(10))
    }

    #[tokio::test]
    async fn cached_content_resolves_directly() {
        let service = Arc::new(FakeService::new());
        let resolver = resolver(service.clone());
        let url = resolver.resolve(request("hash-cached", false)).await.unwrap();
        assert_eq!(url, "https://cdn.example.com/job-hash-cached/0");
    }

    #[tokio::test]
    async fn uncached_without_cache_and_play_reports_downloading() {
        let service = Arc::new(FakeService::new());
        let resolver = resolver(service.clone());
        let result = resolver.resolve(request("hash-never", false)).await;
        assert!(matches!(result, Err(DebridError::Downloading)));
    }

    #[tokio::test]
    async fn cache_and_play_waits_for_readiness() {
        let service = Arc::new(FakeService::new());
        let resolver = resolver(service.clone());
        let url = resolver.resolve(request("hash-slow", true)).await.unwrap();
        assert_eq!(url, "https://cdn.example.com/job-hash-slow/0");
    }

    #[tokio::test]
    async fn concurrent_resolves_share_one_flight() {
        let service = Arc::new(FakeService::new());
        let resolver = Arc::new(resolver(service.clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let resolver = resolver.clone();
            handles.push(tokio::spawn(async move {
                resolver.resolve(request("hash-cached", false)).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(service.add_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_service_is_rejected() {
        let resolver = PlaybackResolver::new(
            Arc::new(MemoryLockBackend::new()),
            vec![],
            2,
        );
        let result = resolver.resolve(request("hash-cached", false)).await;
        assert!(matches!(result, Err(DebridError::PlaybackRejected { .. })));
    }

    #[test]
    fn error_codes_survive_the_wire() {
        let original = DebridError::service(DebridErrorCode::PaymentRequired, "renew");
        let decoded = decode_error(&encode_error(original));
        match decoded {
            DebridError::Service { code, message } => {
                assert_eq!(code, DebridErrorCode::PaymentRequired);
                assert_eq!(message, "renew");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(
            decode_error(&encode_error(DebridError::Downloading)),
            DebridError::Downloading
        ));
    }
}
