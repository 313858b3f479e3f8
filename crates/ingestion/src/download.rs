//! Download manager with bounded retry and parse-before-accept.
//!
//! - Exponential backoff on transient failures (timeouts, 5xx, resets)
//! - Permanent failures (404 and other client errors) are not retried
//! - Bodies land in a `.partial` file and are renamed only after they parse
//! - A valid file already at the destination short-circuits the fetch, unless
//!   it lacks lead times the request asks for

use std::path::{Path, PathBuf};
use std::sync::Arc;

use metrics::counter;
use nwp_common::ForecastCycle;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::RetryConfig;
use crate::error::FetchError;
use crate::transport::{HttpTransport, TransportError};

/// Checks that a file parses and reports which of the request's lead times it
/// holds. Runs on the blocking pool.
pub type Validator = fn(&Path, &FetchRequest) -> Result<Coverage, String>;

/// Lead-time coverage of a file that parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Coverage {
    Complete,
    /// The file lacks these requested lead times.
    Partial(Vec<u32>),
}

impl Coverage {
    pub fn from_missing(missing: Vec<u32>) -> Self {
        if missing.is_empty() {
            Coverage::Complete
        } else {
            Coverage::Partial(missing)
        }
    }
}

/// One remote file to place in the raw cache.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub cycle: ForecastCycle,
    pub url: String,
    /// Final location inside the raw cache.
    pub path: PathBuf,
    /// Lead times the file should contain.
    pub lead_times: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// A valid file was already present; no request was made.
    Cached(PathBuf),
    Downloaded { path: PathBuf, bytes: u64, attempts: u32 },
}

impl FetchOutcome {
    pub fn path(&self) -> &Path {
        match self {
            FetchOutcome::Cached(path) => path,
            FetchOutcome::Downloaded { path, .. } => path,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusClass {
    Transient,
    Permanent,
}

fn classify_status(status: u16) -> StatusClass {
    match status {
        408 | 425 | 429 | 500..=599 => StatusClass::Transient,
        _ => StatusClass::Permanent,
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

async fn run_validator(validate: Validator, path: &Path, request: &FetchRequest) -> Result<Coverage, String> {
    let path = path.to_path_buf();
    let request = request.clone();
    tokio::task::spawn_blocking(move || validate(&path, &request))
        .await
        .map_err(|e| format!("validation task failed: {}", e))?
}

/// Fetches raw files through an [`HttpTransport`].
#[derive(Clone)]
pub struct DownloadManager {
    transport: Arc<dyn HttpTransport>,
    retry: RetryConfig,
}

impl DownloadManager {
    pub fn new(transport: Arc<dyn HttpTransport>, retry: RetryConfig) -> Self {
        Self { transport, retry }
    }

    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    /// Obtain a validated file at `request.path`.
    #[instrument(skip_all, fields(source = %request.cycle.source, url = %request.url))]
    pub async fn fetch(
        &self,
        request: &FetchRequest,
        validate: Validator,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, FetchError> {
        let url = request.url.as_str();
        let final_path = request.path.as_path();
        let io_error = |e: std::io::Error| FetchError::Io {
            path: final_path.to_path_buf(),
            reason: e.to_string(),
        };

        if final_path.exists() {
            match run_validator(validate, final_path, request).await {
                Ok(Coverage::Complete) => {
                    debug!(path = %final_path.display(), "Raw file already present, skipping download");
                    return Ok(FetchOutcome::Cached(final_path.to_path_buf()));
                }
                Ok(Coverage::Partial(missing)) => {
                    info!(
                        path = %final_path.display(),
                        missing = ?missing,
                        "Cached file lacks requested lead times, refetching"
                    );
                    fs::remove_file(final_path).await.map_err(io_error)?;
                }
                Err(reason) => {
                    warn!(path = %final_path.display(), reason = %reason, "Discarding invalid cached file");
                    fs::remove_file(final_path).await.map_err(io_error)?;
                }
            }
        }

        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        let temp_path = partial_path(final_path);
        let source = request.cycle.source.as_str();

        let max_attempts = self.retry.max_attempts.max(1);
        let mut delay = self.retry.initial_delay();
        let mut last_error = FetchError::Transient {
            url: url.to_string(),
            reason: "no attempt made".to_string(),
        };

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                warn!(
                    error = %last_error,
                    retry = attempt - 1,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Fetch failed, retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
                delay = std::cmp::min(delay * 2, self.retry.max_delay());
            }
            if cancel.is_cancelled() {
                fs::remove_file(&temp_path).await.ok();
                return Err(FetchError::Cancelled { url: url.to_string() });
            }

            counter!("ingest_fetch_attempts_total", "source" => source).increment(1);
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    fs::remove_file(&temp_path).await.ok();
                    return Err(FetchError::Cancelled { url: url.to_string() });
                }
                result = self.transport.download(url, &temp_path) => result,
            };

            last_error = match result {
                Ok(response) if response.is_success() => match run_validator(validate, &temp_path, request).await {
                    Ok(coverage) => {
                        if let Coverage::Partial(missing) = &coverage {
                            warn!(missing = ?missing, "Downloaded file lacks requested lead times");
                        }
                        fs::rename(&temp_path, final_path).await.map_err(io_error)?;
                        info!(
                            path = %final_path.display(),
                            bytes = response.bytes,
                            attempts = attempt,
                            "Download completed"
                        );
                        return Ok(FetchOutcome::Downloaded {
                            path: final_path.to_path_buf(),
                            bytes: response.bytes,
                            attempts: attempt,
                        });
                    }
                    Err(reason) => {
                        fs::remove_file(&temp_path).await.ok();
                        FetchError::Parse {
                            path: final_path.to_path_buf(),
                            reason,
                        }
                    }
                },
                Ok(response) => {
                    fs::remove_file(&temp_path).await.ok();
                    let reason = format!("HTTP {}", response.status);
                    match classify_status(response.status) {
                        StatusClass::Transient => FetchError::Transient {
                            url: url.to_string(),
                            reason,
                        },
                        StatusClass::Permanent => {
                            counter!("ingest_fetch_failures_total", "source" => source, "kind" => "permanent")
                                .increment(1);
                            warn!(status = response.status, "Fetch failed permanently");
                            return Err(FetchError::Permanent {
                                url: url.to_string(),
                                reason,
                            });
                        }
                    }
                }
                Err(TransportError::Io(e)) => {
                    fs::remove_file(&temp_path).await.ok();
                    return Err(io_error(e));
                }
                Err(e) => {
                    fs::remove_file(&temp_path).await.ok();
                    FetchError::Transient {
                        url: url.to_string(),
                        reason: e.to_string(),
                    }
                }
            };
        }

        let kind = match last_error {
            FetchError::Parse { .. } => "parse",
            _ => "transient",
        };
        counter!("ingest_fetch_failures_total", "source" => source, "kind" => kind).increment(1);
        warn!(error = %last_error, attempts = max_attempts, "Fetch failed after all attempts");
        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportResponse;
    use async_trait::async_trait;
    use nwp_common::SourceId;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use test_utils::scratch_dir;

    #[derive(Debug, Clone)]
    enum Reply {
        Status(u16),
        Body(&'static [u8]),
        Timeout,
    }

    /// Plays back replies in order and repeats the last one.
    #[derive(Default)]
    struct Script {
        replies: Mutex<VecDeque<Reply>>,
        requests: AtomicUsize,
    }

    impl Script {
        fn new(replies: &[Reply]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().cloned().collect()),
                requests: AtomicUsize::new(0),
            })
        }

        fn requests(&self) -> usize {
            self.requests.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HttpTransport for Script {
        async fn download(&self, _url: &str, dest: &Path) -> Result<TransportResponse, TransportError> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            let reply = {
                let mut replies = self.replies.lock().unwrap();
                if replies.len() > 1 {
                    replies.pop_front().unwrap()
                } else {
                    replies.front().cloned().unwrap()
                }
            };
            match reply {
                Reply::Status(status) => Ok(TransportResponse { status, bytes: 0 }),
                Reply::Timeout => Err(TransportError::Timeout),
                Reply::Body(body) => {
                    tokio::fs::write(dest, body).await?;
                    Ok(TransportResponse {
                        status: 200,
                        bytes: body.len() as u64,
                    })
                }
            }
        }
    }

    /// Accepts bodies starting with `GRIB`; `GRIB-partial` holds none of the
    /// requested lead times.
    fn starts_with_grib(path: &Path, request: &FetchRequest) -> Result<Coverage, String> {
        let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
        if bytes.starts_with(b"GRIB-partial") {
            Ok(Coverage::Partial(request.lead_times.clone()))
        } else if bytes.starts_with(b"GRIB") {
            Ok(Coverage::Complete)
        } else {
            Err("not a GRIB file".to_string())
        }
    }

    fn manager(script: &Arc<Script>, max_attempts: u32) -> DownloadManager {
        let retry = RetryConfig {
            max_attempts,
            initial_delay_ms: 1,
            max_delay_ms: 4,
            request_timeout_secs: 5,
        };
        DownloadManager::new(script.clone(), retry)
    }

    fn request(dir: &Path) -> FetchRequest {
        FetchRequest {
            cycle: ForecastCycle::parse(SourceId::Gfs, "20250902", 18).unwrap(),
            url: "https://example.test/gfs.t18z.pgrb2.0p25.f006".to_string(),
            path: dir.join("gfs/20250902/18/gfs.t18z.pgrb2.0p25.f006"),
            lead_times: vec![6],
        }
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let dir = scratch_dir();
        let script = Script::new(&[Reply::Status(503), Reply::Timeout, Reply::Body(b"GRIB-ok")]);
        let req = request(dir.path());

        let outcome = manager(&script, 4)
            .fetch(&req, starts_with_grib, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            FetchOutcome::Downloaded {
                path: req.path.clone(),
                bytes: 7,
                attempts: 3
            }
        );
        assert_eq!(script.requests(), 3);
        assert_eq!(std::fs::read(&req.path).unwrap(), b"GRIB-ok");
        assert!(!partial_path(&req.path).exists());
    }

    #[tokio::test]
    async fn test_not_found_is_permanent() {
        let dir = scratch_dir();
        let script = Script::new(&[Reply::Status(404)]);

        let err = manager(&script, 4)
            .fetch(&request(dir.path()), starts_with_grib, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Permanent { .. }));
        assert_eq!(script.requests(), 1);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let dir = scratch_dir();
        let script = Script::new(&[Reply::Status(502)]);

        let err = manager(&script, 3)
            .fetch(&request(dir.path()), starts_with_grib, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Transient { ref reason, .. } if reason == "HTTP 502"));
        assert_eq!(script.requests(), 3);
    }

    #[tokio::test]
    async fn test_unparseable_download_is_discarded_and_retried() {
        let dir = scratch_dir();
        let req = request(dir.path());

        let script = Script::new(&[Reply::Body(b"<html>"), Reply::Body(b"GRIB2")]);
        let outcome = manager(&script, 3)
            .fetch(&req, starts_with_grib, &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(outcome, FetchOutcome::Downloaded { attempts: 2, .. }));

        std::fs::remove_file(&req.path).unwrap();
        let script = Script::new(&[Reply::Body(b"<html>")]);
        let err = manager(&script, 2)
            .fetch(&req, starts_with_grib, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Parse { .. }));
        assert_eq!(script.requests(), 2);
        assert!(!req.path.exists());
        assert!(!partial_path(&req.path).exists());
    }

    #[tokio::test]
    async fn test_valid_existing_file_skips_network() {
        let dir = scratch_dir();
        let req = request(dir.path());
        std::fs::create_dir_all(req.path.parent().unwrap()).unwrap();
        std::fs::write(&req.path, b"GRIB-cached").unwrap();

        let script = Script::new(&[Reply::Status(500)]);
        let outcome = manager(&script, 3)
            .fetch(&req, starts_with_grib, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, FetchOutcome::Cached(req.path.clone()));
        assert_eq!(script.requests(), 0);
    }

    #[tokio::test]
    async fn test_invalid_existing_file_is_refetched() {
        let dir = scratch_dir();
        let req = request(dir.path());
        std::fs::create_dir_all(req.path.parent().unwrap()).unwrap();
        std::fs::write(&req.path, b"trunc").unwrap();

        let script = Script::new(&[Reply::Body(b"GRIB-fresh")]);
        let outcome = manager(&script, 3)
            .fetch(&req, starts_with_grib, &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(outcome, FetchOutcome::Downloaded { .. }));
        assert_eq!(std::fs::read(outcome.path()).unwrap(), b"GRIB-fresh");
    }

    #[tokio::test]
    async fn test_cached_file_missing_lead_times_is_refetched() {
        let dir = scratch_dir();
        let req = request(dir.path());
        std::fs::create_dir_all(req.path.parent().unwrap()).unwrap();
        std::fs::write(&req.path, b"GRIB-partial").unwrap();

        let script = Script::new(&[Reply::Body(b"GRIB-full")]);
        let outcome = manager(&script, 3)
            .fetch(&req, starts_with_grib, &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(outcome, FetchOutcome::Downloaded { attempts: 1, .. }));
        assert_eq!(script.requests(), 1);
        assert_eq!(std::fs::read(&req.path).unwrap(), b"GRIB-full");
    }

    #[tokio::test]
    async fn test_partial_download_is_kept() {
        let dir = scratch_dir();
        let req = request(dir.path());

        let script = Script::new(&[Reply::Body(b"GRIB-partial")]);
        let outcome = manager(&script, 3)
            .fetch(&req, starts_with_grib, &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(outcome, FetchOutcome::Downloaded { attempts: 1, .. }));
        assert!(req.path.exists());
    }

    #[test]
    fn test_coverage_from_missing() {
        assert_eq!(Coverage::from_missing(vec![]), Coverage::Complete);
        assert_eq!(Coverage::from_missing(vec![2]), Coverage::Partial(vec![2]));
    }

    #[tokio::test]
    async fn test_cancelled_fetch_makes_no_request() {
        let dir = scratch_dir();
        let script = Script::new(&[Reply::Body(b"GRIB")]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = manager(&script, 3)
            .fetch(&request(dir.path()), starts_with_grib, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Cancelled { .. }));
        assert_eq!(script.requests(), 0);
    }

    #[test]
    fn test_status_classes() {
        assert_eq!(classify_status(500), StatusClass::Transient);
        assert_eq!(classify_status(503), StatusClass::Transient);
        assert_eq!(classify_status(429), StatusClass::Transient);
        assert_eq!(classify_status(404), StatusClass::Permanent);
        assert_eq!(classify_status(400), StatusClass::Permanent);
        assert_eq!(classify_status(302), StatusClass::Permanent);
    }
}
