/// HTTP fetches with retry, backoff and rate-limit handling.
///
/// Every request goes through one attempt loop: 429 waits for `Retry-After`,
/// 408/5xx and network errors back off exponentially, any other status fails
/// immediately. Successful responses may still trigger a wait when the
/// `X-RateLimit-*` advisory headers report an exhausted bucket.
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, warn};

use media_sync_shared::errors::{FetchError, SyncResult};
use media_sync_shared::models::Manifest;
use media_sync_shared::retry::{classify, RetryClass, RetryPolicy};

/// Timeout for API requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
/// Timeout for manifest fetches.
const MANIFEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for media file downloads.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

const RETRY_AFTER: &str = "retry-after";
const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
const RATE_LIMIT_RESET_AFTER: &str = "x-ratelimit-reset-after";

/// Body and headers of a successful request.
#[derive(Debug)]
pub struct FetchedBody {
    pub bytes: Vec<u8>,
    pub headers: HeaderMap,
}

/// Result of a file download. Failures are reported, never raised, so a
/// sync run can count them and move on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Downloaded(u64),
    Failed(String),
}

impl DownloadOutcome {
    pub fn is_downloaded(&self) -> bool {
        matches!(self, DownloadOutcome::Downloaded(_))
    }
}

pub struct HttpFetcher {
    client: Client,
    policy: RetryPolicy,
    user_agent: String,
}

impl HttpFetcher {
    pub fn new(user_agent: impl Into<String>, policy: RetryPolicy) -> reqwest::Result<Self> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            policy,
            user_agent: user_agent.into(),
        })
    }

    /// GET `url` and return its body, retrying transient failures.
    ///
    /// `extra` headers override the defaults, including `User-Agent`.
    pub async fn request_with_retry(
        &self,
        url: &str,
        extra: &HeaderMap,
    ) -> Result<FetchedBody, FetchError> {
        self.request_with_timeout(url, extra, REQUEST_TIMEOUT).await
    }

    /// Fetch and parse a published media manifest.
    pub async fn fetch_manifest(&self, url: &str) -> SyncResult<Manifest> {
        let body = self.request_with_timeout(url, &HeaderMap::new(), MANIFEST_TIMEOUT).await?;
        Manifest::from_slice(&body.bytes)
    }

    /// Download `url` into `dest`.
    ///
    /// The body is streamed to `dest.part` and renamed into place only once
    /// complete, so an interrupted transfer never looks like an existing file.
    pub async fn download_file_with_retry(&self, url: &str, dest: &Path) -> DownloadOutcome {
        let part = part_path(dest);
        let part_ref: &Path = &part;

        let result = self
            .with_retry("Download", url, &HeaderMap::new(), DOWNLOAD_TIMEOUT, move |resp| {
                write_body(resp, part_ref, url)
            })
            .await;

        match result {
            Ok(bytes) => match tokio::fs::rename(&part, dest).await {
                Ok(()) => DownloadOutcome::Downloaded(bytes),
                Err(e) => {
                    let _ = tokio::fs::remove_file(&part).await;
                    let reason = format!("could not move {:?} into place: {}", part, e);
                    error!("Download failed: {}", reason);
                    DownloadOutcome::Failed(reason)
                }
            },
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                let reason = describe_failure(&e);
                error!("Download failed: {}", reason);
                DownloadOutcome::Failed(reason)
            }
        }
    }

    async fn request_with_timeout(
        &self,
        url: &str,
        extra: &HeaderMap,
        timeout: Duration,
    ) -> Result<FetchedBody, FetchError> {
        self.with_retry("Request", url, extra, timeout, move |resp| async move {
            let headers = resp.headers().clone();
            let bytes = resp.bytes().await.map_err(|e| network_error(url, &e))?;
            Ok(FetchedBody {
                bytes: bytes.to_vec(),
                headers,
            })
        })
        .await
    }

    /// Attempt loop shared by every request kind. `consume` reads a
    /// successful response; a retryable error from it counts as a failed attempt.
    async fn with_retry<T, F, Fut>(
        &self,
        kind: &str,
        url: &str,
        extra: &HeaderMap,
        timeout: Duration,
        mut consume: F,
    ) -> Result<T, FetchError>
    where
        F: FnMut(reqwest::Response) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let max = self.policy.max_attempts.max(1);
        let headers = self.build_headers(extra);
        let mut last_error = None;

        for attempt in 0..max {
            debug!("{} {} (attempt {}/{})", kind, url, attempt + 1, max);
            let sent = self
                .client
                .get(url)
                .headers(headers.clone())
                .timeout(timeout)
                .send()
                .await;

            let delay = match sent {
                Ok(resp) if resp.status().is_success() => {
                    let advisory = self.policy.preemptive_delay(
                        header_str(resp.headers(), RATE_LIMIT_REMAINING),
                        header_str(resp.headers(), RATE_LIMIT_RESET_AFTER),
                    );
                    match consume(resp).await {
                        Ok(value) => {
                            if let Some(wait) = advisory {
                                warn!("Rate limit approaching, waiting {:.1}s...", wait.as_secs_f64());
                                tokio::time::sleep(wait).await;
                            }
                            return Ok(value);
                        }
                        Err(e) if e.is_retryable() => {
                            let delay = self.policy.backoff_delay(attempt);
                            warn!(
                                "{} network error (attempt {}/{}): {}, retrying in {:.1}s...",
                                kind, attempt + 1, max, e, delay.as_secs_f64()
                            );
                            last_error = Some(e);
                            delay
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let err = FetchError::Status {
                        url: url.to_string(),
                        status,
                    };
                    let delay = match classify(status) {
                        RetryClass::RateLimited => {
                            let header = header_str(resp.headers(), RETRY_AFTER);
                            let delay = self.policy.retry_after_delay(header);
                            warn!(
                                "{} rate limited (attempt {}/{}), Retry-After={}, waiting {:.1}s...",
                                kind, attempt + 1, max, header.unwrap_or("none"), delay.as_secs_f64()
                            );
                            delay
                        }
                        RetryClass::Transient => {
                            let delay = self.policy.backoff_delay(attempt);
                            warn!(
                                "{} server error {} (attempt {}/{}), retrying in {:.1}s...",
                                kind, status, attempt + 1, max, delay.as_secs_f64()
                            );
                            delay
                        }
                        RetryClass::NotFound | RetryClass::Fatal => return Err(err),
                    };
                    last_error = Some(err);
                    delay
                }
                Err(e) => {
                    let delay = self.policy.backoff_delay(attempt);
                    warn!(
                        "{} network error (attempt {}/{}): {}, retrying in {:.1}s...",
                        kind, attempt + 1, max, e, delay.as_secs_f64()
                    );
                    last_error = Some(network_error(url, &e));
                    delay
                }
            };

            if attempt + 1 < max {
                tokio::time::sleep(delay).await;
            }
        }

        Err(FetchError::RetriesExhausted {
            url: url.to_string(),
            attempts: max,
            last: Box::new(last_error.unwrap_or_else(|| FetchError::Network {
                url: url.to_string(),
                message: "no attempts made".into(),
            })),
        })
    }

    fn build_headers(&self, extra: &HeaderMap) -> HeaderMap {
        let mut headers = HeaderMap::new();
        match HeaderValue::from_str(&self.user_agent) {
            Ok(ua) => {
                headers.insert(USER_AGENT, ua);
            }
            Err(_) => warn!("Ignoring invalid User-Agent {:?}", self.user_agent),
        }
        for (name, value) in extra {
            headers.insert(name.clone(), value.clone());
        }
        headers
    }
}

/// Stream a response body to `path`. Body read errors are retryable, disk errors are not.
async fn write_body(mut resp: reqwest::Response, path: &Path, url: &str) -> Result<u64, FetchError> {
    let write_err = |source: std::io::Error| FetchError::Write {
        path: path.to_path_buf(),
        source,
    };

    let mut file = tokio::fs::File::create(path).await.map_err(write_err)?;
    let mut written: u64 = 0;
    while let Some(chunk) = resp.chunk().await.map_err(|e| network_error(url, &e))? {
        file.write_all(&chunk).await.map_err(write_err)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(write_err)?;
    Ok(written)
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "download".into());
    name.push(".part");
    dest.with_file_name(name)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn network_error(url: &str, e: &reqwest::Error) -> FetchError {
    let message = if e.is_timeout() {
        format!("timed out: {}", e)
    } else {
        e.to_string()
    };
    FetchError::Network {
        url: url.to_string(),
        message,
    }
}

fn describe_failure(e: &FetchError) -> String {
    if let FetchError::RetriesExhausted { attempts, last, .. } = e {
        return format!("gave up after {} attempts ({})", attempts, last);
    }
    match e.status() {
        Some(404) => "HTTP 404 (file not found or URL expired)".to_string(),
        Some(status) => format!("HTTP {}", status),
        None => e.to_string(),
    }
}
