use serde::{Deserialize, Serialize};
use std::{fmt, future::Future, time::Duration};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(1_000);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);
pub const DEFAULT_BACKOFF_FACTOR: u32 = 2;
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_JITTER_PERCENT: u8 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: u32,
    pub attempt_timeout: Duration,
    /// Upper bound of the random jitter, as a percentage of the computed delay.
    pub jitter_percent: u8,
    /// Overall budget across all attempts and sleeps.
    pub deadline: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            jitter_percent: DEFAULT_JITTER_PERCENT,
            deadline: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkErrorKind {
    ConnectionTimeout,
    RateLimited,
    ServerError,
    InvalidResponse,
    NetworkDown,
    ProviderError,
}

impl NetworkErrorKind {
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout | Self::RateLimited | Self::ServerError | Self::NetworkDown
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionTimeout => "connection_timeout",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::InvalidResponse => "invalid_response",
            Self::NetworkDown => "network_down",
            Self::ProviderError => "provider_error",
        }
    }
}

impl fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A JSON-RPC error object returned by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("rpc fault {code}: {message}")]
pub struct RpcFault {
    pub code: i64,
    pub message: String,
}

impl RpcFault {
    pub fn kind(&self) -> NetworkErrorKind {
        match self.code {
            429 | -32005 => NetworkErrorKind::RateLimited,
            -32603 => NetworkErrorKind::ServerError,
            -32700 => NetworkErrorKind::InvalidResponse,
            _ => match classify_message(&self.message) {
                NetworkErrorKind::InvalidResponse => NetworkErrorKind::ProviderError,
                k => k,
            },
        }
    }
}

/// A classified failure, as reported by the retry layer.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct NetworkError {
    pub kind: NetworkErrorKind,
    pub message: String,
}

impl NetworkError {
    pub fn from_report(err: &eyre::Report) -> Self {
        Self {
            kind: classify(err),
            message: format!("{err:#}"),
        }
    }
}

fn classify_status(status: reqwest::StatusCode) -> NetworkErrorKind {
    match status.as_u16() {
        429 => NetworkErrorKind::RateLimited,
        408 | 504 => NetworkErrorKind::ConnectionTimeout,
        500..=599 => NetworkErrorKind::ServerError,
        _ => NetworkErrorKind::ProviderError,
    }
}

fn classify_reqwest(e: &reqwest::Error) -> NetworkErrorKind {
    if e.is_timeout() {
        NetworkErrorKind::ConnectionTimeout
    } else if let Some(status) = e.status() {
        classify_status(status)
    } else if e.is_connect() || e.is_request() {
        NetworkErrorKind::NetworkDown
    } else if e.is_decode() || e.is_body() {
        NetworkErrorKind::InvalidResponse
    } else {
        NetworkErrorKind::ProviderError
    }
}

fn classify_io(e: &std::io::Error) -> Option<NetworkErrorKind> {
    use std::io::ErrorKind;
    match e.kind() {
        ErrorKind::TimedOut => Some(NetworkErrorKind::ConnectionTimeout),
        ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::BrokenPipe => Some(NetworkErrorKind::NetworkDown),
        ErrorKind::InvalidData | ErrorKind::UnexpectedEof => Some(NetworkErrorKind::InvalidResponse),
        _ => None,
    }
}

/// Last-resort classification from error text. Status codes only count as whole tokens,
/// so amounts and nonces in provider messages do not look like HTTP failures.
pub fn classify_message(message: &str) -> NetworkErrorKind {
    let m = message.to_ascii_lowercase();
    let words: Vec<&str> = m
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let has = |needles: &[&str]| needles.iter().any(|n| m.contains(n));
    let has_word = |needles: &[&str]| needles.iter().any(|n| words.contains(n));
    if has(&["timeout", "timed out", "deadline exceeded"]) {
        NetworkErrorKind::ConnectionTimeout
    } else if has_word(&["429"]) || has(&["rate limit", "too many requests", "quota exceeded"]) {
        NetworkErrorKind::RateLimited
    } else if has_word(&["500", "502", "503", "504"])
        || has(&["internal server error", "bad gateway", "service unavailable"])
    {
        NetworkErrorKind::ServerError
    } else if has_word(&["dns", "offline"])
        || has(&[
            "connection refused",
            "connection reset",
            "network unreachable",
            "network is down",
            "network error",
            "host unreachable",
        ])
    {
        NetworkErrorKind::NetworkDown
    } else if has(&["invalid json", "unexpected token", "malformed", "parse error", "decode"]) {
        NetworkErrorKind::InvalidResponse
    } else {
        NetworkErrorKind::ProviderError
    }
}

/// Classify by walking the error chain for typed causes before falling back to text.
pub fn classify(err: &eyre::Report) -> NetworkErrorKind {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<reqwest::Error>() {
            return classify_reqwest(e);
        }
        if let Some(f) = cause.downcast_ref::<RpcFault>() {
            return f.kind();
        }
        if cause.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
            return NetworkErrorKind::ConnectionTimeout;
        }
        if let Some(k) = cause.downcast_ref::<std::io::Error>().and_then(classify_io) {
            return k;
        }
    }
    classify_message(&format!("{err:#}"))
}

/// `initial_delay * backoff_factor^(attempt-1)`, capped at `max_delay`. No jitter.
pub fn backoff_delay(cfg: &RetryConfig, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1);
    let factor = u64::from(cfg.backoff_factor.max(1)).saturating_pow(exp);
    let base_ms = u64::try_from(cfg.initial_delay.as_millis()).unwrap_or(u64::MAX);
    let max_ms = u64::try_from(cfg.max_delay.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
}

/// Add `roll`-driven jitter in `[0, percent% of delay]`.
fn add_jitter(delay: Duration, percent: u8, roll: u64) -> Duration {
    let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    let span = ms.saturating_mul(u64::from(percent)) / 100;
    if span == 0 {
        return delay;
    }
    let extra = roll % span.saturating_add(1);
    delay.saturating_add(Duration::from_millis(extra))
}

fn jittered_delay(cfg: &RetryConfig, attempt: u32) -> Duration {
    add_jitter(
        backoff_delay(cfg, attempt),
        cfg.jitter_percent,
        rand::random::<u64>(),
    )
}

/// One failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub kind: NetworkErrorKind,
    pub message: String,
    /// Sleep taken after this attempt, if another one followed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
}

/// Bookkeeping for one `execute_with_retry` call.
#[derive(Debug, Clone)]
pub struct RetryableOperation {
    pub attempt_count: u32,
    pub last_error: Option<NetworkError>,
    pub started_at: Instant,
}

impl RetryableOperation {
    pub fn start() -> Self {
        Self {
            attempt_count: 0,
            last_error: None,
            started_at: Instant::now(),
        }
    }
}

/// Result of a retried operation. Failures are reported here, never raised.
#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<NetworkError>,
    pub attempts: u32,
    pub duration: Duration,
    pub history: Vec<AttemptRecord>,
    /// Endpoint that produced the outcome, when run through a provider registry.
    pub endpoint: Option<String>,
}

impl<T> RetryOutcome<T> {
    pub fn into_result(self) -> Result<T, NetworkError> {
        match (self.data, self.error) {
            (Some(v), _) => Ok(v),
            (None, Some(e)) => Err(e),
            (None, None) => Err(NetworkError {
                kind: NetworkErrorKind::ProviderError,
                message: "operation produced no result".to_owned(),
            }),
        }
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable class, or the attempt
/// budget or deadline runs out. Dropping the returned future cancels the call.
pub async fn execute_with_retry<T, F, Fut>(mut operation: F, cfg: &RetryConfig) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = eyre::Result<T>>,
{
    let max_attempts = cfg.max_retries.max(1);
    let mut op = RetryableOperation::start();
    let mut history = Vec::new();

    loop {
        op.attempt_count = op.attempt_count.saturating_add(1);
        let attempt = op.attempt_count;

        let remaining = cfg
            .deadline
            .map(|d| d.saturating_sub(op.started_at.elapsed()));
        let budget = remaining.map_or(cfg.attempt_timeout, |r| r.min(cfg.attempt_timeout));

        let err = match tokio::time::timeout(budget, operation()).await {
            Ok(Ok(data)) => {
                debug!(attempt, "operation succeeded");
                return RetryOutcome {
                    success: true,
                    data: Some(data),
                    error: None,
                    attempts: attempt,
                    duration: op.started_at.elapsed(),
                    history,
                    endpoint: None,
                };
            }
            Ok(Err(e)) => NetworkError::from_report(&e),
            Err(_elapsed) => NetworkError {
                kind: NetworkErrorKind::ConnectionTimeout,
                message: format!("attempt timed out after {}ms", budget.as_millis()),
            },
        };

        let mut record = AttemptRecord {
            attempt,
            kind: err.kind,
            message: err.message.clone(),
            delay_ms: None,
        };

        let delay = jittered_delay(cfg, attempt);
        let out_of_time = cfg
            .deadline
            .is_some_and(|d| op.started_at.elapsed().saturating_add(delay) >= d);
        let give_up = !err.kind.is_retryable() || attempt >= max_attempts || out_of_time;

        if give_up {
            warn!(attempt, kind = %err.kind, error = %err.message, "operation failed");
            history.push(record);
            op.last_error = Some(err);
            break;
        }

        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        warn!(attempt, kind = %err.kind, delay_ms, "attempt failed; retrying");
        record.delay_ms = Some(delay_ms);
        history.push(record);
        op.last_error = Some(err);
        tokio::time::sleep(delay).await;
    }

    RetryOutcome {
        success: false,
        data: None,
        error: op.last_error,
        attempts: op.attempt_count,
        duration: op.started_at.elapsed(),
        history,
        endpoint: None,
    }
}
