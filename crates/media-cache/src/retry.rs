//! # Retry and Backoff
//!
//! Shared retry primitives: jittered exponential backoff, classification of
//! transport failures into [`NetworkErrorKind`], and a cancellable backoff
//! sleep that respects an overall [`Deadline`].

use std::error::Error as StdError;
use std::io;
use std::time::Duration;

use reqwest::StatusCode;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::DownloadError;

/// Parameters of the backoff curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub base: Duration,
    /// Multiplier applied per attempt
    pub factor: f64,
    /// Upper bound of the unjittered delay
    pub cap: Duration,
    /// Maximum extra fraction added on top of the delay
    pub jitter: f64,
}

impl RetryPolicy {
    pub const fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            factor: 2.0,
            cap,
            jitter: 0.1,
        }
    }

    /// Constants used by the media downloader.
    pub const fn media() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(8))
    }

    /// Delay without jitter: `min(base * factor^attempt, cap)`.
    pub fn raw_delay(&self, attempt: u32) -> Duration {
        let exp = self.factor.powi(attempt.min(i32::MAX as u32) as i32);
        let delay = self.base.as_secs_f64() * exp;
        let capped = delay.min(self.cap.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.cap
        }
    }

    /// Jittered delay before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let jitter = rand::random::<f64>() * self.jitter.max(0.0);
        self.raw_delay(attempt).mul_f64(1.0 + jitter)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::media()
    }
}

/// Overall time budget for one download call.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    pub fn instant(&self) -> Instant {
        self.at
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    pub fn error(&self) -> DownloadError {
        DownloadError::DeadlineExceeded(self.budget)
    }
}

/// Sleep for `delay`, unless cancelled or the sleep would run past `deadline`.
pub async fn sleep_with_deadline(
    delay: Duration,
    deadline: &Deadline,
    cancel: &CancellationToken,
) -> Result<(), DownloadError> {
    if delay >= deadline.remaining() {
        return Err(deadline.error());
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DownloadError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

/// 5xx and 429 are worth another attempt; every other status is final.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Kind of transport failure, as far as retrying is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    Timeout,
    ConnectionRefused,
    ConnectionReset,
    ConnectionFailed,
    DnsFailure,
    Tls,
    Proxy,
    UnexpectedEof,
    DeadlineExceeded,
    Other,
}

impl NetworkErrorKind {
    pub fn is_retryable(self) -> bool {
        !matches!(self, NetworkErrorKind::Other)
    }

    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut => NetworkErrorKind::Timeout,
            io::ErrorKind::ConnectionRefused => NetworkErrorKind::ConnectionRefused,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => NetworkErrorKind::ConnectionReset,
            io::ErrorKind::NotConnected | io::ErrorKind::AddrNotAvailable => {
                NetworkErrorKind::ConnectionFailed
            }
            io::ErrorKind::UnexpectedEof => NetworkErrorKind::UnexpectedEof,
            _ => classify_message(&err.to_string()),
        }
    }
}

// Phrases checked against the lowercased error chain, first match wins.
const NETWORK_PHRASES: &[(&str, NetworkErrorKind)] = &[
    ("connection refused", NetworkErrorKind::ConnectionRefused),
    ("connection reset", NetworkErrorKind::ConnectionReset),
    ("connection closed", NetworkErrorKind::ConnectionReset),
    ("connection aborted", NetworkErrorKind::ConnectionReset),
    ("broken pipe", NetworkErrorKind::ConnectionReset),
    ("deadline exceeded", NetworkErrorKind::DeadlineExceeded),
    ("timed out", NetworkErrorKind::Timeout),
    ("timeout", NetworkErrorKind::Timeout),
    ("dns error", NetworkErrorKind::DnsFailure),
    ("no such host", NetworkErrorKind::DnsFailure),
    ("failed to lookup address", NetworkErrorKind::DnsFailure),
    ("name or service not known", NetworkErrorKind::DnsFailure),
    ("temporary failure in name resolution", NetworkErrorKind::DnsFailure),
    ("certificate", NetworkErrorKind::Tls),
    ("handshake", NetworkErrorKind::Tls),
    ("tls", NetworkErrorKind::Tls),
    ("proxy", NetworkErrorKind::Proxy),
    ("unexpected eof", NetworkErrorKind::UnexpectedEof),
    ("eof", NetworkErrorKind::UnexpectedEof),
    ("network is unreachable", NetworkErrorKind::ConnectionFailed),
    ("no route to host", NetworkErrorKind::ConnectionFailed),
    ("error sending request", NetworkErrorKind::ConnectionFailed),
];

/// Fallback classifier for errors that carry nothing but a message.
pub fn classify_message(message: &str) -> NetworkErrorKind {
    let message = message.to_lowercase();
    NETWORK_PHRASES
        .iter()
        .find(|(phrase, _)| message.contains(phrase))
        .map(|(_, kind)| *kind)
        .unwrap_or(NetworkErrorKind::Other)
}

/// Classify a reqwest error, preferring its structured flags and `io::Error`
/// sources over message matching.
pub fn classify_error(err: &reqwest::Error) -> NetworkErrorKind {
    if err.is_timeout() {
        return NetworkErrorKind::Timeout;
    }

    let mut source = err.source();
    while let Some(inner) = source {
        if let Some(io_err) = inner.downcast_ref::<io::Error>() {
            let kind = NetworkErrorKind::from_io(io_err);
            if kind != NetworkErrorKind::Other {
                return kind;
            }
        }
        source = inner.source();
    }

    match classify_message(&error_chain(err)) {
        NetworkErrorKind::Other if err.is_connect() => NetworkErrorKind::ConnectionFailed,
        kind => kind,
    }
}

fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

/// How a single download attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success { status: u16 },
    Retryable(String),
    Fatal(String),
}

/// One entry of a download's attempt log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryAttempt {
    pub index: u32,
    pub timeout: Duration,
    pub outcome: AttemptOutcome,
}
