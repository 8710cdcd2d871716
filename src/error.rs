//! Error kinds for the crawl pipeline.
//!
//! Per-request failures never unwind across a task boundary: every fallible
//! operation in this crate returns a [`CoreError`], and callers decide what
//! to do with it (retry, backoff, drop, blacklist). The supervisor never
//! sees individual errors, only the aggregate signals they feed into queue
//! depths and per-host counters.

use thiserror::Error;

/// The error kinds a crawl worker can observe, mirroring the failure-kind
/// table in the design: transient network trouble, TLS fallback, rate
/// limiting, permanent client errors, unchanged content, quality rejection,
/// parse failures, saturated queues, storage trouble, and fatal startup
/// failures.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("transient network error for {host}: {source}")]
    TransientNetwork {
        host: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("TLS handshake failed for {url}")]
    TlsFailure { url: String },

    #[error("server asked to back off ({status}) for {url}")]
    ServerRateLimit { url: String, status: u16 },

    #[error("client error ({status}) for {url}")]
    ClientError { url: String, status: u16 },

    #[error("content quality rejected: {reason}")]
    ContentQualityReject { reason: String },

    #[error("parse failure in {what}: {reason}")]
    ParseFailure { what: &'static str, reason: String },

    #[error("queue saturated: {queue}")]
    QueueSaturation { queue: &'static str },

    #[error("storage write failed: {0}")]
    StorageWriteFailure(String),

    #[error("startup failure: {0}")]
    Startup(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Sled(#[from] sled::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Url(#[from] url::ParseError),
}

pub type CoreResult<T> = Result<T, CoreError>;
