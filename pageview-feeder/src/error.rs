use http::{HeaderName, StatusCode};
use thiserror::Error;

/// Enumeration of errors that prevent a feeder from being created.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("must configure an event endpoint")]
    MissingEventEndpoint,
    #[error("event endpoint {endpoint:?} is not a valid url")]
    InvalidEventEndpoint {
        endpoint: String,
        source: url::ParseError,
    },
    #[error("must configure at least one domain")]
    NoDomains,
    #[error("{0:?} is not a valid header name")]
    InvalidHeaderName(String),
    #[error("failed to construct http client for event delivery")]
    HttpClient(#[source] reqwest::Error),
}

/// Reasons for not reporting a request. These are not errors of the request
/// itself, they are only logged at debug level.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Ineligible {
    #[error("host {0:?} is not a configured domain")]
    UnlistedHost(String),
    #[error("path {0:?} does not end in a reported extension")]
    UnreportedResource(String),
    #[error("status code {0} is not reported")]
    UnreportedStatus(u16),
    #[error("required remote ip header {0} is missing")]
    MissingIpHeader(HeaderName),
    #[error("remote ip from header is invalid: {0:?}")]
    InvalidIpHeader(String),
    #[error("remote address is unknown")]
    MissingRemoteAddr,
    #[error("failed to split remote address {0:?} into host and port")]
    InvalidRemoteAddr(String),
    #[error("remote ip from remote address is invalid: {0:?}")]
    InvalidRemoteIp(String),
}

/// Enumeration of reasons an event could not be put on the queue.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SubmitError {
    #[error("queue full")]
    QueueFull,
    #[error("queue closed, delivery worker is gone")]
    QueueClosed,
}

/// Enumeration of errors related to delivering one event to the collector.
/// None of them are retried.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to send request to event endpoint: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected status code from event endpoint: {0}")]
    UnexpectedStatus(StatusCode),
}

impl DeliveryError {
    /// Short label for metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            DeliveryError::Serialize(_) => "serialize_error",
            DeliveryError::Request(e) if e.is_timeout() => "timeout",
            DeliveryError::Request(_) => "request_error",
            DeliveryError::UnexpectedStatus(_) => "unexpected_status",
        }
    }
}

/// Enumeration of the ways a run of the delivery worker can end abnormally.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("delivery worker panicked: {0}")]
    Panicked(String),
    #[error("delivery worker task was aborted")]
    Aborted,
}

impl WorkerError {
    /// Whether the run ended because of a fault in the worker. An aborted run only
    /// means the runtime is shutting down.
    pub fn is_fault(&self) -> bool {
        matches!(self, WorkerError::Panicked(_))
    }
}

/// Enumeration of errors when forwarding a request to the upstream.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("invalid upstream url {url:?}")]
    InvalidUpstreamUrl {
        url: String,
        source: url::ParseError,
    },
    #[error("failed to construct http client for upstream")]
    HttpClient(#[source] reqwest::Error),
    #[error("failed to read request body: {0}")]
    RequestBody(#[from] axum::Error),
    #[error("failed to forward request to upstream: {0}")]
    Upstream(#[from] reqwest::Error),
}
