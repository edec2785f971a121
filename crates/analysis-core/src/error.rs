use thiserror::Error;

/// Typed failure surfaced by a single provider call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("Timed out after {0}s")]
    Timeout(u64),

    #[error("Parse miss: {0}")]
    ParseMiss(String),

    #[error("Empty payload")]
    EmptyPayload,

    #[error("Not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProviderError::RateLimited(_) | ProviderError::Status(429))
    }

    /// Network-level or server-side conditions that may clear on their own.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Unavailable(_) | ProviderError::Timeout(_) => true,
            ProviderError::Status(code) => *code == 429 || *code >= 500,
            ProviderError::RateLimited(_) => true,
            ProviderError::ParseMiss(_)
            | ProviderError::EmptyPayload
            | ProviderError::NotConfigured(_) => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout(0)
        } else if let Some(status) = err.status() {
            ProviderError::Status(status.as_u16())
        } else if err.is_decode() {
            ProviderError::ParseMiss(err.to_string())
        } else {
            ProviderError::Unavailable(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::ParseMiss(err.to_string())
    }
}

/// Structural failure of an analysis run, as opposed to a single metric
/// being unresolved.
#[derive(Error, Debug)]
pub enum OrchestrationError {
    #[error("Invalid ticker: {0:?}")]
    InvalidTicker(String),

    #[error("Primary data batch failed for {ticker}: {reason}")]
    PrimaryBatchFailed { ticker: String, reason: String },
}

/// Problems reading a previously persisted report back.
#[derive(Error, Debug, PartialEq)]
pub enum RecordError {
    #[error("Stored report has no DATE row")]
    MissingDate,

    #[error("Invalid stored date: {0}")]
    InvalidDate(String),

    #[error("Unknown metric in stored report: {0}")]
    UnknownMetric(String),
}
