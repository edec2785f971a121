use async_trait::async_trait;
use crate::{Payload, ProviderError};

/// One tier of a metric family's fallback chain.
///
/// Implementations own their authentication, proxying and retry handling,
/// and must report every failure as a `ProviderError` rather than panicking.
#[async_trait]
pub trait MetricProvider: Send + Sync {
    /// Identifier written into the `source` column of produced values.
    fn source(&self) -> &'static str;

    async fn fetch(&self, ticker: &str) -> Result<Payload, ProviderError>;
}
