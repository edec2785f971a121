use analysis_core::{MetricKey, MetricProvider, Payload, ProviderError, RetryPolicy};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use std::time::Duration;

use crate::http::{build_client, get_text, strip_tags};

const BASE_URL: &str = "https://www.gurufocus.com";

static MOAT_SCORE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Moat Score\D{0,40}?(\d+(?:\.\d+)?)").expect("valid regex"));

pub fn parse_moat_score(html: &str) -> Result<String, ProviderError> {
    let text = strip_tags(html);
    MOAT_SCORE
        .captures(&text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| ProviderError::ParseMiss("Moat Score not on page".to_string()))
}

/// GuruFocus summary page scrape. One attempt; a miss escalates to the LLM tier.
pub struct GuruFocusMoatProvider {
    client: Result<Client, ProviderError>,
    base_url: String,
    retry: RetryPolicy,
}

impl GuruFocusMoatProvider {
    pub fn new(proxy: Option<&str>, timeout: Duration) -> Self {
        Self {
            client: build_client(proxy, timeout),
            base_url: BASE_URL.to_string(),
            retry: RetryPolicy::scrape().with_max_attempts(1),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl MetricProvider for GuruFocusMoatProvider {
    fn source(&self) -> &'static str {
        "GuruFocus"
    }

    async fn fetch(&self, ticker: &str) -> Result<Payload, ProviderError> {
        let client = self.client.as_ref().map_err(Clone::clone)?;
        let url = format!("{}/stock/{}/summary", self.base_url, ticker.to_uppercase());
        let html = self.retry.run("gurufocus", |_| get_text(client, &url)).await?;
        let score = parse_moat_score(&html)?;
        tracing::info!("GuruFocus moat score for {}: {}", ticker, score);
        Ok(Payload::new().with_metric(MetricKey::MoatScore, score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[test]
    fn test_parse_moat_score_from_table_row() {
        let html = r#"<table><tr><td class="label">Moat Score</td><td><span>4</span>/10</td></tr></table>"#;
        assert_eq!(parse_moat_score(html).unwrap(), "4");
    }

    #[test]
    fn test_missing_score() {
        assert!(matches!(
            parse_moat_score("<html>Please log in</html>"),
            Err(ProviderError::ParseMiss(_))
        ));
    }

    #[tokio::test]
    #[ignore = "requires loopback networking"]
    async fn scrape_returns_payload() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/stock/ACME/summary");
            then.status(200).body("<tr><td>Moat Score</td><td>3</td></tr>");
        });

        let provider = GuruFocusMoatProvider::new(None, Duration::from_secs(5)).with_base_url(server.base_url());
        let payload = provider.fetch("acme").await.unwrap();
        assert_eq!(payload.metric(MetricKey::MoatScore), Some("3"));
    }

    #[tokio::test]
    #[ignore = "requires loopback networking"]
    async fn blocked_page_is_status_error() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/stock/ACME/summary");
            then.status(403);
        });

        let provider = GuruFocusMoatProvider::new(None, Duration::from_secs(5)).with_base_url(server.base_url());
        assert_eq!(provider.fetch("ACME").await, Err(ProviderError::Status(403)));
        mock.assert_hits(1);
    }
}
