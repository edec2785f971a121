use analysis_core::{MetricKey, MetricProvider, Payload, ProviderError, RetryPolicy};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use std::time::Duration;

use crate::http::{build_client, get_text, strip_tags};

const BASE_URL: &str = "https://unusualwhales.com";

static IV_RANK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)IV Rank\s*:?\s*(\d+(?:\.\d+)?)\s*%?").expect("valid regex"));

pub fn parse_iv_rank(html: &str) -> Result<String, ProviderError> {
    let text = strip_tags(html);
    IV_RANK
        .captures(&text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| ProviderError::ParseMiss("IV Rank not on page".to_string()))
}

/// Unusual Whales volatility page, scraped through the proxy.
pub struct UnusualWhalesProvider {
    client: Result<Client, ProviderError>,
    base_url: String,
    retry: RetryPolicy,
}

impl UnusualWhalesProvider {
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
impl MetricProvider for UnusualWhalesProvider {
    fn source(&self) -> &'static str {
        "Unusual Whales"
    }

    async fn fetch(&self, ticker: &str) -> Result<Payload, ProviderError> {
        let client = self.client.as_ref().map_err(Clone::clone)?;
        let url = format!("{}/stock/{}/volatility", self.base_url, ticker.to_uppercase());
        let html = self.retry.run("unusual whales", |_| get_text(client, &url)).await?;
        let rank = parse_iv_rank(&html)?;
        Ok(Payload::new().with_metric(MetricKey::IvRank, rank))
    }
}
