use analysis_core::{Backoff, ProviderError, RetryPolicy};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

const BASE_URL: &str = "https://api.polygon.io";
const RATE_LIMIT_ATTEMPTS: u32 = 3;
const RATE_LIMIT_WAIT: Duration = Duration::from_secs(15);

/// Sliding-window rate limiter: at most `max_requests` per `window` duration.
#[derive(Clone)]
pub struct RateLimiter {
    timestamps: Arc<Mutex<VecDeque<Instant>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            timestamps: Arc::new(Mutex::new(VecDeque::new())),
            max_requests: max_requests.max(1),
            window,
        }
    }

    pub async fn acquire(&self) {
        loop {
            let mut ts = self.timestamps.lock().await;
            let now = Instant::now();

            // Remove timestamps outside the window
            while let Some(&front) = ts.front() {
                if now.duration_since(front) >= self.window {
                    ts.pop_front();
                } else {
                    break;
                }
            }

            if ts.len() < self.max_requests {
                ts.push_back(now);
                return;
            }

            // Wait until the oldest request falls out of the window
            let oldest = match ts.front() {
                Some(&oldest) => oldest,
                None => continue,
            };
            let sleep_dur = (oldest + self.window).saturating_duration_since(now) + Duration::from_millis(50);
            drop(ts);
            tracing::debug!("Rate limiter: waiting {:.1}s for Polygon API slot", sleep_dur.as_secs_f64());
            tokio::time::sleep(sleep_dur).await;
        }
    }
}

/// Polygon reference-data client. Only the company lookup is used: the LLM
/// tiers search by the official company name rather than the bare ticker.
#[derive(Clone)]
pub struct PolygonClient {
    api_key: String,
    base_url: String,
    client: Client,
    rate_limiter: RateLimiter,
    retry: RetryPolicy,
}

impl PolygonClient {
    /// `rate_limit` is requests per minute; the free tier allows 5.
    pub fn new(api_key: String, rate_limit: usize) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            api_key,
            base_url: BASE_URL.to_string(),
            client,
            rate_limiter: RateLimiter::new(rate_limit, Duration::from_secs(60)),
            retry: RetryPolicy::new(
                RATE_LIMIT_ATTEMPTS,
                Backoff::Fixed(RATE_LIMIT_WAIT),
                ProviderError::is_rate_limited,
            ),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Send a request with rate limiting; 429 responses are retried.
    async fn send_request(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, ProviderError> {
        let request = builder.build()?;
        let client = &self.client;
        let limiter = &self.rate_limiter;

        self.retry
            .run("polygon", |_| {
                let attempt = request.try_clone();
                async move {
                    let req = attempt.ok_or_else(|| ProviderError::Unavailable("Cannot clone request".to_string()))?;
                    limiter.acquire().await;
                    let response = client.execute(req).await?;
                    if response.status().as_u16() == 429 {
                        return Err(ProviderError::Status(429));
                    }
                    Ok(response)
                }
            })
            .await
    }

    /// Get ticker reference details
    pub async fn get_ticker_details(&self, symbol: &str) -> Result<TickerDetails, ProviderError> {
        let url = format!("{}/v3/reference/tickers/{}", self.base_url, symbol);

        let response = self
            .send_request(self.client.get(&url).query(&[("apiKey", &self.api_key)]))
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::Status(response.status().as_u16()));
        }

        let details_response: TickerDetailsResponse = response.json().await?;
        Ok(details_response.results)
    }

    /// Official company name, or the ticker itself when the lookup fails.
    pub async fn company_name(&self, symbol: &str) -> String {
        if self.api_key.is_empty() {
            return symbol.to_string();
        }
        match self.get_ticker_details(symbol).await {
            Ok(details) if !details.name.trim().is_empty() => {
                tracing::debug!("Resolved {} -> {}", symbol, details.name);
                details.name
            }
            Ok(_) => symbol.to_string(),
            Err(e) => {
                tracing::warn!("Polygon name lookup failed for {}: {}", symbol, e);
                symbol.to_string()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct TickerDetailsResponse {
    results: TickerDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerDetails {
    pub ticker: String,
    pub name: String,
}
