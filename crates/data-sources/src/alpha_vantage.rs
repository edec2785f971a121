use analysis_core::{MetricKey, MetricProvider, Payload, ProviderError};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use crate::http::{build_client, check_status};

const BASE_URL: &str = "https://www.alphavantage.co/query";

#[derive(Clone)]
pub struct AlphaVantageClient {
    api_key: String,
    base_url: String,
    client: Client,
}

impl AlphaVantageClient {
    pub fn new(api_key: String, proxy: Option<&str>, timeout: Duration) -> Result<Self, ProviderError> {
        if api_key.trim().is_empty() {
            return Err(ProviderError::NotConfigured("ALPHA_VANTAGE_API_KEY".to_string()));
        }
        Ok(Self {
            api_key,
            base_url: BASE_URL.to_string(),
            client: build_client(proxy, timeout)?,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn query(&self, function: &str, symbol: &str) -> Result<Value, ProviderError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("function", function), ("symbol", symbol), ("apikey", &self.api_key)])
            .send()
            .await?;
        let json: Value = check_status(response)?.json().await?;
        check_body(&json)?;
        Ok(json)
    }

    /// Year-over-year quarterly earnings growth, in percent.
    pub async fn eps_growth(&self, symbol: &str) -> Result<f64, ProviderError> {
        let overview = self.query("OVERVIEW", symbol).await?;
        parse_eps_growth(&overview)
    }

    /// Short plus long term debt minus cash, from the latest annual report.
    pub async fn net_debt(&self, symbol: &str) -> Result<f64, ProviderError> {
        let balance_sheet = self.query("BALANCE_SHEET", symbol).await?;
        parse_net_debt(&balance_sheet)
    }
}

/// Alpha Vantage answers throttled or bad calls with 200 and a message field.
fn check_body(json: &Value) -> Result<(), ProviderError> {
    if let Some(error) = json.get("Error Message").and_then(Value::as_str) {
        return Err(ProviderError::ParseMiss(format!("Alpha Vantage error: {}", error)));
    }
    for key in ["Note", "Information"] {
        if let Some(note) = json.get(key).and_then(Value::as_str) {
            return Err(ProviderError::RateLimited(format!("Alpha Vantage: {}", note)));
        }
    }
    if json.as_object().map_or(true, |o| o.is_empty()) {
        return Err(ProviderError::EmptyPayload);
    }
    Ok(())
}

/// Alpha Vantage numeric fields are strings, with "None" for missing.
fn av_number(value: Option<&Value>) -> Option<f64> {
    let s = value?.as_str()?;
    if s.eq_ignore_ascii_case("none") || s == "-" {
        return None;
    }
    s.parse().ok()
}

pub fn parse_eps_growth(overview: &Value) -> Result<f64, ProviderError> {
    if overview.get("Symbol").is_none() {
        return Err(ProviderError::EmptyPayload);
    }
    av_number(overview.get("QuarterlyEarningsGrowthYOY"))
        .map(|g| g * 100.0)
        .ok_or_else(|| ProviderError::ParseMiss("QuarterlyEarningsGrowthYOY".to_string()))
}

pub fn parse_net_debt(balance_sheet: &Value) -> Result<f64, ProviderError> {
    let report = balance_sheet
        .get("annualReports")
        .and_then(Value::as_array)
        .and_then(|r| r.first())
        .ok_or(ProviderError::EmptyPayload)?;

    let field = |key: &str| av_number(report.get(key)).unwrap_or(0.0);
    let cash = field("cashAndCashEquivalentsAtCarryingValue");
    let debt = field("shortTermDebt") + field("longTermDebt");
    Ok(debt - cash)
}

/// Forward EPS growth tier. The same endpoint is registered twice, direct
/// and through the proxy, so a blocked direct call escalates to the proxied one.
pub struct AlphaVantageEpsProvider {
    client: Result<AlphaVantageClient, ProviderError>,
    route: &'static str,
}

impl AlphaVantageEpsProvider {
    pub fn new(client: Result<AlphaVantageClient, ProviderError>, route: &'static str) -> Self {
        Self { client, route }
    }
}

#[async_trait]
impl MetricProvider for AlphaVantageEpsProvider {
    fn source(&self) -> &'static str {
        "Alpha Vantage"
    }

    async fn fetch(&self, ticker: &str) -> Result<Payload, ProviderError> {
        let client = self.client.as_ref().map_err(Clone::clone)?;
        tracing::info!("Alpha Vantage EPS growth ({}) for {}", self.route, ticker);
        let growth = client.eps_growth(ticker).await?;
        Ok(Payload::new().with_metric(MetricKey::ForwardEpsGrowth, format!("{:.2}%", growth)))
    }
}
