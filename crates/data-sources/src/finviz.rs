use analysis_core::{MetricKey, MetricProvider, Payload, ProviderError, RetryPolicy, UNRESOLVED};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;

use crate::http::{build_client, get_text, strip_tags};

const BASE_URL: &str = "https://finviz.com";

static SNAPSHOT_TABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)<table[^>]*class="[^"]*snapshot-table2[^"]*"[^>]*>(.*?)</table>"#).expect("valid regex"));
static CELL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<td[^>]*>(.*?)</td>").expect("valid regex"));

/// Key/value pairs of the quote page's snapshot table.
pub fn parse_snapshot_table(html: &str) -> Result<HashMap<String, String>, ProviderError> {
    let table = SNAPSHOT_TABLE
        .captures(html)
        .and_then(|c| c.get(1))
        .ok_or_else(|| ProviderError::ParseMiss("Finviz snapshot table not found".to_string()))?;

    let cells: Vec<String> = CELL
        .captures_iter(table.as_str())
        .filter_map(|c| c.get(1))
        .map(|m| strip_tags(m.as_str()))
        .collect();

    let data: HashMap<String, String> = cells
        .chunks_exact(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect();

    if data.is_empty() {
        return Err(ProviderError::EmptyPayload);
    }
    Ok(data)
}

/// Buying / selling label from the "Insider Trans" percentage.
pub fn insider_activity(insider_trans: &str) -> &'static str {
    if insider_trans == UNRESOLVED {
        return UNRESOLVED;
    }
    match insider_trans.trim().trim_end_matches('%').parse::<f64>() {
        Ok(p) if p > 0.0 => "Net Insider Buying",
        Ok(p) if p < 0.0 => "Net Insider Selling",
        Ok(_) => "Neutral",
        Err(_) => UNRESOLVED,
    }
}

pub fn snapshot_payload(data: &HashMap<String, String>) -> Payload {
    // cells are passed through as rendered; only absent labels are N/A
    let get = |key: &str| data.get(key).cloned().unwrap_or_else(|| UNRESOLVED.to_string());
    let insider_trans = get("Insider Trans");
    let activity = insider_activity(&insider_trans);

    Payload::new()
        .with_metric(MetricKey::NetInsiderBuying, insider_trans)
        .with_metric(MetricKey::NetInsiderActivity, activity)
        .with_metric(MetricKey::InstitutionalOwnership, get("Inst Own"))
        .with_metric(MetricKey::ShortFloat, get("Short Float"))
}

/// Finviz quote page scraped through the proxy.
pub struct FinvizProvider {
    client: Result<Client, ProviderError>,
    base_url: String,
    retry: RetryPolicy,
}

impl FinvizProvider {
    pub fn new(proxy: Option<&str>, timeout: Duration) -> Self {
        Self {
            client: build_client(proxy, timeout),
            base_url: BASE_URL.to_string(),
            retry: RetryPolicy::scrape(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl MetricProvider for FinvizProvider {
    fn source(&self) -> &'static str {
        "Finviz"
    }

    async fn fetch(&self, ticker: &str) -> Result<Payload, ProviderError> {
        let client = self.client.as_ref().map_err(Clone::clone)?;
        let url = format!("{}/quote.ashx?t={}", self.base_url, ticker.to_uppercase());

        let html = self
            .retry
            .run("finviz", |attempt| {
                tracing::info!("Finviz attempt {} for {}", attempt + 1, ticker);
                get_text(client, &url)
            })
            .await?;

        let data = parse_snapshot_table(&html)?;
        Ok(snapshot_payload(&data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
        <table width="100%" class="js-snapshot-table snapshot-table2 screener_snapshot-table-body">
          <tr class="table-dark-row">
            <td class="snapshot-td2" align="left"><div>Index</div></td>
            <td class="snapshot-td2"><div><b>-</b></div></td>
            <td class="snapshot-td2"><div>Insider Trans</div></td>
            <td class="snapshot-td2"><div><b><span class="color-text is-negative">-0.52%</span></b></div></td>
          </tr>
          <tr>
            <td class="snapshot-td2"><div>Inst Own</div></td>
            <td class="snapshot-td2"><div><b>38.10%</b></div></td>
            <td class="snapshot-td2"><div>Short Float</div></td>
            <td class="snapshot-td2"><div><b>12.40%</b></div></td>
          </tr>
        </table>
        </body></html>"#;

    #[test]
    fn test_parse_snapshot_table() {
        let data = parse_snapshot_table(PAGE).unwrap();
        assert_eq!(data.get("Insider Trans").map(String::as_str), Some("-0.52%"));
        assert_eq!(data.get("Inst Own").map(String::as_str), Some("38.10%"));

        let payload = snapshot_payload(&data);
        assert_eq!(payload.metric(MetricKey::NetInsiderBuying), Some("-0.52%"));
        assert_eq!(payload.metric(MetricKey::NetInsiderActivity), Some("Net Insider Selling"));
        assert_eq!(payload.metric(MetricKey::ShortFloat), Some("12.40%"));
    }

    #[test]
    fn test_missing_table_is_parse_miss() {
        let err = parse_snapshot_table("<html><body>Access denied</body></html>").unwrap_err();
        assert!(matches!(err, ProviderError::ParseMiss(_)));
    }

    #[test]
    fn test_insider_activity() {
        assert_eq!(insider_activity("1.2%"), "Net Insider Buying");
        assert_eq!(insider_activity("-0.1%"), "Net Insider Selling");
        assert_eq!(insider_activity("0.00%"), "Neutral");
        assert_eq!(insider_activity("N/A"), "N/A");
        assert_eq!(insider_activity("garbage"), "N/A");
    }

    #[test]
    fn test_dash_cells_pass_through() {
        let mut data = HashMap::new();
        data.insert("Insider Trans".to_string(), "-".to_string());
        data.insert("Inst Own".to_string(), "-".to_string());
        let payload = snapshot_payload(&data);
        assert_eq!(payload.metric(MetricKey::NetInsiderBuying), Some("-"));
        assert_eq!(payload.metric(MetricKey::NetInsiderActivity), Some("N/A"));
        assert_eq!(payload.metric(MetricKey::InstitutionalOwnership), Some("-"));
        assert_eq!(payload.metric(MetricKey::ShortFloat), Some("N/A"));
    }
}
