use analysis_core::ProviderError;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, Proxy, Response};
use std::time::Duration;

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]+>").expect("valid regex"));
static SCRIPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").expect("valid regex"));
static SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\r\n]+").expect("valid regex"));

pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

/// Shared HTTP client construction. `proxy` routes every scheme through the
/// given URL (credentials may be embedded in it).
pub fn build_client(proxy: Option<&str>, timeout: Duration) -> Result<Client, ProviderError> {
    let mut builder = Client::builder()
        .user_agent(BROWSER_USER_AGENT)
        .timeout(timeout);
    if let Some(url) = proxy.filter(|u| !u.trim().is_empty()) {
        let proxy = Proxy::all(url).map_err(|e| ProviderError::NotConfigured(format!("invalid proxy: {}", e)))?;
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|e| ProviderError::Unavailable(e.to_string()))
}

/// Turn non-success statuses into typed failures.
pub fn check_status(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else if status.as_u16() == 429 {
        Err(ProviderError::RateLimited(format!("{} returned 429", response.url().host_str().unwrap_or("upstream"))))
    } else {
        Err(ProviderError::Status(status.as_u16()))
    }
}

/// GET a page body as text.
pub async fn get_text(client: &Client, url: &str) -> Result<String, ProviderError> {
    let response = check_status(client.get(url).send().await?)?;
    let body = response.text().await?;
    if body.trim().is_empty() {
        return Err(ProviderError::EmptyPayload);
    }
    Ok(body)
}

/// Markup removed, entities decoded, whitespace collapsed.
pub fn strip_tags(html: &str) -> String {
    let without_scripts = SCRIPT.replace_all(html, " ");
    let text = TAG.replace_all(&without_scripts, " ");
    SPACES.replace_all(&decode_entities(&text), " ").trim().to_string()
}

/// Decode the most common HTML entities left in scraped cell text.
pub fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_proxy_is_not_configured() {
        let err = build_client(Some("http://[not-closed"), Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }

    #[test]
    fn test_blank_proxy_is_ignored() {
        assert!(build_client(Some("  "), Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_strip_tags() {
        let html = "<div><script>var x = 1;</script><span>Moat Score</span>\n  <b>4</b></div>";
        assert_eq!(strip_tags(html), "Moat Score 4");
    }

    #[test]
    fn test_decode_entities() {
        assert_eq!(decode_entities("S&amp;P&nbsp;500"), "S&P 500");
    }
}
