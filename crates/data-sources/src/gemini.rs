//! Gemini grounded-search tiers.
//!
//! Every request enables the `google_search` tool so answers are grounded in
//! live results. The company's official name is looked up through Polygon
//! first; searching by bare ticker gives noticeably worse answers.

use analysis_core::{
    Backoff, MetricKey, MetricProvider, NoteKind, Payload, ProviderError, RetryPolicy,
};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use polygon_client::PolygonClient;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::http::{build_client, check_status};

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

static INTEGER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid regex"));
static LABELLED_SCORE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)score\s*(?:of|is|:|=)?\s*(\d+)\b(?:\s*/\s*10)?").expect("valid regex"));
static SCALE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\d+\s*(?:-|–|to)\s*\d+|/\s*10\b").expect("valid regex"));
static DECIMAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("valid regex"));
static JSON_OBJECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"));

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    system_instruction: Content<'a>,
    tools: Vec<Tool>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct Tool {
    google_search: GoogleSearch,
}

#[derive(Debug, Serialize)]
struct GoogleSearch {}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateResponse {
    /// Text of the first candidate. Grounded answers may be split over
    /// several parts.
    fn into_text(self) -> Result<String, ProviderError> {
        let text: String = self
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(ProviderError::EmptyPayload);
        }
        Ok(text)
    }
}

/// Single-shot `generateContent` client. Retrying is left to the providers.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    api_key: String,
    model: String,
    base_url: String,
    client: Client,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String, timeout: Duration) -> Result<Self, ProviderError> {
        if api_key.trim().is_empty() {
            return Err(ProviderError::NotConfigured("GEMINI_API_KEY".to_string()));
        }
        let model = if model.trim().is_empty() { DEFAULT_MODEL.to_string() } else { model };
        Ok(Self {
            api_key,
            model,
            base_url: BASE_URL.to_string(),
            client: build_client(None, timeout)?,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub async fn generate(&self, system: &str, prompt: &str) -> Result<String, ProviderError> {
        let url = format!("{}/{}:generateContent", self.base_url, self.model);
        let request = GenerateRequest {
            contents: vec![Content { parts: vec![Part { text: prompt }] }],
            system_instruction: Content { parts: vec![Part { text: system }] },
            tools: vec![Tool { google_search: GoogleSearch {} }],
        };

        let response = self
            .client
            .post(&url)
            .query(&[("key", &self.api_key)])
            .json(&request)
            .send()
            .await?;
        let body: GenerateResponse = check_status(response)?.json().await?;
        body.into_text()
    }
}

/// Client, name lookup and retry policy shared by the grounded-search tiers.
struct GroundedSearch {
    client: Result<GeminiClient, ProviderError>,
    names: Option<PolygonClient>,
    retry: RetryPolicy,
}

impl GroundedSearch {
    fn new(client: Result<GeminiClient, ProviderError>, names: Option<PolygonClient>, retry: RetryPolicy) -> Self {
        Self { client, names, retry }
    }

    async fn company_name(&self, ticker: &str) -> String {
        match &self.names {
            Some(polygon) => polygon.company_name(ticker).await,
            None => ticker.to_string(),
        }
    }

    /// Ask and parse inside one retried unit, so a policy that retries
    /// malformed answers gets a fresh completion each time.
    async fn ask<T>(
        &self,
        label: &str,
        system: &str,
        prompt: &str,
        parse: fn(&str) -> Result<T, ProviderError>,
    ) -> Result<T, ProviderError> {
        let client = self.client.as_ref().map_err(Clone::clone)?;
        self.retry
            .run(label, |_| async move {
                let text = client.generate(system, prompt).await?;
                parse(&text)
            })
            .await
    }
}

/// Moat score from the answer: a "score: N" label wins, otherwise the last
/// integer in range once any echoed "0-10" scale is removed.
pub fn parse_moat_answer(text: &str) -> Result<String, ProviderError> {
    if let Some(m) = LABELLED_SCORE.captures(text).and_then(|c| c.get(1)) {
        return Ok(m.as_str().to_string());
    }
    let without_scale = SCALE.replace_all(text, " ");
    INTEGER
        .find_iter(&without_scale)
        .filter(|m| m.as_str().parse::<u32>().map_or(false, |n| n <= 10))
        .last()
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| ProviderError::ParseMiss(format!("no moat score in {:?}", text.trim())))
}

/// First number in the answer, unless the model reported NOT_FOUND.
pub fn parse_iv_rank_answer(text: &str) -> Result<String, ProviderError> {
    if text.to_uppercase().contains("NOT_FOUND") {
        return Err(ProviderError::ParseMiss("IV rank not found".to_string()));
    }
    DECIMAL
        .find(text)
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| ProviderError::ParseMiss(format!("no IV rank in {:?}", text.trim())))
}

const PROFILE_HEADERS: [&str; 6] = [
    "Company Description:",
    "Value Proposition:",
    "Moat Analysis:",
    "CEO Ownership:",
    "Final Classification:",
    "Source:",
];

/// Text after `header` up to the first blank line or the next known header.
fn section(text: &str, header: &str) -> Option<String> {
    let start = text.find(header)? + header.len();
    let rest = &text[start..];

    let mut end = rest.find("\n\n").unwrap_or(rest.len());
    for next in PROFILE_HEADERS.iter().chain(["Points:"].iter()) {
        if let Some(pos) = rest.find(&format!("\n{}", next)) {
            end = end.min(pos);
        }
    }

    let value = rest[..end].trim().trim_matches('*').trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Split the structured business-profile answer into metrics and notes.
pub fn parse_business_profile(text: &str) -> Result<Payload, ProviderError> {
    let mut payload = Payload::new();
    if let Some(ownership) = section(text, "Ownership Percentage:") {
        payload.push_metric(MetricKey::CeoOwnership, ownership);
    }
    if let Some(category) = section(text, "Category:") {
        payload.push_metric(MetricKey::BusinessModel, category);
    }
    let notes = [
        (NoteKind::CompanyDescription, "Company Description:"),
        (NoteKind::ValueProposition, "Value Proposition:"),
        (NoteKind::MoatAnalysis, "Moat Analysis:"),
    ];
    for (kind, header) in notes {
        if let Some(body) = section(text, header) {
            payload.push_note(kind, body);
        }
    }

    if payload.is_empty() {
        return Err(ProviderError::ParseMiss("business profile has none of the expected sections".to_string()));
    }
    Ok(payload)
}

#[derive(Debug, Default, Deserialize)]
struct RiskRewards {
    #[serde(default)]
    company: String,
    #[serde(default)]
    rewards: Vec<String>,
    #[serde(default)]
    risks: Vec<String>,
}

/// The answer's embedded JSON object, tolerating markdown fences and prose
/// around it.
pub fn parse_risk_rewards(text: &str) -> Result<Payload, ProviderError> {
    let json = JSON_OBJECT
        .find(text)
        .map(|m| m.as_str())
        .ok_or_else(|| ProviderError::ParseMiss("no JSON object in answer".to_string()))?;
    let parsed: RiskRewards = serde_json::from_str(json)?;

    if parsed.risks.is_empty() && parsed.rewards.is_empty() {
        return Err(ProviderError::EmptyPayload);
    }
    tracing::debug!(
        "{}: {} risks, {} rewards",
        parsed.company,
        parsed.risks.len(),
        parsed.rewards.len()
    );
    Ok(Payload::new()
        .with_note(NoteKind::Risks, parsed.risks.join("\n"))
        .with_note(NoteKind::Rewards, parsed.rewards.join("\n")))
}

const ANALYST: &str = "You are a fundamental equity analyst. Use Google Search for current data \
     and follow the output format exactly.";

pub struct GeminiMoatProvider {
    search: GroundedSearch,
}

impl GeminiMoatProvider {
    pub fn new(client: Result<GeminiClient, ProviderError>, names: Option<PolygonClient>) -> Self {
        Self {
            search: GroundedSearch::new(client, names, RetryPolicy::llm()),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.search.retry = retry;
        self
    }
}

#[async_trait]
impl MetricProvider for GeminiMoatProvider {
    fn source(&self) -> &'static str {
        "Gemini"
    }

    async fn fetch(&self, ticker: &str) -> Result<Payload, ProviderError> {
        let name = self.search.company_name(ticker).await;
        let system = "You are a financial data assistant. Find the GuruFocus Moat Score (0-10) for the \
                      requested stock. Reply with the integer only, or N/A if it cannot be found.";
        let prompt = format!("GuruFocus Moat Score for {} ({})", name, ticker);
        let score = self.search.ask("gemini moat", system, &prompt, parse_moat_answer).await?;
        Ok(Payload::new().with_metric(MetricKey::MoatScore, score))
    }
}

pub struct GeminiIvRankProvider {
    search: GroundedSearch,
}

impl GeminiIvRankProvider {
    pub fn new(client: Result<GeminiClient, ProviderError>, names: Option<PolygonClient>) -> Self {
        Self {
            search: GroundedSearch::new(client, names, RetryPolicy::llm()),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.search.retry = retry;
        self
    }
}

#[async_trait]
impl MetricProvider for GeminiIvRankProvider {
    fn source(&self) -> &'static str {
        "Gemini"
    }

    async fn fetch(&self, ticker: &str) -> Result<Payload, ProviderError> {
        let name = self.search.company_name(ticker).await;
        let system = "You are an options data assistant. Reply with the current implied volatility rank \
                      as a bare number, or NOT_FOUND.";
        let prompt = format!(
            "Current IV Rank of {} (ticker {}) from Unusual Whales, Barchart or Market Chameleon.",
            name, ticker
        );
        let rank = self.search.ask("gemini iv rank", system, &prompt, parse_iv_rank_answer).await?;
        Ok(Payload::new().with_metric(MetricKey::IvRank, rank))
    }
}

/// Company description, value proposition, moat analysis, CEO ownership and
/// business-model classification from a single structured answer.
pub struct BusinessProfileProvider {
    search: GroundedSearch,
}

impl BusinessProfileProvider {
    pub fn new(client: Result<GeminiClient, ProviderError>, names: Option<PolygonClient>) -> Self {
        Self {
            search: GroundedSearch::new(client, names, RetryPolicy::llm()),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.search.retry = retry;
        self
    }
}

fn business_profile_prompt(name: &str, ticker: &str) -> String {
    format!(
        "Analyze {name} (Ticker: {ticker}).\n\
         1. One investor-focused company description paragraph, 70-110 words, including the founding year.\n\
         2. The value proposition to customers, 70-100 words.\n\
         3. An economic moat analysis based on GuruFocus data, 70-100 words, structural drivers only.\n\
         4. The most recent CEO ownership percentage from proxy filings or reputable aggregators, \
            never 0%.\n\
         5. Exactly one business-model category, first that applies: Mission-critical / infrastructure; \
            High switching cost SaaS / platform; Cyclical / low differentiation; Competitive commodity.\n\n\
         Output format (strict):\n\
         Company Description:\n<text>\n\n\
         Value Proposition:\n<text>\n\n\
         Moat Analysis:\n<text>\n\n\
         CEO Ownership:\n\
         Ownership Percentage: <number followed by %>\n\
         Source: <brief source reference>\n\n\
         Final Classification:\n\
         Category: <category name only>\n\
         Points: <numeric value>\n\
         Confidence Level: <High / Medium / Low>"
    )
}

#[async_trait]
impl MetricProvider for BusinessProfileProvider {
    fn source(&self) -> &'static str {
        "Gemini"
    }

    async fn fetch(&self, ticker: &str) -> Result<Payload, ProviderError> {
        let name = self.search.company_name(ticker).await;
        let prompt = business_profile_prompt(&name, ticker);
        let payload = self
            .search
            .ask("gemini business profile", ANALYST, &prompt, parse_business_profile)
            .await?;
        tracing::info!("Business profile for {}: {} fields", ticker, payload.len());
        Ok(payload)
    }
}

/// Simply Wall St style risks and rewards, returned as JSON.
pub struct RiskRewardsProvider {
    search: GroundedSearch,
}

impl RiskRewardsProvider {
    pub fn new(client: Result<GeminiClient, ProviderError>, names: Option<PolygonClient>) -> Self {
        let retry = RetryPolicy::new(3, Backoff::Fixed(Duration::from_secs(2)), |err| {
            err.is_transient() || matches!(err, ProviderError::ParseMiss(_) | ProviderError::EmptyPayload)
        });
        Self {
            search: GroundedSearch::new(client, names, retry),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.search.retry = retry;
        self
    }
}

#[async_trait]
impl MetricProvider for RiskRewardsProvider {
    fn source(&self) -> &'static str {
        "Gemini"
    }

    async fn fetch(&self, ticker: &str) -> Result<Payload, ProviderError> {
        let name = self.search.company_name(ticker).await;
        let system = "You are a financial analyst. Search Simply Wall St for the company's current \
                      risks and rewards. Output only a raw JSON object, no markdown, of the form \
                      {\"company\": string, \"rewards\": [string], \"risks\": [string]}.";
        let prompt = format!("Risks and rewards for {} ({}) on Simply Wall St.", name, ticker);
        self.search
            .ask("gemini risks & rewards", system, &prompt, parse_risk_rewards)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    const PROFILE: &str = "Company Description:\nAcme makes anvils. Founded in 1920.\n\n\
        Value Proposition:\nReliable anvils, delivered fast.\n\n\
        Moat Analysis:\nModest brand strength.\n\n\
        CEO Ownership:\nOwnership Percentage: 4.5%\nSource: DEF 14A\n\n\
        Final Classification:\nCategory: **Mission-critical / infrastructure**\nPoints: 15\nConfidence Level: High";

    #[test]
    fn test_parse_business_profile() {
        let payload = parse_business_profile(PROFILE).unwrap();
        assert_eq!(payload.metric(MetricKey::CeoOwnership), Some("4.5%"));
        assert_eq!(payload.metric(MetricKey::BusinessModel), Some("Mission-critical / infrastructure"));
        assert_eq!(
            payload.note(NoteKind::CompanyDescription),
            Some("Acme makes anvils. Founded in 1920.")
        );
        assert_eq!(payload.note(NoteKind::ValueProposition), Some("Reliable anvils, delivered fast."));
        assert_eq!(payload.note(NoteKind::MoatAnalysis), Some("Modest brand strength."));
    }

    #[test]
    fn test_profile_sections_without_blank_lines() {
        let text = "Company Description: Acme.\nValue Proposition: Anvils.\nMoat Analysis: Thin.\n\
                    CEO Ownership:\nOwnership Percentage: 12%\nFinal Classification:\nCategory: Competitive commodity";
        let payload = parse_business_profile(text).unwrap();
        assert_eq!(payload.note(NoteKind::CompanyDescription), Some("Acme."));
        assert_eq!(payload.metric(MetricKey::CeoOwnership), Some("12%"));
        assert_eq!(payload.metric(MetricKey::BusinessModel), Some("Competitive commodity"));
    }

    #[test]
    fn test_unstructured_profile_is_parse_miss() {
        assert!(matches!(
            parse_business_profile("I could not find that company."),
            Err(ProviderError::ParseMiss(_))
        ));
    }

    #[test]
    fn test_parse_risk_rewards_inside_fence() {
        let text = "```json\n{\"company\": \"Acme\", \"rewards\": [\"Cheap\", \"Growing\"], \"risks\": [\"Dilution\"]}\n```";
        let payload = parse_risk_rewards(text).unwrap();
        assert_eq!(payload.note(NoteKind::Rewards), Some("Cheap\nGrowing"));
        assert_eq!(payload.note(NoteKind::Risks), Some("Dilution"));

        assert!(matches!(parse_risk_rewards("no json here"), Err(ProviderError::ParseMiss(_))));
        assert_eq!(
            parse_risk_rewards("{\"company\": \"Acme\", \"rewards\": [], \"risks\": []}"),
            Err(ProviderError::EmptyPayload)
        );
    }

    #[test]
    fn test_short_answers() {
        assert_eq!(parse_moat_answer("Moat score: 7").unwrap(), "7");
        assert_eq!(parse_moat_answer("The GuruFocus Moat Score (0-10) for Acme is 7.").unwrap(), "7");
        assert_eq!(parse_moat_answer("Acme's moat score is 4/10").unwrap(), "4");
        assert_eq!(parse_moat_answer("Rated 6/10 on a 0 to 10 scale").unwrap(), "6");
        assert!(parse_moat_answer("N/A").is_err());
        assert_eq!(parse_iv_rank_answer("23.4").unwrap(), "23.4");
        assert!(parse_iv_rank_answer("NOT_FOUND").is_err());
    }

    #[test]
    fn test_missing_key_is_not_configured() {
        let err = GeminiClient::new(" ".into(), DEFAULT_MODEL.into(), Duration::from_secs(5)).unwrap_err();
        assert_eq!(err, ProviderError::NotConfigured("GEMINI_API_KEY".to_string()));
    }

    #[test]
    fn test_response_text_joins_parts() {
        let body: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": [{"text": "Moat "}, {"text": "score 6"}]}}]
        }))
        .unwrap();
        assert_eq!(body.into_text().unwrap(), "Moat score 6");

        let empty: GenerateResponse = serde_json::from_value(json!({"candidates": []})).unwrap();
        assert_eq!(empty.into_text(), Err(ProviderError::EmptyPayload));
    }

    #[test]
    fn test_request_shape() {
        let request = GenerateRequest {
            contents: vec![Content { parts: vec![Part { text: "q" }] }],
            system_instruction: Content { parts: vec![Part { text: "s" }] },
            tools: vec![Tool { google_search: GoogleSearch {} }],
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["systemInstruction"]["parts"][0]["text"], "s");
        assert_eq!(value["tools"][0], json!({"google_search": {}}));
    }

    #[tokio::test]
    #[ignore = "requires loopback networking"]
    async fn moat_provider_retries_rate_limit() {
        let server = MockServer::start();
        let mut limited = server.mock(|when, then| {
            when.method(POST).path("/models/gemini-test:generateContent");
            then.status(429);
        });

        let client = GeminiClient::new("test-key".into(), "gemini-test".into(), Duration::from_secs(5))
            .map(|c| c.with_base_url(server.url("/models")));
        let provider = GeminiMoatProvider::new(client, None)
            .with_retry(RetryPolicy::llm().with_max_attempts(2).with_backoff(Backoff::Fixed(Duration::ZERO)));
        assert!(provider.fetch("ACME").await.unwrap_err().is_rate_limited());
        limited.assert_hits(2);
        limited.delete();

        server.mock(|when, then| {
            when.method(POST)
                .path("/models/gemini-test:generateContent")
                .query_param("key", "test-key");
            then.status(200).json_body(json!({
                "candidates": [{"content": {"parts": [{"text": "8"}]}}]
            }));
        });
        let payload = provider.fetch("ACME").await.unwrap();
        assert_eq!(payload.metric(MetricKey::MoatScore), Some("8"));
    }
}
