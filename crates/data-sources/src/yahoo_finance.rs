//! Yahoo Finance fundamentals: the primary data batch.
//!
//! One quote-summary call supplies prices, holders and the statement
//! histories; the options chain and the share-count time series are fetched
//! alongside it on a best-effort basis. Every reported row is derived from the
//! resulting [`FundamentalSnapshot`] by pure functions.

use analysis_core::{MetricKey, MetricProvider, Payload, ProviderError, RetryPolicy, UNRESOLVED};
use async_trait::async_trait;
use chrono::{DateTime, Months, NaiveDate};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use crate::alpha_vantage::AlphaVantageClient;
use crate::http::{build_client, check_status};

const BASE_URL: &str = "https://query2.finance.yahoo.com";
const SUMMARY_MODULES: &str = "price,summaryDetail,defaultKeyStatistics,financialData,majorHoldersBreakdown,\
balanceSheetHistory,balanceSheetHistoryQuarterly,cashflowStatementHistoryQuarterly,incomeStatementHistory";

const NO_CONVERTS: &str = "No converts / ATM";
const MINOR_CONVERTS: &str = "Minor converts";
const HEAVY_CONVERTS: &str = "Heavy converts / ATM";

/// Raw figures pulled from Yahoo for one ticker. Statement lists are most
/// recent first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FundamentalSnapshot {
    pub current_price: Option<f64>,
    pub market_cap: Option<f64>,
    pub shares_outstanding: Option<f64>,
    pub low_52: Option<f64>,
    pub high_52: Option<f64>,
    pub expirations: Vec<NaiveDate>,
    /// Fraction, not percent.
    pub insider_fraction: Option<f64>,
    pub total_assets: Option<f64>,
    pub total_liabilities: Option<f64>,
    pub cash: Option<f64>,
    pub quarterly_ocf: Option<f64>,
    pub quarterly_fcf: Vec<f64>,
    pub ebitda: Option<f64>,
    pub net_debt: Option<f64>,
    pub annual_revenue: Vec<f64>,
    pub annual_ebit: Vec<f64>,
    pub debt_to_equity: Option<f64>,
    pub convertible_debt: Option<f64>,
    pub share_history: Vec<(NaiveDate, f64)>,
}

impl FundamentalSnapshot {
    /// All fundamentals rows, in report order.
    pub fn to_payload(&self) -> Payload {
        let latest_expiry = self
            .expirations
            .iter()
            .max()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| UNRESOLVED.to_string());

        Payload::new()
            .with_metric(MetricKey::CurrentPrice, format_price(self.current_price))
            .with_metric(MetricKey::MarketCap, format_large_number(self.market_cap))
            .with_metric(MetricKey::SharesOutstanding, format_large_number(self.shares_outstanding))
            .with_metric(MetricKey::Week52Low, format_price(self.low_52))
            .with_metric(MetricKey::Week52High, format_price(self.high_52))
            .with_metric(MetricKey::LatestExpiration, latest_expiry)
            .with_metric(MetricKey::TotalInsiderOwnership, format_percent(self.insider_fraction.map(|f| f * 100.0)))
            .with_metric(MetricKey::TotalAssets, format_large_number(self.total_assets))
            .with_metric(MetricKey::TotalLiabilities, format_large_number(self.total_liabilities))
            .with_metric(
                MetricKey::AssetsToLiabilities,
                format_ratio(assets_to_liabilities(self.total_assets, self.total_liabilities)),
            )
            .with_metric(MetricKey::Runway, runway(self.cash, self.quarterly_ocf))
            .with_metric(MetricKey::NetDebt, format_large_number(self.net_debt))
            .with_metric(MetricKey::Ebitda, format_large_number(self.ebitda))
            .with_metric(
                MetricKey::NetDebtToEbitda,
                format_ratio(net_debt_to_ebitda(self.net_debt, self.ebitda)),
            )
            .with_metric(MetricKey::CashBurnSeverity, burn_severity(&self.quarterly_fcf, self.market_cap))
            .with_metric(MetricKey::ShareCountGrowth, share_count_growth(&self.share_history))
            .with_metric(
                MetricKey::OperatingLeverage,
                format_ratio(operating_leverage(&self.annual_revenue, &self.annual_ebit)),
            )
            .with_metric(
                MetricKey::CapitalStructurePressure,
                capital_structure(self.debt_to_equity, self.convertible_debt, self.market_cap),
            )
    }
}

// ---------------------------------------------------------------------------
// Derivations
// ---------------------------------------------------------------------------

/// "1.23 Trillion" / "4.56 Billion" / "7.89 Million" / "123.45".
pub fn format_large_number(value: Option<f64>) -> String {
    let Some(num) = value.filter(|v| v.is_finite()) else {
        return UNRESOLVED.to_string();
    };
    let abs = num.abs();
    if abs >= 1e12 {
        format!("{:.2} Trillion", num / 1e12)
    } else if abs >= 1e9 {
        format!("{:.2} Billion", num / 1e9)
    } else if abs >= 1e6 {
        format!("{:.2} Million", num / 1e6)
    } else {
        format!("{:.2}", num)
    }
}

/// Zero prices are treated as missing.
pub fn format_price(value: Option<f64>) -> String {
    match value {
        Some(v) if v != 0.0 && v.is_finite() => format!("{:.2}", v),
        _ => UNRESOLVED.to_string(),
    }
}

fn format_percent(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{:.2}%", v),
        _ => UNRESOLVED.to_string(),
    }
}

fn format_ratio(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{:.2}", v),
        _ => UNRESOLVED.to_string(),
    }
}

pub fn assets_to_liabilities(assets: Option<f64>, liabilities: Option<f64>) -> Option<f64> {
    match (assets, liabilities) {
        (Some(a), Some(l)) if a != 0.0 && l != 0.0 => Some(a / l),
        _ => None,
    }
}

/// Months of cash at the latest quarter's operating burn rate.
pub fn runway(cash: Option<f64>, quarterly_ocf: Option<f64>) -> String {
    match (cash, quarterly_ocf) {
        (Some(cash), Some(ocf)) if ocf < 0.0 => {
            let monthly_burn = ocf.abs() / 3.0;
            format!("{:.2} Months", cash / monthly_burn)
        }
        (Some(_), Some(_)) => "Positive OCF (No Burn)".to_string(),
        _ => UNRESOLVED.to_string(),
    }
}

pub fn net_debt_to_ebitda(net_debt: Option<f64>, ebitda: Option<f64>) -> Option<f64> {
    match (net_debt, ebitda) {
        (Some(nd), Some(e)) if e != 0.0 => Some(nd / e),
        _ => None,
    }
}

/// Trailing-twelve-month free cash flow burn as a share of market cap.
pub fn burn_severity(quarterly_fcf: &[f64], market_cap: Option<f64>) -> String {
    if quarterly_fcf.is_empty() {
        return UNRESOLVED.to_string();
    }
    let ttm: f64 = quarterly_fcf.iter().take(4).sum();
    if ttm >= 0.0 {
        return "0.00% (Positive FCF)".to_string();
    }
    match market_cap {
        Some(cap) if cap > 0.0 => format!("{:.2}%", ttm.abs() / cap * 100.0),
        _ => UNRESOLVED.to_string(),
    }
}

/// Annualized share count growth over roughly the last three years.
pub fn share_count_growth(history: &[(NaiveDate, f64)]) -> String {
    share_count_cagr(history)
        .map(|cagr| format!("{:.2}%", cagr * 100.0))
        .unwrap_or_else(|| UNRESOLVED.to_string())
}

fn share_count_cagr(history: &[(NaiveDate, f64)]) -> Option<f64> {
    let mut points: Vec<(NaiveDate, f64)> = history.to_vec();
    points.sort_by_key(|(date, _)| *date);
    // one point per date, keeping the last reported
    points.reverse();
    points.dedup_by_key(|(date, _)| *date);
    points.reverse();

    if points.len() < 2 {
        return None;
    }
    let (latest_date, latest) = *points.last()?;
    let target = latest_date.checked_sub_months(Months::new(36))?;
    let (hist_idx, _) = points
        .iter()
        .enumerate()
        .min_by_key(|(_, (date, _))| (*date - target).num_days().abs())?;
    if hist_idx >= points.len() - 1 {
        return None;
    }
    let (hist_date, hist) = points[hist_idx];
    let years = (latest_date - hist_date).num_days() as f64 / 365.25;
    if hist <= 0.0 || latest <= 0.0 || years <= 0.0 {
        return None;
    }
    Some((latest / hist).powf(1.0 / years) - 1.0)
}

/// Degree of operating leverage: %change in EBIT over %change in revenue
/// between the last two fiscal years.
pub fn operating_leverage(revenue: &[f64], ebit: &[f64]) -> Option<f64> {
    if revenue.len() < 2 || ebit.len() < 2 {
        return None;
    }
    let pct_change = |now: f64, prev: f64| if prev != 0.0 { (now - prev) / prev.abs() } else { 0.0 };
    let pct_sales = pct_change(revenue[0], revenue[1]);
    let pct_ebit = pct_change(ebit[0], ebit[1]);
    if pct_sales == 0.0 {
        None
    } else {
        Some(pct_ebit / pct_sales)
    }
}

/// Dilution pressure from leverage and convertible overhang. `debt_to_equity`
/// is in percent, as Yahoo reports it.
pub fn capital_structure(debt_to_equity: Option<f64>, convertible_debt: Option<f64>, market_cap: Option<f64>) -> &'static str {
    let d2e = debt_to_equity.unwrap_or(0.0);
    if d2e > 300.0 {
        return HEAVY_CONVERTS;
    }
    match convertible_debt {
        Some(converts) => {
            let overhang = match market_cap {
                Some(cap) if cap > 0.0 => converts / cap,
                _ => 0.0,
            };
            if overhang > 0.05 || d2e > 150.0 {
                HEAVY_CONVERTS
            } else {
                MINOR_CONVERTS
            }
        }
        None if d2e > 100.0 => HEAVY_CONVERTS,
        None => NO_CONVERTS,
    }
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

/// Yahoo wraps numbers as `{"raw": 1.0, "fmt": "1.00"}`; bare numbers also occur.
fn raw(node: &Value, key: &str) -> Option<f64> {
    let v = node.get(key)?;
    v.get("raw").and_then(Value::as_f64).or_else(|| v.as_f64())
}

fn first_of(node: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| raw(node, k))
}

fn statements<'a>(result: &'a Value, module: &str, list: &str) -> Vec<&'a Value> {
    result
        .get(module)
        .and_then(|m| m.get(list))
        .and_then(Value::as_array)
        .map(|arr| arr.iter().collect())
        .unwrap_or_default()
}

pub fn parse_quote_summary(json: &Value) -> Result<FundamentalSnapshot, ProviderError> {
    let summary = json
        .get("quoteSummary")
        .ok_or_else(|| ProviderError::ParseMiss("no quoteSummary".to_string()))?;
    if let Some(desc) = summary.get("error").and_then(|e| e.get("description")).and_then(Value::as_str) {
        return Err(ProviderError::ParseMiss(desc.to_string()));
    }
    let result = summary
        .get("result")
        .and_then(Value::as_array)
        .and_then(|arr| arr.first())
        .ok_or(ProviderError::EmptyPayload)?;

    let quarterly_bs = statements(result, "balanceSheetHistoryQuarterly", "balanceSheetStatements");
    let latest_q = quarterly_bs.first().copied().ok_or(ProviderError::EmptyPayload)?;
    let annual_bs = statements(result, "balanceSheetHistory", "balanceSheetStatements");
    let latest_a = annual_bs.first().copied();
    let quarterly_cf = statements(result, "cashflowStatementHistoryQuarterly", "cashflowStatements");
    let income = statements(result, "incomeStatementHistory", "incomeStatementHistory");

    let empty = Value::Null;
    let price = result.get("price").unwrap_or(&empty);
    let detail = result.get("summaryDetail").unwrap_or(&empty);
    let stats = result.get("defaultKeyStatistics").unwrap_or(&empty);
    let financial = result.get("financialData").unwrap_or(&empty);
    let holders = result.get("majorHoldersBreakdown").unwrap_or(&empty);

    let total_liabilities = first_of(
        latest_q,
        &["totalLiabilitiesNetMinorityInterest", "totalLiab", "totalLiabilities"],
    )
    .or_else(|| {
        let current = first_of(latest_q, &["currentLiabilities", "totalCurrentLiabilities"]);
        let non_current = first_of(
            latest_q,
            &["totalNonCurrentLiabilitiesNetMinorityInterest", "nonCurrentLiabilities"],
        );
        match (current, non_current) {
            (None, None) => None,
            (c, n) => Some(c.unwrap_or(0.0) + n.unwrap_or(0.0)),
        }
    });

    let ocf_keys = ["operatingCashflow", "totalCashFromOperatingActivities"];
    let quarterly_fcf: Vec<f64> = quarterly_cf
        .iter()
        .filter_map(|cf| {
            raw(cf, "freeCashFlow").or_else(|| {
                let ocf = first_of(cf, &ocf_keys)?;
                Some(ocf + raw(cf, "capitalExpenditures").unwrap_or(0.0))
            })
        })
        .collect();

    let net_debt = latest_a.and_then(|a| raw(a, "netDebt")).or_else(|| {
        let debt = latest_a
            .and_then(|a| raw(a, "totalDebt"))
            .or_else(|| raw(financial, "totalDebt"))?;
        let cash = latest_a
            .and_then(|a| first_of(a, &["cashAndCashEquivalents", "cash"]))
            .or_else(|| raw(financial, "totalCash"))?;
        Some(debt - cash)
    });

    let convertible_debt = latest_a.and_then(|a| {
        a.as_object()?
            .iter()
            .filter(|(k, _)| k.to_lowercase().contains("convertible"))
            .find_map(|(k, _)| raw(a, k))
    });

    Ok(FundamentalSnapshot {
        current_price: raw(financial, "currentPrice").or_else(|| raw(price, "regularMarketPrice")),
        market_cap: raw(price, "marketCap").or_else(|| raw(detail, "marketCap")),
        shares_outstanding: raw(stats, "sharesOutstanding"),
        low_52: raw(detail, "fiftyTwoWeekLow"),
        high_52: raw(detail, "fiftyTwoWeekHigh"),
        expirations: Vec::new(),
        insider_fraction: raw(holders, "insidersPercentHeld").or_else(|| raw(stats, "heldPercentInsiders")),
        total_assets: raw(latest_q, "totalAssets"),
        total_liabilities,
        cash: first_of(
            latest_q,
            &["cashAndCashEquivalents", "cash", "cashCashEquivalentsAndShortTermInvestments"],
        ),
        quarterly_ocf: quarterly_cf.first().and_then(|cf| first_of(cf, &ocf_keys)),
        quarterly_fcf,
        ebitda: raw(financial, "ebitda").or_else(|| income.first().and_then(|i| first_of(i, &["ebitda", "normalizedEbitda"]))),
        net_debt,
        annual_revenue: income.iter().filter_map(|i| raw(i, "totalRevenue")).collect(),
        annual_ebit: income.iter().filter_map(|i| first_of(i, &["ebit", "operatingIncome"])).collect(),
        debt_to_equity: raw(financial, "debtToEquity"),
        convertible_debt,
        share_history: Vec::new(),
    })
}

/// Option expiration dates from the options endpoint (unix seconds).
pub fn parse_expirations(json: &Value) -> Vec<NaiveDate> {
    json.get("optionChain")
        .and_then(|c| c.get("result"))
        .and_then(Value::as_array)
        .and_then(|arr| arr.first())
        .and_then(|r| r.get("expirationDates"))
        .and_then(Value::as_array)
        .map(|dates| {
            dates
                .iter()
                .filter_map(Value::as_i64)
                .filter_map(|ts| DateTime::from_timestamp(ts, 0))
                .map(|dt| dt.date_naive())
                .collect()
        })
        .unwrap_or_default()
}

/// Share counts from the fundamentals time series.
pub fn parse_share_history(json: &Value) -> Vec<(NaiveDate, f64)> {
    let Some(results) = json
        .get("timeseries")
        .and_then(|t| t.get("result"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    results
        .iter()
        .filter_map(|r| r.get("quarterlyOrdinarySharesNumber").and_then(Value::as_array))
        .flatten()
        .filter_map(|point| {
            let date = point.get("asOfDate").and_then(Value::as_str)?;
            let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
            let value = raw(point, "reportedValue")?;
            Some((date, value))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Client and provider
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct YahooFinanceClient {
    client: Client,
    base_url: String,
}

impl YahooFinanceClient {
    pub fn new(proxy: Option<&str>, timeout: Duration) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_client(proxy, timeout)?,
            base_url: BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value, ProviderError> {
        let response = check_status(self.client.get(url).query(query).send().await?)?;
        Ok(response.json().await?)
    }

    pub async fn fetch_snapshot(&self, symbol: &str) -> Result<FundamentalSnapshot, ProviderError> {
        let url = format!("{}/v10/finance/quoteSummary/{}", self.base_url, symbol);
        let summary = self.get_json(&url, &[("modules", SUMMARY_MODULES.to_string())]).await?;
        let mut snapshot = parse_quote_summary(&summary)?;

        match self.expirations(symbol).await {
            Ok(dates) => snapshot.expirations = dates,
            Err(e) => tracing::warn!("Yahoo options chain unavailable for {}: {}", symbol, e),
        }
        match self.share_history(symbol).await {
            Ok(history) => snapshot.share_history = history,
            Err(e) => tracing::warn!("Yahoo share history unavailable for {}: {}", symbol, e),
        }

        Ok(snapshot)
    }

    pub async fn expirations(&self, symbol: &str) -> Result<Vec<NaiveDate>, ProviderError> {
        let url = format!("{}/v7/finance/options/{}", self.base_url, symbol);
        Ok(parse_expirations(&self.get_json(&url, &[]).await?))
    }

    pub async fn share_history(&self, symbol: &str) -> Result<Vec<(NaiveDate, f64)>, ProviderError> {
        let url = format!(
            "{}/ws/fundamentals-timeseries/v1/finance/timeseries/{}",
            self.base_url, symbol
        );
        let now = chrono::Utc::now();
        let five_years_ago = now - chrono::Duration::days(5 * 365);
        let query = [
            ("type", "quarterlyOrdinarySharesNumber".to_string()),
            ("period1", five_years_ago.timestamp().to_string()),
            ("period2", now.timestamp().to_string()),
        ];
        Ok(parse_share_history(&self.get_json(&url, &query).await?))
    }
}

/// Primary-batch provider. Net debt falls back to the Alpha Vantage balance
/// sheet when Yahoo has neither a reported figure nor debt and cash.
pub struct YahooFundamentalsProvider {
    client: YahooFinanceClient,
    balance_sheet: Option<AlphaVantageClient>,
    retry: RetryPolicy,
}

impl YahooFundamentalsProvider {
    pub fn new(client: YahooFinanceClient, balance_sheet: Option<AlphaVantageClient>) -> Self {
        Self {
            client,
            balance_sheet,
            // an empty statement set is usually a proxy block; worth one more try
            retry: RetryPolicy::scrape()
                .with_retry_on(|e| e.is_transient() || matches!(e, ProviderError::EmptyPayload)),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl MetricProvider for YahooFundamentalsProvider {
    fn source(&self) -> &'static str {
        "Yahoo Finance"
    }

    async fn fetch(&self, ticker: &str) -> Result<Payload, ProviderError> {
        let mut snapshot = self
            .retry
            .run("yahoo fundamentals", |attempt| {
                tracing::info!("Yahoo fundamentals attempt {} for {}", attempt + 1, ticker);
                self.client.fetch_snapshot(ticker)
            })
            .await?;

        if snapshot.net_debt.is_none() {
            if let Some(av) = &self.balance_sheet {
                tracing::info!("Net Debt for {} missing in Yahoo, querying Alpha Vantage", ticker);
                match av.net_debt(ticker).await {
                    Ok(net_debt) => snapshot.net_debt = Some(net_debt),
                    Err(e) => tracing::warn!("Alpha Vantage net debt failed for {}: {}", ticker, e),
                }
            }
        }

        Ok(snapshot.to_payload())
    }
}
