use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Scoring category a metric contributes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bucket {
    Survival,
    Growth,
    Insider,
    Moat,
}

impl Bucket {
    pub const ALL: [Bucket; 4] = [Bucket::Survival, Bucket::Growth, Bucket::Insider, Bucket::Moat];

    pub fn to_label(&self) -> &'static str {
        match self {
            Bucket::Survival => "Financial Survival & Balance Sheet",
            Bucket::Growth => "Growth & Asymmetric Upside",
            Bucket::Insider => "Insider Alignment & Behavior",
            Bucket::Moat => "Moat & Qualitative Conviction",
        }
    }
}

/// Canonical identity of every metric the screener knows about.
///
/// Rules and bucket membership are keyed by this enum, never by label
/// substrings, so two metrics can't collide on an overlapping name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricKey {
    CurrentPrice,
    MarketCap,
    SharesOutstanding,
    Week52Low,
    Week52High,
    LatestExpiration,
    TotalInsiderOwnership,
    TotalAssets,
    TotalLiabilities,
    AssetsToLiabilities,
    Runway,
    NetDebt,
    Ebitda,
    NetDebtToEbitda,
    CashBurnSeverity,
    ShareCountGrowth,
    OperatingLeverage,
    CapitalStructurePressure,
    NetInsiderBuying,
    NetInsiderActivity,
    InstitutionalOwnership,
    ShortFloat,
    MoatScore,
    ForwardEpsGrowth,
    IvRank,
    CeoOwnership,
    BusinessModel,
}

impl MetricKey {
    pub const ALL: [MetricKey; 27] = [
        MetricKey::CurrentPrice,
        MetricKey::MarketCap,
        MetricKey::SharesOutstanding,
        MetricKey::Week52Low,
        MetricKey::Week52High,
        MetricKey::LatestExpiration,
        MetricKey::TotalInsiderOwnership,
        MetricKey::TotalAssets,
        MetricKey::TotalLiabilities,
        MetricKey::AssetsToLiabilities,
        MetricKey::Runway,
        MetricKey::NetDebt,
        MetricKey::Ebitda,
        MetricKey::NetDebtToEbitda,
        MetricKey::CashBurnSeverity,
        MetricKey::ShareCountGrowth,
        MetricKey::OperatingLeverage,
        MetricKey::CapitalStructurePressure,
        MetricKey::NetInsiderBuying,
        MetricKey::NetInsiderActivity,
        MetricKey::InstitutionalOwnership,
        MetricKey::ShortFloat,
        MetricKey::MoatScore,
        MetricKey::ForwardEpsGrowth,
        MetricKey::IvRank,
        MetricKey::CeoOwnership,
        MetricKey::BusinessModel,
    ];

    /// Display label, also used as the metric name of persisted rows.
    pub fn to_label(&self) -> &'static str {
        match self {
            MetricKey::CurrentPrice => "Current stock price",
            MetricKey::MarketCap => "Market cap",
            MetricKey::SharesOutstanding => "Shares Outstanding",
            MetricKey::Week52Low => "52 week low",
            MetricKey::Week52High => "52 weeks high",
            MetricKey::LatestExpiration => "latest expiration date",
            MetricKey::TotalInsiderOwnership => "Total insider ownership %",
            MetricKey::TotalAssets => "Total Assets",
            MetricKey::TotalLiabilities => "Total Liabilities",
            MetricKey::AssetsToLiabilities => "Assets / Liabilities Ratio",
            MetricKey::Runway => "Runway",
            MetricKey::NetDebt => "Net Debt",
            MetricKey::Ebitda => "EBITDA",
            MetricKey::NetDebtToEbitda => "Net Debt / EBITDA",
            MetricKey::CashBurnSeverity => "Cash Burn Severity",
            MetricKey::ShareCountGrowth => "Share Count Growth",
            MetricKey::OperatingLeverage => "Degree of Operating Leverage",
            MetricKey::CapitalStructurePressure => "Capital Structure Pressure",
            MetricKey::NetInsiderBuying => "Net Insider Buying vs Selling (%)",
            MetricKey::NetInsiderActivity => "Net Insider Activity",
            MetricKey::InstitutionalOwnership => "Institutional Ownership (%)",
            MetricKey::ShortFloat => "Short Float (%)",
            MetricKey::MoatScore => "GuruFocus Moat Score",
            MetricKey::ForwardEpsGrowth => "Forward EPS Growth (%)",
            MetricKey::IvRank => "IV Rank",
            MetricKey::CeoOwnership => "CEO Ownership %",
            MetricKey::BusinessModel => "Business Model & Value Proposition",
        }
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_label())
    }
}

impl FromStr for MetricKey {
    type Err = String;

    /// Exact (case-insensitive) label match. No substring guessing.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        MetricKey::ALL
            .iter()
            .copied()
            .find(|key| key.to_label().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| format!("unknown metric: {}", wanted))
    }
}

/// Free-text fields produced alongside the scored metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoteKind {
    Risks,
    Rewards,
    CompanyDescription,
    ValueProposition,
    MoatAnalysis,
}

impl NoteKind {
    pub const ALL: [NoteKind; 5] = [
        NoteKind::Risks,
        NoteKind::Rewards,
        NoteKind::CompanyDescription,
        NoteKind::ValueProposition,
        NoteKind::MoatAnalysis,
    ];

    pub fn to_label(&self) -> &'static str {
        match self {
            NoteKind::Risks => "Risks",
            NoteKind::Rewards => "Rewards",
            NoteKind::CompanyDescription => "Company Description",
            NoteKind::ValueProposition => "Value Proposition",
            NoteKind::MoatAnalysis => "Moat Analysis",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        NoteKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.to_label().eq_ignore_ascii_case(label.trim()))
    }
}

/// A group of metrics acquired together through one tier chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricFamily {
    Fundamentals,
    FinvizSnapshot,
    MoatScore,
    EpsGrowth,
    IvRank,
    BusinessProfile,
    RiskRewards,
}

impl MetricFamily {
    pub const ALL: [MetricFamily; 7] = [
        MetricFamily::Fundamentals,
        MetricFamily::FinvizSnapshot,
        MetricFamily::MoatScore,
        MetricFamily::EpsGrowth,
        MetricFamily::IvRank,
        MetricFamily::BusinessProfile,
        MetricFamily::RiskRewards,
    ];

    /// Metrics this family yields, in report order.
    pub fn metrics(&self) -> &'static [MetricKey] {
        match self {
            MetricFamily::Fundamentals => &[
                MetricKey::CurrentPrice,
                MetricKey::MarketCap,
                MetricKey::SharesOutstanding,
                MetricKey::Week52Low,
                MetricKey::Week52High,
                MetricKey::LatestExpiration,
                MetricKey::TotalInsiderOwnership,
                MetricKey::TotalAssets,
                MetricKey::TotalLiabilities,
                MetricKey::AssetsToLiabilities,
                MetricKey::Runway,
                MetricKey::NetDebt,
                MetricKey::Ebitda,
                MetricKey::NetDebtToEbitda,
                MetricKey::CashBurnSeverity,
                MetricKey::ShareCountGrowth,
                MetricKey::OperatingLeverage,
                MetricKey::CapitalStructurePressure,
            ],
            MetricFamily::FinvizSnapshot => &[
                MetricKey::NetInsiderBuying,
                MetricKey::NetInsiderActivity,
                MetricKey::InstitutionalOwnership,
                MetricKey::ShortFloat,
            ],
            MetricFamily::MoatScore => &[MetricKey::MoatScore],
            MetricFamily::EpsGrowth => &[MetricKey::ForwardEpsGrowth],
            MetricFamily::IvRank => &[MetricKey::IvRank],
            MetricFamily::BusinessProfile => &[MetricKey::CeoOwnership, MetricKey::BusinessModel],
            MetricFamily::RiskRewards => &[],
        }
    }

    pub fn to_label(&self) -> &'static str {
        match self {
            MetricFamily::Fundamentals => "fundamentals",
            MetricFamily::FinvizSnapshot => "finviz snapshot",
            MetricFamily::MoatScore => "moat score",
            MetricFamily::EpsGrowth => "forward eps growth",
            MetricFamily::IvRank => "iv rank",
            MetricFamily::BusinessProfile => "business profile",
            MetricFamily::RiskRewards => "risks & rewards",
        }
    }
}

/// Target of one value inside a provider payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Field {
    Metric(MetricKey),
    Note(NoteKind),
}

/// Raw values returned by one successful provider call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    values: Vec<(Field, String)>,
}

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metric(mut self, key: MetricKey, value: impl Into<String>) -> Self {
        self.push_metric(key, value);
        self
    }

    pub fn with_note(mut self, kind: NoteKind, value: impl Into<String>) -> Self {
        self.push_note(kind, value);
        self
    }

    pub fn push_metric(&mut self, key: MetricKey, value: impl Into<String>) {
        self.values.push((Field::Metric(key), value.into()));
    }

    pub fn push_note(&mut self, kind: NoteKind, value: impl Into<String>) {
        self.values.push((Field::Note(kind), value.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn metric(&self, key: MetricKey) -> Option<&str> {
        self.get(Field::Metric(key))
    }

    pub fn note(&self, kind: NoteKind) -> Option<&str> {
        self.get(Field::Note(kind))
    }

    fn get(&self, field: Field) -> Option<&str> {
        self.values
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, v)| v.as_str())
    }

    pub fn values(&self) -> &[(Field, String)] {
        &self.values
    }
}

/// Sentinel written for any value no tier could produce.
pub const UNRESOLVED: &str = "N/A";

/// One raw metric value as acquired. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMetricValue {
    pub metric: MetricKey,
    pub source: String,
    pub raw: String,
    pub fetched_at: DateTime<Utc>,
}

impl RawMetricValue {
    pub fn new(metric: MetricKey, source: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            metric,
            source: source.into(),
            raw: raw.into(),
            fetched_at: Utc::now(),
        }
    }

    pub fn unresolved(metric: MetricKey) -> Self {
        Self::new(metric, UNRESOLVED, UNRESOLVED)
    }
}

/// Canonical form of a raw value, as consumed by the scoring rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NormalizedValue {
    /// No tier produced a value, or the raw text was an "N/A"-style sentinel.
    Unresolved,
    /// `number` is 0.0 when the text carries no numeric part; `text` is lowercased.
    Value { number: f64, text: String },
}

impl NormalizedValue {
    pub fn number(&self) -> f64 {
        match self {
            NormalizedValue::Unresolved => 0.0,
            NormalizedValue::Value { number, .. } => *number,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            NormalizedValue::Unresolved => "n/a",
            NormalizedValue::Value { text, .. } => text,
        }
    }

    pub fn is_unresolved(&self) -> bool {
        matches!(self, NormalizedValue::Unresolved)
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.text().contains(needle)
    }
}

/// Outcome of scoring one metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub metric: MetricKey,
    pub obtained: u32,
    pub max: u32,
    pub rejected: bool,
}

impl ScoreResult {
    pub fn unscored(metric: MetricKey) -> Self {
        Self { metric, obtained: 0, max: 0, rejected: false }
    }

    /// Cell text for the persisted "obtained points" column.
    pub fn obtained_cell(&self) -> String {
        if self.rejected {
            "rejected".to_string()
        } else if self.max > 0 {
            self.obtained.to_string()
        } else {
            String::new()
        }
    }

    pub fn max_cell(&self) -> String {
        if self.max > 0 {
            self.max.to_string()
        } else {
            String::new()
        }
    }
}

/// A raw value paired with its score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredMetric {
    pub raw: RawMetricValue,
    pub score: ScoreResult,
}

/// Final categorical label of an analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    EliteCandidate,
    Qualified,
    Watchlist,
    Reject,
    /// A hard rejection fired, regardless of the numeric total.
    Rejected,
}

impl Verdict {
    pub fn to_label(&self) -> &'static str {
        match self {
            Verdict::EliteCandidate => "Elite LEAPS Candidate",
            Verdict::Qualified => "Qualified",
            Verdict::Watchlist => "Watchlist",
            Verdict::Reject => "Reject",
            Verdict::Rejected => "Rejected",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_label())
    }
}

impl FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            Verdict::EliteCandidate,
            Verdict::Qualified,
            Verdict::Watchlist,
            Verdict::Reject,
            Verdict::Rejected,
        ]
        .into_iter()
        .find(|v| v.to_label().eq_ignore_ascii_case(s.trim()))
        .ok_or_else(|| format!("unknown verdict: {}", s))
    }
}

/// Obtained points per bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketTotals {
    pub survival: u32,
    pub growth: u32,
    pub insider: u32,
    pub moat: u32,
}

impl BucketTotals {
    pub fn get(&self, bucket: Bucket) -> u32 {
        match bucket {
            Bucket::Survival => self.survival,
            Bucket::Growth => self.growth,
            Bucket::Insider => self.insider,
            Bucket::Moat => self.moat,
        }
    }

    pub fn add(&mut self, bucket: Bucket, points: u32) {
        match bucket {
            Bucket::Survival => self.survival += points,
            Bucket::Growth => self.growth += points,
            Bucket::Insider => self.insider += points,
            Bucket::Moat => self.moat += points,
        }
    }

    pub fn total(&self) -> u32 {
        self.survival + self.growth + self.insider + self.moat
    }
}

/// Qualitative text gathered by the LLM tiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualitativeNotes {
    pub company_description: String,
    pub value_proposition: String,
    pub moat_analysis: String,
    pub risks: Vec<String>,
    pub rewards: Vec<String>,
}

impl Default for QualitativeNotes {
    fn default() -> Self {
        Self {
            company_description: UNRESOLVED.to_string(),
            value_proposition: UNRESOLVED.to_string(),
            moat_analysis: UNRESOLVED.to_string(),
            risks: Vec::new(),
            rewards: Vec::new(),
        }
    }
}

/// Composite result of one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub ticker: String,
    pub analysis_date: NaiveDate,
    pub metrics: Vec<ScoredMetric>,
    pub buckets: BucketTotals,
    pub final_score: u32,
    pub verdict: Verdict,
    pub rejected: bool,
    #[serde(default)]
    pub notes: QualitativeNotes,
}

impl Report {
    pub fn score_for(&self, key: MetricKey) -> Option<&ScoreResult> {
        self.metrics.iter().map(|m| &m.score).find(|s| s.metric == key)
    }

    /// Sum of the ceilings of every scored metric.
    pub fn max_score(&self) -> u32 {
        self.metrics.iter().map(|m| m.score.max).sum()
    }

    pub fn rejections(&self) -> impl Iterator<Item = MetricKey> + '_ {
        self.metrics
            .iter()
            .filter(|m| m.score.rejected)
            .map(|m| m.score.metric)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_labels_round_trip_exactly() {
        for key in MetricKey::ALL {
            assert_eq!(key.to_label().parse::<MetricKey>().unwrap(), key);
        }
        assert_eq!("net debt / ebitda".parse::<MetricKey>().unwrap(), MetricKey::NetDebtToEbitda);
    }

    #[test]
    fn test_metric_lookup_does_not_match_substrings() {
        assert!("Net Debt / EBITDA ratio".parse::<MetricKey>().is_err());
        assert!("operating leverage".parse::<MetricKey>().is_err());
        assert_eq!("Net Debt".parse::<MetricKey>().unwrap(), MetricKey::NetDebt);
    }

    #[test]
    fn test_every_metric_belongs_to_one_family() {
        for key in MetricKey::ALL {
            let owners = MetricFamily::ALL
                .iter()
                .filter(|f| f.metrics().contains(&key))
                .count();
            assert_eq!(owners, 1, "{:?} owned by {} families", key, owners);
        }
    }

    #[test]
    fn test_score_cells() {
        let rejected = ScoreResult { metric: MetricKey::Runway, obtained: 0, max: 10, rejected: true };
        assert_eq!(rejected.obtained_cell(), "rejected");
        assert_eq!(rejected.max_cell(), "10");

        let unscored = ScoreResult::unscored(MetricKey::NetDebt);
        assert_eq!(unscored.obtained_cell(), "");
        assert_eq!(unscored.max_cell(), "");

        let zero = ScoreResult { metric: MetricKey::MoatScore, obtained: 0, max: 15, rejected: false };
        assert_eq!(zero.obtained_cell(), "0");
    }

    #[test]
    fn test_payload_lookup() {
        let payload = Payload::new()
            .with_metric(MetricKey::IvRank, "42.5")
            .with_note(NoteKind::Risks, "Dilution");
        assert_eq!(payload.metric(MetricKey::IvRank), Some("42.5"));
        assert_eq!(payload.note(NoteKind::Risks), Some("Dilution"));
        assert_eq!(payload.metric(MetricKey::MoatScore), None);
        assert_eq!(payload.len(), 2);
    }

    #[test]
    fn test_verdict_labels_parse() {
        assert_eq!("Watchlist".parse::<Verdict>().unwrap(), Verdict::Watchlist);
        assert_eq!("rejected".parse::<Verdict>().unwrap(), Verdict::Rejected);
        assert!("Maybe".parse::<Verdict>().is_err());
    }
}
