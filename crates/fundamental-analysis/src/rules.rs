//! The LEAPS rubric as a closed rule table.
//!
//! Each scored metric has exactly one `Rule`, found by exact `MetricKey`
//! lookup. Inside a rule the bands are checked top to bottom and the first
//! band that applies decides the award. How an unresolved input is treated
//! differs per rule and is part of the rubric.

use analysis_core::{MetricKey, NormalizedValue, RawMetricValue, ScoreResult, ScoredMetric};
use chrono::{Datelike, NaiveDate};

use crate::normalizer::normalize;

/// Minimum distance to the furthest listed expiration, in calendar months.
pub const MIN_EXPIRATION_MONTHS: i32 = 18;

/// Outcome of evaluating one rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Award {
    Points(u32),
    Reject,
}

/// Values shared across rules within one analysis run.
///
/// The debt ratio rule needs the separately fetched net debt and EBITDA, and
/// the expiration gate needs the run date. The context is built once per run
/// from the resolved raw values before any rule is evaluated, and dropped with
/// the report.
#[derive(Debug, Clone, PartialEq)]
pub struct RunContext {
    pub as_of: NaiveDate,
    pub net_debt: NormalizedValue,
    pub ebitda: NormalizedValue,
}

impl RunContext {
    pub fn new(as_of: NaiveDate) -> Self {
        Self {
            as_of,
            net_debt: NormalizedValue::Unresolved,
            ebitda: NormalizedValue::Unresolved,
        }
    }

    pub fn with_debt_inputs(mut self, net_debt: NormalizedValue, ebitda: NormalizedValue) -> Self {
        self.net_debt = net_debt;
        self.ebitda = ebitda;
        self
    }

    /// Pull net debt and EBITDA out of a run's raw values.
    pub fn from_raw_values(values: &[RawMetricValue], as_of: NaiveDate) -> Self {
        let lookup = |key: MetricKey| {
            values
                .iter()
                .find(|v| v.metric == key)
                .map(|v| normalize(key, &v.raw))
                .unwrap_or(NormalizedValue::Unresolved)
        };
        Self::new(as_of).with_debt_inputs(lookup(MetricKey::NetDebt), lookup(MetricKey::Ebitda))
    }
}

pub type RuleFn = fn(&NormalizedValue, &RunContext) -> Award;

pub struct Rule {
    pub metric: MetricKey,
    pub max: u32,
    eval: RuleFn,
}

impl Rule {
    pub fn evaluate(&self, value: &NormalizedValue, ctx: &RunContext) -> ScoreResult {
        match (self.eval)(value, ctx) {
            Award::Points(points) => ScoreResult {
                metric: self.metric,
                obtained: points.min(self.max),
                max: self.max,
                rejected: false,
            },
            Award::Reject => ScoreResult {
                metric: self.metric,
                obtained: 0,
                max: self.max,
                rejected: true,
            },
        }
    }
}

static RULES: &[Rule] = &[
    Rule { metric: MetricKey::Runway, max: 10, eval: runway },
    Rule { metric: MetricKey::NetDebtToEbitda, max: 7, eval: net_debt_to_ebitda },
    Rule { metric: MetricKey::AssetsToLiabilities, max: 5, eval: assets_to_liabilities },
    Rule { metric: MetricKey::CashBurnSeverity, max: 3, eval: cash_burn },
    Rule { metric: MetricKey::ShareCountGrowth, max: 3, eval: share_count_growth },
    Rule { metric: MetricKey::LatestExpiration, max: 0, eval: latest_expiration },
    Rule { metric: MetricKey::CapitalStructurePressure, max: 2, eval: capital_structure },
    Rule { metric: MetricKey::MarketCap, max: 5, eval: market_cap },
    Rule { metric: MetricKey::ForwardEpsGrowth, max: 7, eval: eps_growth },
    Rule { metric: MetricKey::OperatingLeverage, max: 5, eval: operating_leverage },
    Rule { metric: MetricKey::IvRank, max: 3, eval: iv_rank },
    Rule { metric: MetricKey::ShortFloat, max: 4, eval: short_float },
    Rule { metric: MetricKey::InstitutionalOwnership, max: 3, eval: institutional_ownership },
    Rule { metric: MetricKey::TotalInsiderOwnership, max: 6, eval: insider_ownership },
    Rule { metric: MetricKey::CeoOwnership, max: 3, eval: ceo_ownership },
    Rule { metric: MetricKey::NetInsiderBuying, max: 4, eval: net_insider_buying },
    Rule { metric: MetricKey::MoatScore, max: 15, eval: moat_score },
    Rule { metric: MetricKey::BusinessModel, max: 15, eval: business_model },
];

pub fn rule_for(metric: MetricKey) -> Option<&'static Rule> {
    RULES.iter().find(|rule| rule.metric == metric)
}

pub fn rules() -> &'static [Rule] {
    RULES
}

/// Deterministic scorer over the rule table.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoringEngine;

impl ScoringEngine {
    pub fn new() -> Self {
        Self
    }

    /// Score an already normalized value. Metrics without a rule are
    /// informational and come back unscored.
    pub fn score(&self, metric: MetricKey, value: &NormalizedValue, ctx: &RunContext) -> ScoreResult {
        match rule_for(metric) {
            Some(rule) => rule.evaluate(value, ctx),
            None => ScoreResult::unscored(metric),
        }
    }

    pub fn score_raw(&self, raw: &RawMetricValue, ctx: &RunContext) -> ScoreResult {
        let normalized = normalize(raw.metric, &raw.raw);
        self.score(raw.metric, &normalized, ctx)
    }

    /// Score a run's raw values, keeping their order.
    pub fn score_all(&self, raws: Vec<RawMetricValue>, ctx: &RunContext) -> Vec<ScoredMetric> {
        raws.into_iter()
            .map(|raw| {
                let score = self.score_raw(&raw, ctx);
                ScoredMetric { raw, score }
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Survival
// ---------------------------------------------------------------------------

fn runway(v: &NormalizedValue, _ctx: &RunContext) -> Award {
    if v.is_unresolved() {
        return Award::Points(3);
    }
    let cash_positive = ["positive", "no cash burn", "no burn", "profitable"]
        .iter()
        .any(|phrase| v.contains(phrase));
    let months = v.number();
    if cash_positive || months >= 24.0 {
        Award::Points(10)
    } else if months >= 12.0 {
        Award::Points(7)
    } else if months >= 6.0 {
        Award::Points(3)
    } else if months > 0.0 {
        // A bare small number is a ratio-style quote, not a burn horizon.
        if v.contains("month") {
            Award::Reject
        } else {
            Award::Points(10)
        }
    } else {
        Award::Reject
    }
}

fn net_debt_to_ebitda(v: &NormalizedValue, ctx: &RunContext) -> Award {
    if ctx.net_debt.number() < 0.0 {
        return Award::Points(7);
    }
    if ctx.ebitda.number() <= 0.0 {
        return Award::Reject;
    }
    let ratio = v.number();
    if ratio == 0.0 {
        Award::Points(7)
    } else if ratio > 0.0 && ratio <= 1.5 {
        Award::Points(5)
    } else if ratio > 1.5 && ratio <= 3.0 {
        Award::Points(3)
    } else {
        Award::Reject
    }
}

fn assets_to_liabilities(v: &NormalizedValue, _ctx: &RunContext) -> Award {
    if v.is_unresolved() {
        return Award::Points(1);
    }
    match v.number() {
        r if r >= 2.0 => Award::Points(5),
        r if r >= 1.5 => Award::Points(3),
        r if r >= 1.0 => Award::Points(1),
        _ => Award::Reject,
    }
}

fn cash_burn(v: &NormalizedValue, _ctx: &RunContext) -> Award {
    if v.is_unresolved() {
        return Award::Points(1);
    }
    match v.number() {
        pct if pct <= 0.0 => Award::Points(3),
        pct if pct < 10.0 => Award::Points(2),
        pct if pct <= 20.0 => Award::Points(1),
        _ => Award::Reject,
    }
}

fn share_count_growth(v: &NormalizedValue, _ctx: &RunContext) -> Award {
    if v.is_unresolved() {
        return Award::Points(1);
    }
    match v.number() {
        pct if pct <= 0.0 => Award::Points(3),
        pct if pct < 5.0 => Award::Points(2),
        pct if pct <= 10.0 => Award::Points(1),
        _ => Award::Reject,
    }
}

/// Gate: the furthest listed option expiration must be at least
/// `MIN_EXPIRATION_MONTHS` out. Carries no points.
fn latest_expiration(v: &NormalizedValue, ctx: &RunContext) -> Award {
    if v.is_unresolved() {
        return Award::Reject;
    }
    match parse_expiration(v.text()) {
        Some(expiry) if months_between(ctx.as_of, expiry) >= MIN_EXPIRATION_MONTHS => Award::Points(0),
        _ => Award::Reject,
    }
}

fn capital_structure(v: &NormalizedValue, _ctx: &RunContext) -> Award {
    if v.is_unresolved() {
        Award::Points(1)
    } else if v.contains("no convert") || v.contains("0") {
        Award::Points(2)
    } else if v.contains("minor") {
        Award::Points(1)
    } else if v.contains("heavy") || v.contains("atm") {
        Award::Reject
    } else {
        Award::Points(0)
    }
}

// ---------------------------------------------------------------------------
// Growth
// ---------------------------------------------------------------------------

/// Expects billions; an unresolved cap reads as 0 and lands in the small-cap band.
fn market_cap(v: &NormalizedValue, _ctx: &RunContext) -> Award {
    match v.number() {
        b if b < 2.0 => Award::Points(5),
        b if b <= 5.0 => Award::Points(3),
        _ => Award::Reject,
    }
}

fn eps_growth(v: &NormalizedValue, _ctx: &RunContext) -> Award {
    if v.is_unresolved() {
        return Award::Points(1);
    }
    match v.number() {
        pct if pct >= 30.0 => Award::Points(7),
        pct if pct >= 20.0 => Award::Points(5),
        pct if pct >= 10.0 => Award::Points(3),
        _ => Award::Points(0),
    }
}

fn operating_leverage(v: &NormalizedValue, _ctx: &RunContext) -> Award {
    match v.number() {
        dol if dol >= 3.0 => Award::Points(5),
        dol if dol >= 2.0 => Award::Points(4),
        dol if dol >= 1.5 => Award::Points(2),
        _ => Award::Points(0),
    }
}

fn iv_rank(v: &NormalizedValue, _ctx: &RunContext) -> Award {
    if v.is_unresolved() {
        return Award::Points(1);
    }
    match v.number() {
        rank if rank < 30.0 => Award::Points(3),
        rank if rank <= 60.0 => Award::Points(2),
        _ => Award::Points(0),
    }
}

fn short_float(v: &NormalizedValue, _ctx: &RunContext) -> Award {
    if v.is_unresolved() {
        return Award::Points(1);
    }
    match v.number() {
        pct if (10.0..=30.0).contains(&pct) => Award::Points(4),
        pct if (5.0..10.0).contains(&pct) => Award::Points(2),
        pct if pct < 5.0 => Award::Points(1),
        _ => Award::Points(0),
    }
}

fn institutional_ownership(v: &NormalizedValue, _ctx: &RunContext) -> Award {
    if v.is_unresolved() {
        return Award::Points(1);
    }
    match v.number() {
        pct if pct < 40.0 => Award::Points(3),
        pct if pct <= 60.0 => Award::Points(2),
        _ => Award::Points(1),
    }
}

// ---------------------------------------------------------------------------
// Insider
// ---------------------------------------------------------------------------

fn insider_ownership(v: &NormalizedValue, _ctx: &RunContext) -> Award {
    if v.is_unresolved() {
        return Award::Points(2);
    }
    match v.number() {
        pct if (5.0..=30.0).contains(&pct) => Award::Points(6),
        pct if (2.0..5.0).contains(&pct) => Award::Points(4),
        pct if (1.0..2.0).contains(&pct) => Award::Points(2),
        pct if pct < 1.0 => Award::Points(0),
        _ => Award::Points(3),
    }
}

fn ceo_ownership(v: &NormalizedValue, _ctx: &RunContext) -> Award {
    if v.is_unresolved() || v.contains("not disclosed") {
        return Award::Points(1);
    }
    match v.number() {
        pct if pct >= 5.0 => Award::Points(3),
        pct if pct >= 2.0 => Award::Points(2),
        pct if pct >= 1.0 => Award::Points(1),
        _ => Award::Points(0),
    }
}

fn net_insider_buying(v: &NormalizedValue, _ctx: &RunContext) -> Award {
    if v.is_unresolved() {
        return Award::Points(1);
    }
    match v.number() {
        pct if pct > 1.0 => Award::Points(4),
        // exactly 1% falls through to 0
        pct if pct > 0.0 && pct < 1.0 => Award::Points(2),
        pct if pct == 0.0 => Award::Points(1),
        _ => Award::Points(0),
    }
}

// ---------------------------------------------------------------------------
// Moat
// ---------------------------------------------------------------------------

fn moat_score(v: &NormalizedValue, _ctx: &RunContext) -> Award {
    match v.number() {
        s if s >= 4.0 => Award::Points(15),
        s if s >= 3.0 => Award::Points(9),
        s if s >= 2.0 => Award::Points(5),
        _ => Award::Points(0),
    }
}

fn business_model(v: &NormalizedValue, _ctx: &RunContext) -> Award {
    Award::Points(BusinessModel::classify(v.text()).points())
}

/// The four business model classes the profile step may assign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusinessModel {
    MissionCritical,
    HighSwitchingCost,
    CompetitiveCommodity,
    CyclicalLowDifferentiation,
}

impl BusinessModel {
    pub const ALL: [BusinessModel; 4] = [
        BusinessModel::MissionCritical,
        BusinessModel::HighSwitchingCost,
        BusinessModel::CompetitiveCommodity,
        BusinessModel::CyclicalLowDifferentiation,
    ];

    /// First matching keyword wins; anything unrecognized is treated as the
    /// lowest class.
    pub fn classify(text: &str) -> Self {
        let text = text.to_lowercase();
        if text.contains("mission-critical") || text.contains("mission critical") || text.contains("infrastructure") {
            BusinessModel::MissionCritical
        } else if text.contains("saas") || text.contains("platform") || text.contains("high switching") {
            BusinessModel::HighSwitchingCost
        } else if text.contains("commodity") {
            BusinessModel::CompetitiveCommodity
        } else {
            BusinessModel::CyclicalLowDifferentiation
        }
    }

    pub fn points(&self) -> u32 {
        match self {
            BusinessModel::MissionCritical => 15,
            BusinessModel::HighSwitchingCost => 10,
            BusinessModel::CompetitiveCommodity => 5,
            BusinessModel::CyclicalLowDifferentiation => 0,
        }
    }

    pub fn to_label(&self) -> &'static str {
        match self {
            BusinessModel::MissionCritical => "Mission-critical / infrastructure",
            BusinessModel::HighSwitchingCost => "High switching cost SaaS / platform",
            BusinessModel::CompetitiveCommodity => "Competitive commodity",
            BusinessModel::CyclicalLowDifferentiation => "Cyclical / low differentiation",
        }
    }
}

const DATE_FORMATS: [&str; 6] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%b %d, %Y", "%B %d, %Y", "%d %b %Y"];

pub fn parse_expiration(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
        .or_else(|| {
            // "2028-01-21 00:00:00" and similar timestamp renderings
            text.get(..10)
                .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
        })
}

/// Whole calendar months from `from` to `to`, ignoring the day of month.
pub fn months_between(from: NaiveDate, to: NaiveDate) -> i32 {
    (to.year() - from.year()) * 12 + (to.month() as i32 - from.month() as i32)
}
