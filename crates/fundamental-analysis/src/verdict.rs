use analysis_core::{Bucket, BucketTotals, MetricKey, QualitativeNotes, Report, ScoredMetric, Verdict};
use chrono::NaiveDate;

pub const ELITE_THRESHOLD: u32 = 80;
pub const QUALIFIED_THRESHOLD: u32 = 70;
pub const WATCHLIST_THRESHOLD: u32 = 60;

/// Bucket membership. Disjoint; metrics not listed don't count toward any bucket.
static BUCKETS: &[(Bucket, &[MetricKey])] = &[
    (
        Bucket::Survival,
        &[
            MetricKey::Runway,
            MetricKey::NetDebtToEbitda,
            MetricKey::AssetsToLiabilities,
            MetricKey::CashBurnSeverity,
            MetricKey::ShareCountGrowth,
            MetricKey::CapitalStructurePressure,
        ],
    ),
    (
        Bucket::Growth,
        &[
            MetricKey::MarketCap,
            MetricKey::ForwardEpsGrowth,
            MetricKey::OperatingLeverage,
            MetricKey::IvRank,
            MetricKey::ShortFloat,
            MetricKey::InstitutionalOwnership,
        ],
    ),
    (
        Bucket::Insider,
        &[
            MetricKey::TotalInsiderOwnership,
            MetricKey::CeoOwnership,
            MetricKey::NetInsiderBuying,
        ],
    ),
    (Bucket::Moat, &[MetricKey::MoatScore, MetricKey::BusinessModel]),
];

pub fn bucket_of(metric: MetricKey) -> Option<Bucket> {
    BUCKETS
        .iter()
        .find(|(_, members)| members.contains(&metric))
        .map(|(bucket, _)| *bucket)
}

pub fn bucket_members(bucket: Bucket) -> &'static [MetricKey] {
    BUCKETS
        .iter()
        .find(|(b, _)| *b == bucket)
        .map(|(_, members)| *members)
        .unwrap_or(&[])
}

/// Any hard rejection wins over the numeric total.
pub fn verdict_for(total: u32, rejected: bool) -> Verdict {
    if rejected {
        Verdict::Rejected
    } else if total >= ELITE_THRESHOLD {
        Verdict::EliteCandidate
    } else if total >= QUALIFIED_THRESHOLD {
        Verdict::Qualified
    } else if total >= WATCHLIST_THRESHOLD {
        Verdict::Watchlist
    } else {
        Verdict::Reject
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VerdictAggregator;

impl VerdictAggregator {
    pub fn new() -> Self {
        Self
    }

    pub fn aggregate(&self, ticker: &str, analysis_date: NaiveDate, metrics: Vec<ScoredMetric>) -> Report {
        let mut buckets = BucketTotals::default();
        for scored in &metrics {
            if let Some(bucket) = bucket_of(scored.score.metric) {
                buckets.add(bucket, scored.score.obtained);
            }
        }

        let rejected = metrics.iter().any(|m| m.score.rejected);
        let final_score = buckets.total();
        let verdict = verdict_for(final_score, rejected);

        if rejected {
            let reasons: Vec<&str> = metrics
                .iter()
                .filter(|m| m.score.rejected)
                .map(|m| m.score.metric.to_label())
                .collect();
            tracing::info!("{}: rejected by {}", ticker, reasons.join(", "));
        }
        tracing::info!("{}: score {} -> {}", ticker, final_score, verdict);

        Report {
            ticker: ticker.to_string(),
            analysis_date,
            metrics,
            buckets,
            final_score,
            verdict,
            rejected,
            notes: QualitativeNotes::default(),
        }
    }
}
