//! Tiered acquisition of every metric family and the two entry points the
//! application calls: `analyze` and `rescore_from_stored_values`.

use analysis_core::{
    MetricFamily, NoteKind, OrchestrationError, ProviderError, QualitativeNotes, RawMetricValue, RecordError,
    Report, StoredReport,
};
use chrono::{NaiveDate, Utc};
use data_sources::MoatCache;
use fundamental_analysis::score_report;

pub mod chains;
pub mod config;
pub mod fetch;
pub mod resolver;

pub use chains::standard_resolvers;
pub use config::ScreenerConfig;
pub use fetch::{FamilyResult, FetchOrchestrator, JobOutcome};
pub use resolver::{Resolution, Tier, TierResolver};

const MAX_TICKER_LEN: usize = 10;

/// Trimmed, upper-cased ticker, or `InvalidTicker`.
pub fn validate_ticker(ticker: &str) -> Result<String, OrchestrationError> {
    let symbol = ticker.trim().to_uppercase();
    let valid = !symbol.is_empty()
        && symbol.len() <= MAX_TICKER_LEN
        && symbol.starts_with(|c: char| c.is_ascii_alphabetic())
        && symbol.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
    if valid {
        Ok(symbol)
    } else {
        Err(OrchestrationError::InvalidTicker(ticker.to_string()))
    }
}

pub struct AnalysisOrchestrator {
    fetcher: FetchOrchestrator,
    /// Fixed run date; today's date when unset.
    as_of: Option<NaiveDate>,
}

impl AnalysisOrchestrator {
    pub fn new(resolvers: Vec<TierResolver>, max_concurrent: usize) -> Self {
        Self {
            fetcher: FetchOrchestrator::new(resolvers, max_concurrent),
            as_of: None,
        }
    }

    /// Production wiring. An unreachable moat cache only disables that tier.
    pub async fn from_config(config: &ScreenerConfig) -> Self {
        let moat_cache = MoatCache::connect(&config.database_url)
            .await
            .map_err(|e| ProviderError::Unavailable(format!("moat cache: {}", e)));
        if let Err(e) = &moat_cache {
            tracing::warn!("Moat cache disabled: {}", e);
        }
        for key in config.missing_keys() {
            tracing::warn!("{} not set; tiers that need it will be skipped", key);
        }
        Self::new(standard_resolvers(config, moat_cache), config.max_concurrent_jobs)
    }

    pub fn with_as_of(mut self, as_of: NaiveDate) -> Self {
        self.as_of = Some(as_of);
        self
    }

    /// Fetch, normalize and score every metric for `ticker`.
    ///
    /// Individual families that can't be resolved become N/A rows; only a
    /// failed fundamentals batch aborts the run.
    pub async fn analyze(&self, ticker: &str) -> Result<Report, OrchestrationError> {
        let symbol = validate_ticker(ticker)?;
        let as_of = self.as_of.unwrap_or_else(|| Utc::now().date_naive());
        tracing::info!("Starting LEAPS analysis for {} (run date {})", symbol, as_of);

        let results = self.fetcher.run_all(&symbol).await;
        check_primary_batch(&symbol, &results)?;

        let mut raws: Vec<RawMetricValue> = Vec::new();
        let mut notes = QualitativeNotes::default();

        for family in MetricFamily::ALL {
            let resolution = results
                .iter()
                .find(|r| r.family == family)
                .and_then(|r| r.outcome.resolution());
            match resolution {
                Some(resolution) => {
                    raws.extend(resolution.raw_values(family));
                    apply_notes(&mut notes, resolution.notes());
                }
                None => raws.extend(family.metrics().iter().map(|&key| RawMetricValue::unresolved(key))),
            }
        }

        let mut report = score_report(&symbol, as_of, raws);
        report.notes = notes;
        Ok(report)
    }
}

fn check_primary_batch(ticker: &str, results: &[FamilyResult]) -> Result<(), OrchestrationError> {
    let primary = results.iter().find(|r| r.family == MetricFamily::Fundamentals);
    let reason = match primary.map(|r| &r.outcome) {
        Some(JobOutcome::Finished(resolution)) if resolution.is_resolved() => return Ok(()),
        Some(JobOutcome::Finished(resolution)) => resolution.failure_summary(),
        Some(JobOutcome::Failed(reason)) => reason.clone(),
        None => "no fundamentals resolver configured".to_string(),
    };
    tracing::error!("Primary data batch failed for {}: {}", ticker, reason);
    Err(OrchestrationError::PrimaryBatchFailed {
        ticker: ticker.to_string(),
        reason,
    })
}

fn apply_notes(notes: &mut QualitativeNotes, found: Vec<(NoteKind, &str)>) {
    for (kind, text) in found {
        let lines = || {
            text.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect()
        };
        match kind {
            NoteKind::Risks => notes.risks = lines(),
            NoteKind::Rewards => notes.rewards = lines(),
            NoteKind::CompanyDescription => notes.company_description = text.to_string(),
            NoteKind::ValueProposition => notes.value_proposition = text.to_string(),
            NoteKind::MoatAnalysis => notes.moat_analysis = text.to_string(),
        }
    }
}

/// Recompute scores and verdict from a persisted report.
///
/// Raw values keep their stored order and sources; the run context comes
/// from the stored rows and the stored date stamp, so a redisplayed report
/// scores exactly as it did when it was saved.
pub fn rescore_from_stored_values(stored: &StoredReport) -> Result<Report, RecordError> {
    let as_of = stored.analysis_date()?;
    let raws = stored.raw_values()?;
    let mut report = score_report(&stored.ticker, as_of, raws);
    report.notes = stored.notes();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::tests::FakeProvider;
    use analysis_core::{MetricKey, Payload, Verdict, UNRESOLVED};
    use std::time::Duration;

    const LONG: Duration = Duration::from_secs(5);

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 14).unwrap()
    }

    fn fundamentals() -> Payload {
        Payload::new()
            .with_metric(MetricKey::CurrentPrice, "$12.40")
            .with_metric(MetricKey::MarketCap, "1.80 Billion")
            .with_metric(MetricKey::LatestExpiration, "2028-01-21")
            .with_metric(MetricKey::TotalInsiderOwnership, "12.00%")
            .with_metric(MetricKey::AssetsToLiabilities, "2.40")
            .with_metric(MetricKey::Runway, "Positive OCF (No Burn)")
            .with_metric(MetricKey::NetDebt, "-50.00 Million")
            .with_metric(MetricKey::Ebitda, "100.00 Million")
            .with_metric(MetricKey::NetDebtToEbitda, "-0.50")
            .with_metric(MetricKey::CashBurnSeverity, "0.00% (Positive FCF)")
            .with_metric(MetricKey::ShareCountGrowth, "-1.20%")
            .with_metric(MetricKey::OperatingLeverage, "3.10")
            .with_metric(MetricKey::CapitalStructurePressure, "No converts / ATM")
    }

    fn resolver(family: MetricFamily, payload: Payload) -> TierResolver {
        TierResolver::new(family).with_tier(FakeProvider::ok("Fake", payload), LONG)
    }

    fn full_chain() -> Vec<TierResolver> {
        vec![
            resolver(MetricFamily::Fundamentals, fundamentals()),
            resolver(
                MetricFamily::FinvizSnapshot,
                Payload::new()
                    .with_metric(MetricKey::NetInsiderBuying, "2.50%")
                    .with_metric(MetricKey::NetInsiderActivity, "Net Insider Buying")
                    .with_metric(MetricKey::InstitutionalOwnership, "35.00%")
                    .with_metric(MetricKey::ShortFloat, "12.00%"),
            ),
            resolver(MetricFamily::MoatScore, Payload::new().with_metric(MetricKey::MoatScore, "8")),
            resolver(MetricFamily::EpsGrowth, Payload::new().with_metric(MetricKey::ForwardEpsGrowth, "32.00%")),
            TierResolver::new(MetricFamily::IvRank).with_tier(
                FakeProvider::failing("Unusual Whales", ProviderError::Status(403)),
                LONG,
            ),
            resolver(
                MetricFamily::BusinessProfile,
                Payload::new()
                    .with_metric(MetricKey::CeoOwnership, "6%")
                    .with_metric(MetricKey::BusinessModel, "Mission-critical / infrastructure")
                    .with_note(NoteKind::CompanyDescription, "Acme makes anvils."),
            ),
            resolver(
                MetricFamily::RiskRewards,
                Payload::new()
                    .with_note(NoteKind::Risks, "Dilution\nCustomer concentration")
                    .with_note(NoteKind::Rewards, "Undervalued"),
            ),
        ]
    }

    #[test]
    fn test_validate_ticker() {
        assert_eq!(validate_ticker(" brk.b ").unwrap(), "BRK.B");
        assert!(matches!(validate_ticker(""), Err(OrchestrationError::InvalidTicker(_))));
        assert!(validate_ticker("AA PL").is_err());
        assert!(validate_ticker("1ABC").is_err());
        assert!(validate_ticker("WAYTOOLONGTICKER").is_err());
    }

    #[tokio::test]
    async fn test_analyze_scores_every_metric_in_catalogue_order() {
        let orchestrator = AnalysisOrchestrator::new(full_chain(), 4).with_as_of(as_of());
        let report = orchestrator.analyze("acme").await.unwrap();

        assert_eq!(report.ticker, "ACME");
        let keys: Vec<MetricKey> = report.metrics.iter().map(|m| m.raw.metric).collect();
        assert_eq!(keys, MetricKey::ALL.to_vec());

        let iv = report.metrics.iter().find(|m| m.raw.metric == MetricKey::IvRank).unwrap();
        assert_eq!(iv.raw.raw, UNRESOLVED);
        assert_eq!(iv.score.obtained, 1);

        let debt = report.score_for(MetricKey::NetDebtToEbitda).unwrap();
        assert_eq!((debt.obtained, debt.max), (7, 7));

        assert!(!report.rejected);
        assert_eq!(report.final_score, 98);
        assert_eq!(report.verdict, Verdict::EliteCandidate);
        assert_eq!(report.notes.risks, vec!["Dilution", "Customer concentration"]);
        assert_eq!(report.notes.company_description, "Acme makes anvils.");
        assert_eq!(report.notes.moat_analysis, UNRESOLVED);
    }

    #[tokio::test]
    async fn test_failed_fundamentals_is_batch_failure() {
        let mut chain = full_chain();
        chain[0] = TierResolver::new(MetricFamily::Fundamentals).with_tier(
            FakeProvider::failing("Yahoo Finance", ProviderError::EmptyPayload),
            LONG,
        );
        let orchestrator = AnalysisOrchestrator::new(chain, 4).with_as_of(as_of());
        match orchestrator.analyze("ACME").await {
            Err(OrchestrationError::PrimaryBatchFailed { ticker, reason }) => {
                assert_eq!(ticker, "ACME");
                assert!(reason.contains("Yahoo Finance"));
            }
            other => panic!("expected batch failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_ticker_never_fetches() {
        let probe = FakeProvider::ok("Fake", fundamentals());
        let chain = vec![TierResolver::new(MetricFamily::Fundamentals).with_tier(probe.clone(), LONG)];
        let orchestrator = AnalysisOrchestrator::new(chain, 4);
        assert!(matches!(
            orchestrator.analyze("  ").await,
            Err(OrchestrationError::InvalidTicker(_))
        ));
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_families_become_unresolved_rows() {
        let chain = vec![resolver(MetricFamily::Fundamentals, fundamentals())];
        let report = AnalysisOrchestrator::new(chain, 4)
            .with_as_of(as_of())
            .analyze("ACME")
            .await
            .unwrap();
        assert_eq!(report.metrics.len(), MetricKey::ALL.len());
        let moat = report.metrics.iter().find(|m| m.raw.metric == MetricKey::MoatScore).unwrap();
        assert_eq!(moat.raw.source, UNRESOLVED);
        assert_eq!(moat.score.obtained, 0);
    }

    #[tokio::test]
    async fn test_rescore_round_trip_matches_original() {
        let orchestrator = AnalysisOrchestrator::new(full_chain(), 4).with_as_of(as_of());
        let report = orchestrator.analyze("ACME").await.unwrap();

        let stored = StoredReport::from_report(&report);
        let rescored = rescore_from_stored_values(&stored).unwrap();

        assert_eq!(rescored.analysis_date, as_of());
        assert_eq!(rescored.final_score, report.final_score);
        assert_eq!(rescored.verdict, report.verdict);
        assert_eq!(rescored.buckets, report.buckets);
        assert_eq!(rescored.notes, report.notes);
        let before: Vec<_> = report.metrics.iter().map(|m| m.score).collect();
        let after: Vec<_> = rescored.metrics.iter().map(|m| m.score).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_rescore_uses_stored_date_for_expiration_gate() {
        let orchestrator_date = NaiveDate::from_ymd_opt(2027, 3, 1).unwrap();
        let report = score_report(
            "ACME",
            orchestrator_date,
            vec![RawMetricValue::new(MetricKey::LatestExpiration, "Yahoo Finance", "2028-01-21")],
        );
        assert!(report.rejected);

        let stored = StoredReport::from_report(&report);
        let rescored = rescore_from_stored_values(&stored).unwrap();
        assert!(rescored.rejected);
        assert_eq!(rescored.verdict, Verdict::Rejected);
    }

    #[test]
    fn test_rescore_without_date_row_fails() {
        let stored = StoredReport {
            ticker: "ACME".into(),
            rows: Vec::new(),
        };
        assert_eq!(rescore_from_stored_values(&stored).unwrap_err(), RecordError::MissingDate);
    }
}
