//! Normalization, rubric scoring and verdict aggregation.
//!
//! Everything here is synchronous and deterministic: given the same raw
//! values and run date, a report always scores the same.

pub mod normalizer;
pub mod rules;
pub mod verdict;

pub use normalizer::normalize;
pub use rules::{Award, BusinessModel, RunContext, ScoringEngine};
pub use verdict::{verdict_for, VerdictAggregator};

use analysis_core::{RawMetricValue, Report};
use chrono::NaiveDate;

/// Score a complete set of raw values into a report.
///
/// The run context (net debt, EBITDA, run date) is derived from `raws` before
/// any rule runs, so the debt ratio rule never depends on evaluation order.
pub fn score_report(ticker: &str, as_of: NaiveDate, raws: Vec<RawMetricValue>) -> Report {
    let ctx = RunContext::from_raw_values(&raws, as_of);
    let scored = ScoringEngine::new().score_all(raws, &ctx);
    VerdictAggregator::new().aggregate(ticker, as_of, scored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use analysis_core::{MetricKey, Verdict};

    #[test]
    fn test_debt_ratio_sees_net_debt_listed_after_it() {
        let as_of = NaiveDate::from_ymd_opt(2026, 3, 14).unwrap();
        let raws = vec![
            RawMetricValue::new(MetricKey::NetDebtToEbitda, "Yahoo Finance", "4.20"),
            RawMetricValue::new(MetricKey::NetDebt, "Yahoo Finance", "-50"),
            RawMetricValue::new(MetricKey::Ebitda, "Yahoo Finance", "100"),
        ];
        let report = score_report("ACME", as_of, raws);
        let ratio = report.score_for(MetricKey::NetDebtToEbitda).unwrap();
        assert_eq!((ratio.obtained, ratio.max, ratio.rejected), (7, 7, false));
        assert_eq!(report.final_score, 7);
        assert_eq!(report.verdict, Verdict::Reject);
    }

    #[test]
    fn test_rejected_metric_propagates_to_verdict() {
        let as_of = NaiveDate::from_ymd_opt(2026, 3, 14).unwrap();
        let raws = vec![
            RawMetricValue::new(MetricKey::MarketCap, "Yahoo Finance", "1.20 Trillion"),
            RawMetricValue::new(MetricKey::MoatScore, "GuruFocus", "5"),
        ];
        let report = score_report("MEGA", as_of, raws);
        assert!(report.rejected);
        assert_eq!(report.verdict, Verdict::Rejected);
        assert_eq!(report.score_for(MetricKey::MarketCap).unwrap().obtained_cell(), "rejected");
    }
}
