use analysis_core::MetricFamily;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::resolver::{Resolution, TierResolver};

/// What one family job produced.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Finished(Resolution),
    /// The job died (panic or cancellation) before producing a resolution.
    Failed(String),
}

impl JobOutcome {
    pub fn resolution(&self) -> Option<&Resolution> {
        match self {
            JobOutcome::Finished(resolution) => Some(resolution),
            JobOutcome::Failed(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FamilyResult {
    pub family: MetricFamily,
    pub outcome: JobOutcome,
}

/// Runs every family resolver for a ticker concurrently and returns the
/// results in resolver order, whatever order they complete in.
pub struct FetchOrchestrator {
    resolvers: Vec<Arc<TierResolver>>,
    max_concurrent: usize,
}

impl FetchOrchestrator {
    pub fn new(resolvers: Vec<TierResolver>, max_concurrent: usize) -> Self {
        Self {
            resolvers: resolvers.into_iter().map(Arc::new).collect(),
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn families(&self) -> Vec<MetricFamily> {
        self.resolvers.iter().map(|r| r.family()).collect()
    }

    pub async fn run_all(&self, ticker: &str) -> Vec<FamilyResult> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();

        tracing::info!("Dispatching {} metric families for {}", self.resolvers.len(), ticker);

        for (index, resolver) in self.resolvers.iter().enumerate() {
            let resolver = Arc::clone(resolver);
            let semaphore = Arc::clone(&semaphore);
            let ticker = ticker.to_string();

            // The resolver runs in its own task so a panic surfaces as a
            // JoinError here, tagged with the slot it belongs to.
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let job = tokio::spawn(async move { resolver.resolve(&ticker).await });
                (index, job.await)
            });
        }

        let mut slots: Vec<Option<JobOutcome>> = vec![None; self.resolvers.len()];

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(resolution))) => slots[index] = Some(JobOutcome::Finished(resolution)),
                Ok((index, Err(e))) => {
                    tracing::error!(
                        "{} job for {} failed: {}",
                        self.resolvers[index].family().to_label(),
                        ticker,
                        e
                    );
                    slots[index] = Some(JobOutcome::Failed(e.to_string()));
                }
                Err(e) => tracing::error!("Fetch task error: {}", e),
            }
        }

        self.resolvers
            .iter()
            .zip(slots)
            .map(|(resolver, slot)| FamilyResult {
                family: resolver.family(),
                outcome: slot.unwrap_or_else(|| JobOutcome::Failed("job did not complete".to_string())),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::tests::FakeProvider;
    use analysis_core::{MetricKey, MetricProvider, Payload, ProviderError};
    use async_trait::async_trait;
    use std::time::{Duration, Instant};

    struct PanickingProvider;

    #[async_trait]
    impl MetricProvider for PanickingProvider {
        fn source(&self) -> &'static str {
            "Broken"
        }

        async fn fetch(&self, _ticker: &str) -> Result<Payload, ProviderError> {
            panic!("scraper crashed")
        }
    }

    const LONG: Duration = Duration::from_secs(5);

    fn single(family: MetricFamily, key: MetricKey, value: &str, delay: Duration) -> TierResolver {
        let payload = Payload::new().with_metric(key, value);
        TierResolver::new(family).with_tier(FakeProvider::slow("Fake", payload, delay), LONG)
    }

    #[tokio::test]
    async fn test_results_keep_request_order() {
        let resolvers = vec![
            single(MetricFamily::MoatScore, MetricKey::MoatScore, "8", Duration::from_millis(150)),
            single(MetricFamily::EpsGrowth, MetricKey::ForwardEpsGrowth, "25%", Duration::from_millis(10)),
            single(MetricFamily::IvRank, MetricKey::IvRank, "40", Duration::from_millis(80)),
        ];
        let results = FetchOrchestrator::new(resolvers, 8).run_all("ACME").await;

        let families: Vec<MetricFamily> = results.iter().map(|r| r.family).collect();
        assert_eq!(
            families,
            vec![MetricFamily::MoatScore, MetricFamily::EpsGrowth, MetricFamily::IvRank]
        );
        let first = results[0].outcome.resolution().unwrap().raw_values(MetricFamily::MoatScore);
        assert_eq!(first[0].raw, "8");
    }

    #[tokio::test]
    async fn test_panicking_job_is_isolated() {
        let resolvers = vec![
            single(MetricFamily::MoatScore, MetricKey::MoatScore, "8", Duration::ZERO),
            TierResolver::new(MetricFamily::IvRank).with_tier(Arc::new(PanickingProvider), LONG),
            single(MetricFamily::EpsGrowth, MetricKey::ForwardEpsGrowth, "25%", Duration::from_millis(20)),
        ];
        let results = FetchOrchestrator::new(resolvers, 8).run_all("ACME").await;

        assert_eq!(results.len(), 3);
        assert!(results[0].outcome.resolution().is_some_and(Resolution::is_resolved));
        assert!(matches!(results[1].outcome, JobOutcome::Failed(_)));
        assert_eq!(results[1].family, MetricFamily::IvRank);
        assert!(results[2].outcome.resolution().is_some_and(Resolution::is_resolved));
    }

    #[tokio::test]
    async fn test_jobs_run_concurrently() {
        let resolvers = (0..4)
            .map(|_| single(MetricFamily::IvRank, MetricKey::IvRank, "10", Duration::from_millis(200)))
            .collect();
        let start = Instant::now();
        FetchOrchestrator::new(resolvers, 4).run_all("ACME").await;
        assert!(start.elapsed() < Duration::from_millis(700));
    }

    #[tokio::test]
    async fn test_concurrency_bound_is_respected() {
        let resolvers = (0..4)
            .map(|_| single(MetricFamily::IvRank, MetricKey::IvRank, "10", Duration::from_millis(100)))
            .collect();
        let start = Instant::now();
        FetchOrchestrator::new(resolvers, 1).run_all("ACME").await;
        assert!(start.elapsed() >= Duration::from_millis(400));
    }
}
