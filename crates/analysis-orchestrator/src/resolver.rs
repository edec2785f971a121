use analysis_core::{
    Field, MetricFamily, MetricProvider, NoteKind, Payload, ProviderError, RawMetricValue, UNRESOLVED,
};
use std::sync::Arc;
use std::time::Duration;

/// One provider in a family's chain, with the deadline for its whole call
/// (internal retries included).
#[derive(Clone)]
pub struct Tier {
    pub provider: Arc<dyn MetricProvider>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved {
        payload: Payload,
        source: &'static str,
        /// Zero-based position of the tier that answered.
        tier: usize,
    },
    Unresolved {
        failures: Vec<(&'static str, ProviderError)>,
    },
}

impl Resolution {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Resolved { .. })
    }

    /// One raw value per family metric, in family order. Metrics the
    /// answering tier left out or blank come back unresolved.
    pub fn raw_values(&self, family: MetricFamily) -> Vec<RawMetricValue> {
        family
            .metrics()
            .iter()
            .map(|&key| match self {
                Resolution::Resolved { payload, source, .. } => payload
                    .metric(key)
                    .filter(|v| !v.trim().is_empty())
                    .map(|v| RawMetricValue::new(key, *source, v))
                    .unwrap_or_else(|| RawMetricValue::unresolved(key)),
                Resolution::Unresolved { .. } => RawMetricValue::unresolved(key),
            })
            .collect()
    }

    pub fn notes(&self) -> Vec<(NoteKind, &str)> {
        match self {
            Resolution::Resolved { payload, .. } => payload
                .values()
                .iter()
                .filter_map(|(field, value)| match field {
                    Field::Note(kind) => Some((*kind, value.as_str())),
                    Field::Metric(_) => None,
                })
                .collect(),
            Resolution::Unresolved { .. } => Vec::new(),
        }
    }

    /// Summary of why every tier failed, for logs and batch errors.
    pub fn failure_summary(&self) -> String {
        match self {
            Resolution::Resolved { source, .. } => format!("resolved by {}", source),
            Resolution::Unresolved { failures } if failures.is_empty() => "no tiers configured".to_string(),
            Resolution::Unresolved { failures } => failures
                .iter()
                .map(|(source, err)| format!("{}: {}", source, err))
                .collect::<Vec<_>>()
                .join("; "),
        }
    }
}

/// Ordered fallback chain for one metric family.
///
/// Tiers are tried strictly in order and the first one that answers wins;
/// lower tiers are never consulted after that. Every failure, including a
/// timeout or an empty payload, only moves on to the next tier.
#[derive(Clone)]
pub struct TierResolver {
    family: MetricFamily,
    tiers: Vec<Tier>,
}

impl TierResolver {
    pub fn new(family: MetricFamily) -> Self {
        Self {
            family,
            tiers: Vec::new(),
        }
    }

    pub fn with_tier(mut self, provider: Arc<dyn MetricProvider>, timeout: Duration) -> Self {
        self.tiers.push(Tier { provider, timeout });
        self
    }

    pub fn family(&self) -> MetricFamily {
        self.family
    }

    pub fn tier_sources(&self) -> Vec<&'static str> {
        self.tiers.iter().map(|t| t.provider.source()).collect()
    }

    pub async fn resolve(&self, ticker: &str) -> Resolution {
        let mut failures = Vec::new();

        for (index, tier) in self.tiers.iter().enumerate() {
            let source = tier.provider.source();
            let outcome = match tokio::time::timeout(tier.timeout, tier.provider.fetch(ticker)).await {
                Ok(Ok(payload)) if payload.is_empty() => Err(ProviderError::EmptyPayload),
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(tier.timeout.as_secs())),
            };

            match outcome {
                Ok(payload) => {
                    tracing::info!(
                        "{} for {}: resolved by {} (tier {})",
                        self.family.to_label(),
                        ticker,
                        source,
                        index + 1
                    );
                    return Resolution::Resolved {
                        payload,
                        source,
                        tier: index,
                    };
                }
                Err(err) => {
                    tracing::warn!(
                        "{} for {}: tier {} ({}) failed: {}",
                        self.family.to_label(),
                        ticker,
                        index + 1,
                        source,
                        err
                    );
                    failures.push((source, err));
                }
            }
        }

        tracing::warn!(
            "{} for {}: all {} tier(s) exhausted, marking {}",
            self.family.to_label(),
            ticker,
            self.tiers.len(),
            UNRESOLVED
        );
        Resolution::Unresolved { failures }
    }
}
