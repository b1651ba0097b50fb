use std::{collections::BTreeMap, time::Duration};

use serde::{Deserialize, Serialize};

use crate::metric::RequestResult;

/// Compact accumulator of [`RequestResult`]s.
///
/// `Summary` only keeps what is needed for the end-of-run report: counts,
/// failures grouped by [`ErrorKind::label`](crate::metric::ErrorKind::label)
/// and latency bounds. Anything heavier (histograms, percentiles, time series)
/// belongs to whoever consumes the live result stream.
///
/// Consuming is order independent and summaries merge, so results can be
/// fed as they arrive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub requests: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Failed requests per failure kind.
    pub failures: BTreeMap<String, u64>,
    pub total_latency: Duration,
    pub min_latency: Option<Duration>,
    pub max_latency: Option<Duration>,
}

impl Summary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Incorporate a single result.
    pub fn consume(&mut self, result: &RequestResult) {
        self.requests += 1;
        match result.outcome.error() {
            None => self.succeeded += 1,
            Some(kind) => {
                self.failed += 1;
                *self.failures.entry(kind.label().to_string()).or_default() += 1;
            }
        }

        self.total_latency += result.latency;
        self.min_latency = Some(
            self.min_latency
                .map_or(result.latency, |m| m.min(result.latency)),
        );
        self.max_latency = Some(
            self.max_latency
                .map_or(result.latency, |m| m.max(result.latency)),
        );
    }

    /// Fold another summary into this one, e.g. to combine summaries from
    /// several runs.
    pub fn merge(&mut self, other: &Summary) {
        self.requests += other.requests;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        for (kind, n) in &other.failures {
            *self.failures.entry(kind.clone()).or_default() += n;
        }
        self.total_latency += other.total_latency;
        self.min_latency = match (self.min_latency, other.min_latency) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max_latency = match (self.max_latency, other.max_latency) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    pub fn mean_latency(&self) -> Option<Duration> {
        (self.requests > 0).then(|| self.total_latency.div_f64(self.requests as f64))
    }

    /// Share of successful requests in `[0, 1]`.
    pub fn success_ratio(&self) -> Option<f64> {
        (self.requests > 0).then(|| self.succeeded as f64 / self.requests as f64)
    }

    pub fn failures_of(&self, label: &str) -> u64 {
        self.failures.get(label).copied().unwrap_or(0)
    }
}
