// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-process metrics accumulation for adapter calls and generation jobs
//! (ambient stack).

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Metrics captured for a single adapter invocation (`discover`/`query`/`execute`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AdapterCallMetrics {
    /// Platform slug the call was routed to.
    pub platform: String,
    /// AGP verb invoked, as its wire string (`"discover"`, `"query"`, `"execute"`).
    pub verb: String,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// `true` if the call completed successfully (transaction `succeeded`).
    pub succeeded: bool,
    /// `true` if the call failed specifically because of a timeout.
    pub timed_out: bool,
}

/// Metrics captured for one generation job run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GenerationJobMetrics {
    /// Target platform slug.
    pub platform: String,
    /// Wall-clock duration in milliseconds from claim to terminal status.
    pub duration_ms: u64,
    /// `true` if the job reached `complete`.
    pub succeeded: bool,
}

/// Aggregated statistics across recorded adapter calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdapterCallSummary {
    /// Number of calls recorded.
    pub count: usize,
    /// Mean duration in milliseconds.
    pub mean_duration_ms: f64,
    /// Median (p50) duration in milliseconds.
    pub p50_duration_ms: f64,
    /// 99th-percentile duration in milliseconds.
    pub p99_duration_ms: f64,
    /// Fraction of recorded calls that did not succeed.
    pub error_rate: f64,
    /// Fraction of recorded calls that failed due to timeout.
    pub timeout_rate: f64,
    /// Per-platform call counts (deterministic ordering).
    pub platform_counts: BTreeMap<String, usize>,
}

impl Default for AdapterCallSummary {
    fn default() -> Self {
        Self {
            count: 0,
            mean_duration_ms: 0.0,
            p50_duration_ms: 0.0,
            p99_duration_ms: 0.0,
            error_rate: 0.0,
            timeout_rate: 0.0,
            platform_counts: BTreeMap::new(),
        }
    }
}

/// Aggregated statistics across recorded generation jobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationJobSummary {
    /// Number of jobs recorded.
    pub count: usize,
    /// Mean duration in milliseconds.
    pub mean_duration_ms: f64,
    /// Fraction of recorded jobs that did not complete successfully.
    pub error_rate: f64,
}

impl Default for GenerationJobSummary {
    fn default() -> Self {
        Self {
            count: 0,
            mean_duration_ms: 0.0,
            error_rate: 0.0,
        }
    }
}

fn percentile(sorted: &[u64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0] as f64;
    }
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    sorted[lower] as f64 * (1.0 - frac) + sorted[upper] as f64 * frac
}

/// Thread-safe collector for adapter-call and generation-job metrics.
///
/// Wrap in an `Arc` (or clone — the inner storage is already
/// `Arc<Mutex<_>>`) to share across the daemon's request handlers and the
/// generation worker.
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    calls: Arc<Mutex<Vec<AdapterCallMetrics>>>,
    jobs: Arc<Mutex<Vec<GenerationJobMetrics>>>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    /// Create a new, empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            jobs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Record a completed adapter call.
    pub fn record_call(&self, metrics: AdapterCallMetrics) {
        info!(
            platform = %metrics.platform,
            verb = %metrics.verb,
            duration_ms = metrics.duration_ms,
            succeeded = metrics.succeeded,
            "adapter_call"
        );
        let mut data = self.calls.lock().expect("metrics lock poisoned");
        data.push(metrics);
    }

    /// Record a completed generation job.
    pub fn record_job(&self, metrics: GenerationJobMetrics) {
        info!(
            platform = %metrics.platform,
            duration_ms = metrics.duration_ms,
            succeeded = metrics.succeeded,
            "generation_job"
        );
        let mut data = self.jobs.lock().expect("metrics lock poisoned");
        data.push(metrics);
    }

    /// Number of adapter calls recorded so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("metrics lock poisoned").len()
    }

    /// Number of generation jobs recorded so far.
    #[must_use]
    pub fn job_count(&self) -> usize {
        self.jobs.lock().expect("metrics lock poisoned").len()
    }

    /// Compute an aggregated summary of all recorded adapter calls.
    #[must_use]
    pub fn call_summary(&self) -> AdapterCallSummary {
        let data = self.calls.lock().expect("metrics lock poisoned");
        if data.is_empty() {
            return AdapterCallSummary::default();
        }

        let count = data.len();
        let mut durations: Vec<u64> = data.iter().map(|c| c.duration_ms).collect();
        durations.sort_unstable();

        let total_duration: u64 = durations.iter().sum();
        let mean_duration_ms = total_duration as f64 / count as f64;
        let p50_duration_ms = percentile(&durations, 50.0);
        let p99_duration_ms = percentile(&durations, 99.0);

        let errors = data.iter().filter(|c| !c.succeeded).count();
        let timeouts = data.iter().filter(|c| c.timed_out).count();

        let mut platform_counts: BTreeMap<String, usize> = BTreeMap::new();
        for c in data.iter() {
            *platform_counts.entry(c.platform.clone()).or_insert(0) += 1;
        }

        AdapterCallSummary {
            count,
            mean_duration_ms,
            p50_duration_ms,
            p99_duration_ms,
            error_rate: errors as f64 / count as f64,
            timeout_rate: timeouts as f64 / count as f64,
            platform_counts,
        }
    }

    /// Compute an aggregated summary of all recorded generation jobs.
    #[must_use]
    pub fn job_summary(&self) -> GenerationJobSummary {
        let data = self.jobs.lock().expect("metrics lock poisoned");
        if data.is_empty() {
            return GenerationJobSummary::default();
        }
        let count = data.len();
        let total_duration: u64 = data.iter().map(|j| j.duration_ms).sum();
        let errors = data.iter().filter(|j| !j.succeeded).count();
        GenerationJobSummary {
            count,
            mean_duration_ms: total_duration as f64 / count as f64,
            error_rate: errors as f64 / count as f64,
        }
    }

    /// Clear all recorded metrics. Exposed for test isolation.
    pub fn clear(&self) {
        self.calls.lock().expect("metrics lock poisoned").clear();
        self.jobs.lock().expect("metrics lock poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(platform: &str, duration_ms: u64, succeeded: bool) -> AdapterCallMetrics {
        AdapterCallMetrics {
            platform: platform.to_string(),
            verb: "query".to_string(),
            duration_ms,
            succeeded,
            timed_out: false,
        }
    }

    #[test]
    fn empty_collector_summaries_are_zeroed() {
        let c = MetricsCollector::new();
        assert_eq!(c.call_summary(), AdapterCallSummary::default());
        assert_eq!(c.job_summary(), GenerationJobSummary::default());
    }

    #[test]
    fn call_summary_aggregates_duration_and_error_rate() {
        let c = MetricsCollector::new();
        c.record_call(call("stripe", 100, true));
        c.record_call(call("stripe", 200, false));
        c.record_call(call("github", 300, true));

        let summary = c.call_summary();
        assert_eq!(summary.count, 3);
        assert!((summary.mean_duration_ms - 200.0).abs() < f64::EPSILON);
        assert!((summary.error_rate - (1.0 / 3.0)).abs() < 1e-9);
        assert_eq!(summary.platform_counts["stripe"], 2);
        assert_eq!(summary.platform_counts["github"], 1);
    }

    #[test]
    fn timeout_rate_only_counts_timed_out_calls() {
        let c = MetricsCollector::new();
        let mut timeout_call = call("stripe", 50, false);
        timeout_call.timed_out = true;
        c.record_call(timeout_call);
        c.record_call(call("stripe", 50, true));

        let summary = c.call_summary();
        assert!((summary.timeout_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn job_summary_aggregates() {
        let c = MetricsCollector::new();
        c.record_job(GenerationJobMetrics { platform: "stripe".into(), duration_ms: 1000, succeeded: true });
        c.record_job(GenerationJobMetrics { platform: "square".into(), duration_ms: 2000, succeeded: false });

        let summary = c.job_summary();
        assert_eq!(summary.count, 2);
        assert!((summary.mean_duration_ms - 1500.0).abs() < f64::EPSILON);
        assert!((summary.error_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn clear_resets_both_streams() {
        let c = MetricsCollector::new();
        c.record_call(call("stripe", 10, true));
        c.record_job(GenerationJobMetrics { platform: "stripe".into(), duration_ms: 10, succeeded: true });
        c.clear();
        assert_eq!(c.call_count(), 0);
        assert_eq!(c.job_count(), 0);
    }

    #[test]
    fn percentile_matches_single_element() {
        assert_eq!(percentile(&[42], 99.0), 42.0);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }
}
