use crate::types::{CallResult, ResultCode};
use hdrhistogram::Histogram;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;

const MAX_LATENCY_US: u64 = 60_000_000;

/// Consumer-side counts of delivered results.
pub struct Tally {
    histogram: Histogram<u64>,
    codes: BTreeMap<ResultCode, u64>,
    total: u64,
}

impl Default for Tally {
    fn default() -> Self {
        Self::new()
    }
}

impl Tally {
    pub fn new() -> Self {
        let histogram = Histogram::<u64>::new_with_bounds(1, MAX_LATENCY_US, 3)
            .expect("Failed to create histogram");

        Self {
            histogram,
            codes: BTreeMap::new(),
            total: 0,
        }
    }

    /// Consume `rx` until the generator closes it.
    pub async fn drain(mut rx: mpsc::Receiver<CallResult>) -> Self {
        let mut tally = Self::new();
        while let Some(result) = rx.recv().await {
            tally.record(&result);
        }
        tally
    }

    pub fn record(&mut self, result: &CallResult) {
        self.total += 1;
        *self.codes.entry(result.code).or_insert(0) += 1;

        let latency = (result.elapsed.as_micros() as u64).clamp(1, MAX_LATENCY_US);
        let _ = self.histogram.record(latency);
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn count(&self, code: ResultCode) -> u64 {
        self.codes.get(&code).copied().unwrap_or(0)
    }

    /// Counts per code, in code order, skipping codes never seen.
    pub fn codes(&self) -> impl Iterator<Item = (ResultCode, u64)> + '_ {
        self.codes.iter().map(|(code, count)| (*code, *count))
    }

    /// Successful results per second over `duration`.
    pub fn success_per_sec(&self, duration: Duration) -> f64 {
        let secs = duration.as_secs_f64();
        if secs > 0.0 {
            self.count(ResultCode::Success) as f64 / secs
        } else {
            0.0
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total > 0 {
            self.count(ResultCode::Success) as f64 / self.total as f64
        } else {
            0.0
        }
    }

    pub fn latency_percentile(&self, p: f64) -> Duration {
        Duration::from_micros(self.histogram.value_at_percentile(p))
    }

    pub fn latency_max(&self) -> Duration {
        Duration::from_micros(self.histogram.max())
    }
}
