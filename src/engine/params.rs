use crate::types::CallResult;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// In-flight cap used for unthrottled runs when none is configured.
pub const DEFAULT_UNTHROTTLED_CONCURRENCY: u32 = 1024;

/// Every problem found while checking a [`Params`], joined into one error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid parameters: {}", .violations.join("; "))]
pub struct ParamsError {
    pub violations: Vec<String>,
}

/// Configuration of one generator.
pub struct Params<C> {
    pub caller: C,
    /// Per-call deadline.
    pub timeout: Duration,
    /// Target attempts per second; 0 dispatches as fast as tickets allow.
    pub load_per_second: u32,
    /// Length of a run.
    pub duration: Duration,
    /// Where results go. Its capacity decides how soon results start being dropped.
    pub result_tx: mpsc::Sender<CallResult>,
    /// Upper bound on concurrently in-flight attempts.
    pub max_in_flight: Option<u32>,
}

impl<C> Params<C> {
    pub fn new(
        caller: C,
        timeout: Duration,
        load_per_second: u32,
        duration: Duration,
        result_tx: mpsc::Sender<CallResult>,
    ) -> Self {
        Self {
            caller,
            timeout,
            load_per_second,
            duration,
            result_tx,
            max_in_flight: None,
        }
    }

    pub fn with_max_in_flight(mut self, max_in_flight: u32) -> Self {
        self.max_in_flight = Some(max_in_flight);
        self
    }

    pub fn validate(&self) -> Result<(), ParamsError> {
        let mut violations = Vec::new();

        if self.timeout.is_zero() {
            violations.push("timeout must be greater than zero".to_string());
        }
        if self.duration.is_zero() {
            violations.push("duration must be greater than zero".to_string());
        }
        if self.result_tx.is_closed() {
            violations.push("result channel is already closed".to_string());
        }
        if self.max_in_flight == Some(0) {
            violations.push("max_in_flight must be greater than zero".to_string());
        }

        if violations.is_empty() {
            tracing::debug!(
                timeout = ?self.timeout,
                load_per_second = self.load_per_second,
                duration = ?self.duration,
                "Parameters checked"
            );
            Ok(())
        } else {
            Err(ParamsError { violations })
        }
    }

    /// Number of tickets the pool needs for these parameters.
    pub fn concurrency(&self) -> u32 {
        if self.load_per_second == 0 {
            return self.max_in_flight.unwrap_or(DEFAULT_UNTHROTTLED_CONCURRENCY);
        }

        let sized = concurrency_for(self.timeout, self.load_per_second);
        match self.max_in_flight {
            Some(cap) => sized.min(cap),
            None => sized,
        }
    }
}

impl<C> fmt::Debug for Params<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Params")
            .field("timeout", &self.timeout)
            .field("load_per_second", &self.load_per_second)
            .field("duration", &self.duration)
            .field("result_capacity", &self.result_tx.max_capacity())
            .field("max_in_flight", &self.max_in_flight)
            .finish_non_exhaustive()
    }
}

/// Gap between two dispatches at `load_per_second`, never shorter than 1ns.
pub fn dispatch_interval(load_per_second: u32) -> Duration {
    let nanos = 1_000_000_000u64 / u64::from(load_per_second.max(1));
    Duration::from_nanos(nanos.max(1))
}

/// How many attempts can be in flight but not yet timed out when dispatching
/// at `load_per_second`, plus the one just sent. Capped at `i32::MAX`.
pub fn concurrency_for(timeout: Duration, load_per_second: u32) -> u32 {
    let interval = dispatch_interval(load_per_second).as_nanos();
    let total = timeout.as_nanos() / interval + 1;
    total.min(i32::MAX as u128) as u32
}
