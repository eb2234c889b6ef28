use crate::caller::Caller;
use crate::engine::attempt;
use crate::engine::params::{Params, ParamsError, dispatch_interval};
use crate::engine::tickets::{TicketPool, TicketPoolError};
use crate::types::{CallResult, EngineStatus};
use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error(transparent)]
    InvalidParams(#[from] ParamsError),
    #[error(transparent)]
    TicketPool(#[from] TicketPoolError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopCause {
    Deadline,
    Requested,
}

impl fmt::Display for StopCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopCause::Deadline => f.write_str("deadline reached"),
            StopCause::Requested => f.write_str("stop requested"),
        }
    }
}

/// Hand-off between `start`/`stop` and the running dispatch loop.
/// Never touched on the dispatch or attempt path.
struct RunSlot {
    result_tx: Option<mpsc::Sender<CallResult>>,
    cancel: CancellationToken,
    finished: CancellationToken,
}

pub(crate) struct Shared<C> {
    pub(crate) caller: C,
    pub(crate) timeout: Duration,
    load_per_second: u32,
    duration: Duration,
    concurrency: u32,
    tickets: TicketPool,
    status: AtomicU8,
    call_count: AtomicU64,
    dropped: AtomicU64,
    run: Mutex<RunSlot>,
}

/// Drives a [`Caller`] at a target rate for a fixed duration.
///
/// Cloning a generator yields another handle to the same engine.
pub struct Generator<C> {
    shared: Arc<Shared<C>>,
}

impl<C> Clone for Generator<C> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<C: Caller> Generator<C> {
    pub fn new(params: Params<C>) -> Result<Self, GeneratorError> {
        tracing::debug!(?params, "Creating load generator");
        params.validate()?;

        let concurrency = params.concurrency();
        let tickets = TicketPool::new(concurrency)?;
        tracing::info!(concurrency, "Load generator initialized");

        Ok(Self {
            shared: Arc::new(Shared {
                caller: params.caller,
                timeout: params.timeout,
                load_per_second: params.load_per_second,
                duration: params.duration,
                concurrency,
                tickets,
                status: AtomicU8::new(EngineStatus::Original as u8),
                call_count: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                run: Mutex::new(RunSlot {
                    result_tx: Some(params.result_tx),
                    cancel: CancellationToken::new(),
                    finished: CancellationToken::new(),
                }),
            }),
        })
    }

    /// Begin a run. Returns immediately; `false` if a run is already under way
    /// or no tokio runtime is available.
    pub fn start(&self) -> bool {
        let Ok(handle) = Handle::try_current() else {
            tracing::warn!("Load generator can only be started inside a tokio runtime");
            return false;
        };

        let shared = &self.shared;
        let deadline = deadline_after(shared.duration);
        if !shared.transition(EngineStatus::Original, EngineStatus::Starting)
            && !shared.transition(EngineStatus::Stopped, EngineStatus::Starting)
        {
            return false;
        }

        let cancel = CancellationToken::new();
        let finished = CancellationToken::new();
        let result_tx = {
            let mut run = shared.lock_run();
            run.cancel = cancel.clone();
            run.finished = finished.clone();
            run.result_tx.take()
        };
        if result_tx.is_none() {
            tracing::warn!("No result channel for this run; every result will be dropped");
        }

        shared.call_count.store(0, Ordering::SeqCst);
        shared.set_status(EngineStatus::Started);

        tracing::info!(
            load_per_second = shared.load_per_second,
            duration = ?shared.duration,
            timeout = ?shared.timeout,
            concurrency = shared.concurrency,
            "Generating load"
        );

        let run = RunHandle {
            cancel,
            finished,
            deadline,
        };
        handle.spawn(dispatch(shared.clone(), run, result_tx));
        true
    }

    /// Stop the current run and wait until the engine has fully stopped.
    /// Returns `false` if no run was in progress.
    pub async fn stop(&self) -> bool {
        let shared = &self.shared;

        // Under the slot lock, `Started` means the slot holds this run's tokens:
        // a newer `start` has to install its own before it can reach `Started`.
        let (cancel, finished) = {
            let run = shared.lock_run();
            if !shared.transition(EngineStatus::Started, EngineStatus::Stopping) {
                return false;
            }
            (run.cancel.clone(), run.finished.clone())
        };
        cancel.cancel();
        finished.cancelled().await;
        true
    }

    /// Install the result channel for the next run. Only possible while the
    /// generator is not running; the previous channel is closed once its run ends.
    pub fn renew_result_channel(&self, result_tx: mpsc::Sender<CallResult>) -> bool {
        match self.status() {
            EngineStatus::Original | EngineStatus::Stopped => {
                self.shared.lock_run().result_tx = Some(result_tx);
                true
            }
            _ => false,
        }
    }

    pub fn status(&self) -> EngineStatus {
        self.shared.status()
    }

    /// Attempts dispatched in the current (or last) run.
    pub fn call_count(&self) -> u64 {
        self.shared.call_count.load(Ordering::SeqCst)
    }

    /// Results dropped by the delivery policy over the generator's lifetime.
    pub fn dropped_count(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn concurrency(&self) -> u32 {
        self.shared.concurrency
    }

    pub fn tickets_total(&self) -> u32 {
        self.shared.tickets.total()
    }

    pub fn tickets_residue(&self) -> u32 {
        self.shared.tickets.residue()
    }
}

impl<C> fmt::Debug for Generator<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generator")
            .field("status", &self.shared.status())
            .field("concurrency", &self.shared.concurrency)
            .field("call_count", &self.shared.call_count.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<C> Shared<C> {
    pub(crate) fn status(&self) -> EngineStatus {
        EngineStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    fn set_status(&self, status: EngineStatus) {
        self.status.store(status as u8, Ordering::SeqCst);
    }

    fn transition(&self, from: EngineStatus, to: EngineStatus) -> bool {
        self.status
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn lock_run(&self) -> MutexGuard<'_, RunSlot> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand a result to the consumer without ever waiting on it.
    pub(crate) fn deliver(
        &self,
        result: CallResult,
        outbox: Option<&mpsc::WeakSender<CallResult>>,
    ) -> bool {
        if self.status() != EngineStatus::Started {
            self.record_drop(&result, "engine not running");
            return false;
        }

        let Some(tx) = outbox.and_then(mpsc::WeakSender::upgrade) else {
            self.record_drop(&result, "result channel closed");
            return false;
        };

        match tx.try_send(result) {
            Ok(()) => true,
            Err(TrySendError::Full(result)) => {
                self.record_drop(&result, "channel full");
                false
            }
            Err(TrySendError::Closed(result)) => {
                self.record_drop(&result, "result channel closed");
                false
            }
        }
    }

    fn record_drop(&self, result: &CallResult, reason: &'static str) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            id = result.id,
            code = result.code.as_i32(),
            message = %result.message.trim_end(),
            elapsed = ?result.elapsed,
            reason,
            "Ignored result"
        );
    }

    fn shut_down(
        &self,
        cause: StopCause,
        result_tx: Option<mpsc::Sender<CallResult>>,
        finished: &CancellationToken,
    ) {
        tracing::info!(%cause, "Preparing to stop load generator");
        self.transition(EngineStatus::Started, EngineStatus::Stopping);

        // Attempts only hold weak senders, so this closes the channel.
        drop(result_tx);
        tracing::debug!("Result channel closed");

        self.set_status(EngineStatus::Stopped);
        finished.cancel();

        tracing::info!(
            call_count = self.call_count.load(Ordering::SeqCst),
            dropped = self.dropped.load(Ordering::Relaxed),
            "Load generator stopped"
        );
    }
}

#[cfg(test)]
impl<C> Generator<C> {
    pub(crate) fn shared(&self) -> &Arc<Shared<C>> {
        &self.shared
    }
}

#[cfg(test)]
impl<C> Shared<C> {
    pub(crate) fn force_status(&self, status: EngineStatus) {
        self.set_status(status);
    }

    pub(crate) fn take_result_tx(&self) -> Option<mpsc::Sender<CallResult>> {
        self.lock_run().result_tx.take()
    }

    pub(crate) fn tickets(&self) -> &TicketPool {
        &self.tickets
    }
}

/// `duration` from now, or a point decades away when that overflows `Instant`.
fn deadline_after(duration: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(duration)
        .unwrap_or_else(|| now + Duration::from_secs(86400 * 365 * 30))
}

struct RunHandle {
    cancel: CancellationToken,
    finished: CancellationToken,
    deadline: Instant,
}

async fn dispatch<C: Caller>(
    shared: Arc<Shared<C>>,
    run: RunHandle,
    result_tx: Option<mpsc::Sender<CallResult>>,
) {
    let outbox = result_tx.as_ref().map(mpsc::Sender::downgrade);

    let mut throttle = (shared.load_per_second > 0).then(|| {
        let period = dispatch_interval(shared.load_per_second);
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval
    });

    let deadline = tokio::time::sleep_until(run.deadline);
    tokio::pin!(deadline);

    let cause = loop {
        if run.cancel.is_cancelled() {
            break StopCause::Requested;
        }
        if deadline.is_elapsed() {
            break StopCause::Deadline;
        }

        let ticket = tokio::select! {
            biased;
            _ = run.cancel.cancelled() => break StopCause::Requested,
            _ = &mut deadline => break StopCause::Deadline,
            ticket = shared.tickets.take() => ticket,
        };

        shared.call_count.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(attempt::run(shared.clone(), ticket, outbox.clone()));

        if let Some(throttle) = throttle.as_mut() {
            tokio::select! {
                biased;
                _ = run.cancel.cancelled() => break StopCause::Requested,
                _ = &mut deadline => break StopCause::Deadline,
                _ = throttle.tick() => {}
            }
        }
    };

    shared.shut_down(cause, result_tx, &run.finished);
}
