use crate::caller::Caller;
use crate::engine::generator::Shared;
use crate::engine::tickets::Ticket;
use crate::types::{CallResult, RawResponse, ResultCode};
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::task::AbortOnDropHandle;

const PENDING: u8 = 0;
const COMPLETED: u8 = 1;
const TIMED_OUT: u8 = 2;

/// Decides, once, whether an attempt is reported by its call or by its timer.
#[derive(Debug, Default)]
pub(crate) struct Race(AtomicU8);

impl Race {
    fn claim(&self, outcome: u8) -> bool {
        self.0
            .compare_exchange(PENDING, outcome, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn complete(&self) -> bool {
        self.claim(COMPLETED)
    }

    pub(crate) fn time_out(&self) -> bool {
        self.claim(TIMED_OUT)
    }

    /// Claim the attempt for a fault report. Only a fired timer wins over it.
    pub(crate) fn claim_fault(&self) -> bool {
        self.complete() || self.0.load(Ordering::Acquire) == COMPLETED
    }
}

type Outbox = Option<mpsc::WeakSender<CallResult>>;

/// One call attempt. Holds `ticket` until the call has returned, whoever
/// reported the attempt.
pub(crate) async fn run<C: Caller>(shared: Arc<Shared<C>>, ticket: Ticket, outbox: Outbox) {
    let race = Arc::new(Race::default());

    let outcome = AssertUnwindSafe(call_once(&shared, &race, &outbox))
        .catch_unwind()
        .await;

    if let Err(panic) = outcome {
        let message = format!("Async call panicked! (error: {})", panic_message(&*panic));
        if race.claim_fault() {
            shared.deliver(CallResult::fatal(message), outbox.as_ref());
        } else {
            tracing::debug!(%message, "Attempt already reported as timed out");
        }
    }

    ticket.give_back();
}

async fn call_once<C: Caller>(shared: &Arc<Shared<C>>, race: &Arc<Race>, outbox: &Outbox) {
    let request = shared.caller.build_request();
    let timeout = shared.timeout;

    let _timer = AbortOnDropHandle::new(tokio::spawn({
        let shared = shared.clone();
        let race = race.clone();
        let outbox = outbox.clone();
        let request = request.clone();
        async move {
            tokio::time::sleep(timeout).await;
            if race.time_out() {
                let mut result = CallResult::for_request(
                    &request,
                    ResultCode::WarningTimeout,
                    format!("Timeout! (expected: < {:?})", timeout),
                );
                result.elapsed = timeout;
                shared.deliver(result, outbox.as_ref());
            }
        }
    }));

    let started = Instant::now();
    let outcome = shared.caller.call(&request.payload, timeout).await;
    let elapsed = started.elapsed();

    if !race.complete() {
        return;
    }

    let result = match outcome {
        Ok(payload) => {
            let response = RawResponse {
                id: request.id,
                payload,
                error: None,
                elapsed,
            };
            let mut result = shared.caller.check_response(&request, &response);
            result.elapsed = elapsed;
            result
        }
        Err(e) => {
            let message = format!("Sync call error: {}", e);
            let response = RawResponse {
                id: request.id,
                payload: Vec::new(),
                error: Some(message.clone()),
                elapsed,
            };
            let mut result = CallResult::for_request(&request, ResultCode::ErrorCall, message);
            result.response = Some(response);
            result.elapsed = elapsed;
            result
        }
    };

    shared.deliver(result, outbox.as_ref());
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caller::CallError;
    use crate::engine::{Generator, Params};
    use crate::types::{EngineStatus, RawRequest};
    use std::sync::atomic::AtomicI64;
    use std::time::Duration;

    #[test]
    fn race_has_exactly_one_winner() {
        let race = Race::default();
        assert!(race.time_out());
        assert!(!race.complete());
        assert!(!race.time_out());
        assert!(!race.claim_fault());

        let race = Race::default();
        assert!(race.complete());
        assert!(!race.time_out());
        assert!(race.claim_fault());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn race_resolves_once_under_contention() {
        for _ in 0..200 {
            let race = Arc::new(Race::default());
            let a = tokio::spawn({
                let race = race.clone();
                async move { race.complete() }
            });
            let b = tokio::spawn({
                let race = race.clone();
                async move { race.time_out() }
            });
            let (a, b) = (a.await.unwrap(), b.await.unwrap());
            assert!(a ^ b);
        }
    }

    #[test]
    fn panic_messages_are_extracted() {
        let boxed: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(panic_message(&*boxed), "static str");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*boxed), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(&*boxed), "unknown panic payload");
    }

    enum Behaviour {
        Sleep(Duration),
        Fail,
        PanicInBuild,
        PanicInCheck,
    }

    struct Scripted {
        behaviour: Behaviour,
        next_id: AtomicI64,
    }

    impl Scripted {
        fn new(behaviour: Behaviour) -> Self {
            Self {
                behaviour,
                next_id: AtomicI64::new(1),
            }
        }
    }

    impl Caller for Scripted {
        fn build_request(&self) -> RawRequest {
            if matches!(self.behaviour, Behaviour::PanicInBuild) {
                panic!("cannot encode request");
            }
            RawRequest {
                id: self.next_id.fetch_add(1, Ordering::Relaxed),
                payload: b"ping".to_vec(),
            }
        }

        async fn call(&self, _payload: &[u8], _timeout: Duration) -> Result<Vec<u8>, CallError> {
            match self.behaviour {
                Behaviour::Sleep(delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(b"pong".to_vec())
                }
                Behaviour::Fail => Err("connection refused".into()),
                _ => Ok(b"pong".to_vec()),
            }
        }

        fn check_response(&self, request: &RawRequest, response: &RawResponse) -> CallResult {
            if matches!(self.behaviour, Behaviour::PanicInCheck) {
                panic!("response checker crashed");
            }
            let mut result = CallResult::for_request(request, ResultCode::Success, "ok");
            result.response = Some(response.clone());
            result
        }
    }

    /// Runs a single attempt against a generator that looks started.
    async fn attempt(behaviour: Behaviour) -> (Vec<CallResult>, Generator<Scripted>) {
        let (tx, mut rx) = mpsc::channel(8);
        let params = Params::new(
            Scripted::new(behaviour),
            Duration::from_millis(50),
            10,
            Duration::from_secs(60),
            tx,
        );
        let generator = Generator::new(params).unwrap();
        let shared = generator.shared().clone();
        shared.force_status(EngineStatus::Started);

        let tx = shared.take_result_tx().unwrap();
        let ticket = shared.tickets().take().await;
        run(shared.clone(), ticket, Some(tx.downgrade())).await;
        tokio::time::sleep(Duration::from_millis(500)).await;

        drop(tx);
        let mut results = Vec::new();
        while let Some(result) = rx.recv().await {
            results.push(result);
        }
        (results, generator)
    }

    #[tokio::test(start_paused = true)]
    async fn fast_call_reports_its_outcome() {
        let (results, generator) = attempt(Behaviour::Sleep(Duration::from_millis(5))).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].code, ResultCode::Success);
        assert!(results[0].elapsed >= Duration::from_millis(5));
        assert_eq!(results[0].response.as_ref().unwrap().payload, b"pong");
        assert_eq!(generator.tickets_residue(), generator.tickets_total());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_call_is_reported_once_as_timeout() {
        let (results, generator) = attempt(Behaviour::Sleep(Duration::from_millis(200))).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].code, ResultCode::WarningTimeout);
        assert_eq!(results[0].elapsed, Duration::from_millis(50));
        assert_eq!(results[0].id, 1);
        assert_eq!(generator.dropped_count(), 0);
        assert_eq!(generator.tickets_residue(), generator.tickets_total());
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_is_an_error_call() {
        let (results, _generator) = attempt(Behaviour::Fail).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].code, ResultCode::ErrorCall);
        assert!(results[0].message.contains("connection refused"));
        let response = results[0].response.as_ref().unwrap();
        assert!(response.error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn panic_while_building_becomes_fatal_call() {
        let (results, generator) = attempt(Behaviour::PanicInBuild).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, -1);
        assert_eq!(results[0].code, ResultCode::FatalCall);
        assert!(results[0].message.contains("cannot encode request"));
        assert_eq!(generator.tickets_residue(), generator.tickets_total());
    }

    #[tokio::test(start_paused = true)]
    async fn panic_after_winning_the_race_is_still_reported() {
        let (results, generator) = attempt(Behaviour::PanicInCheck).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].code, ResultCode::FatalCall);
        assert!(results[0].message.contains("response checker crashed"));
        assert_eq!(generator.tickets_residue(), generator.tickets_total());
    }
}
