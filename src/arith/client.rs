use crate::arith::wire::{ArithError, ArithRequest, ArithResponse, Operator, exchange, fold, formula};
use crate::caller::{CallError, Caller};
use crate::types::{CallResult, RawRequest, RawResponse, ResultCode};
use rand::Rng;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;

static NEXT_REQUEST_ID: AtomicI64 = AtomicI64::new(1);

/// [`Caller`] that asks an [`ArithServer`](crate::arith::ArithServer) to
/// evaluate random two-operand expressions and checks its answers.
#[derive(Debug, Clone)]
pub struct TcpCaller {
    addr: String,
}

impl TcpCaller {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    /// Encode a specific expression as a request with a fresh id.
    pub fn request(&self, operands: Vec<i64>, operator: Operator) -> RawRequest {
        let id = NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
        let request = ArithRequest {
            id,
            operands,
            operator,
        };

        // An empty payload is reported as a fatal call by check_response.
        let payload = serde_json::to_vec(&request).unwrap_or_default();
        RawRequest { id, payload }
    }

    async fn round_trip(&self, payload: &[u8], timeout: Duration) -> Result<Vec<u8>, ArithError> {
        // Connecting and exchanging are bounded separately, as the generator's
        // own timer already fires after `timeout`.
        let stream = tokio::time::timeout(timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| ArithError::Timeout(timeout))??;
        stream.set_nodelay(true)?;

        tokio::time::timeout(timeout, exchange(stream, payload))
            .await
            .map_err(|_| ArithError::Timeout(timeout))?
    }
}

impl Caller for TcpCaller {
    fn build_request(&self) -> RawRequest {
        let mut rng = rand::rng();
        let operands = vec![rng.random_range(1..=1000), rng.random_range(1..=1000)];
        let operator = Operator::ALL[rng.random_range(0..Operator::ALL.len())];
        self.request(operands, operator)
    }

    async fn call(&self, payload: &[u8], timeout: Duration) -> Result<Vec<u8>, CallError> {
        Ok(self.round_trip(payload, timeout).await?)
    }

    fn check_response(&self, request: &RawRequest, response: &RawResponse) -> CallResult {
        let (code, message) = judge(request, response);
        if !code.is_success() {
            tracing::debug!(id = request.id, code = code.as_i32(), %message, "Response rejected");
        }

        CallResult {
            id: response.id,
            request: Some(request.clone()),
            response: Some(response.clone()),
            code,
            message,
            elapsed: response.elapsed,
        }
    }
}

fn judge(request: &RawRequest, response: &RawResponse) -> (ResultCode, String) {
    let Ok(sent) = serde_json::from_slice::<ArithRequest>(&request.payload) else {
        return (
            ResultCode::FatalCall,
            format!(
                "Incorrectly formatted request: {}",
                String::from_utf8_lossy(&request.payload)
            ),
        );
    };

    let Ok(received) = serde_json::from_slice::<ArithResponse>(&response.payload) else {
        return (
            ResultCode::ErrorResponse,
            format!(
                "Incorrectly formatted response: {}",
                String::from_utf8_lossy(&response.payload)
            ),
        );
    };

    if received.id != sent.id {
        return (
            ResultCode::ErrorResponse,
            format!("Incorrect raw id ({} != {})", sent.id, received.id),
        );
    }

    if let Some(error) = received.error {
        return (ResultCode::ErrorCaller, format!("Abnormal server: {}", error));
    }

    match fold(&sent.operands, sent.operator) {
        Some(expected) if expected == received.result => (
            ResultCode::Success,
            format!("Success.({})", received.formula),
        ),
        Some(_) => (
            ResultCode::ErrorResponse,
            format!(
                "Incorrect result: {}",
                formula(&sent.operands, sent.operator, received.result, false)
            ),
        ),
        None => (
            ResultCode::ErrorResponse,
            format!(
                "Result {} reported for an expression that cannot be evaluated",
                received.result
            ),
        ),
    }
}
