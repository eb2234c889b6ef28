use crate::types::{CallResult, RawRequest, RawResponse};
use std::future::Future;
use std::time::Duration;

/// Error returned by [`Caller::call`] for transport or IO failures.
pub type CallError = Box<dyn std::error::Error + Send + Sync>;

/// The protocol adapter the generator drives.
///
/// The generator never looks inside payloads: it asks the caller for a request,
/// hands the payload back to [`call`](Caller::call), and lets the caller judge
/// the response in [`check_response`](Caller::check_response).
pub trait Caller: Send + Sync + 'static {
    /// Build a request with a fresh, process-unique id.
    fn build_request(&self) -> RawRequest;

    /// Perform one exchange with the target.
    ///
    /// Overrunning `timeout` is not an error for the generator, which races the
    /// call independently; it only delays the release of the attempt's ticket.
    fn call(
        &self,
        payload: &[u8],
        timeout: Duration,
    ) -> impl Future<Output = Result<Vec<u8>, CallError>> + Send;

    /// Judge a response. Must always return a result with a definite code.
    fn check_response(&self, request: &RawRequest, response: &RawResponse) -> CallResult;
}
