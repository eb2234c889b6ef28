use std::fmt;
use std::time::Duration;

// ============================================================================
// Result Codes
// ============================================================================

/// Outcome of a single call attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResultCode {
    Success,
    WarningTimeout,
    ErrorCall,
    ErrorResponse,
    ErrorCaller,
    FatalCall,
}

impl ResultCode {
    pub fn as_i32(&self) -> i32 {
        match self {
            ResultCode::Success => 0,
            ResultCode::WarningTimeout => 1001,
            ResultCode::ErrorCall => 1002,
            ResultCode::ErrorResponse => 1003,
            ResultCode::ErrorCaller => 1004,
            ResultCode::FatalCall => 1005,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResultCode::Success => "success",
            ResultCode::WarningTimeout => "warning_timeout",
            ResultCode::ErrorCall => "error_call",
            ResultCode::ErrorResponse => "error_response",
            ResultCode::ErrorCaller => "error_caller",
            ResultCode::FatalCall => "fatal_call",
        }
    }

    /// Human-readable label.
    pub fn plain(&self) -> &'static str {
        match self {
            ResultCode::Success => "Success",
            ResultCode::WarningTimeout => "Call Timeout Warning",
            ResultCode::ErrorCall => "Call Error",
            ResultCode::ErrorResponse => "Response Error",
            ResultCode::ErrorCaller => "Caller Error",
            ResultCode::FatalCall => "Call Fatal Error",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResultCode::Success)
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.plain(), self.as_i32())
    }
}

// ============================================================================
// Engine Status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineStatus {
    Original = 0,
    Starting = 1,
    Started = 2,
    Stopping = 3,
    Stopped = 4,
}

impl EngineStatus {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => EngineStatus::Original,
            1 => EngineStatus::Starting,
            2 => EngineStatus::Started,
            3 => EngineStatus::Stopping,
            _ => EngineStatus::Stopped,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineStatus::Original => "original",
            EngineStatus::Starting => "starting",
            EngineStatus::Started => "started",
            EngineStatus::Stopping => "stopping",
            EngineStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Requests, Responses & Results
// ============================================================================

/// A request built by a [`Caller`](crate::Caller) for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRequest {
    pub id: i64,
    pub payload: Vec<u8>,
}

/// What came back from one synchronous exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub id: i64,
    pub payload: Vec<u8>,
    pub error: Option<String>,
    pub elapsed: Duration,
}

/// The record delivered to the result consumer, one per attempt at most.
#[derive(Debug, Clone)]
pub struct CallResult {
    pub id: i64,
    pub request: Option<RawRequest>,
    pub response: Option<RawResponse>,
    pub code: ResultCode,
    pub message: String,
    pub elapsed: Duration,
}

impl CallResult {
    /// A result for `request` with no response attached yet.
    pub fn for_request(request: &RawRequest, code: ResultCode, message: impl Into<String>) -> Self {
        Self {
            id: request.id,
            request: Some(request.clone()),
            response: None,
            code,
            message: message.into(),
            elapsed: Duration::ZERO,
        }
    }

    /// Result for a fault that escaped an attempt before it could be tied to a request.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            id: -1,
            request: None,
            response: None,
            code: ResultCode::FatalCall,
            message: message.into(),
            elapsed: Duration::ZERO,
        }
    }
}

impl fmt::Display for CallResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ID={}, Code={}, Msg={}, Elapsed={:?}",
            self.id,
            self.code.as_i32(),
            self.message.trim_end(),
            self.elapsed
        )
    }
}
