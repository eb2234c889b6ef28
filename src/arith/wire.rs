use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Framed};

/// Byte that ends every frame.
pub const DELIMITER: u8 = b'\n';

const MAX_FRAME_LEN: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum ArithError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame error: {0}")]
    Codec(#[from] AnyDelimiterCodecError),
    #[error("malformed record: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("connection closed before a response arrived")]
    ConnectionClosed,
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Sub,
    #[serde(rename = "*")]
    Mul,
    #[serde(rename = "/")]
    Div,
}

impl Operator {
    pub const ALL: [Operator; 4] = [Operator::Add, Operator::Sub, Operator::Mul, Operator::Div];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArithRequest {
    pub id: i64,
    pub operands: Vec<i64>,
    pub operator: Operator,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArithResponse {
    pub id: i64,
    #[serde(default)]
    pub formula: String,
    #[serde(default)]
    pub result: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ArithResponse {
    pub fn failed(id: i64, error: impl Into<String>) -> Self {
        Self {
            id,
            formula: String::new(),
            result: 0,
            error: Some(error.into()),
        }
    }
}

/// Apply `operator` across `operands`, starting from zero.
///
/// The accumulator starts at zero for every operator, so `*` and `/` always
/// yield 0. Both ends of the protocol compute it this way. `None` on overflow
/// or division by zero.
pub fn fold(operands: &[i64], operator: Operator) -> Option<i64> {
    operands.iter().try_fold(0i64, |acc, &operand| match operator {
        Operator::Add => acc.checked_add(operand),
        Operator::Sub => acc.checked_sub(operand),
        Operator::Mul => acc.checked_mul(operand),
        Operator::Div => acc.checked_div(operand),
    })
}

/// Render `10 + 5 = 15`, or `10 + 5 != 16` when `equal` is false.
pub fn formula(operands: &[i64], operator: Operator, result: i64, equal: bool) -> String {
    let separator = format!(" {} ", operator);
    let expression = operands
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(separator.as_str());
    let relation = if equal { "=" } else { "!=" };
    format!("{} {} {}", expression, relation, result)
}

pub fn codec() -> AnyDelimiterCodec {
    AnyDelimiterCodec::new_with_max_length(vec![DELIMITER], vec![DELIMITER], MAX_FRAME_LEN)
}

pub fn framed<T: AsyncRead + AsyncWrite>(io: T) -> Framed<T, AnyDelimiterCodec> {
    Framed::new(io, codec())
}

/// Write one frame and read one frame back.
pub async fn exchange<T>(io: T, payload: &[u8]) -> Result<Vec<u8>, ArithError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = framed(io);
    framed.send(std::str::from_utf8(payload)?).await?;

    match framed.next().await {
        Some(Ok(frame)) => Ok(frame.to_vec()),
        Some(Err(e)) => Err(e.into()),
        None => Err(ArithError::ConnectionClosed),
    }
}
