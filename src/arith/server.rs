use crate::arith::wire::{ArithError, ArithRequest, ArithResponse, fold, formula, framed};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

/// TCP server that evaluates [`ArithRequest`]s, one per connection.
///
/// The accept loop runs on the current tokio runtime until [`close`] is
/// called or the server is dropped.
///
/// [`close`]: ArithServer::close
pub struct ArithServer {
    local_addr: SocketAddr,
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl ArithServer {
    /// Bind `addr` and start accepting connections.
    pub async fn listen(addr: &str) -> Result<Self, ArithError> {
        let listener = match TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                tracing::error!("Failed to bind arithmetic server on {}: {}", addr, e);
                return Err(e.into());
            }
        };
        let local_addr = listener.local_addr()?;
        tracing::info!("Arithmetic server listening on {}", local_addr);

        let cancel = CancellationToken::new();
        tokio::spawn(accept_loop(listener, cancel.clone()));

        Ok(Self {
            local_addr,
            closed: AtomicBool::new(false),
            cancel,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_active(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// Stop accepting connections. `false` if the server was already closed.
    /// Connections already accepted are served to completion.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.cancel.cancel();
        true
    }

    /// Resolves once the server has been closed.
    pub async fn closed(&self) {
        self.cancel.cancelled().await
    }
}

impl Drop for ArithServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(listener: TcpListener, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Arithmetic server shutting down");
                break;
            }
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((socket, peer)) => {
                        tokio::spawn(async move {
                            if let Err(e) = handle(socket).await {
                                tracing::debug!(%peer, "Connection failed: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!("Failed to accept connection: {}", e);
                    }
                }
            }
        }
    }
}

async fn handle(socket: TcpStream) -> Result<(), ArithError> {
    let mut framed = framed(socket);

    let response = match framed.next().await {
        Some(Ok(frame)) => respond(&frame),
        Some(Err(e)) => ArithResponse::failed(0, format!("Request read error: {}", e)),
        None => return Ok(()),
    };

    let encoded = serde_json::to_string(&response)?;
    framed.send(encoded).await?;
    Ok(())
}

/// Evaluate one encoded request. Failures come back in the response's
/// `error` field rather than as an `Err`.
pub fn respond(frame: &[u8]) -> ArithResponse {
    let request: ArithRequest = match serde_json::from_slice(frame) {
        Ok(r) => r,
        Err(e) => return ArithResponse::failed(0, format!("Request unmarshal error: {}", e)),
    };

    match fold(&request.operands, request.operator) {
        Some(result) => ArithResponse {
            id: request.id,
            formula: formula(&request.operands, request.operator, result, true),
            result,
            error: None,
        },
        None => ArithResponse::failed(
            request.id,
            format!(
                "Cannot evaluate {} over {:?}",
                request.operator, request.operands
            ),
        ),
    }
}
