use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TicketPoolError {
    #[error("the ticket pool can not be initialized (total=0)")]
    ZeroCapacity,
}

/// Counting semaphore that bounds how many call attempts are in flight.
///
/// It only limits how many; it does not order waiters beyond what the
/// underlying semaphore does.
#[derive(Debug, Clone)]
pub struct TicketPool {
    total: u32,
    tickets: Arc<Semaphore>,
}

/// A ticket taken from a [`TicketPool`]. It goes back to the pool when dropped,
/// including while unwinding.
#[derive(Debug)]
pub struct Ticket {
    _permit: OwnedSemaphorePermit,
}

impl Ticket {
    /// Return the ticket to its pool.
    pub fn give_back(self) {
        drop(self);
    }
}

impl TicketPool {
    pub fn new(total: u32) -> Result<Self, TicketPoolError> {
        if total == 0 {
            return Err(TicketPoolError::ZeroCapacity);
        }

        Ok(Self {
            total,
            tickets: Arc::new(Semaphore::new(total as usize)),
        })
    }

    /// Wait until a ticket is free and take it.
    pub async fn take(&self) -> Ticket {
        match self.tickets.clone().acquire_owned().await {
            Ok(permit) => Ticket { _permit: permit },
            // The semaphore is private and never closed.
            Err(_) => std::future::pending().await,
        }
    }

    pub fn try_take(&self) -> Option<Ticket> {
        self.tickets
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| Ticket { _permit: permit })
    }

    pub fn is_active(&self) -> bool {
        !self.tickets.is_closed()
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    /// Tickets currently free. For diagnostics only.
    pub fn residue(&self) -> u32 {
        self.tickets.available_permits() as u32
    }
}
