mod attempt;
mod generator;
mod params;
mod tally;
mod tickets;

pub use generator::{Generator, GeneratorError};
pub use params::{
    DEFAULT_UNTHROTTLED_CONCURRENCY, Params, ParamsError, concurrency_for, dispatch_interval,
};
pub use tally::Tally;
pub use tickets::{Ticket, TicketPool, TicketPoolError};
