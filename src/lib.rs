//! Rate-controlled synthetic load generation.
//!
//! A [`Generator`] drives a [`Caller`] at a fixed number of calls per second
//! for a fixed duration, bounds the number of calls in flight with a ticket
//! pool, and reports every attempt on a bounded channel as a [`CallResult`].

pub mod arith;
pub mod caller;
pub mod engine;
pub mod types;

pub use caller::{CallError, Caller};
pub use engine::{Generator, GeneratorError, Params, ParamsError, Tally};
pub use types::{CallResult, EngineStatus, RawRequest, RawResponse, ResultCode};
