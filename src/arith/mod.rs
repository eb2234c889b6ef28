//! Newline-delimited JSON arithmetic over TCP.
//!
//! [`ArithServer`] evaluates expressions and [`TcpCaller`] drives it from the
//! load generator, checking every answer it gets back.

mod client;
mod server;
pub mod wire;

pub use client::TcpCaller;
pub use server::{ArithServer, respond};
pub use wire::{ArithError, ArithRequest, ArithResponse, Operator};
