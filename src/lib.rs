//! Host-side driver for targets programmed over a serial link with NBF
//! (opcode/address/data) commands.

pub mod cli;
pub mod config;
pub mod error;
pub mod streaming;
pub mod transport;

pub use error::{NbfError, Result, TransportError};
