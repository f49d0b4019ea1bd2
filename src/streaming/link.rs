//! Record-level link to the target.
//!
//! Wraps a transport with the per-operation counters and the stop signal.
//! Every record sent or received by the engine goes through here.

use crate::error::{NbfError, Result};
use crate::streaming::protocol::{read_record, write_record, Command};
use crate::streaming::stats::Stats;
use crate::transport::Transport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, trace};

/// Shared flag that asks a running operation to stop.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Link<T: Transport> {
    transport: T,
    stats: Stats,
    stop: StopSignal,
    verbose: bool,
}

impl<T: Transport> Link<T> {
    pub fn new(transport: T, stop: StopSignal) -> Self {
        Self {
            transport,
            stats: Stats::new(),
            stop,
            verbose: false,
        }
    }

    /// Start a new operation: counters go back to zero.
    pub fn reset(&mut self, verbose: bool) {
        self.stats = Stats::new();
        self.verbose = verbose;
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn close(&mut self) {
        self.transport.close();
    }

    fn check_stop(&self) -> Result<()> {
        if self.stop.is_raised() {
            return Err(NbfError::Interrupted);
        }
        Ok(())
    }

    pub fn send(&mut self, command: &Command) -> Result<()> {
        self.check_stop()?;
        if self.verbose {
            info!(target: "nbf::tx", "{}", command.describe());
        } else {
            trace!(target: "nbf::tx", "{}", command.describe());
        }
        write_record(&mut self.transport, command)?;
        self.stats.commands_sent += 1;
        Ok(())
    }

    /// Receive one record. `Ok(None)` only when `block` is unset and no
    /// full record is buffered.
    pub fn receive(&mut self, block: bool) -> Result<Option<Command>> {
        self.check_stop()?;
        let record = read_record(&mut self.transport, block)?;
        if record.is_some() {
            self.stats.commands_received += 1;
        }
        Ok(record)
    }

    pub(crate) fn note_violation(&mut self) {
        self.stats.reply_violations += 1;
    }
}
