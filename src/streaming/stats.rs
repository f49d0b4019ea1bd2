//! Counters and reports produced by engine operations.

use std::fmt;

// =============================================================================
// Link statistics
// =============================================================================

/// Statistics for one engine operation. Reset at the start of every operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Records written to the target
    pub commands_sent: u64,

    /// Records read from the target, solicited or not
    pub commands_received: u64,

    /// Replies that did not have the shape their command requires
    pub reply_violations: u64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sent {} commands, received {} commands",
            self.commands_sent, self.commands_received
        )?;
        if self.reply_violations > 0 {
            write!(f, ", {} reply violations", self.reply_violations)?;
        }
        Ok(())
    }
}

// =============================================================================
// Verify
// =============================================================================

/// A write whose read-back value differs from the reference file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Corruption {
    pub address: u64,
    pub expected: u64,
    pub actual: u64,
}

impl fmt::Display for Corruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "address 0x{:010x}: expected 0x{:016x}, actual 0x{:016x}",
            self.address, self.expected, self.actual
        )
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    pub writes_checked: u64,
    pub writes_corrupted: u64,
    pub corruptions: Vec<Corruption>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.writes_corrupted == 0
    }

    pub(crate) fn record(&mut self, corruption: Corruption) {
        self.writes_corrupted += 1;
        self.corruptions.push(corruption);
    }
}

// =============================================================================
// Listen
// =============================================================================

/// Program completion reported by a FINISH record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Finish {
    pub core: u64,
    pub code: u64,
}

impl fmt::Display for Finish {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FINISH: core {}, code {}", self.core, self.code)
    }
}
