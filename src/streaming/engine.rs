//! Streaming engine.
//!
//! Drives command streams through a [`Link`] and a [`ReplyTracker`].
//! Operations are independent: each one starts from fresh counters and a
//! fresh outstanding queue, so `load` followed by `listen` needs no reset.

use crate::error::{NbfError, Result, TransportError};
use crate::streaming::link::{Link, StopSignal};
use crate::streaming::protocol::{opcode, Command, ADDRESS_CSR_FREEZE, DATA_LENGTH_BYTES};
use crate::streaming::source::NbfFile;
use crate::streaming::stats::{Corruption, Finish, Stats, VerifyReport};
use crate::streaming::tracker::{ReplyMatch, ReplyTracker};
use crate::transport::Transport;
use std::io::Write;
use tracing::{debug, info, warn};

/// Default number of commands allowed in flight during a load
pub const DEFAULT_WINDOW_SIZE: usize = 500;

/// Start of target DRAM
pub const DRAM_REGION_START: u64 = 0x00_8000_0000;

/// End of target DRAM (exclusive)
pub const DRAM_REGION_END: u64 = 0x10_0000_0000;

/// Address range checked by `verify`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub start: u64,
    /// Exclusive
    pub end: u64,
}

impl MemoryRegion {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Whether a full 8-byte word at `address` lies inside the region.
    pub fn contains_word(&self, address: u64) -> bool {
        address >= self.start
            && address.saturating_add(DATA_LENGTH_BYTES as u64) <= self.end
    }
}

impl Default for MemoryRegion {
    fn default() -> Self {
        Self::new(DRAM_REGION_START, DRAM_REGION_END)
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Address of the freeze control register
    pub freeze_address: u64,
    pub verify_region: MemoryRegion,
    /// Abort on the first reply violation instead of counting it
    pub strict_replies: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            freeze_address: ADDRESS_CSR_FREEZE,
            verify_region: MemoryRegion::default(),
            strict_replies: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Drop writes of 0 to the freeze address found in the input
    pub suppress_unfreeze: bool,
    pub window_size: usize,
    /// Log every record sent and received
    pub verbose: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            suppress_unfreeze: false,
            window_size: DEFAULT_WINDOW_SIZE,
            verbose: false,
        }
    }
}

pub struct HostEngine<T: Transport> {
    link: Link<T>,
    config: EngineConfig,
    report: VerifyReport,
}

impl<T: Transport> HostEngine<T> {
    pub fn new(transport: T, config: EngineConfig) -> Self {
        Self::with_stop_signal(transport, config, StopSignal::new())
    }

    pub fn with_stop_signal(transport: T, config: EngineConfig, stop: StopSignal) -> Self {
        Self {
            link: Link::new(transport, stop),
            config,
            report: VerifyReport::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Counters of the current (or last) operation, whatever way it ended.
    pub fn stats(&self) -> Stats {
        self.link.stats()
    }

    /// Findings of the current (or last) verify, including one that ended
    /// early on an error or interrupt.
    pub fn verify_report(&self) -> &VerifyReport {
        &self.report
    }

    pub fn transport(&self) -> &T {
        self.link.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.link.transport_mut()
    }

    /// Close the transport. Safe to call more than once.
    pub fn close(&mut self) -> Stats {
        self.link.close();
        self.link.stats()
    }

    fn tracker(&self, window: usize) -> ReplyTracker {
        ReplyTracker::new(window).strict(self.config.strict_replies)
    }

    fn is_unfreeze(&self, command: &Command) -> bool {
        command.matches(opcode::WRITE_8, self.config.freeze_address, Some(0))
    }

    // =========================================================================
    // Load
    // =========================================================================

    /// Stream commands to the target, keeping at most `window_size` replies
    /// outstanding, then wait for every remaining reply.
    pub fn load<I>(&mut self, commands: I, options: &LoadOptions) -> Result<Stats>
    where
        I: IntoIterator<Item = Result<Command>>,
    {
        self.link.reset(options.verbose);
        let mut tracker = self.tracker(options.window_size);

        for command in commands {
            let command = command?;
            if options.suppress_unfreeze && self.is_unfreeze(&command) {
                debug!(target: "nbf::command", "Suppressing unfreeze: {}", command);
                continue;
            }

            self.link.send(&command)?;
            tracker.on_send(command);
            tracker.drain_to_window(&mut self.link)?;
        }

        tracker.flush(&mut self.link)?;
        info!(target: "nbf::command", "Load complete");
        Ok(self.link.stats())
    }

    pub fn load_file(&mut self, file: &NbfFile, options: &LoadOptions) -> Result<Stats> {
        let commands = file.commands()?;
        self.load(commands, options)
    }

    // =========================================================================
    // Unfreeze
    // =========================================================================

    /// Release the target core and wait for the write to be acknowledged.
    pub fn unfreeze(&mut self) -> Result<ReplyMatch> {
        self.link.reset(false);
        let mut tracker = self.tracker(0);

        let command = Command::write_8(self.config.freeze_address, 0);
        self.link.send(&command)?;
        tracker.on_send(command);

        let matched = tracker
            .await_reply(&mut self.link)?
            .ok_or(NbfError::Transport(TransportError::Timeout))?;
        info!(target: "nbf::command", "Unfreeze sent");
        Ok(matched)
    }

    // =========================================================================
    // Verify
    // =========================================================================

    /// Read back every in-region write of a reference stream and compare.
    ///
    /// Nothing is written to the target. Mismatches are reported, not errors.
    pub fn verify<I>(&mut self, commands: I) -> Result<VerifyReport>
    where
        I: IntoIterator<Item = Result<Command>>,
    {
        self.link.reset(false);
        self.report = VerifyReport::default();
        let mut tracker = self.tracker(0);

        for command in commands {
            let command = command?;
            if command.opcode != opcode::WRITE_8
                || !self.config.verify_region.contains_word(command.address)
            {
                continue;
            }

            let read = Command::read_8(command.address);
            self.link.send(&read)?;
            tracker.on_send(read);
            let matched = tracker
                .await_reply(&mut self.link)?
                .ok_or(NbfError::Transport(TransportError::Timeout))?;

            self.report.writes_checked += 1;
            if matched.reply.data != command.data {
                let corruption = Corruption {
                    address: command.address,
                    expected: command.data,
                    actual: matched.reply.data,
                };
                warn!(
                    target: "nbf::command",
                    "Corruption detected at address 0x{}", command.address_hex()
                );
                warn!(target: "nbf::command", " Expected: 0x{}", command.data_hex());
                warn!(target: "nbf::command", " Actual:   0x{}", matched.reply.data_hex());
                self.report.record(corruption);
            }
        }

        info!(target: "nbf::command", "Verify complete");
        Ok(self.report.clone())
    }

    pub fn verify_file(&mut self, file: &NbfFile) -> Result<VerifyReport> {
        let commands = file.commands()?;
        self.verify(commands)
    }

    // =========================================================================
    // Listen
    // =========================================================================

    /// Receive records until the target reports FINISH.
    ///
    /// PUTCH characters go to `out` as they arrive (in verbose mode they are
    /// logged like any other record instead). Read timeouts are idle time,
    /// not failures; the loop ends only on FINISH, a transport error, or the
    /// stop signal.
    pub fn listen<W: Write + ?Sized>(&mut self, verbose: bool, out: &mut W) -> Result<Finish> {
        self.link.reset(verbose);
        info!(target: "nbf::command", "Listening for incoming messages...");

        loop {
            let record = match self.link.receive(true) {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) if e.is_timeout() => continue,
                Err(e) => return Err(e),
            };

            if !verbose && record.opcode == opcode::PUTCH {
                out.write_all(&[record.data as u8])
                    .and_then(|_| out.flush())
                    .map_err(NbfError::Output)?;
                continue;
            }

            info!(target: "nbf::rx", "{}", record.describe());

            if record.opcode == opcode::FINISH {
                let finish = Finish {
                    core: record.address,
                    code: record.data,
                };
                info!(target: "nbf::command", "{}", finish);
                return Ok(finish);
            }
        }
    }
}

impl<T: Transport> Drop for HostEngine<T> {
    fn drop(&mut self) {
        self.link.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    const DRAM: u64 = DRAM_REGION_START;

    fn ok(commands: Vec<Command>) -> Vec<Result<Command>> {
        commands.into_iter().map(Ok).collect()
    }

    #[test]
    fn test_memory_region_bounds() {
        let region = MemoryRegion::default();
        assert!(region.contains_word(DRAM_REGION_START));
        assert!(region.contains_word(DRAM_REGION_END - 8));
        assert!(!region.contains_word(DRAM_REGION_END - 7));
        assert!(!region.contains_word(DRAM_REGION_START - 8));
        assert!(!region.contains_word(ADDRESS_CSR_FREEZE));
    }

    #[test]
    fn test_load_counts() {
        let mut engine = HostEngine::new(MemoryTransport::echo_target(), EngineConfig::default());
        let stats = engine
            .load(
                ok(vec![
                    Command::write_8(DRAM, 1),
                    Command::write_8(DRAM + 8, 2),
                    Command::new(opcode::FENCE, 0, 0),
                ]),
                &LoadOptions::default(),
            )
            .unwrap();

        assert_eq!(stats.commands_sent, 3);
        assert_eq!(stats.commands_received, 3);
        assert_eq!(stats.reply_violations, 0);
    }

    #[test]
    fn test_load_suppresses_unfreeze() {
        let mut engine = HostEngine::new(MemoryTransport::echo_target(), EngineConfig::default());
        let options = LoadOptions {
            suppress_unfreeze: true,
            ..LoadOptions::default()
        };
        let stats = engine
            .load(
                ok(vec![Command::write_8(DRAM, 1), Command::unfreeze()]),
                &options,
            )
            .unwrap();

        assert_eq!(stats.commands_sent, 1);
        assert_eq!(engine.transport().written_records(), vec![Command::write_8(DRAM, 1)]);
    }

    #[test]
    fn test_load_keeps_freeze_write_of_one() {
        let mut engine = HostEngine::new(MemoryTransport::echo_target(), EngineConfig::default());
        let options = LoadOptions {
            suppress_unfreeze: true,
            ..LoadOptions::default()
        };
        let stats = engine
            .load(ok(vec![Command::write_8(ADDRESS_CSR_FREEZE, 1)]), &options)
            .unwrap();
        assert_eq!(stats.commands_sent, 1);
    }

    #[test]
    fn test_load_aborts_on_parse_error() {
        let mut engine = HostEngine::new(MemoryTransport::echo_target(), EngineConfig::default());
        let commands = vec![
            Ok(Command::write_8(DRAM, 1)),
            Err(NbfError::parse("03_00", "should have exactly three parts")),
            Ok(Command::write_8(DRAM + 8, 2)),
        ];

        let err = engine.load(commands, &LoadOptions::default()).unwrap_err();
        assert!(err.is_parse());
        assert_eq!(engine.stats().commands_sent, 1);
    }

    #[test]
    fn test_load_counts_violations_and_continues() {
        let transport = MemoryTransport::with_responder(|command| {
            // Echo the data back, which is wrong for a write
            vec![*command]
        });
        let mut engine = HostEngine::new(transport, EngineConfig::default());
        let stats = engine
            .load(
                ok(vec![Command::write_8(DRAM, 1), Command::write_8(DRAM + 8, 0)]),
                &LoadOptions::default(),
            )
            .unwrap();

        assert_eq!(stats.commands_sent, 2);
        assert_eq!(stats.reply_violations, 1);
    }

    #[test]
    fn test_stats_reset_per_operation() {
        let mut engine = HostEngine::new(MemoryTransport::echo_target(), EngineConfig::default());
        engine
            .load(ok(vec![Command::write_8(DRAM, 1)]), &LoadOptions::default())
            .unwrap();
        engine.unfreeze().unwrap();

        assert_eq!(engine.stats().commands_sent, 1);
        assert_eq!(engine.stats().commands_received, 1);
    }

    #[test]
    fn test_unfreeze() {
        let mut engine = HostEngine::new(MemoryTransport::echo_target(), EngineConfig::default());
        let matched = engine.unfreeze().unwrap();

        assert!(matched.valid);
        assert_eq!(matched.sent, Command::unfreeze());
        assert_eq!(engine.transport().written_records(), vec![Command::unfreeze()]);
    }

    #[test]
    fn test_unfreeze_invalid_reply_is_counted() {
        let transport = MemoryTransport::with_responder(|command| {
            vec![Command::write_8(command.address, 0xBAD)]
        });
        let mut engine = HostEngine::new(transport, EngineConfig::default());
        let matched = engine.unfreeze().unwrap();

        assert!(!matched.valid);
        assert_eq!(engine.stats().reply_violations, 1);
    }

    #[test]
    fn test_verify_skips_without_traffic() {
        let mut engine = HostEngine::new(MemoryTransport::echo_target(), EngineConfig::default());
        let report = engine
            .verify(ok(vec![
                Command::write_8(ADDRESS_CSR_FREEZE, 0),
                Command::read_8(DRAM),
                Command::new(opcode::FENCE, 0, 0),
            ]))
            .unwrap();

        assert_eq!(report.writes_checked, 0);
        assert!(engine.transport().written().is_empty());
    }

    #[test]
    fn test_verify_reports_corruption() {
        let transport = MemoryTransport::with_responder(|command| {
            vec![Command::new(command.opcode, command.address, 0x1122_3344_5566_7780)]
        });
        let mut engine = HostEngine::new(transport, EngineConfig::default());
        let report = engine
            .verify(ok(vec![Command::write_8(DRAM, 0x1122_3344_5566_7788)]))
            .unwrap();

        assert_eq!(report.writes_checked, 1);
        assert_eq!(report.writes_corrupted, 1);
        assert_eq!(
            report.corruptions,
            vec![Corruption {
                address: DRAM,
                expected: 0x1122_3344_5566_7788,
                actual: 0x1122_3344_5566_7780,
            }]
        );
        assert_eq!(engine.transport().written_records(), vec![Command::read_8(DRAM)]);
    }

    #[test]
    fn test_verify_report_survives_error() {
        let mut engine = HostEngine::new(MemoryTransport::echo_target(), EngineConfig::default());
        let commands = vec![
            Ok(Command::write_8(DRAM, 7)),
            Ok(Command::write_8(DRAM + 8, 0)),
            Err(NbfError::parse("zz", "should have exactly three parts")),
        ];

        let err = engine.verify(commands).unwrap_err();
        assert!(err.is_parse());

        // Nothing was loaded, so the first read-back is corrupt
        let report = engine.verify_report();
        assert_eq!(report.writes_checked, 2);
        assert_eq!(report.writes_corrupted, 1);
        assert_eq!(report.corruptions[0].address, DRAM);

        engine.load(ok(vec![Command::write_8(DRAM, 7)]), &LoadOptions::default()).unwrap();
        assert!(engine.verify(ok(vec![Command::write_8(DRAM, 7)])).unwrap().is_clean());
        assert_eq!(engine.verify_report().writes_checked, 1);
    }

    #[test]
    fn test_listen_prints_putch_and_finishes() {
        let mut transport = MemoryTransport::new();
        for b in b"hi\n" {
            transport.push_record(&Command::new(opcode::PUTCH, 0, *b as u64));
        }
        transport.push_record(&Command::new(opcode::WRITE_8, 0x10, 0));
        transport.push_record(&Command::new(opcode::FINISH, 2, 7));
        transport.push_record(&Command::new(opcode::PUTCH, 0, b'!' as u64));

        let mut engine = HostEngine::new(transport, EngineConfig::default());
        let mut out = Vec::new();
        let finish = engine.listen(false, &mut out).unwrap();

        assert_eq!(finish, Finish { core: 2, code: 7 });
        assert_eq!(out, b"hi\n");
        assert_eq!(engine.stats().commands_received, 5);
    }

    #[test]
    fn test_listen_verbose_logs_putch_instead_of_printing() {
        let mut transport = MemoryTransport::new();
        transport.push_record(&Command::new(opcode::PUTCH, 0, b'a' as u64));
        transport.push_record(&Command::new(opcode::FINISH, 0, 0));

        let mut engine = HostEngine::new(transport, EngineConfig::default());
        let mut out = Vec::new();
        engine.listen(true, &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_listen_short_read_is_fatal() {
        let mut transport = MemoryTransport::new();
        transport.push_incoming(&[opcode::PUTCH, 0, 0]);

        let mut engine = HostEngine::new(transport, EngineConfig::default());
        let err = engine.listen(false, &mut Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            NbfError::Transport(TransportError::ShortRead { actual: 3, .. })
        ));
    }

    #[test]
    fn test_listen_stops_on_signal() {
        let stop = StopSignal::new();
        let mut engine =
            HostEngine::with_stop_signal(MemoryTransport::new(), EngineConfig::default(), stop.clone());
        stop.raise();

        let err = engine.listen(false, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, NbfError::Interrupted));
    }

    #[test]
    fn test_close_once() {
        let mut engine = HostEngine::new(MemoryTransport::new(), EngineConfig::default());
        engine.close();
        engine.close();
        assert!(engine.transport().is_closed());
        assert_eq!(engine.transport().close_count(), 1);
    }
}
