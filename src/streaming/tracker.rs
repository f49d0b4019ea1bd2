//! Reply tracking.
//!
//! Commands that expect a reply wait in a FIFO until the target answers.
//! Replies arrive in send order, so an incoming record is only ever
//! compared against the oldest outstanding command. A record that does not
//! pair with it (another opcode, or a READ_8 for another address) is an
//! out-of-turn receive and is logged and dropped.
//!
//! The window bounds how many commands may be outstanding. While the queue
//! holds more than `window` entries the tracker blocks for replies; below
//! that it only consumes what the transport already has buffered.

use crate::error::{NbfError, Result};
use crate::streaming::link::Link;
use crate::streaming::protocol::Command;
use crate::transport::Transport;
use std::collections::VecDeque;
use tracing::{info, trace, warn};

/// A sent command paired with the reply that resolved it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyMatch {
    pub sent: Command,
    pub reply: Command,
    pub valid: bool,
}

pub struct ReplyTracker {
    outstanding: VecDeque<Command>,
    window: usize,
    violations: u64,
    strict: bool,
}

impl ReplyTracker {
    /// `window` of 0 disables pipelining: every reply is awaited before the
    /// next command goes out.
    pub fn new(window: usize) -> Self {
        Self {
            outstanding: VecDeque::new(),
            window,
            violations: 0,
            strict: false,
        }
    }

    /// Abort with `NbfError::ReplyViolation` on the first invalid reply.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    pub fn oldest(&self) -> Option<&Command> {
        self.outstanding.front()
    }

    pub fn violations(&self) -> u64 {
        self.violations
    }

    pub fn is_window_full(&self) -> bool {
        self.outstanding.len() > self.window
    }

    /// Register a command that has just been sent. Returns whether it
    /// was queued (only commands that expect a reply are).
    pub fn on_send(&mut self, command: Command) -> bool {
        if !command.expects_reply() {
            return false;
        }
        self.outstanding.push_back(command);
        true
    }

    /// Match replies against the queue.
    ///
    /// With `block` set, waits for every outstanding command to be resolved;
    /// otherwise only consumes records the transport already holds.
    pub fn drain_available<T: Transport>(
        &mut self,
        link: &mut Link<T>,
        block: bool,
    ) -> Result<Vec<ReplyMatch>> {
        let mut matched = Vec::new();
        while let Some(m) = self.next_reply(link, block)? {
            matched.push(m);
        }
        Ok(matched)
    }

    /// Match replies, blocking only while the queue is over the window.
    pub fn drain_to_window<T: Transport>(&mut self, link: &mut Link<T>) -> Result<Vec<ReplyMatch>> {
        let mut matched = Vec::new();
        while let Some(m) = self.next_reply(link, self.is_window_full())? {
            matched.push(m);
        }
        Ok(matched)
    }

    /// Resolve every outstanding command.
    pub fn flush<T: Transport>(&mut self, link: &mut Link<T>) -> Result<Vec<ReplyMatch>> {
        self.drain_available(link, true)
    }

    /// Block until the oldest outstanding command is resolved.
    pub fn await_reply<T: Transport>(&mut self, link: &mut Link<T>) -> Result<Option<ReplyMatch>> {
        self.next_reply(link, true)
    }

    fn next_reply<T: Transport>(
        &mut self,
        link: &mut Link<T>,
        block: bool,
    ) -> Result<Option<ReplyMatch>> {
        let Some(sent) = self.outstanding.front().copied() else {
            return Ok(None);
        };

        let reply = loop {
            match link.receive(block)? {
                None => return Ok(None),
                Some(record) if sent.pairs_with(&record) => break record,
                Some(record) => {
                    info!(target: "nbf::rx", "{}", record.describe());
                }
            }
        };

        self.outstanding.pop_front();
        if link.is_verbose() {
            info!(target: "nbf::rx", "{} (reply)", reply.describe());
        } else {
            trace!(target: "nbf::rx", "{} (reply)", reply.describe());
        }

        let valid = sent.is_correct_reply(&reply);
        if !valid {
            self.violations += 1;
            link.note_violation();
            warn!(target: "nbf::reply", "Unexpected reply: {} -> {}", sent, reply);
            if self.strict {
                return Err(NbfError::ReplyViolation { sent, reply });
            }
        }

        Ok(Some(ReplyMatch { sent, reply, valid }))
    }
}
