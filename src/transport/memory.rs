//! In-process transport.
//!
//! Stands in for a target in tests and dry runs. Incoming bytes are either
//! *ready* (visible to `bytes_available`) or *deferred*: a deferred batch is
//! delivered only when a blocking read finds nothing ready, which models a
//! reply that is still on its way when the host decides to wait for it.

use super::{Transport, TransportResult};
use crate::error::TransportError;
use crate::streaming::protocol::{Command, Opcode, NBF_RECORD_LENGTH_BYTES};
use bytes::{Buf, Bytes, BytesMut};
use std::collections::{HashMap, VecDeque};

type Responder = Box<dyn FnMut(&Command) -> Vec<Command> + Send>;

#[derive(Default)]
pub struct MemoryTransport {
    ready: BytesMut,
    deferred: VecDeque<Bytes>,
    written: BytesMut,
    pending_write: BytesMut,
    responder: Option<Responder>,
    blocking_reads: usize,
    closed: bool,
    close_count: usize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every complete record written with the records `responder` returns.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&Command) -> Vec<Command> + Send + 'static,
    {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::default()
        }
    }

    /// A target that answers every request with a correct reply.
    /// Reads return the data last written to the same address.
    pub fn echo_target() -> Self {
        let mut memory = HashMap::new();
        Self::with_responder(move |command| match command.kind() {
            Some(Opcode::Write8) => {
                memory.insert(command.address, command.data);
                vec![Command::write_8(command.address, 0)]
            }
            Some(Opcode::Read8) => {
                let data = memory.get(&command.address).copied().unwrap_or(0);
                vec![Command::new(command.opcode, command.address, data)]
            }
            Some(Opcode::Fence) | Some(Opcode::Finish) => {
                vec![Command::new(command.opcode, 0, 0)]
            }
            _ => Vec::new(),
        })
    }

    pub fn push_incoming(&mut self, bytes: &[u8]) {
        self.ready.extend_from_slice(bytes);
    }

    pub fn push_record(&mut self, command: &Command) {
        self.ready.extend_from_slice(&command.encode());
    }

    /// Queue a record that only a blocking read will see.
    pub fn defer_record(&mut self, command: &Command) {
        self.deferred.push_back(command.encode());
    }

    pub fn written(&self) -> &[u8] {
        &self.written
    }

    pub fn written_records(&self) -> Vec<Command> {
        self.written
            .chunks_exact(NBF_RECORD_LENGTH_BYTES)
            .filter_map(|chunk| Command::decode(chunk).ok())
            .collect()
    }

    /// Number of reads that had to wait for data.
    pub fn blocking_reads(&self) -> usize {
        self.blocking_reads
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn close_count(&self) -> usize {
        self.close_count
    }

    fn respond(&mut self) {
        while self.pending_write.len() >= NBF_RECORD_LENGTH_BYTES {
            let record = self.pending_write.split_to(NBF_RECORD_LENGTH_BYTES);
            let Ok(command) = Command::decode(&record) else {
                continue;
            };
            if let Some(responder) = self.responder.as_mut() {
                for reply in responder(&command) {
                    self.ready.extend_from_slice(&reply.encode());
                }
            }
        }
    }
}

impl Transport for MemoryTransport {
    fn write(&mut self, bytes: &[u8]) -> TransportResult<()> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.written.extend_from_slice(bytes);
        self.pending_write.extend_from_slice(bytes);
        Ok(())
    }

    fn flush(&mut self) -> TransportResult<()> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.respond();
        Ok(())
    }

    fn read(&mut self, n: usize) -> TransportResult<Bytes> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if self.ready.len() < n {
            self.blocking_reads += 1;
            while self.ready.len() < n {
                match self.deferred.pop_front() {
                    Some(batch) => self.ready.extend_from_slice(&batch),
                    None => break,
                }
            }
        }
        let count = n.min(self.ready.len());
        Ok(self.ready.split_to(count).freeze())
    }

    fn bytes_available(&mut self) -> TransportResult<usize> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        Ok(self.ready.remaining())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.close_count += 1;
        }
    }
}
