//! NBF command records.
//!
//! A command is an opcode/address/data triplet with two representations:
//! a fixed-length little-endian binary record for the wire, and a textual
//! `OO_AAAAAAAAAA_DDDDDDDDDDDDDDDD` line for command files.

use crate::error::{NbfError, Result, TransportError};
use crate::transport::Transport;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use std::str::FromStr;

/// Width of the address field in bytes (40-bit addresses)
pub const ADDRESS_LENGTH_BYTES: usize = 5;

/// Width of the data field in bytes
pub const DATA_LENGTH_BYTES: usize = 8;

/// Wire format: opcode:u8 | address:u40 LE | data:u64 LE
/// No framing; record boundaries are positional.
pub const NBF_RECORD_LENGTH_BYTES: usize = 1 + ADDRESS_LENGTH_BYTES + DATA_LENGTH_BYTES;

pub const ADDRESS_MASK: u64 = (1 << (ADDRESS_LENGTH_BYTES * 8)) - 1;

/// Control address that freezes (1) or releases (0) the target core
pub const ADDRESS_CSR_FREEZE: u64 = 0x00_0020_0002;

// =============================================================================
// Opcodes
// =============================================================================

pub mod opcode {
    // host -> target
    pub const WRITE_8: u8 = 0x03;
    pub const READ_8: u8 = 0x13;
    pub const FENCE: u8 = 0xFE;
    pub const FINISH: u8 = 0xFF;

    // target -> host
    pub const PUTCH: u8 = 0x82;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Write8 = opcode::WRITE_8,
    Read8 = opcode::READ_8,
    Fence = opcode::FENCE,
    Finish = opcode::FINISH,
    Putch = opcode::PUTCH,
}

impl Opcode {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            opcode::WRITE_8 => Some(Self::Write8),
            opcode::READ_8 => Some(Self::Read8),
            opcode::FENCE => Some(Self::Fence),
            opcode::FINISH => Some(Self::Finish),
            opcode::PUTCH => Some(Self::Putch),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Write8 => "WRITE_8",
            Self::Read8 => "READ_8",
            Self::Fence => "FENCE",
            Self::Finish => "FINISH",
            Self::Putch => "PUTCH",
        }
    }
}

// =============================================================================
// Reply rules
// =============================================================================

/// How the target answers one host-originated opcode.
///
/// `pairs_with` decides whether a received record is the reply to a sent
/// command at all; `is_correct` then judges its contents.
pub struct ReplyRule {
    pub opcode: u8,
    pub pairs_with: fn(sent: &Command, reply: &Command) -> bool,
    pub is_correct: fn(sent: &Command, reply: &Command) -> bool,
}

fn same_opcode(sent: &Command, reply: &Command) -> bool {
    reply.opcode == sent.opcode
}

fn same_opcode_and_address(sent: &Command, reply: &Command) -> bool {
    reply.opcode == sent.opcode && reply.address == sent.address
}

fn write_reply_is_correct(sent: &Command, reply: &Command) -> bool {
    reply.matches(opcode::WRITE_8, sent.address, Some(0))
}

fn read_reply_is_correct(sent: &Command, reply: &Command) -> bool {
    reply.matches(opcode::READ_8, sent.address, None)
}

fn fence_reply_is_correct(_: &Command, reply: &Command) -> bool {
    reply.matches(opcode::FENCE, 0, Some(0))
}

fn finish_reply_is_correct(_: &Command, reply: &Command) -> bool {
    reply.matches(opcode::FINISH, 0, Some(0))
}

static REPLY_RULES: &[ReplyRule] = &[
    ReplyRule {
        opcode: opcode::WRITE_8,
        pairs_with: same_opcode,
        is_correct: write_reply_is_correct,
    },
    ReplyRule {
        opcode: opcode::READ_8,
        pairs_with: same_opcode_and_address,
        is_correct: read_reply_is_correct,
    },
    ReplyRule {
        opcode: opcode::FENCE,
        pairs_with: same_opcode,
        is_correct: fence_reply_is_correct,
    },
    ReplyRule {
        opcode: opcode::FINISH,
        pairs_with: same_opcode,
        is_correct: finish_reply_is_correct,
    },
];

/// Look up the reply rule for an opcode. `None` means no reply is expected.
pub fn reply_rule(opcode: u8) -> Option<&'static ReplyRule> {
    REPLY_RULES.iter().find(|rule| rule.opcode == opcode)
}

// =============================================================================
// Command
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Command {
    pub opcode: u8,
    /// 40-bit address; bits above `ADDRESS_MASK` are always zero
    pub address: u64,
    pub data: u64,
}

impl Command {
    /// Build a command from integer fields. Address bits above 40 are discarded.
    pub const fn new(opcode: u8, address: u64, data: u64) -> Self {
        Self {
            opcode,
            address: address & ADDRESS_MASK,
            data,
        }
    }

    pub fn write_8(address: u64, data: u64) -> Self {
        Self::new(opcode::WRITE_8, address, data)
    }

    pub fn read_8(address: u64) -> Self {
        Self::new(opcode::READ_8, address, 0)
    }

    /// The well-known write that releases a frozen target.
    pub fn unfreeze() -> Self {
        Self::write_8(ADDRESS_CSR_FREEZE, 0)
    }

    pub fn kind(&self) -> Option<Opcode> {
        Opcode::from_u8(self.opcode)
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(NBF_RECORD_LENGTH_BYTES);
        buf.put_u8(self.opcode);
        buf.put_uint_le(self.address, ADDRESS_LENGTH_BYTES);
        buf.put_u64_le(self.data);
        buf.freeze()
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.len() != NBF_RECORD_LENGTH_BYTES {
            return Err(NbfError::MalformedRecord {
                expected: NBF_RECORD_LENGTH_BYTES,
                actual: buf.len(),
            });
        }
        let opcode = buf.get_u8();
        let address = buf.get_uint_le(ADDRESS_LENGTH_BYTES);
        let data = buf.get_u64_le();

        Ok(Self {
            opcode,
            address,
            data,
        })
    }

    /// Parse a textual command such as `03_0080000008_ff81011301000117`.
    ///
    /// Fields are written most-significant byte first, the reverse of the
    /// binary record. Surrounding whitespace is ignored.
    pub fn parse(line: &str) -> Result<Self> {
        let trimmed = line.trim();
        let parts: Vec<&str> = trimmed.split('_').collect();
        if parts.len() != 3 {
            return Err(NbfError::parse(
                trimmed,
                "should have exactly three parts",
            ));
        }

        let invalid_hex = || NbfError::parse(trimmed, "contains invalid hex bytes");
        let opcode = hex::decode(parts[0]).map_err(|_| invalid_hex())?;
        let address = hex::decode(parts[1]).map_err(|_| invalid_hex())?;
        let data = hex::decode(parts[2]).map_err(|_| invalid_hex())?;

        if opcode.len() != 1 {
            return Err(NbfError::parse(trimmed, "opcode must be exactly 1 byte"));
        }
        if address.len() != ADDRESS_LENGTH_BYTES {
            return Err(NbfError::parse(
                trimmed,
                format!("address must be exactly {} bytes", ADDRESS_LENGTH_BYTES),
            ));
        }
        if data.len() != DATA_LENGTH_BYTES {
            return Err(NbfError::parse(
                trimmed,
                format!("data must be exactly {} bytes", DATA_LENGTH_BYTES),
            ));
        }

        Ok(Self {
            opcode: opcode[0],
            address: be_bytes_to_u64(&address),
            data: be_bytes_to_u64(&data),
        })
    }

    /// Compare against expected fields. A `data` of `None` compares only
    /// opcode and address.
    pub fn matches(&self, opcode: u8, address: u64, data: Option<u64>) -> bool {
        self.opcode == opcode
            && self.address == address
            && data.map_or(true, |data| self.data == data)
    }

    pub fn expects_reply(&self) -> bool {
        reply_rule(self.opcode).is_some()
    }

    /// Whether `reply` is a record this command is waiting for.
    pub fn pairs_with(&self, reply: &Command) -> bool {
        reply_rule(self.opcode).is_some_and(|rule| (rule.pairs_with)(self, reply))
    }

    /// Whether `reply` is a valid, correct reply to this command.
    pub fn is_correct_reply(&self, reply: &Command) -> bool {
        reply_rule(self.opcode).is_some_and(|rule| (rule.is_correct)(self, reply))
    }

    pub fn address_hex(&self) -> String {
        format!("{:0width$x}", self.address, width = ADDRESS_LENGTH_BYTES * 2)
    }

    pub fn data_hex(&self) -> String {
        format!("{:0width$x}", self.data, width = DATA_LENGTH_BYTES * 2)
    }

    /// Character carried by a PUTCH record.
    pub fn putch_char(&self) -> char {
        (self.data & 0xFF) as u8 as char
    }

    /// Text form with a readable annotation for PUTCH records, for logs.
    pub fn describe(&self) -> String {
        if self.opcode == opcode::PUTCH {
            format!("{} (putch {:?})", self, self.putch_char())
        } else {
            self.to_string()
        }
    }
}

fn be_bytes_to_u64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}_{}_{}",
            self.opcode,
            self.address_hex(),
            self.data_hex()
        )
    }
}

impl FromStr for Command {
    type Err = NbfError;

    fn from_str(s: &str) -> Result<Self> {
        Command::parse(s)
    }
}

// =============================================================================
// Record reading/writing
// =============================================================================

/// Write one record and flush it to the target.
pub fn write_record<T: Transport + ?Sized>(t: &mut T, command: &Command) -> Result<()> {
    t.write(&command.encode())?;
    t.flush()?;
    Ok(())
}

/// Read one record.
///
/// With `block` unset, returns `Ok(None)` unless a full record is already
/// buffered. A blocking read that receives nothing before the transport
/// timeout fails with `Timeout`; a partial record is a `ShortRead`.
pub fn read_record<T: Transport + ?Sized>(t: &mut T, block: bool) -> Result<Option<Command>> {
    if !block && t.bytes_available()? < NBF_RECORD_LENGTH_BYTES {
        return Ok(None);
    }

    let buf = t.read(NBF_RECORD_LENGTH_BYTES)?;
    if buf.is_empty() {
        return Err(TransportError::Timeout.into());
    }
    if buf.len() != NBF_RECORD_LENGTH_BYTES {
        return Err(TransportError::ShortRead {
            expected: NBF_RECORD_LENGTH_BYTES,
            actual: buf.len(),
        }
        .into());
    }

    Command::decode(&buf).map(Some)
}

// =============================================================================
// Tests
// =============================================================================
