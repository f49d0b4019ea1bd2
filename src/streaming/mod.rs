//! NBF command streaming.
//!
//! Pipeline: Command Source -> Engine -> Transport -> Reply Tracker
//!
//! # Architecture
//!
//! ```text
//! +--------------+     +--------------+     +--------------+
//! |   NbfFile    | --> |  HostEngine  | --> |  Transport   |
//! | (text lines) |     | (load/verify)|     |   (serial)   |
//! +--------------+     +--------------+     +--------------+
//!                             ^                    |
//!                             |  ReplyTracker      |
//!                             +--------------------+
//! ```
//!
//! # Wire records
//!
//! `opcode:u8 | address:u40 LE | data:u64 LE`, 14 bytes, no framing.
//! Every host command that expects a reply is answered by a record with the
//! same opcode, in send order.

pub mod engine;
pub mod link;
pub mod protocol;
pub mod source;
pub mod stats;
pub mod tracker;

pub use engine::{
    EngineConfig, HostEngine, LoadOptions, MemoryRegion, DEFAULT_WINDOW_SIZE, DRAM_REGION_END,
    DRAM_REGION_START,
};
pub use link::{Link, StopSignal};
pub use source::{NbfCommands, NbfFile, PEEK_LINE_CUTOFF};
pub use stats::{Corruption, Finish, Stats, VerifyReport};
pub use tracker::{ReplyMatch, ReplyTracker};

pub use protocol::{
    opcode, read_record, reply_rule, write_record, Command, Opcode, ReplyRule,
    ADDRESS_CSR_FREEZE, ADDRESS_LENGTH_BYTES, ADDRESS_MASK, DATA_LENGTH_BYTES,
    NBF_RECORD_LENGTH_BYTES,
};
