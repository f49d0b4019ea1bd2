//! Byte-stream transports underneath the streaming engine.
//!
//! The engine only needs blocking reads bounded by a timeout plus a
//! non-blocking peek of how many bytes are buffered.

pub mod memory;
pub mod serial;

pub use memory::MemoryTransport;
pub use serial::{SerialSettings, SerialTransport};

use crate::error::TransportError;
use bytes::Bytes;

pub type TransportResult<T> = std::result::Result<T, TransportError>;

pub trait Transport: Send {
    fn write(&mut self, bytes: &[u8]) -> TransportResult<()>;

    fn flush(&mut self) -> TransportResult<()>;

    /// Read up to `n` bytes, blocking until `n` arrive or the read timeout
    /// elapses. Returns fewer than `n` bytes only on timeout.
    fn read(&mut self, n: usize) -> TransportResult<Bytes>;

    /// Bytes that can be read right now without blocking.
    fn bytes_available(&mut self) -> TransportResult<usize>;

    /// Release the underlying resource. Idempotent; later I/O fails with `Closed`.
    fn close(&mut self);
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, bytes: &[u8]) -> TransportResult<()> {
        (**self).write(bytes)
    }

    fn flush(&mut self) -> TransportResult<()> {
        (**self).flush()
    }

    fn read(&mut self, n: usize) -> TransportResult<Bytes> {
        (**self).read(n)
    }

    fn bytes_available(&mut self) -> TransportResult<usize> {
        (**self).bytes_available()
    }

    fn close(&mut self) {
        (**self).close()
    }
}
