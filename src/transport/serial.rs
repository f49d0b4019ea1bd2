//! Serial-port transport.
//!
//! Framing is fixed at 8 data bits, no parity, one stop bit. The read timeout
//! bounds every blocking read so an interrupt is noticed promptly.

use super::{Transport, TransportResult};
use crate::error::TransportError;
use bytes::{Bytes, BytesMut};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SerialSettings {
    /// Device path or port name
    pub port: String,
    pub baud_rate: u32,
    pub timeout: Duration,
}

pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    timeout: Duration,
}

impl SerialTransport {
    pub fn open(settings: &SerialSettings) -> TransportResult<Self> {
        let port = serialport::new(&settings.port, settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(settings.timeout)
            .open()?;

        debug!(
            port = %settings.port,
            baud = settings.baud_rate,
            timeout_ms = settings.timeout.as_millis() as u64,
            "Opened serial port"
        );

        Ok(Self {
            port: Some(port),
            timeout: settings.timeout,
        })
    }

    fn port(&mut self) -> TransportResult<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or(TransportError::Closed)
    }
}

/// Read up to `n` bytes within `timeout`.
///
/// The driver may hand back partial chunks before its own timeout, so this
/// keeps reading until the record is complete. Once the first bytes of a
/// record have arrived the deadline restarts, so a record that starts just
/// before the deadline still gets a full timeout to finish.
fn read_record_bytes<R: Read + ?Sized>(
    reader: &mut R,
    n: usize,
    timeout: Duration,
) -> TransportResult<Bytes> {
    let mut deadline = Instant::now() + timeout;
    let mut buf = BytesMut::zeroed(n);
    let mut filled = 0;

    while filled < n {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(count) => {
                if filled == 0 {
                    deadline = Instant::now() + timeout;
                }
                filled += count;
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
        if filled < n && Instant::now() >= deadline {
            break;
        }
    }

    buf.truncate(filled);
    Ok(buf.freeze())
}

impl Transport for SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> TransportResult<()> {
        self.port()?.write_all(bytes)?;
        Ok(())
    }

    fn flush(&mut self) -> TransportResult<()> {
        self.port()?.flush()?;
        Ok(())
    }

    fn read(&mut self, n: usize) -> TransportResult<Bytes> {
        let timeout = self.timeout;
        read_record_bytes(self.port()?, n, timeout)
    }

    fn bytes_available(&mut self) -> TransportResult<usize> {
        Ok(self.port()?.bytes_to_read()? as usize)
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("Closed serial port");
        }
    }
}
