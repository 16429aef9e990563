//! Byte-oriented serial transport used by the device driver.
//!
//! Reads are blocking and unbounded: `recv_exact` waits until every requested
//! byte has arrived and `recv_until` waits for the delimiter however long it
//! takes. A silent device therefore stalls the caller; only a connection
//! error or end of stream ends the wait early.

use std::io::{self, ErrorKind, Read, Write};
use std::time::Duration;

use log::debug;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::errors::Result;

/// Default serial baud rate for BITalino devices
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Poll interval handed to the serial driver. Expiry is not an error here,
/// reads simply poll again.
const POLL_TIMEOUT: Duration = Duration::from_millis(500);

// ============================================================================
// Transport Abstraction
// ============================================================================

/// Read + Write + Send with the framing helpers the driver needs.
pub trait Transport: Read + Write + Send {
    /// Single best-effort write, returning how many bytes the connection accepted.
    fn send(&mut self, bytes: &[u8]) -> io::Result<usize> {
        let sent = self.write(bytes)?;
        self.flush()?;
        Ok(sent)
    }

    /// Fill `buf` completely, one byte at a time.
    fn recv_into(&mut self, buf: &mut [u8]) -> io::Result<()> {
        for slot in buf.iter_mut() {
            *slot = recv_byte(self)?;
        }
        Ok(())
    }

    /// Read exactly `n` bytes.
    fn recv_exact(&mut self, n: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.recv_into(&mut buf)?;
        Ok(buf)
    }

    /// Read until `delimiter` has been received. The delimiter is included.
    fn recv_until(&mut self, delimiter: u8) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        loop {
            let byte = recv_byte(self)?;
            buf.push(byte);
            if byte == delimiter {
                return Ok(buf);
            }
        }
    }
}

impl<T: Read + Write + Send> Transport for T {}

fn recv_byte<R: Read + ?Sized>(reader: &mut R) -> io::Result<u8> {
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(1) => return Ok(byte[0]),
            Ok(_) => {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "connection closed mid-read",
                ))
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) => {}
            Err(e) => return Err(e),
        }
    }
}

// ============================================================================
// Serial Port
// ============================================================================

/// Open a serial port at `path` with 8 data bits, no parity and one stop bit.
pub fn open(path: &str, baud_rate: u32) -> Result<Box<dyn SerialPort>> {
    debug!("opening serial port: path={}, baud_rate={}", path, baud_rate);
    let port = serialport::new(path, baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(POLL_TIMEOUT)
        .open()?;
    Ok(port)
}

/// Names of the serial ports currently known to the OS.
pub fn list_ports() -> Result<Vec<String>> {
    let ports = serialport::available_ports()?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}
