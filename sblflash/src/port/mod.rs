//! Transport abstraction for the serial bootloader.
//!
//! The protocol layers never touch an OS handle directly. They talk to a
//! [`Port`], which only has to provide two primitives on top of
//! [`Read`]/[`Write`]:
//!
//! - write every byte, then block until the line has drained
//!   ([`Port::write_all_bytes`]);
//! - read up to `buf.len()` bytes, waiting at most a given time and returning
//!   `0` on timeout ([`Port::read_timeout`]).
//!
//! ```text
//! +--------------------+
//! | target::flasher    |   erase / download / send-data / verify
//! +---------+----------+
//!           v
//! +---------+----------+
//! | bootloader         |   one transaction per command
//! +---------+----------+
//!           v
//! +---------+----------+
//! | protocol::*        |   frame codec, ACK wait, autobaud
//! +---------+----------+
//!           v
//! +---------+----------+
//! | Port trait         |
//! +---------+----------+
//!           v
//! +---------+----------+
//! | NativePort         |   serialport crate
//! +--------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use sblflash::port::Port;
//! use std::time::Duration;
//!
//! fn example<P: Port>(port: &mut P) -> sblflash::Result<()> {
//!     port.write_all_bytes(&[0x55, 0x55])?;
//!
//!     let mut buf = [0u8; 1];
//!     let n = port.read_timeout(&mut buf, Duration::from_millis(20))?;
//!     println!("Received: {:?}", &buf[..n]);
//!
//!     Ok(())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use std::io::{self, Read, Write};
use std::time::Duration;

use crate::error::{Error, Result};

/// Baud rates accepted by [`SerialConfig::validate`].
///
/// The classic termios rates plus the high-speed rates the ROM bootloader
/// locks onto.
pub const SUPPORTED_BAUD_RATES: &[u32] = &[
    50, 75, 110, 134, 150, 200, 300, 600, 1200, 1800, 2400, 4800, 9600, 19200, 38400, 57600,
    115_200, 230_400, 460_800, 921_600,
];

/// Serial port configuration.
///
/// The line format is fixed at 8N1 without flow control; only the name,
/// speed and default read timeout vary.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Default read timeout.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115200,
            timeout: Duration::from_millis(20),
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Reject empty port names and baud rates outside [`SUPPORTED_BAUD_RATES`].
    pub fn validate(&self) -> Result<()> {
        if self.port_name.is_empty() {
            return Err(Error::InvalidArgument("empty serial port name".into()));
        }
        if !SUPPORTED_BAUD_RATES.contains(&self.baud_rate) {
            return Err(Error::InvalidArgument(format!(
                "unsupported baud rate: {}",
                self.baud_rate
            )));
        }
        Ok(())
    }
}

/// Serial port information.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

/// Byte transport consumed by the protocol layers.
///
/// Implementations must not buffer unconsumed bytes across calls in a way
/// that hides them from the next [`Port::read_timeout`].
pub trait Port: Read + Write + Send {
    /// Set the read timeout used by plain [`Read::read`].
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current read timeout.
    fn timeout(&self) -> Duration;

    /// Get the current baud rate.
    fn baud_rate(&self) -> u32;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes in one call, then block until they are transmitted.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        Write::write_all(self, buf)?;
        Write::flush(self)?;
        Ok(())
    }

    /// Read up to `buf.len()` bytes, waiting at most `timeout`.
    ///
    /// Returns `Ok(0)` when nothing arrived in time.
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if self.timeout() != timeout {
            self.set_timeout(timeout)?;
        }
        loop {
            match self.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
                    ) =>
                {
                    return Ok(0);
                },
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }

    /// Fill `buf` completely, allowing `timeout` for each read.
    ///
    /// A read that times out before the buffer is full is an
    /// [`Error::Timeout`].
    fn read_exact_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<()> {
        let mut got = 0;
        while got < buf.len() {
            let n = self.read_timeout(&mut buf[got..], timeout)?;
            if n == 0 {
                return Err(Error::Timeout(format!(
                    "expected {} bytes, received {got}",
                    buf.len()
                )));
            }
            got += n;
        }
        Ok(())
    }
}

/// Trait for listing available serial ports.
///
/// This is separated from `Port` because it's a static operation that
/// doesn't require an open port instance.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};
