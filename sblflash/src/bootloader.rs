//! Command transactions with the ROM serial bootloader.
//!
//! [`Bootloader`] owns the connection and exposes one method per bootloader
//! command. Every method writes a single packet, waits for the ACK and, for
//! commands that answer with data, reads and acknowledges the response
//! packet.
//!
//! An ACK only means the packet arrived intact. Whether the device actually
//! carried the command out is reported by a following GET_STATUS, see
//! [`Bootloader::check_status`].
//!
//! ## Example
//!
//! ```rust,no_run
//! # #[cfg(feature = "native")]
//! # fn main() -> sblflash::Result<()> {
//! use sblflash::{Bootloader, Timeouts};
//!
//! let timeouts = Timeouts::default();
//! let mut bl = Bootloader::open("/dev/ttyUSB0", 115200)?;
//! bl.autobaud(timeouts.autobaud)?;
//! let id = bl.get_chip_id(timeouts.query)?;
//! println!("chip id 0x{id:08X}");
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "native"))]
//! # fn main() {}
//! ```

use std::time::Duration;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use log::{debug, trace};

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::autobaud;
use crate::protocol::frame::{ACK_ECHO, CommandFrame, Frame, NACK_ECHO, Status};
use crate::protocol::handshake::wait_ack;

/// How long to wait after the ACK for the first byte of a response packet.
pub const RESPONSE_GRACE: Duration = Duration::from_millis(50);

/// Per-command time budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// SECTOR_ERASE ACK.
    pub sector_erase: Duration,
    /// GET_STATUS following SECTOR_ERASE.
    pub erase_status: Duration,
    /// GET_STATUS everywhere else.
    pub status: Duration,
    /// DOWNLOAD ACK.
    pub download: Duration,
    /// SEND_DATA ACK.
    pub send_data: Duration,
    /// RESET ACK.
    pub reset: Duration,
    /// CRC32 ACK and response.
    pub crc32: Duration,
    /// Autobaud probe.
    pub autobaud: Duration,
    /// PING and GET_CHIP_ID.
    pub query: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            sector_erase: Duration::from_millis(5000),
            erase_status: Duration::from_millis(1000),
            status: Duration::from_millis(500),
            download: Duration::from_millis(1000),
            send_data: Duration::from_millis(1000),
            reset: Duration::from_millis(1000),
            crc32: Duration::from_millis(5000),
            autobaud: Duration::from_millis(500),
            query: Duration::from_millis(500),
        }
    }
}

/// Connection to a device running the ROM serial bootloader.
pub struct Bootloader<P: Port> {
    port: P,
}

impl<P: Port> Bootloader<P> {
    /// Wrap an already opened port.
    pub fn new(port: P) -> Self {
        Self { port }
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Consume the connection and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Close the underlying port.
    pub fn close(&mut self) -> Result<()> {
        self.port.close()
    }

    /// Write a packet and wait for the ACK.
    fn send(&mut self, frame: &CommandFrame, timeout: Duration) -> Result<()> {
        let data = frame.build();
        trace!("Sending {}: {:02X?}", frame.command(), data);
        self.port.write_all_bytes(&data)?;
        wait_ack(&mut self.port, timeout)
    }

    /// Write a packet, wait for the ACK, then collect an optional response.
    ///
    /// Returns `None` when no response packet started within
    /// [`RESPONSE_GRACE`] after the ACK (or the device sent a zero size
    /// byte). A response that is received is always answered: ACK echo when
    /// its checksum is good, NACK echo otherwise.
    pub fn transact(&mut self, frame: &CommandFrame, timeout: Duration) -> Result<Option<Frame>> {
        self.send(frame, timeout)?;

        let mut size = [0u8; 1];
        if self.port.read_timeout(&mut size, RESPONSE_GRACE)? == 0 || size[0] == 0 {
            trace!("{}: bare ACK", frame.command());
            return Ok(None);
        }

        let mut rx_checksum = [0u8; 1];
        self.port.read_exact_timeout(&mut rx_checksum, timeout)?;

        let max = frame.command().response_len();
        let payload_len = match usize::from(size[0]).checked_sub(2) {
            Some(len) if len <= max => len,
            Some(len) => {
                self.port.write_all_bytes(&NACK_ECHO)?;
                return Err(Error::Protocol(format!(
                    "{}: response of {len} bytes exceeds the expected {max}",
                    frame.command()
                )));
            },
            None => {
                self.port.write_all_bytes(&NACK_ECHO)?;
                return Err(Error::Protocol(format!(
                    "{}: invalid response size byte 0x{:02X}",
                    frame.command(),
                    size[0]
                )));
            },
        };

        let mut payload = vec![0u8; payload_len];
        self.port.read_exact_timeout(&mut payload, timeout)?;
        trace!("{} response: {:02X?}", frame.command(), payload);

        match Frame::from_parts(size[0], rx_checksum[0], &payload) {
            Ok(response) => {
                self.port.write_all_bytes(&ACK_ECHO)?;
                Ok(Some(response))
            },
            Err(e) => {
                self.port.write_all_bytes(&NACK_ECHO)?;
                Err(e)
            },
        }
    }

    /// Transact and require a response payload of exactly the length the
    /// command defines.
    fn query(&mut self, frame: &CommandFrame, timeout: Duration) -> Result<Frame> {
        let command = frame.command();
        let expected = command.response_len();
        match self.transact(frame, timeout)? {
            Some(response) if response.payload().len() == expected => Ok(response),
            Some(response) => Err(Error::Protocol(format!(
                "{command}: expected {expected} response bytes, got {}",
                response.payload().len()
            ))),
            None => Err(Error::Protocol(format!(
                "{command}: no response packet after ACK"
            ))),
        }
    }

    /// Synchronise the device's baud rate detector (`0x55 0x55`, wait ACK).
    pub fn autobaud(&mut self, timeout: Duration) -> Result<()> {
        autobaud::autobaud(&mut self.port, timeout)
    }

    /// PING (0x20).
    pub fn ping(&mut self, timeout: Duration) -> Result<()> {
        self.send(&CommandFrame::ping(), timeout)
    }

    /// GET_STATUS (0x23): the result of the last command.
    ///
    /// Reading the status has no side effect on it.
    pub fn get_status(&mut self, timeout: Duration) -> Result<Status> {
        let response = self.query(&CommandFrame::get_status(), timeout)?;
        let status = Status::from(response.payload()[0]);
        debug!("Status: {status}");
        Ok(status)
    }

    /// GET_CHIP_ID (0x28). The ID is sent little-endian.
    pub fn get_chip_id(&mut self, timeout: Duration) -> Result<u32> {
        let response = self.query(&CommandFrame::get_chip_id(), timeout)?;
        Ok(LittleEndian::read_u32(response.payload()))
    }

    /// RESET (0x25).
    pub fn reset(&mut self, timeout: Duration) -> Result<()> {
        self.send(&CommandFrame::reset(), timeout)
    }

    /// DOWNLOAD (0x21): announce `len` bytes to be programmed at `addr`.
    pub fn download(&mut self, addr: u32, len: u32, timeout: Duration) -> Result<()> {
        debug!("DOWNLOAD 0x{addr:08X}, {len} bytes");
        self.send(&CommandFrame::download(addr, len), timeout)
    }

    /// SECTOR_ERASE (0x26) of the page at `addr`.
    pub fn sector_erase(&mut self, addr: u32, timeout: Duration) -> Result<()> {
        debug!("SECTOR_ERASE 0x{addr:08X}");
        self.send(&CommandFrame::sector_erase(addr), timeout)
    }

    /// SEND_DATA (0x24) with 1 to 252 bytes.
    pub fn send_data(&mut self, data: &[u8], timeout: Duration) -> Result<()> {
        let frame = CommandFrame::send_data(data)?;
        self.send(&frame, timeout)
    }

    /// CRC32 (0x27) over `len` bytes at `addr`. The CRC is sent big-endian.
    pub fn crc32(&mut self, addr: u32, len: u32, repeat: u32, timeout: Duration) -> Result<u32> {
        let response = self.query(&CommandFrame::crc32(addr, len, repeat), timeout)?;
        Ok(BigEndian::read_u32(response.payload()))
    }

    /// Issue GET_STATUS and turn anything but SUCCESS into
    /// [`Error::DeviceRejected`] naming `operation`.
    pub fn check_status(&mut self, operation: &str, timeout: Duration) -> Result<()> {
        let status = self.get_status(timeout)?;
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::DeviceRejected {
                operation: operation.to_string(),
                status,
            })
        }
    }
}

#[cfg(feature = "native")]
mod native_impl {
    use super::Bootloader;
    use crate::error::Result;
    use crate::port::{NativePort, SerialConfig};

    impl Bootloader<NativePort> {
        /// Open `port_name` at `baud_rate` (8N1, no flow control).
        pub fn open(port_name: &str, baud_rate: u32) -> Result<Self> {
            let port = NativePort::open(&SerialConfig::new(port_name, baud_rate))?;
            Ok(Self::new(port))
        }
    }
}
