//! Serial bootloader packet framing.
//!
//! Every command travels as one packet:
//!
//! ```text
//! +------+----------+-----+------------------+
//! | Size | Checksum | Cmd |    Arguments     |
//! +------+----------+-----+------------------+
//! |  1   |    1     |  1  |   0..=252 bytes  |
//! +------+----------+-----+------------------+
//! ```
//!
//! `Size` counts itself and the checksum byte, so it is the payload length
//! plus two. `Checksum` is the 8-bit wrapping sum of the payload (command
//! byte included). Numeric command arguments are big-endian.
//!
//! ACK (`0xCC`) and NACK (`0x33`) are bare bytes, never packets.

use std::fmt;

use byteorder::{BigEndian, WriteBytesExt};

use crate::error::{Error, Result};

/// Acknowledge byte.
pub const ACK: u8 = 0xCC;

/// Negative acknowledge byte.
pub const NACK: u8 = 0x33;

/// Bytes the host sends to acknowledge a response packet.
pub const ACK_ECHO: [u8; 2] = [0x00, ACK];

/// Bytes the host sends to reject a corrupted response packet.
pub const NACK_ECHO: [u8; 2] = [0x00, NACK];

/// Largest payload a packet can carry (command byte included).
pub const MAX_PAYLOAD_LEN: usize = 253;

/// Largest data block SEND_DATA can carry.
pub const MAX_DATA_LEN: usize = MAX_PAYLOAD_LEN - 1;

/// Size + checksum.
pub const HEADER_LEN: usize = 2;

/// Bounded packet payload.
pub type Payload = heapless::Vec<u8, MAX_PAYLOAD_LEN>;

/// Bootloader command opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Check that the bootloader is alive (0x20).
    Ping = 0x20,
    /// Prepare a flash write: address and byte count (0x21).
    Download = 0x21,
    /// Return the status of the previous command (0x23).
    GetStatus = 0x23,
    /// Data block for a pending download (0x24).
    SendData = 0x24,
    /// Software reset (0x25).
    Reset = 0x25,
    /// Erase one flash sector (0x26).
    SectorErase = 0x26,
    /// CRC32 over a flash range (0x27).
    Crc32 = 0x27,
    /// Read the chip ID (0x28).
    GetChipId = 0x28,
}

impl Command {
    /// Opcode byte.
    pub fn opcode(self) -> u8 {
        self as u8
    }

    /// Look up a command from its opcode.
    pub fn from_opcode(opcode: u8) -> Option<Self> {
        match opcode {
            0x20 => Some(Self::Ping),
            0x21 => Some(Self::Download),
            0x23 => Some(Self::GetStatus),
            0x24 => Some(Self::SendData),
            0x25 => Some(Self::Reset),
            0x26 => Some(Self::SectorErase),
            0x27 => Some(Self::Crc32),
            0x28 => Some(Self::GetChipId),
            _ => None,
        }
    }

    /// Length of the response packet payload the command produces.
    pub fn response_len(self) -> usize {
        match self {
            Self::GetStatus => 1,
            Self::Crc32 | Self::GetChipId => 4,
            _ => 0,
        }
    }

    /// Protocol name, as used in log and error messages.
    pub fn name(self) -> &'static str {
        match self {
            Self::Ping => "PING",
            Self::Download => "DOWNLOAD",
            Self::GetStatus => "GET_STATUS",
            Self::SendData => "SEND_DATA",
            Self::Reset => "RESET",
            Self::SectorErase => "SECTOR_ERASE",
            Self::Crc32 => "CRC32",
            Self::GetChipId => "GET_CHIP_ID",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result code returned by GET_STATUS.
///
/// Unknown codes are kept verbatim so callers can always see the raw byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// 0x40
    Success,
    /// 0x41
    UnknownCmd,
    /// 0x42
    InvalidCmd,
    /// 0x43
    InvalidAddr,
    /// 0x44
    FlashFail,
    /// Anything else.
    Other(u8),
}

impl Status {
    /// Raw status byte.
    pub fn raw(self) -> u8 {
        match self {
            Self::Success => 0x40,
            Self::UnknownCmd => 0x41,
            Self::InvalidCmd => 0x42,
            Self::InvalidAddr => 0x43,
            Self::FlashFail => 0x44,
            Self::Other(b) => b,
        }
    }

    /// Whether the previous command succeeded.
    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    /// Protocol name of the status, if it is a known one.
    pub fn name(self) -> Option<&'static str> {
        match self {
            Self::Success => Some("SUCCESS"),
            Self::UnknownCmd => Some("UNKNOWN_CMD"),
            Self::InvalidCmd => Some("INVALID_CMD"),
            Self::InvalidAddr => Some("INVALID_ADDR"),
            Self::FlashFail => Some("FLASH_FAIL"),
            Self::Other(_) => None,
        }
    }
}

impl From<u8> for Status {
    fn from(b: u8) -> Self {
        match b {
            0x40 => Self::Success,
            0x41 => Self::UnknownCmd,
            0x42 => Self::InvalidCmd,
            0x43 => Self::InvalidAddr,
            0x44 => Self::FlashFail,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "0x{:02X} ({name})", self.raw()),
            None => write!(f, "0x{:02X}", self.raw()),
        }
    }
}

/// 8-bit wrapping sum of `data`.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |sum, &b| sum.wrapping_add(b))
}

/// Wrap a payload into `[size][checksum][payload...]`.
///
/// Fails with [`Error::InvalidArgument`] for an empty payload or one longer
/// than [`MAX_PAYLOAD_LEN`].
pub fn encode(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.is_empty() || payload.len() > MAX_PAYLOAD_LEN {
        return Err(Error::InvalidArgument(format!(
            "packet payload must be 1..={MAX_PAYLOAD_LEN} bytes, got {}",
            payload.len()
        )));
    }
    Ok(wrap(payload))
}

/// Header plus payload; `payload` must already be within bounds.
#[allow(clippy::cast_possible_truncation)] // len <= MAX_PAYLOAD_LEN
fn wrap(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.push((payload.len() + HEADER_LEN) as u8);
    buf.push(checksum(payload));
    buf.extend_from_slice(payload);
    buf
}

/// A validated packet received from (or destined for) the bootloader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: Payload,
}

impl Frame {
    /// Check a received size/checksum header against its payload.
    pub fn from_parts(size: u8, rx_checksum: u8, payload: &[u8]) -> Result<Self> {
        let expected_len = usize::from(size)
            .checked_sub(HEADER_LEN)
            .ok_or_else(|| Error::Protocol(format!("invalid packet size byte 0x{size:02X}")))?;
        if payload.len() != expected_len {
            return Err(Error::Protocol(format!(
                "packet declares {expected_len} payload bytes, got {}",
                payload.len()
            )));
        }

        let actual = checksum(payload);
        if actual != rx_checksum {
            return Err(Error::Protocol(format!(
                "checksum mismatch: packet says 0x{rx_checksum:02X}, payload sums to 0x{actual:02X}"
            )));
        }

        let payload = Payload::from_slice(payload).map_err(|()| {
            Error::Protocol(format!("packet payload of {} bytes too long", payload.len()))
        })?;
        Ok(Self { payload })
    }

    /// Decode a complete packet (`[size][checksum][payload...]`).
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        match bytes {
            [size, rx_checksum, payload @ ..] => Self::from_parts(*size, *rx_checksum, payload),
            _ => Err(Error::Protocol(format!(
                "packet too short: {} bytes",
                bytes.len()
            ))),
        }
    }

    /// Payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The first payload byte interpreted as a command opcode.
    pub fn command(&self) -> Option<Command> {
        self.payload
            .first()
            .copied()
            .and_then(Command::from_opcode)
    }

    /// Payload bytes following the command opcode.
    pub fn args(&self) -> &[u8] {
        self.payload
            .get(1..)
            .unwrap_or_default()
    }
}

/// Command packet builder.
#[derive(Debug, Clone)]
pub struct CommandFrame {
    command: Command,
    args: heapless::Vec<u8, MAX_DATA_LEN>,
}

impl CommandFrame {
    /// Create a frame without arguments.
    pub fn new(command: Command) -> Self {
        Self {
            command,
            args: heapless::Vec::new(),
        }
    }

    fn push_u32(&mut self, value: u32) {
        let mut bytes = [0u8; 4];
        // Writing into a 4-byte slice cannot fail.
        let _ = (&mut bytes[..]).write_u32::<BigEndian>(value);
        // At most three u32 arguments, far below MAX_DATA_LEN.
        let _ = self
            .args
            .extend_from_slice(&bytes);
    }

    /// PING.
    pub fn ping() -> Self {
        Self::new(Command::Ping)
    }

    /// DOWNLOAD: program `len` bytes starting at `addr`.
    pub fn download(addr: u32, len: u32) -> Self {
        let mut frame = Self::new(Command::Download);
        frame.push_u32(addr);
        frame.push_u32(len);
        frame
    }

    /// GET_STATUS.
    pub fn get_status() -> Self {
        Self::new(Command::GetStatus)
    }

    /// SEND_DATA carrying 1..=252 bytes.
    pub fn send_data(data: &[u8]) -> Result<Self> {
        if data.is_empty() || data.len() > MAX_DATA_LEN {
            return Err(Error::InvalidArgument(format!(
                "SEND_DATA block must be 1..={MAX_DATA_LEN} bytes, got {}",
                data.len()
            )));
        }
        let mut frame = Self::new(Command::SendData);
        frame
            .args
            .extend_from_slice(data)
            .map_err(|()| Error::InvalidArgument("SEND_DATA block too long".into()))?;
        Ok(frame)
    }

    /// RESET.
    pub fn reset() -> Self {
        Self::new(Command::Reset)
    }

    /// SECTOR_ERASE of the sector starting at `addr`.
    pub fn sector_erase(addr: u32) -> Self {
        let mut frame = Self::new(Command::SectorErase);
        frame.push_u32(addr);
        frame
    }

    /// CRC32 over `len` bytes at `addr`, read `repeat` times.
    pub fn crc32(addr: u32, len: u32, repeat: u32) -> Self {
        let mut frame = Self::new(Command::Crc32);
        frame.push_u32(addr);
        frame.push_u32(len);
        frame.push_u32(repeat);
        frame
    }

    /// GET_CHIP_ID.
    pub fn get_chip_id() -> Self {
        Self::new(Command::GetChipId)
    }

    /// The command this frame carries.
    pub fn command(&self) -> Command {
        self.command
    }

    /// Command arguments (everything after the opcode).
    pub fn args(&self) -> &[u8] {
        &self.args
    }

    /// Payload: opcode followed by the arguments.
    pub fn payload(&self) -> Payload {
        let mut payload = Payload::new();
        // 1 + MAX_DATA_LEN == MAX_PAYLOAD_LEN
        let _ = payload.push(self.command.opcode());
        let _ = payload.extend_from_slice(&self.args);
        payload
    }

    /// Build the complete wire packet.
    ///
    /// The payload always holds the opcode and never exceeds
    /// [`MAX_PAYLOAD_LEN`], so this is [`encode`] without the bounds check.
    pub fn build(&self) -> Vec<u8> {
        wrap(&self.payload())
    }
}
