//! Wire protocol of the ROM serial bootloader.
//!
//! - [`frame`]: packet codec, command opcodes and status codes
//! - [`handshake`]: ACK/NACK wait that tolerates line noise
//! - [`autobaud`]: baud rate synchronisation and scanning

pub mod autobaud;
pub mod frame;
pub mod handshake;

pub use autobaud::{DEFAULT_SCAN_BAUDS, autobaud, autobaud_scan};
pub use frame::{ACK, Command, CommandFrame, Frame, MAX_DATA_LEN, MAX_PAYLOAD_LEN, NACK, Status};
pub use handshake::{AckState, wait_ack};
