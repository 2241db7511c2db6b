//! ACK/NACK handshake.
//!
//! After every command packet the bootloader answers with a single ACK
//! (`0xCC`) or NACK (`0x33`) byte. USB-CDC bridges are known to emit stray
//! zero bytes around it, so anything else on the line is treated as noise
//! and skipped until the time budget runs out.

use std::time::{Duration, Instant};

use log::trace;

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::frame::{ACK, NACK};

/// Default read slice used while polling for a single byte.
pub const POLL_SLICE: Duration = Duration::from_millis(20);

/// Handshake state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckState {
    /// No ACK or NACK seen yet.
    Waiting,
    /// `0xCC` received.
    Acked,
    /// `0x33` received.
    Nacked,
    /// Budget exhausted without ACK or NACK.
    TimedOut,
}

impl AckState {
    /// Feed one received byte.
    ///
    /// Only `Waiting` reacts to input; the other states are terminal.
    #[must_use]
    pub fn on_byte(self, byte: u8) -> Self {
        match (self, byte) {
            (Self::Waiting, ACK) => Self::Acked,
            (Self::Waiting, NACK) => Self::Nacked,
            (state, _) => state,
        }
    }

    /// The budget ran out.
    #[must_use]
    pub fn on_deadline(self) -> Self {
        match self {
            Self::Waiting => Self::TimedOut,
            state => state,
        }
    }

    /// Whether the state is final.
    pub fn is_terminal(self) -> bool {
        self != Self::Waiting
    }
}

/// Poll `port` one byte at a time for up to `timeout`, in `slice` steps.
///
/// Returns the terminal state reached (`Acked`, `Nacked` or `TimedOut`).
pub fn poll_ack<P: Port + ?Sized>(port: &mut P, timeout: Duration, slice: Duration) -> Result<AckState> {
    let start = Instant::now();
    let mut state = AckState::Waiting;
    let mut byte = [0u8; 1];

    while !state.is_terminal() {
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            state = state.on_deadline();
            break;
        }

        let wait = slice.min(timeout - elapsed);
        if port.read_timeout(&mut byte, wait)? == 1 {
            state = state.on_byte(byte[0]);
            if !state.is_terminal() {
                trace!("Ignoring noise byte 0x{:02X} while waiting for ACK", byte[0]);
            }
        }
    }

    trace!("Handshake finished in {:?}: {state:?}", start.elapsed());
    Ok(state)
}

/// Wait for the bootloader to acknowledge the packet just sent.
///
/// NACK is a [`Error::Protocol`], an exhausted budget an [`Error::Timeout`].
pub fn wait_ack<P: Port + ?Sized>(port: &mut P, timeout: Duration) -> Result<()> {
    match poll_ack(port, timeout, POLL_SLICE)? {
        AckState::Acked => Ok(()),
        AckState::Nacked => Err(Error::Protocol("NACK received".into())),
        AckState::TimedOut | AckState::Waiting => Err(Error::Timeout(format!(
            "no ACK within {} ms",
            timeout.as_millis()
        ))),
    }
}
