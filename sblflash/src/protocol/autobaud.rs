//! Baud rate synchronisation.
//!
//! The ROM bootloader measures the first two `0x55` bytes it receives to
//! lock onto the host's baud rate and answers with an ACK. When the rate is
//! unknown, [`autobaud_scan`] reopens the port at each candidate in turn.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::frame::ACK;
use crate::protocol::handshake::POLL_SLICE;

/// Sync pattern the bootloader measures.
pub const SYNC_BYTES: [u8; 2] = [0x55, 0x55];

/// Pause after opening a port before probing it.
pub const SETTLE_DELAY: Duration = Duration::from_millis(10);

/// Per-candidate probe budget used by the CLI scan.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Candidate order used when the caller has no better guess.
///
/// Rates the ROM is most often run at come first.
pub const DEFAULT_SCAN_BAUDS: &[u32] = &[
    115_200, 921_600, 460_800, 230_400, 57600, 38400, 19200, 9600,
];

/// Send the sync pattern and wait up to `timeout` for an ACK.
///
/// Every byte other than `0xCC`, including `0x33`, is ignored here.
pub fn autobaud<P: Port + ?Sized>(port: &mut P, timeout: Duration) -> Result<()> {
    trace!("Sending autobaud sync to {}", port.name());
    for b in SYNC_BYTES {
        port.write_all_bytes(&[b])?;
    }

    let start = Instant::now();
    let mut byte = [0u8; 1];
    loop {
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            break;
        }
        let wait = POLL_SLICE.min(timeout - elapsed);
        if port.read_timeout(&mut byte, wait)? == 1 {
            if byte[0] == ACK {
                debug!("Autobaud ACK at {} baud", port.baud_rate());
                return Ok(());
            }
            trace!("Ignoring 0x{:02X} while waiting for autobaud ACK", byte[0]);
        }
    }

    Err(Error::Timeout(format!(
        "no autobaud ACK at {} baud within {} ms",
        port.baud_rate(),
        timeout.as_millis()
    )))
}

/// Try each baud rate in `bauds`, in order, and return the first that syncs.
///
/// `open` must return a freshly opened port at the requested rate. Every
/// port is closed before moving on, whether or not the probe succeeded. A
/// candidate that cannot be opened is skipped.
pub fn autobaud_scan<P, F>(bauds: &[u32], timeout: Duration, mut open: F) -> Result<u32>
where
    P: Port,
    F: FnMut(u32) -> Result<P>,
{
    if bauds.is_empty() {
        return Err(Error::InvalidArgument("empty baud rate list".into()));
    }

    for &baud in bauds {
        crate::check_interrupted()?;

        let mut port = match open(baud) {
            Ok(port) => port,
            Err(e) => {
                warn!("Cannot open port at {baud} baud: {e}");
                continue;
            },
        };

        thread::sleep(SETTLE_DELAY);
        let result = autobaud(&mut port, timeout);
        if let Err(e) = port.close() {
            debug!("Closing port after probe at {baud} failed: {e}");
        }

        match result {
            Ok(()) => {
                info!("Bootloader answered at {baud} baud");
                return Ok(baud);
            },
            Err(e) => debug!("No sync at {baud}: {e}"),
        }
    }

    Err(Error::AutobaudFailed {
        tried: bauds.to_vec(),
    })
}
