//! # sblflash
//!
//! A library for programming TI CC13xx/CC26xx devices through their ROM
//! serial bootloader.
//!
//! This crate provides the host side of the bootloader's UART protocol:
//!
//! - packet codec with 8-bit additive checksum
//! - ACK/NACK handshake tolerant of line noise
//! - baud rate synchronisation and scanning
//! - one call per bootloader command (PING, GET_STATUS, GET_CHIP_ID, RESET,
//!   DOWNLOAD, SECTOR_ERASE, SEND_DATA, CRC32)
//! - the erase / download / send / verify / reset programming workflow
//!
//! ## Supported Platforms
//!
//! - **Native** (default): Linux, macOS, Windows via the `serialport` crate
//!
//! Other transports can be plugged in by implementing [`Port`].
//!
//! ## Features
//!
//! - `native` (default): Native serial port support
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use sblflash::{Bootloader, ChipFamily, ProgramOptions, program_image};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = std::fs::read("app.bin")?;
//!     let layout = ChipFamily::Cc26x2.layout(None, None)?;
//!     let options = ProgramOptions::default();
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let mut bl = Bootloader::open("/dev/ttyUSB0", 115200)?;
//!         bl.autobaud(options.timeouts.autobaud)?;
//!         program_image(&mut bl, &layout, &image, 0, &options, |p| {
//!             println!("{p:?}");
//!         })?;
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod bootloader;
pub mod error;
pub mod port;
pub mod protocol;
pub mod target;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). Only the first
/// registration takes effect.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

/// `Err(Error::Interrupted)` if interruption was requested.
pub(crate) fn check_interrupted() -> Result<()> {
    if is_interrupted_requested() {
        Err(Error::Interrupted)
    } else {
        Ok(())
    }
}

#[cfg(test)]
thread_local! {
    static TEST_INTERRUPTED: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

// Per-thread so concurrently running tests do not see each other's flag.
#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    static INSTALL: std::sync::Once = std::sync::Once::new();

    INSTALL.call_once(|| set_interrupt_checker(|| TEST_INTERRUPTED.with(std::cell::Cell::get)));
    TEST_INTERRUPTED.with(|flag| flag.set(value));
}

// Re-exports for convenience
// Native-specific re-exports
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    bootloader::{Bootloader, RESPONSE_GRACE, Timeouts},
    error::{Error, ErrorKind, Result},
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::{
        AckState, Command, CommandFrame, DEFAULT_SCAN_BAUDS, Frame, Status, autobaud,
        autobaud_scan,
    },
    target::{
        ChipFamily, FlashLayout, ProgramOptions, ProgramPlan, ProgramSummary, Progress,
        erase_all, erase_page, erase_range, padded_crc, program_image, verify_crc,
    },
};
