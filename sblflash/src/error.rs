//! Error types for sblflash.

use std::io;
use thiserror::Error;

use crate::protocol::frame::Status;

/// Result type for sblflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for sblflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed argument: misaligned address, oversized payload, bad layout.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// I/O error (serial port read/write, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error (open/configure).
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// No ACK/NACK or response arrived within the time budget.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// NACK received, checksum mismatch or malformed frame.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// GET_STATUS after a command reported something other than SUCCESS.
    #[error("{operation} rejected by device: status {status}")]
    DeviceRejected {
        /// The command (and address/offset) that was rejected.
        operation: String,
        /// Raw status reported by the bootloader.
        status: Status,
    },

    /// Autobaud scan exhausted every candidate baud rate.
    #[error("Auto-baud failed: no ACK at any of {tried:?}")]
    AutobaudFailed {
        /// Baud rates probed, in order.
        tried: Vec<u32>,
    },

    /// The embedding application asked the running workflow to stop.
    #[error("Operation interrupted")]
    Interrupted,

    /// An error annotated with the workflow step it occurred in.
    #[error("{context}: {source}")]
    Context {
        /// Step description, e.g. `SEND_DATA at offset 504`.
        context: String,
        /// Underlying error.
        #[source]
        source: Box<Error>,
    },
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// See [`Error::InvalidArgument`].
    InvalidArgument,
    /// OS or driver level failure on the transport.
    Transport,
    /// See [`Error::Timeout`].
    Timeout,
    /// See [`Error::Protocol`].
    Protocol,
    /// See [`Error::DeviceRejected`].
    DeviceRejected,
    /// See [`Error::AutobaudFailed`].
    AutobaudFailed,
    /// See [`Error::Interrupted`].
    Interrupted,
}

impl Error {
    /// Wrap this error with a description of the step that failed.
    #[must_use]
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping any [`Error::Context`] layers.
    pub fn root_cause(&self) -> &Self {
        let mut err = self;
        while let Self::Context { source, .. } = err {
            err = source;
        }
        err
    }

    /// Classify the root cause.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Io(e) if e.kind() == io::ErrorKind::TimedOut => ErrorKind::Timeout,
            Self::Io(_) => ErrorKind::Transport,
            #[cfg(feature = "native")]
            Self::Serial(_) => ErrorKind::Transport,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::DeviceRejected { .. } => ErrorKind::DeviceRejected,
            Self::AutobaudFailed { .. } => ErrorKind::AutobaudFailed,
            Self::Interrupted => ErrorKind::Interrupted,
            Self::Context { source, .. } => source.kind(),
        }
    }

    /// Raw status byte, if the root cause is a device rejection.
    pub fn status(&self) -> Option<Status> {
        match self.root_cause() {
            Self::DeviceRejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_keeps_root_cause() {
        let err = Error::DeviceRejected {
            operation: "SECTOR_ERASE at 0x00002000".into(),
            status: Status::from(0x44),
        }
        .context("erasing image region");

        assert_eq!(err.kind(), ErrorKind::DeviceRejected);
        assert_eq!(err.status().map(Status::raw), Some(0x44));
        let msg = err.to_string();
        assert!(msg.contains("erasing image region"));
        assert!(msg.contains("0x00002000"));
        assert!(msg.contains("0x44"));
    }

    #[test]
    fn test_io_timeout_classified_as_timeout() {
        let err = Error::from(io::Error::new(io::ErrorKind::TimedOut, "slow"));
        assert_eq!(err.kind(), ErrorKind::Timeout);

        let err = Error::from(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert_eq!(err.kind(), ErrorKind::Transport);
    }
}
