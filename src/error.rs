//! Error types for sprd-pp

use crate::types::PixelFormat;
use thiserror::Error;

/// Result type alias for sprd-pp operations
pub type Result<T> = std::result::Result<T, Error>;

/// sprd-pp error type
#[derive(Error, Debug)]
pub enum Error {
    // Caller errors
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    // Conversion planning errors
    #[error("Scale {src} -> {dst} needs more than {max_steps} hardware passes")]
    ScaleUnsupported {
        src: u32,
        dst: u32,
        max_steps: usize,
    },

    #[error("Invalid conversion: {0}")]
    InvalidConversion(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unknown pixel format: {0}")]
    UnknownFormat(PixelFormat),

    // Hardware errors
    #[error("{request} ioctl failed: {errno}")]
    Ioctl {
        request: &'static str,
        #[source]
        errno: nix::errno::Errno,
    },

    #[error("Operation failed: {0}")]
    OperationFailed(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    // General errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Caller-visible error classes reported back to the display manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidParameter,
    OutOfMemory,
    BadRequest,
    OperationFailed,
    NotImplemented,
}

impl Error {
    /// Classify this error into the result code the host expects
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidParameter(_) | Error::Config(_) => ErrorKind::InvalidParameter,
            Error::OutOfMemory(_) => ErrorKind::OutOfMemory,
            Error::ScaleUnsupported { .. }
            | Error::InvalidConversion(_)
            | Error::BadRequest(_)
            | Error::UnknownFormat(_) => ErrorKind::BadRequest,
            Error::Ioctl { .. } | Error::OperationFailed(_) | Error::Io(_) => {
                ErrorKind::OperationFailed
            }
            Error::NotImplemented(_) => ErrorKind::NotImplemented,
        }
    }

    /// Check if retrying the call that produced this error may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind(), ErrorKind::OperationFailed | ErrorKind::OutOfMemory)
    }

    /// Check if this is a hardware/driver issue
    pub fn is_hardware_issue(&self) -> bool {
        matches!(self, Error::Ioctl { .. } | Error::OperationFailed(_))
    }

    pub(crate) fn ioctl(request: &'static str, errno: nix::errno::Errno) -> Self {
        Error::Ioctl { request, errno }
    }
}
