//! Error types for the CH341 binding
//!
//! Every failure the vendor library reports is translated here into one of a
//! handful of kinds. Nothing is retried and nothing is swallowed, with the
//! single exception of a second `close()` on the same handle, which is a
//! no-op (see [`crate::Ch341Device::close`]).

use std::fmt;

use thiserror::Error;

/// Result type for CH341 operations
pub type Result<T> = std::result::Result<T, Ch341Error>;

/// Errors that can occur when talking to the CH341 driver
#[derive(Error, Debug)]
pub enum Ch341Error {
    /// No chip instance at the requested index
    #[error("no CH341 device at index {0}")]
    DeviceNotFound(u32),

    /// The requested index is already held by another handle
    #[error("CH341 device {0} is already open")]
    DeviceBusy(u32),

    /// Operation attempted on a handle that has been closed
    #[error("handle for CH341 device {0} is closed")]
    HandleClosed(u32),

    /// Parameter outside the range the native library accepts
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The native library reported a failed transaction
    #[error("{op} failed{}", device_suffix(.index))]
    Io {
        /// Native function that failed
        op: &'static str,
        /// Device index the call was made for, if any
        index: Option<u32>,
    },

    /// The vendor library could not be loaded
    #[error("failed to load CH341 driver library {path}: {reason}")]
    LibraryLoad {
        /// Path or file name that was tried
        path: String,
        /// Loader message
        reason: String,
    },

    /// The vendor library is missing an export we need
    #[error("CH341 driver library does not export {0}")]
    MissingSymbol(&'static str),

    /// No default library name is known for this platform
    #[error("no CH341 driver library known for {0}, pass an explicit path")]
    UnsupportedPlatform(String),
}

/// Coarse error classification exposed to scripting hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`Ch341Error::DeviceNotFound`]
    DeviceNotFound,
    /// See [`Ch341Error::DeviceBusy`]
    DeviceBusy,
    /// See [`Ch341Error::HandleClosed`]
    HandleClosed,
    /// See [`Ch341Error::InvalidArgument`]
    InvalidArgument,
    /// See [`Ch341Error::Io`]
    IoError,
    /// Library could not be located, loaded or resolved
    Library,
}

impl ErrorKind {
    /// Stable name of the kind
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::DeviceNotFound => "DeviceNotFound",
            ErrorKind::DeviceBusy => "DeviceBusy",
            ErrorKind::HandleClosed => "HandleClosed",
            ErrorKind::InvalidArgument => "InvalidArgument",
            ErrorKind::IoError => "IOError",
            ErrorKind::Library => "LibraryError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn device_suffix(index: &Option<u32>) -> String {
    index
        .map(|i| format!(" on CH341 device {}", i))
        .unwrap_or_default()
}

impl Ch341Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Ch341Error::DeviceNotFound(_) => ErrorKind::DeviceNotFound,
            Ch341Error::DeviceBusy(_) => ErrorKind::DeviceBusy,
            Ch341Error::HandleClosed(_) => ErrorKind::HandleClosed,
            Ch341Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Ch341Error::Io { .. } => ErrorKind::IoError,
            Ch341Error::LibraryLoad { .. }
            | Ch341Error::MissingSymbol(_)
            | Ch341Error::UnsupportedPlatform(_) => ErrorKind::Library,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Ch341Error::InvalidArgument(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(Ch341Error::HandleClosed(0).kind().as_str(), "HandleClosed");
        assert_eq!(
            Ch341Error::Io {
                op: "CH341StreamI2C",
                index: Some(0)
            }
            .kind(),
            ErrorKind::IoError
        );
        assert_eq!(ErrorKind::IoError.to_string(), "IOError");
        assert_eq!(
            Ch341Error::MissingSymbol("CH341OpenDevice").kind(),
            ErrorKind::Library
        );
    }

    #[test]
    fn test_display() {
        let e = Ch341Error::Io {
            op: "CH341ReadI2C",
            index: Some(2),
        };
        assert_eq!(e.to_string(), "CH341ReadI2C failed on CH341 device 2");
        let e = Ch341Error::Io {
            op: "CH341GetDrvVersion",
            index: None,
        };
        assert_eq!(e.to_string(), "CH341GetDrvVersion failed");
        assert_eq!(
            Ch341Error::DeviceBusy(1).to_string(),
            "CH341 device 1 is already open"
        );
    }
}
