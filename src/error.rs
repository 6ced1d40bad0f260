//! Error types for IIO operations.
//!
//! Every fallible call in the crate returns [`IioError`]. Remote daemons
//! report failures as negative errno values; [`IioError::from_errno`] maps
//! those into the taxonomy below and [`IioError::errno`] maps back.

use std::io;

use thiserror::Error;

/// Result type alias for IIO operations.
pub type Result<T> = std::result::Result<T, IioError>;

/// Errors that can occur when working with IIO contexts.
#[derive(Error, Debug)]
pub enum IioError {
    /// The active backend does not implement this operation
    #[error("Operation not supported by this backend")]
    NotSupported,

    /// Caller input out of range or otherwise unusable
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Two channel masks (or a mask and a device) disagree on word count
    #[error("Channel mask size mismatch: expected {expected} words, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// Allocation or kernel resource exhausted (`ENOMEM`, `ENOSPC`)
    #[error("Resource exhausted: {message}")]
    ResourceExhausted { errno: i32, message: String },

    /// Failure reported by the transport or the remote side
    #[error("Transport error ({errno}): {message}")]
    Transport { errno: i32, message: String },

    /// I/O exceeded the configured timeout
    #[error("Operation timed out")]
    Timeout,

    /// Response framing did not follow the protocol
    #[error("Malformed response: {message}")]
    Protocol { message: String },

    /// Device, channel, attribute or trigger does not exist (`ENOENT`,
    /// `ENODEV`, `ENXIO`)
    #[error("Not found: {what}")]
    NotFound { errno: i32, what: String },

    /// The connection was closed by the peer
    #[error("Connection closed by peer")]
    BrokenPipe,

    /// I/O error from the operating system
    #[error("I/O error: {0}")]
    Io(io::Error),

    /// Topology description could not be parsed
    #[error("XML error: {message}")]
    Xml { message: String },

    /// Invalid configuration or parameter file
    #[error("Invalid configuration: {message}")]
    Config { message: String },
}

impl IioError {
    /// Shorthand for [`IioError::InvalidArgument`].
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Shorthand for [`IioError::Protocol`].
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Shorthand for [`IioError::NotFound`] with `ENOENT`.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound {
            errno: libc::ENOENT,
            what: what.into(),
        }
    }

    /// Shorthand for [`IioError::ResourceExhausted`] with `ENOMEM`.
    pub fn exhausted(message: impl Into<String>) -> Self {
        Self::ResourceExhausted {
            errno: libc::ENOMEM,
            message: message.into(),
        }
    }

    /// Build an error from an errno value as sent by a daemon.
    ///
    /// The sign is ignored, so both `-22` and `22` map to invalid-argument.
    pub fn from_errno(errno: i32) -> Self {
        let errno = errno.saturating_abs();
        match errno {
            libc::ETIMEDOUT => Self::Timeout,
            libc::ENOSYS | libc::EOPNOTSUPP => Self::NotSupported,
            libc::EPIPE => Self::BrokenPipe,
            libc::EINVAL => Self::invalid(errno_message(errno)),
            libc::ENOMEM | libc::ENOSPC => Self::ResourceExhausted {
                errno,
                message: errno_message(errno),
            },
            libc::ENOENT | libc::ENODEV | libc::ENXIO => Self::NotFound {
                errno,
                what: errno_message(errno),
            },
            _ => Self::Transport {
                errno,
                message: errno_message(errno),
            },
        }
    }

    /// Positive errno value equivalent to this error.
    pub fn errno(&self) -> i32 {
        match self {
            Self::NotSupported => libc::ENOSYS,
            Self::InvalidArgument { .. } | Self::SizeMismatch { .. } => libc::EINVAL,
            Self::ResourceExhausted { errno, .. }
            | Self::Transport { errno, .. }
            | Self::NotFound { errno, .. } => *errno,
            Self::Timeout => libc::ETIMEDOUT,
            Self::Protocol { .. } => libc::EIO,
            Self::BrokenPipe => libc::EPIPE,
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::Xml { .. } | Self::Config { .. } => libc::EINVAL,
        }
    }

    /// Check if this is a "not supported" error.
    pub fn is_not_supported(&self) -> bool {
        matches!(self, Self::NotSupported)
    }

    /// Check if the operation timed out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// Check if this error came from the transport layer.
    ///
    /// Malformed responses count as transport errors.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Protocol { .. } | Self::BrokenPipe | Self::Io(_)
        )
    }

    /// Check if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

fn errno_message(errno: i32) -> String {
    io::Error::from_raw_os_error(errno).to_string()
}

impl From<io::Error> for IioError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timeout,
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof => Self::BrokenPipe,
            _ => Self::Io(err),
        }
    }
}

impl From<quick_xml::Error> for IioError {
    fn from(err: quick_xml::Error) -> Self {
        Self::Xml {
            message: err.to_string(),
        }
    }
}

impl From<quick_xml::events::attributes::AttrError> for IioError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        Self::Xml {
            message: err.to_string(),
        }
    }
}

impl From<figment::Error> for IioError {
    fn from(err: figment::Error) -> Self {
        Self::Config {
            message: err.to_string(),
        }
    }
}
