use std::time::Duration;

/// An error type for the controller link.
///
/// Framing corruption never shows up here, the resynchronizer recovers from
/// it locally. Everything in this enum stops the link.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The scheduler fell behind and the verified-frame queue filled up.
    #[error("verified-frame queue overflowed (capacity {capacity})")]
    QueueOverflow { capacity: usize },
    /// The transport did not accept a command frame in time.
    #[error("transport write timed out after {0:?}")]
    WriteTimeout(Duration),
    /// Other IO error in the underlying transport.
    #[error("transport io error: {0}")]
    Io(#[from] std::io::Error),
    /// A telemetry payload was shorter than its fixed layout.
    #[error("telemetry payload is {len} bytes, expected {expected}")]
    Decode { len: usize, expected: usize },
    /// A [crate::LinkConfig] failed validation.
    #[error("invalid link configuration: {0}")]
    Config(String),
    /// The other end of the link went away.
    #[error("link closed")]
    Closed,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<crate::transport::TransportError> for Error {
    fn from(other: crate::transport::TransportError) -> Self {
        match other {
            crate::transport::TransportError::Timeout(t) => Self::WriteTimeout(t),
            crate::transport::TransportError::Io(e) => Self::Io(e),
        }
    }
}
