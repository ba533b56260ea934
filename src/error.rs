//! Error types returned synchronously by the client handle.

use crate::transport::error::TransportError;
use crate::upload::UploadError;

/// Result alias used throughout the client surface.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors reported directly to the caller of a client operation.
///
/// Asynchronous outcomes (acknowledgements, retries, timeouts) are never
/// returned through this type; they reach the callback registered with the
/// submission instead.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Error {
    /// A destroyed handle, malformed input, unknown option, wrong option value
    /// type or unknown method id. Nothing was changed.
    InvalidArgument,
    /// No cloud-to-device message has been received yet.
    NoMessageReceived,
    /// The transport has no blob upload service.
    NotSupported,
    /// The transport refused a synchronous request.
    Transport(TransportError),
    /// A blob upload ended in the `Aborted` state.
    Upload(UploadError),
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        Error::Transport(err)
    }
}

impl From<UploadError> for Error {
    fn from(err: UploadError) -> Self {
        Error::Upload(err)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Error::InvalidArgument => defmt::write!(f, "InvalidArgument"),
            Error::NoMessageReceived => defmt::write!(f, "NoMessageReceived"),
            Error::NotSupported => defmt::write!(f, "NotSupported"),
            Error::Transport(err) => defmt::write!(f, "Transport({})", err),
            Error::Upload(err) => defmt::write!(f, "Upload({})", err),
        }
    }
}
