//! Common error types for transport operations

/// An error reported by a transport binding.
///
/// The client core only cares about the class of failure: transient failures
/// are retried under the active retry policy, everything else fails the
/// affected operation.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TransportError {
    /// The operation needs an open connection.
    NotConnected,
    /// The operation failed but may succeed if attempted again.
    Transient,
    /// The service refused the request. Retrying will not help.
    Rejected,
    /// Authentication was refused or a protocol violation occurred.
    Fatal,
    /// The transport does not implement the requested feature or option.
    Unsupported,
}

impl TransportError {
    /// Whether the retry policy should be consulted for this failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Transient | TransportError::NotConnected)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for TransportError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            TransportError::NotConnected => defmt::write!(f, "NotConnected"),
            TransportError::Transient => defmt::write!(f, "Transient"),
            TransportError::Rejected => defmt::write!(f, "Rejected"),
            TransportError::Fatal => defmt::write!(f, "Fatal"),
            TransportError::Unsupported => defmt::write!(f, "Unsupported"),
        }
    }
}
