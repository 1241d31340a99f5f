use crate::controller::decoder::DecoderError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Unsupported controller family: {0}")]
    UnsupportedFamily(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<DecoderError> for DeviceError {
    fn from(err: DecoderError) -> Self {
        DeviceError::UnsupportedFamily(err.to_string())
    }
}

/// Failure on an already open channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Device disconnected: {0}")]
    Disconnected(String),

    #[error("I/O error: {0}")]
    Io(String),
}
