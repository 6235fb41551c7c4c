//! Engine error types.

use std::io;

use thiserror::Error;

use pxe_framed::BindError;
use pxe_protocol::{
    tftp::{ErrorCode, Packet},
    EncodeError, ValidationError,
};

/// Fatal errors: the engine does not start or the configuration is unusable.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Unable to parse the configuration: {0}")]
    ConfigFormat(#[from] serde_yaml::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Bind(#[from] BindError),
    #[error("No interface could be bound for DHCP")]
    NoInterfaces,
}

/// A reply that could not be built. The request is dropped, the listener keeps running.
#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("The reply does not fit into {limit} bytes even without optional options")]
    Overflow { limit: usize },
    #[error("Unable to encode the reply: {0}")]
    Encode(#[from] EncodeError),
    #[error("The reply is unusable for a PXE client: {0}")]
    Incomplete(#[from] ValidationError),
}

/// A TFTP transfer that did not complete. Only the session is terminated.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("Access outside of the boot root: {0}")]
    AccessViolation(String),
    #[error("No acknowledgement for block {block}")]
    Timeout { block: u16 },
    #[error("Aborted by the peer: {code}: {message}")]
    Aborted { code: ErrorCode, message: String },
    #[error("Interrupted by shutdown")]
    Shutdown,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransferError {
    /// The `ERROR` packet the peer gets, if the protocol has one for this failure.
    ///
    /// Escape attempts are answered like missing files.
    pub fn to_packet(&self) -> Option<Packet> {
        match self {
            TransferError::NotFound(_) | TransferError::AccessViolation(_) => Some(Packet::error(ErrorCode::FileNotFound)),
            TransferError::Io(error) => Some(Packet::Error {
                code: ErrorCode::NotDefined,
                message: error.to_string(),
            }),
            TransferError::Timeout { .. } | TransferError::Aborted { .. } | TransferError::Shutdown => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(
            Error::Config("pool size must be positive".to_owned()).to_string(),
            "Invalid configuration: pool size must be positive"
        );
        assert_eq!(
            EncodingError::Overflow { limit: 576 }.to_string(),
            "The reply does not fit into 576 bytes even without optional options"
        );
        assert_eq!(
            EncodingError::from(ValidationError::Validation("bootfile_name")).to_string(),
            "The reply is unusable for a PXE client: Validation error: bootfile_name"
        );
    }

    #[test]
    fn transfer_error_packets() {
        assert_eq!(
            TransferError::AccessViolation("../../etc/passwd".to_owned()).to_packet(),
            Some(Packet::error(ErrorCode::FileNotFound))
        );
        assert_eq!(
            TransferError::NotFound("pxelinux.0".to_owned()).to_packet(),
            Some(Packet::Error {
                code: ErrorCode::FileNotFound,
                message: "File not found".to_owned(),
            })
        );
        assert_eq!(TransferError::Timeout { block: 4 }.to_packet(), None);
        assert_eq!(TransferError::Timeout { block: 4 }.to_string(), "No acknowledgement for block 4");
    }
}
