//! DHCP reply validation module.

use thiserror::Error;

use super::{Message, MessageType, OperationCode};

/// The error type returned by `Message::validate_pxe_reply`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Validation error: {0}")]
    Validation(&'static str),
}

macro_rules! must_set_option (
    ($name:expr, $error:expr) => ( if $name.is_none() { return Err(ValidationError::Validation($error)); } );
);

macro_rules! must_not_be_empty (
    ($name:expr, $error:expr) => (
        if $name.as_ref().map(|value| value.is_empty()).unwrap_or(true) {
            return Err(ValidationError::Validation($error));
        }
    );
);

impl Message {
    /// Checks that a reply carries everything a PXE ROM needs to fetch its boot file.
    ///
    /// Returns the DHCP message type on successful validation.
    ///
    /// # Errors
    /// Returns `ValidationError::Validation` naming the first missing piece.
    pub fn validate_pxe_reply(&self) -> Result<MessageType, ValidationError> {
        if self.operation_code != OperationCode::BootReply {
            return Err(ValidationError::Validation("operation_code"));
        }

        let dhcp_message_type = match self.options.dhcp_message_type {
            Some(MessageType::Undefined) | None => return Err(ValidationError::Validation("dhcp_message_type")),
            Some(dhcp_message_type) => dhcp_message_type,
        };

        match dhcp_message_type {
            MessageType::DhcpOffer | MessageType::DhcpAck => {
                must_set_option!(self.options.dhcp_server_id, "dhcp_server_id");
                must_not_be_empty!(self.options.tftp_server_name, "tftp_server_name");
                must_not_be_empty!(self.options.bootfile_name, "bootfile_name");
            },
            _ => return Err(ValidationError::Validation("Not a PXE reply message type")),
        }

        Ok(dhcp_message_type)
    }
}
