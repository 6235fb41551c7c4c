//! Codec error types.

use thiserror::Error;

/// Returned by `Message::from_bytes`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Truncated BOOTP message of {length} bytes")]
    Truncated { length: usize },
}

/// Returned by `Message::to_bytes`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("Buffer is too small")]
    BufferTooSmall,
    #[error("Field `{field}` is {length} bytes long, while only {capacity} fit")]
    FieldTooLong {
        field: &'static str,
        length: usize,
        capacity: usize,
    },
    #[error("Option {tag} is {length} bytes long, while only 255 fit")]
    OptionTooLong { tag: u8, length: usize },
}

/// Returned by `Packet::from_bytes`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("Truncated TFTP packet")]
    Truncated,
    #[error("Malformed TFTP {0}")]
    Malformed(&'static str),
    #[error("Unknown TFTP opcode {0}")]
    UnknownOpcode(u16),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(
            DecodeError::Truncated { length: 12 }.to_string(),
            "Truncated BOOTP message of 12 bytes"
        );
        assert_eq!(
            EncodeError::FieldTooLong {
                field: "boot_filename",
                length: 200,
                capacity: 128
            }
            .to_string(),
            "Field `boot_filename` is 200 bytes long, while only 128 fit"
        );
        assert_eq!(PacketError::UnknownOpcode(9).to_string(), "Unknown TFTP opcode 9");
    }
}
