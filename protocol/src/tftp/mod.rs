//! TFTP packet module (RFC 1350).
//!
//! Only what a read-only, fixed block size server needs: requests are parsed,
//! `DATA` and `ERROR` are produced, option extensions are ignored.

mod parser;

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

pub use crate::error::PacketError;

/// The fixed payload size of a `DATA` packet.
pub const BLOCK_SIZE: usize = 512;

/// The opcode and block number in front of a `DATA` payload.
pub const SIZE_DATA_HEADER: usize = 4;

/// The largest packet a lock-step transfer exchanges.
pub const SIZE_PACKET_MAXIMAL: usize = SIZE_DATA_HEADER + BLOCK_SIZE;

/// TFTP opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    ReadRequest = 1,
    WriteRequest,
    Data,
    Ack,
    Error,
}

/// TFTP error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NotDefined = 0,
    FileNotFound,
    AccessViolation,
    DiskFull,
    IllegalOperation,
    UnknownTransferId,
    FileExists,
    NoSuchUser,
}

impl From<u16> for ErrorCode {
    fn from(value: u16) -> Self {
        use self::ErrorCode::*;
        match value {
            1 => FileNotFound,
            2 => AccessViolation,
            3 => DiskFull,
            4 => IllegalOperation,
            5 => UnknownTransferId,
            6 => FileExists,
            7 => NoSuchUser,

            _ => NotDefined,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use self::ErrorCode::*;
        match self {
            NotDefined => write!(f, "Not defined"),
            FileNotFound => write!(f, "File not found"),
            AccessViolation => write!(f, "Access violation"),
            DiskFull => write!(f, "Disk full or allocation exceeded"),
            IllegalOperation => write!(f, "Illegal TFTP operation"),
            UnknownTransferId => write!(f, "Unknown transfer ID"),
            FileExists => write!(f, "File already exists"),
            NoSuchUser => write!(f, "No such user"),
        }
    }
}

/// TFTP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    ReadRequest { filename: String, mode: String },
    WriteRequest { filename: String, mode: String },
    Data { block: u16, payload: Bytes },
    Ack { block: u16 },
    Error { code: ErrorCode, message: String },
}

impl Packet {
    /// An `ERROR` packet with the standard wording of the `code`.
    pub fn error(code: ErrorCode) -> Self {
        Packet::Error {
            code,
            message: code.to_string(),
        }
    }

    /// TFTP packet deserialization.
    ///
    /// Request options after the mode (RFC 2347) are ignored.
    ///
    /// # Errors
    /// `PacketError` if the packet is truncated, malformed or has an unknown opcode.
    pub fn from_bytes(src: &[u8]) -> Result<Self, PacketError> {
        parser::parse_packet(src)
    }

    /// TFTP packet serialization.
    pub fn to_bytes(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(SIZE_PACKET_MAXIMAL);
        match self {
            Packet::ReadRequest { filename, mode } => {
                dst.put_u16(Opcode::ReadRequest as u16);
                put_string(&mut dst, filename);
                put_string(&mut dst, mode);
            },
            Packet::WriteRequest { filename, mode } => {
                dst.put_u16(Opcode::WriteRequest as u16);
                put_string(&mut dst, filename);
                put_string(&mut dst, mode);
            },
            Packet::Data { block, payload } => {
                dst.put_u16(Opcode::Data as u16);
                dst.put_u16(*block);
                dst.put_slice(payload);
            },
            Packet::Ack { block } => {
                dst.put_u16(Opcode::Ack as u16);
                dst.put_u16(*block);
            },
            Packet::Error { code, message } => {
                dst.put_u16(Opcode::Error as u16);
                dst.put_u16(*code as u16);
                put_string(&mut dst, message);
            },
        }
        dst.freeze()
    }
}

/// Strings are NUL-terminated netascii on the wire.
fn put_string(dst: &mut BytesMut, value: &str) {
    dst.put_slice(value.as_bytes());
    dst.put_u8(0);
}
