//! TFTP packet deserialization module (using `nom`).

use bytes::Bytes;
use nom::{
    branch::alt,
    bytes::complete::{tag, take_till},
    combinator::{map, rest},
    number::complete::be_u16,
    sequence::{pair, terminated},
    IResult,
};

use super::{ErrorCode, Opcode, Packet, PacketError};

fn opcode(input: &[u8]) -> IResult<&[u8], u16> {
    be_u16(input)
}

fn string(input: &[u8]) -> IResult<&[u8], String> {
    map(
        terminated(take_till(|byte: u8| byte == 0), tag(&b"\0"[..])),
        |value: &[u8]| String::from_utf8_lossy(value).into_owned(),
    )(input)
}

/// Some clients omit the NUL after an error message.
fn message(input: &[u8]) -> IResult<&[u8], String> {
    alt((
        string,
        map(rest, |value: &[u8]| String::from_utf8_lossy(value).into_owned()),
    ))(input)
}

fn request(input: &[u8]) -> IResult<&[u8], (String, String)> {
    pair(string, string)(input)
}

fn data(input: &[u8]) -> IResult<&[u8], (u16, &[u8])> {
    pair(be_u16, rest)(input)
}

fn error(input: &[u8]) -> IResult<&[u8], (u16, String)> {
    pair(be_u16, message)(input)
}

pub(super) fn parse_packet(input: &[u8]) -> Result<Packet, PacketError> {
    let (input, code) = opcode(input).map_err(|_| PacketError::Truncated)?;

    if code == Opcode::ReadRequest as u16 || code == Opcode::WriteRequest as u16 {
        let (_, (filename, mode)) = request(input).map_err(|_| PacketError::Malformed("request"))?;
        if code == Opcode::ReadRequest as u16 {
            Ok(Packet::ReadRequest { filename, mode })
        } else {
            Ok(Packet::WriteRequest { filename, mode })
        }
    } else if code == Opcode::Data as u16 {
        let (_, (block, payload)) = data(input).map_err(|_| PacketError::Malformed("data"))?;
        Ok(Packet::Data {
            block,
            payload: Bytes::copy_from_slice(payload),
        })
    } else if code == Opcode::Ack as u16 {
        let (_, block) = be_u16::<_, nom::error::Error<&[u8]>>(input)
            .map_err(|_| PacketError::Malformed("acknowledgement"))?;
        Ok(Packet::Ack { block })
    } else if code == Opcode::Error as u16 {
        let (_, (code, message)) = error(input).map_err(|_| PacketError::Malformed("error"))?;
        Ok(Packet::Error {
            code: ErrorCode::from(code),
            message,
        })
    } else {
        Err(PacketError::UnknownOpcode(code))
    }
}
