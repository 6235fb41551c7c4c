//! DHCP message deserialization module.

use std::{cmp, net::Ipv4Addr};

use bytes::Buf;
use eui48::MacAddress;

use super::{constants::*, options::Options, options::OptionTag, Message};
use crate::error::DecodeError;

/// A range from the current cursor position to the specified distance.
macro_rules! distance(
    ($src:expr, $cursor:expr, $distance:expr) => (
        ($src.len() - $cursor.remaining())..($src.len() - $cursor.remaining() + $distance)
    );
);

impl Message {
    /// DHCP message deserialization.
    ///
    /// A message without the magic cookie is plain BOOTP and gets no options.
    /// The options area is read leniently: a truncated trailing option ends it
    /// and anything malformed is kept verbatim in `Options::other`.
    ///
    /// # Errors
    /// `DecodeError::Truncated` if the fixed header is incomplete.
    pub fn from_bytes(src: &[u8]) -> Result<Self, DecodeError> {
        if src.len() < SIZE_HEADER_MINIMAL {
            return Err(DecodeError::Truncated { length: src.len() });
        }
        let mut cursor = src;

        let mut message = Message {
            operation_code: cursor.get_u8().into(),
            hardware_type: cursor.get_u8().into(),
            hardware_address_length: cmp::min(cursor.get_u8(), SIZE_HARDWARE_ADDRESS as u8),
            hardware_options: cursor.get_u8(),
            transaction_id: cursor.get_u32(),
            seconds: cursor.get_u16(),
            // https://tools.ietf.org/html/rfc2131#section-2
            // Leftmost bit (0 bit) is most significant
            is_broadcast: cursor.get_u16() & FLAG_BROADCAST != 0,
            client_ip_address: Ipv4Addr::from(cursor.get_u32()),
            your_ip_address: Ipv4Addr::from(cursor.get_u32()),
            server_ip_address: Ipv4Addr::from(cursor.get_u32()),
            gateway_ip_address: Ipv4Addr::from(cursor.get_u32()),
            client_hardware_address: MacAddress::default(),
            server_name: Vec::new(),
            boot_filename: Vec::new(),
            options: Options::default(),
        };

        let length = cmp::min(message.hardware_address_length as usize, SIZE_MAC48);
        let mut mac = [0u8; SIZE_MAC48];
        mac[..length].copy_from_slice(&src[distance!(src, cursor, length)]);
        message.client_hardware_address = MacAddress::new(mac);
        cursor.advance(SIZE_HARDWARE_ADDRESS);

        message.server_name = trim_nul(&src[distance!(src, cursor, SIZE_SERVER_NAME)]);
        cursor.advance(SIZE_SERVER_NAME);
        message.boot_filename = trim_nul(&src[distance!(src, cursor, SIZE_BOOT_FILENAME)]);
        cursor.advance(SIZE_BOOT_FILENAME);

        if cursor.get_u32() == MAGIC_COOKIE {
            Self::append_options(cursor, &mut message.options);
        }

        Ok(message)
    }

    fn append_options(mut cursor: &[u8], options: &mut Options) {
        while cursor.has_remaining() {
            let tag = cursor.get_u8();
            match OptionTag::from(tag) {
                OptionTag::Pad => continue,
                OptionTag::End => break,
                _ => {},
            }

            if !cursor.has_remaining() {
                break;
            }
            let length = cursor.get_u8() as usize;
            if cursor.remaining() < length {
                break;
            }
            options.insert(tag, &cursor[..length]);
            cursor.advance(length);
        }
    }
}

/// Legacy fields are NUL-padded on the wire.
fn trim_nul(field: &[u8]) -> Vec<u8> {
    let length = field
        .iter()
        .rposition(|byte| *byte != 0)
        .map(|position| position + 1)
        .unwrap_or(0);
    field[..length].to_vec()
}
