//! DHCP message serialization module.

use std::{mem, net::Ipv4Addr};

use bytes::BufMut;

use super::{
    constants::*,
    options::{is_data_tag, OptionTag},
    Message, MessageType,
};
use crate::error::EncodeError;

/// Checks if there is enough space in buffer to put a value.
macro_rules! check_remaining(
    ($cursor:expr, $distance:expr) => (
        if $cursor.remaining_mut() < $distance {
            return Err(EncodeError::BufferTooSmall);
        }
    )
);

impl Message {
    /// DHCP message serialization.
    ///
    /// Options are written in a fixed order: 53, 54, 51, 1, 3, 6, 66, 67, 60, 43,
    /// then the untyped ones as stored, then `End`.
    ///
    /// # Errors
    /// `EncodeError::BufferTooSmall` if the message does not fit into `dst`.
    /// `EncodeError::FieldTooLong` or `EncodeError::OptionTooLong` if a value cannot be represented.
    pub fn to_bytes(&self, dst: &mut [u8]) -> Result<usize, EncodeError> {
        use self::OptionTag::*;

        let capacity = dst.len();
        let mut cursor = dst;
        check_remaining!(cursor, SIZE_HEADER_MINIMAL);
        cursor.put_u8(self.operation_code.into());
        cursor.put_u8(self.hardware_type.into());
        cursor.put_u8(self.hardware_address_length);
        cursor.put_u8(self.hardware_options);
        cursor.put_u32(self.transaction_id);
        cursor.put_u16(self.seconds);
        cursor.put_u16(if self.is_broadcast { FLAG_BROADCAST } else { 0x0000 });
        cursor.put_u32(u32::from(self.client_ip_address));
        cursor.put_u32(u32::from(self.your_ip_address));
        cursor.put_u32(u32::from(self.server_ip_address));
        cursor.put_u32(u32::from(self.gateway_ip_address));
        cursor.put_slice(self.client_hardware_address.as_bytes()); // 6 byte MAC-48
        cursor.put_bytes(0, SIZE_HARDWARE_ADDRESS - SIZE_MAC48); // 10 byte padding
        Self::put_legacy(&mut cursor, "server_name", &self.server_name, SIZE_SERVER_NAME)?;
        Self::put_legacy(&mut cursor, "boot_filename", &self.boot_filename, SIZE_BOOT_FILENAME)?;
        cursor.put_u32(MAGIC_COOKIE);

        Self::put_message_type(&mut cursor, DhcpMessageType, &self.options.dhcp_message_type)?;
        Self::put_ipv4(&mut cursor, DhcpServerId, &self.options.dhcp_server_id)?;
        Self::put_u32(&mut cursor, AddressTime, &self.options.address_time)?;
        Self::put_ipv4(&mut cursor, SubnetMask, &self.options.subnet_mask)?;
        Self::put_vec_ipv4(&mut cursor, Routers, &self.options.routers)?;
        Self::put_vec_ipv4(&mut cursor, DomainNameServers, &self.options.domain_name_servers)?;
        Self::put_string(&mut cursor, TftpServerName, &self.options.tftp_server_name)?;
        Self::put_string(&mut cursor, BootfileName, &self.options.bootfile_name)?;
        Self::put_vec(&mut cursor, ClassId, &self.options.class_id)?;
        Self::put_vec(&mut cursor, VendorSpecific, &self.options.vendor_specific)?;
        for option in self.options.other.iter().filter(|option| is_data_tag(option.tag)) {
            Self::put_option(&mut cursor, option.tag, &option.value)?;
        }

        check_remaining!(cursor, mem::size_of::<u8>());
        cursor.put_u8(End as u8);
        Ok(capacity - cursor.remaining_mut())
    }

    /// Serializes into a buffer of the minimal size every DHCP client accepts.
    ///
    /// # Errors
    /// The same as `Message::to_bytes`.
    pub fn to_vec(&self) -> Result<Vec<u8>, EncodeError> {
        let mut buffer = [0u8; SIZE_MESSAGE_MINIMAL];
        let amount = self.to_bytes(&mut buffer)?;
        Ok(buffer[..amount].to_vec())
    }

    fn put_legacy(
        cursor      : &mut &mut [u8],
        field       : &'static str,
        value       : &[u8],
        capacity    : usize,
    ) -> Result<(), EncodeError> {
        if value.len() > capacity {
            return Err(EncodeError::FieldTooLong {
                field,
                length: value.len(),
                capacity,
            });
        }
        cursor.put_slice(value);
        cursor.put_bytes(0, capacity - value.len()); // (capacity - length) byte padding
        Ok(())
    }

    fn put_option(
        cursor      : &mut &mut [u8],
        tag         : u8,
        value       : &[u8],
    ) -> Result<(), EncodeError> {
        if value.len() > SIZE_OPTION_MAXIMAL {
            return Err(EncodeError::OptionTooLong {
                tag,
                length: value.len(),
            });
        }
        check_remaining!(cursor, SIZE_OPTION_PREFIX + value.len());
        cursor.put_u8(tag);
        cursor.put_u8(value.len() as u8);
        cursor.put_slice(value);
        Ok(())
    }

    fn put_message_type(
        cursor      : &mut &mut [u8],
        tag         : OptionTag,
        value       : &Option<MessageType>,
    ) -> Result<(), EncodeError> {
        if let Some(value) = value {
            Self::put_option(cursor, tag as u8, &[(*value).into()])?;
        }
        Ok(())
    }

    fn put_u32(
        cursor      : &mut &mut [u8],
        tag         : OptionTag,
        value       : &Option<u32>,
    ) -> Result<(), EncodeError> {
        if let Some(value) = value {
            Self::put_option(cursor, tag as u8, &value.to_be_bytes())?;
        }
        Ok(())
    }

    fn put_ipv4(
        cursor      : &mut &mut [u8],
        tag         : OptionTag,
        value       : &Option<Ipv4Addr>,
    ) -> Result<(), EncodeError> {
        if let Some(value) = value {
            Self::put_option(cursor, tag as u8, &value.octets())?;
        }
        Ok(())
    }

    fn put_string(
        cursor      : &mut &mut [u8],
        tag         : OptionTag,
        value       : &Option<String>,
    ) -> Result<(), EncodeError> {
        if let Some(value) = value {
            Self::put_option(cursor, tag as u8, value.as_bytes())?;
        }
        Ok(())
    }

    fn put_vec(
        cursor      : &mut &mut [u8],
        tag         : OptionTag,
        value       : &Option<Vec<u8>>,
    ) -> Result<(), EncodeError> {
        if let Some(value) = value {
            Self::put_option(cursor, tag as u8, value)?;
        }
        Ok(())
    }

    fn put_vec_ipv4(
        cursor      : &mut &mut [u8],
        tag         : OptionTag,
        value       : &Option<Vec<Ipv4Addr>>,
    ) -> Result<(), EncodeError> {
        match value {
            Some(value) if !value.is_empty() => {
                let bytes: Vec<u8> = value.iter().flat_map(|element| element.octets().to_vec()).collect();
                Self::put_option(cursor, tag as u8, &bytes)
            },
            _ => Ok(()),
        }
    }
}
