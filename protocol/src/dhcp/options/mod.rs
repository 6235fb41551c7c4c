//! DHCP options module.

mod option_tag;

pub use self::option_tag::OptionTag;

use std::{convert::TryInto, mem, net::Ipv4Addr};

use super::{codes::MessageType, constants::PXE_CLIENT_CLASS};

/// The PXE vendor sub-option with the discovery control bits (PXE 2.1 §2.4).
pub const PXE_DISCOVERY_CONTROL: u8 = 6;

/// Discovery control bit 3: download the boot file named in the offer without a boot server discovery.
pub const PXE_DISCOVERY_USE_BOOTFILE: u8 = 0b0000_1000;

/// Stores a value into an empty typed field.
///
/// Evaluates to `false` if the field is already set or the value is malformed,
/// which makes the caller keep the option verbatim.
macro_rules! store_once (
    ($field:expr, $value:expr) => (
        match ($field.is_none(), $value) {
            (true, Some(value)) => {
                $field = Some(value);
                true
            },
            _ => false,
        }
    );
);

/// DHCP options.
///
/// The options a PXE exchange depends on are typed. Everything else is kept in `other`
/// in the order it was received or added, so a decode-encode cycle loses nothing.
///
/// [RFC 2132](https://tools.ietf.org/html/rfc2132)
/// [RFC 4578](https://tools.ietf.org/html/rfc4578)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    // DHCP Extensions (RFC 2132 §9)
    pub dhcp_message_type: Option<MessageType>,
    pub dhcp_server_id: Option<Ipv4Addr>,
    pub address_time: Option<u32>,
    // RFC 1497 Vendor Extensions (RFC 2132 §3)
    pub subnet_mask: Option<Ipv4Addr>,
    pub routers: Option<Vec<Ipv4Addr>>,
    pub domain_name_servers: Option<Vec<Ipv4Addr>>,
    // Boot server and file (RFC 2132 §9.4, §9.5)
    pub tftp_server_name: Option<String>,
    pub bootfile_name: Option<String>,
    // Vendor class and its payload (RFC 2132 §9.13, §8.4)
    pub class_id: Option<Vec<u8>>,
    pub vendor_specific: Option<Vec<u8>>,

    pub other: Vec<RawOption>,
}

/// An option without a typed field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOption {
    pub tag: u8,
    pub value: Vec<u8>,
}

impl Options {
    /// Stores a received option.
    ///
    /// Known tags with a well-formed value land in their typed field,
    /// anything else is appended to `other` as is.
    pub fn insert(&mut self, tag: u8, value: &[u8]) {
        use self::OptionTag::*;

        let is_typed = match OptionTag::from(tag) {
            DhcpMessageType => store_once!(self.dhcp_message_type, get_message_type(value)),
            DhcpServerId => store_once!(self.dhcp_server_id, get_ipv4(value)),
            AddressTime => store_once!(self.address_time, get_u32(value)),
            SubnetMask => store_once!(self.subnet_mask, get_ipv4(value)),
            Routers => store_once!(self.routers, get_vec_ipv4(value)),
            DomainNameServers => store_once!(self.domain_name_servers, get_vec_ipv4(value)),
            TftpServerName => store_once!(self.tftp_server_name, get_string(value)),
            BootfileName => store_once!(self.bootfile_name, get_string(value)),
            ClassId => store_once!(self.class_id, Some(value.to_vec())),
            VendorSpecific => store_once!(self.vendor_specific, Some(value.to_vec())),
            _ => false,
        };

        if !is_typed {
            self.push_raw(tag, value.to_vec());
        }
    }

    /// Appends an option without a typed field.
    pub fn push_raw(&mut self, tag: u8, value: Vec<u8>) {
        self.other.push(RawOption { tag, value });
    }

    /// The first untyped option with the `tag`.
    pub fn raw(&self, tag: u8) -> Option<&[u8]> {
        self.other
            .iter()
            .find(|option| option.tag == tag)
            .map(|option| option.value.as_slice())
    }

    /// The address the client asks for in a DHCPREQUEST.
    pub fn address_request(&self) -> Option<Ipv4Addr> {
        self.raw(OptionTag::AddressRequest as u8).and_then(get_ipv4)
    }

    /// Whether the class identifier marks a PXE boot ROM.
    pub fn is_pxe_client(&self) -> bool {
        self.class_id
            .as_ref()
            .map(|class_id| class_id.starts_with(PXE_CLIENT_CLASS.as_bytes()))
            .unwrap_or(false)
    }

    /// Option 43 payload telling a PXE ROM to skip the boot server discovery.
    pub fn pxe_vendor_specific() -> Vec<u8> {
        vec![
            PXE_DISCOVERY_CONTROL,
            mem::size_of::<u8>() as u8,
            PXE_DISCOVERY_USE_BOOTFILE,
            OptionTag::End as u8,
        ]
    }

    /// Tags in the order the serializer emits them, without the `End` marker.
    pub fn tags(&self) -> Vec<u8> {
        use self::OptionTag::*;

        let typed = [
            (DhcpMessageType, self.dhcp_message_type.is_some()),
            (DhcpServerId, self.dhcp_server_id.is_some()),
            (AddressTime, self.address_time.is_some()),
            (SubnetMask, self.subnet_mask.is_some()),
            (Routers, is_non_empty(&self.routers)),
            (DomainNameServers, is_non_empty(&self.domain_name_servers)),
            (TftpServerName, self.tftp_server_name.is_some()),
            (BootfileName, self.bootfile_name.is_some()),
            (ClassId, self.class_id.is_some()),
            (VendorSpecific, self.vendor_specific.is_some()),
        ];

        typed
            .iter()
            .filter(|(_, is_set)| *is_set)
            .map(|(tag, _)| *tag as u8)
            .chain(
                self.other
                    .iter()
                    .map(|option| option.tag)
                    .filter(|tag| is_data_tag(*tag)),
            )
            .collect()
    }
}

/// `Pad` and `End` are framing, not data.
pub(crate) fn is_data_tag(tag: u8) -> bool {
    tag != OptionTag::Pad as u8 && tag != OptionTag::End as u8
}

fn is_non_empty(value: &Option<Vec<Ipv4Addr>>) -> bool {
    value.as_ref().map(|list| !list.is_empty()).unwrap_or(false)
}

fn get_message_type(value: &[u8]) -> Option<MessageType> {
    match value {
        [byte] => match MessageType::from(*byte) {
            MessageType::Undefined => None,
            message_type => Some(message_type),
        },
        _ => None,
    }
}

fn get_u32(value: &[u8]) -> Option<u32> {
    value.try_into().ok().map(u32::from_be_bytes)
}

fn get_ipv4(value: &[u8]) -> Option<Ipv4Addr> {
    get_u32(value).map(Ipv4Addr::from)
}

fn get_vec_ipv4(value: &[u8]) -> Option<Vec<Ipv4Addr>> {
    let size = mem::size_of::<u32>();
    if value.is_empty() || value.len() % size != 0 {
        return None;
    }
    value.chunks(size).map(get_ipv4).collect()
}

fn get_string(value: &[u8]) -> Option<String> {
    String::from_utf8(value.to_vec()).ok()
}
