//! The BOOTP/DHCP message module.
pub mod constants;
pub mod hardware_type;
pub mod options;

mod codes;

mod deserializer;
mod serializer;
mod validator;

use std::{fmt, net::Ipv4Addr};

use eui48::MacAddress;

pub use self::{
    codes::{MessageType, OperationCode},
    hardware_type::HardwareType,
    options::{OptionTag, Options, RawOption},
    validator::ValidationError,
};

/// BOOTP/DHCP message.
///
/// `server_name` and `boot_filename` hold the legacy fixed-size fields without their NUL padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub operation_code: OperationCode,
    pub hardware_type: HardwareType,
    pub hardware_address_length: u8,
    pub hardware_options: u8,
    pub transaction_id: u32,
    pub seconds: u16,
    pub is_broadcast: bool,
    pub client_ip_address: Ipv4Addr,
    pub your_ip_address: Ipv4Addr,
    pub server_ip_address: Ipv4Addr,
    pub gateway_ip_address: Ipv4Addr,
    pub client_hardware_address: MacAddress,
    pub server_name: Vec<u8>,
    pub boot_filename: Vec<u8>,
    pub options: Options,
}

impl Message {
    /// Whether the sender identifies itself as a PXE boot ROM.
    pub fn is_pxe_client(&self) -> bool {
        self.options.is_pxe_client()
    }

    /// The DHCP message type name, or the BOOTP opcode for plain BOOTP.
    pub fn kind(&self) -> String {
        match self.options.dhcp_message_type {
            Some(message_type) => message_type.to_string(),
            None => self.operation_code.to_string(),
        }
    }
}

/// Prints a header field.
macro_rules! row (
    ($f:expr, $name:expr, $value:expr) => (
        writeln!($f, "{:>24} | {}", $name, $value)?;
    );
);

/// Prints an option with `Debug`.
macro_rules! dbg_opt (
    ($f:expr, $tag:expr, $option:expr) => (
        if let Some(ref v) = $option {
            let name = stringify!($option).rsplit('.').next().unwrap_or_default().trim();
            writeln!($f, "{:>18} [{:03}] | {:?}", name, $tag as u8, v)?;
        }
    );
);

/// Prints an option with `Display`.
macro_rules! dsp_opt (
    ($f:expr, $tag:expr, $option:expr) => (
        if let Some(ref v) = $option {
            let name = stringify!($option).rsplit('.').next().unwrap_or_default().trim();
            writeln!($f, "{:>18} [{:03}] | {}", name, $tag as u8, v)?;
        }
    );
);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use self::OptionTag::*;

        writeln!(f)?;
        writeln!(f, "-- {} {:#010x} --", self.kind(), self.transaction_id)?;
        row!(f, "op / htype / hlen / hops", format_args!(
            "{} / {} / {} / {}",
            self.operation_code, self.hardware_type, self.hardware_address_length, self.hardware_options
        ));
        row!(f, "secs / broadcast", format_args!("{} / {}", self.seconds, self.is_broadcast));
        row!(f, "ciaddr", self.client_ip_address);
        row!(f, "yiaddr", self.your_ip_address);
        row!(f, "siaddr", self.server_ip_address);
        row!(f, "giaddr", self.gateway_ip_address);
        row!(f, "chaddr", self.client_hardware_address.to_hex_string());
        row!(f, "sname", String::from_utf8_lossy(&self.server_name));
        row!(f, "file", String::from_utf8_lossy(&self.boot_filename));

        dsp_opt!(f, DhcpMessageType, self.options.dhcp_message_type);
        dsp_opt!(f, DhcpServerId, self.options.dhcp_server_id);
        dbg_opt!(f, AddressTime, self.options.address_time);
        dsp_opt!(f, SubnetMask, self.options.subnet_mask);
        dbg_opt!(f, Routers, self.options.routers);
        dbg_opt!(f, DomainNameServers, self.options.domain_name_servers);
        dbg_opt!(f, TftpServerName, self.options.tftp_server_name);
        dbg_opt!(f, BootfileName, self.options.bootfile_name);
        if let Some(ref class_id) = self.options.class_id {
            writeln!(f, "{:>18} [{:03}] | {}", "class_id", ClassId as u8, String::from_utf8_lossy(class_id))?;
        }
        dbg_opt!(f, VendorSpecific, self.options.vendor_specific);
        for option in self.options.other.iter() {
            writeln!(f, "{:>18} [{:03}] | {:?}", OptionTag::from(option.tag).to_string(), option.tag, option.value)?;
        }
        Ok(())
    }
}
