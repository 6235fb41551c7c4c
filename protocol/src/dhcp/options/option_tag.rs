//! DHCP option tags module.

use std::fmt;

/// DHCP option codes the bridge reads or writes.
///
/// Everything else is carried through as a `RawOption`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionTag {
    Pad = 0,

    // RFC 1497 Vendor Extensions (RFC 2132 §3)
    SubnetMask = 1,
    Routers = 3,
    DomainNameServers = 6,
    Hostname = 12,
    // Application and Service Parameters (RFC 2132 §8)
    VendorSpecific = 43,
    // DHCP Extensions (RFC 2132 §9)
    AddressRequest = 50,
    AddressTime = 51,
    Overload = 52,
    DhcpMessageType = 53,
    DhcpServerId = 54,
    ParameterList = 55,
    DhcpMaxMessageSize = 57,
    ClassId = 60,
    ClientId = 61,
    TftpServerName = 66,
    BootfileName = 67,
    // PXE (RFC 4578)
    ClientSystemArchitecture = 93,
    ClientNetworkInterface = 94,
    ClientMachineId = 97,

    End = 255,

    Unknown,
}

impl From<u8> for OptionTag {
    fn from(value: u8) -> Self {
        use self::OptionTag::*;
        match value {
            0 => Pad,

            1 => SubnetMask,
            3 => Routers,
            6 => DomainNameServers,
            12 => Hostname,
            43 => VendorSpecific,
            50 => AddressRequest,
            51 => AddressTime,
            52 => Overload,
            53 => DhcpMessageType,
            54 => DhcpServerId,
            55 => ParameterList,
            57 => DhcpMaxMessageSize,
            60 => ClassId,
            61 => ClientId,
            66 => TftpServerName,
            67 => BootfileName,
            93 => ClientSystemArchitecture,
            94 => ClientNetworkInterface,
            97 => ClientMachineId,

            255 => End,

            _ => Unknown,
        }
    }
}

impl fmt::Display for OptionTag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
