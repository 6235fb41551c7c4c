//! The one-byte codes: the BOOTP opcode and the DHCP message type.

use std::fmt;

/// Declares a one-byte code, its wire values and the names it is printed with.
///
/// 0 maps to the undefined variant, other unknown values are kept in `Other`.
macro_rules! byte_code (
    (
        $(#[$meta:meta])*
        $name:ident, $undefined:ident => $undefined_name:expr,
        { $($variant:ident = $value:expr => $display:expr,)+ }
    ) => (
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $undefined,
            $($variant,)+
            Other(u8),
        }

        impl From<u8> for $name {
            fn from(value: u8) -> Self {
                match value {
                    0 => $name::$undefined,
                    $($value => $name::$variant,)+
                    other => $name::Other(other),
                }
            }
        }

        impl From<$name> for u8 {
            fn from(value: $name) -> Self {
                match value {
                    $name::$undefined => 0,
                    $($name::$variant => $value,)+
                    $name::Other(other) => other,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                match self {
                    $($name::$variant => write!(f, "{}", $display),)+
                    $name::$undefined => write!(f, "{}", $undefined_name),
                    $name::Other(other) => write!(f, "{}({})", $undefined_name, other),
                }
            }
        }
    );
);

byte_code!(
    /// BOOTP opcode (RFC 951).
    OperationCode, Undefined => "UNDEFINED",
    {
        BootRequest = 1 => "BOOTREQUEST",
        BootReply = 2 => "BOOTREPLY",
    }
);

byte_code!(
    /// DHCP message type (RFC 2132 §9.6).
    MessageType, Undefined => "UNDEFINED",
    {
        DhcpDiscover = 1 => "DHCPDISCOVER",
        DhcpOffer = 2 => "DHCPOFFER",
        DhcpRequest = 3 => "DHCPREQUEST",
        DhcpDecline = 4 => "DHCPDECLINE",
        DhcpAck = 5 => "DHCPACK",
        DhcpNak = 6 => "DHCPNAK",
        DhcpRelease = 7 => "DHCPRELEASE",
        DhcpInform = 8 => "DHCPINFORM",
    }
);
